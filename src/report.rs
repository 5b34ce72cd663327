//! Aggregation Reporter: read-only day summaries for administrators
use crate::approval::{ApprovalPolicy, DayStatus, derive_day_status};
use crate::collaborators::Organizations;
use crate::error::{OrderError, log_failure};
use crate::meal::{Day, DishReference, MealVersion};
use crate::order::Order;
use crate::policy::{Action, Actor, authorize};
use crate::store::{Store, catering_day_key, client_day_key};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryScope {
    Client(String),
    Catering(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DishTally {
    pub dish: DishReference,
    pub quantity: u64,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub scope: SummaryScope,
    pub day: Day,
    pub status: DayStatus,
    pub order_count: usize,
    pub total_amount: u64,
    /// One entry per dish id, in the order dishes were first ordered.
    pub dishes: Vec<DishTally>,
    /// Active orders only.
    pub orders: Vec<Order>,
}

impl DaySummary {
    pub fn quantity_of(&self, dish_id: &str) -> u64 {
        self.dishes
            .iter()
            .find(|tally| tally.dish.id == dish_id)
            .map_or(0, |tally| tally.quantity)
    }
}

pub struct Reporter {
    store: Store,
    organizations: Arc<dyn Organizations>,
    policy: ApprovalPolicy,
}

impl Reporter {
    pub fn new(
        store: Store,
        organizations: Arc<dyn Organizations>,
        policy: ApprovalPolicy,
    ) -> Self {
        Self {
            store,
            organizations,
            policy,
        }
    }

    pub fn summarize_client(
        &self,
        actor: &Actor,
        client_id: &str,
        day: Day,
    ) -> Result<DaySummary, OrderError> {
        self.client_summary(actor, client_id, day)
            .inspect_err(log_failure("summarize_client"))
    }

    pub fn summarize_catering(
        &self,
        actor: &Actor,
        catering_id: &str,
        day: Day,
    ) -> Result<DaySummary, OrderError> {
        self.catering_summary(actor, catering_id, day)
            .inspect_err(log_failure("summarize_catering"))
    }

    fn client_summary(
        &self,
        actor: &Actor,
        client_id: &str,
        day: Day,
    ) -> Result<DaySummary, OrderError> {
        let catering_id = self
            .organizations
            .catering_of_client(client_id)
            .ok_or(OrderError::Forbidden)?;
        authorize(
            actor,
            &Action::ViewOrders {
                catering_id: &catering_id,
                client_id: Some(client_id),
            },
        )?;

        let key = client_day_key(client_id, day);
        let orders = self.store.indexed_orders(&self.store.client_days, &key)?;
        let scope = SummaryScope::Client(client_id.to_string());
        self.aggregate(scope, day, orders)
    }

    fn catering_summary(
        &self,
        actor: &Actor,
        catering_id: &str,
        day: Day,
    ) -> Result<DaySummary, OrderError> {
        authorize(
            actor,
            &Action::ViewOrders {
                catering_id,
                client_id: None,
            },
        )?;

        let key = catering_day_key(catering_id, day);
        let orders = self.store.indexed_orders(&self.store.catering_days, &key)?;
        let scope = SummaryScope::Catering(catering_id.to_string());
        self.aggregate(scope, day, orders)
    }

    // Same aggregation for both scopes, only the order set differs.
    fn aggregate(
        &self,
        scope: SummaryScope,
        day: Day,
        orders: Vec<Order>,
    ) -> Result<DaySummary, OrderError> {
        let status = derive_day_status(&orders, &self.policy);
        let orders: Vec<Order> = orders.into_iter().filter(Order::is_active).collect();

        let mut versions: HashMap<String, MealVersion> = HashMap::new();
        let mut dishes: Vec<DishTally> = vec![];
        let mut total_amount: u64 = 0;

        for order in &orders {
            let version_id = &order.meal_version_id;
            if !versions.contains_key(version_id) {
                let Some(version) = self.store.version(version_id)? else {
                    let reason = format!("is bound to missing version {version_id}");
                    return Err(corrupt_order(order, reason));
                };
                versions.insert(version_id.clone(), version);
            }
            let version = &versions[version_id];

            for item in &order.items {
                let Some(dish) = version.dish(&item.dish_id) else {
                    let reason = format!("references unpinned dish {}", item.dish_id);
                    return Err(corrupt_order(order, reason));
                };
                let quantity = u64::from(item.quantity);
                let amount = dish.price.saturating_mul(quantity);

                match dishes.iter_mut().find(|tally| tally.dish.id == dish.id) {
                    Some(tally) => {
                        tally.quantity += quantity;
                        tally.amount = tally.amount.saturating_add(amount);
                    }
                    None => dishes.push(DishTally {
                        dish: dish.clone(),
                        quantity,
                        amount,
                    }),
                }
            }
            total_amount = total_amount.saturating_add(order.total);
        }

        debug!(?scope, %day, orders = orders.len(), total_amount, "day summarized");

        Ok(DaySummary {
            scope,
            day,
            status,
            order_count: orders.len(),
            total_amount,
            dishes,
            orders,
        })
    }
}

fn corrupt_order(order: &Order, reason: String) -> OrderError {
    OrderError::Internal(anyhow::anyhow!("order {} {reason}", order.id))
}
