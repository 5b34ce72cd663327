//! Order Ledger: one active order per user per day, bound to the version it was placed against
use crate::collaborators::{Clock, Notifier, OrderEvent, Organizations};
use crate::error::{OrderError, log_failure};
use crate::meal::{Day, MealGroup, MealVersion, TimeStamp};
use crate::order::{Order, OrderRequest};
use crate::policy::{Action, Actor, authorize};
use crate::store::{
    Store, catering_day_key, client_day_key, group_key, load_tx, push_index_tx, save_tx,
    user_day_key,
};
use crate::utils::{ORDER_HRP, new_uuid_to_bech32};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, abort};
use std::sync::Arc;
use tracing::{debug, info};

pub struct OrderLedger {
    store: Store,
    organizations: Arc<dyn Organizations>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl OrderLedger {
    pub fn new(
        store: Store,
        organizations: Arc<dyn Organizations>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            organizations,
            notifier,
            clock,
        }
    }

    /// Place an order against the day's current version.
    pub fn place_order(&self, actor: &Actor, request: OrderRequest) -> Result<Order, OrderError> {
        self.place(actor, request)
            .inspect_err(log_failure("place_order"))
    }

    /// Cancel keeps the order with its items and total. It only frees the user's day.
    pub fn cancel_order(&self, actor: &Actor, order_id: &str) -> Result<Order, OrderError> {
        self.cancel(actor, order_id)
            .inspect_err(log_failure("cancel_order"))
    }

    /// The user's active order for the day.
    pub fn user_order(&self, user_id: &str, day: Day) -> Result<Order, OrderError> {
        debug!(user = user_id, %day, "looking up user order");
        let active = self
            .store
            .active_order_id(user_id, day)
            .inspect_err(log_failure("user_order"))?;
        let Some(order_id) = active else {
            return Err(OrderError::NotFound(format!("order of {user_id} on {day}")));
        };
        self.order(&order_id)
    }

    pub fn order(&self, order_id: &str) -> Result<Order, OrderError> {
        self.store
            .order(order_id)
            .inspect_err(log_failure("order"))?
            .ok_or_else(|| OrderError::NotFound(format!("order {order_id}")))
    }

    fn place(&self, actor: &Actor, request: OrderRequest) -> Result<Order, OrderError> {
        authorize(
            actor,
            &Action::PlaceOrder {
                owner_id: &request.user_id,
                catering_id: &request.catering_id,
                client_id: &request.client_id,
            },
        )?;

        if !self
            .organizations
            .client_belongs_to_catering(&request.client_id, &request.catering_id)
        {
            return Err(OrderError::InvalidReference(format!(
                "client {} of catering {}",
                request.client_id, request.catering_id
            )));
        }

        if request.day < self.clock.today() {
            return Err(OrderError::InvalidDate(request.day));
        }

        // cheap checks before touching storage
        request.normalized_items()?;

        let meal_key = group_key(&request.catering_id, &request.client_id, request.day);
        let user_key = user_day_key(&request.user_id, request.day);
        let client_key = client_day_key(&request.client_id, request.day);
        let catering_key = catering_day_key(&request.catering_id, request.day);
        let order_id = new_uuid_to_bech32(ORDER_HRP)?;
        let placed_at = TimeStamp::from(self.clock.now());

        // the version read, the uniqueness check and the inserts form one unit
        let trees = (
            &self.store.meal_groups,
            &self.store.meal_versions,
            &self.store.orders,
            &self.store.user_days,
            &self.store.client_days,
            &self.store.catering_days,
        );

        let order = trees.transaction(|view| -> ConflictableTransactionResult<Order, OrderError> {
            let (groups, versions, orders, user_days, client_days, catering_days) = view;
            let Some(group) = load_tx::<MealGroup>(groups, &meal_key)? else {
                return abort(OrderError::NotFound(format!("meal for {meal_key}")));
            };
            let Some(current) = group.current() else {
                return abort(OrderError::NotFound(format!("meal for {meal_key}")));
            };
            let Some(version) = load_tx::<MealVersion>(versions, current)? else {
                return abort(OrderError::NotFound(format!("meal version {current}")));
            };

            if user_days.get(user_key.as_bytes())?.is_some() {
                return abort(OrderError::DuplicateOrder);
            }

            let order = match Order::place(
                order_id.clone(),
                &request,
                &version,
                &actor.user_id,
                placed_at.clone(),
            ) {
                Ok(order) => order,
                Err(err) => return abort(err),
            };

            save_tx(orders, &order.id, &order)?;
            save_tx(user_days, &user_key, &order.id)?;
            push_index_tx(client_days, &client_key, &order.id)?;
            push_index_tx(catering_days, &catering_key, &order.id)?;

            Ok(order)
        })?;

        info!(
            order = %order.id,
            user = %order.user_id,
            client = %order.client_id,
            day = %order.day,
            version = %order.meal_version_id,
            total = order.total,
            "order placed"
        );

        self.notifier.publish(OrderEvent::Placed {
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            client_id: order.client_id.clone(),
            day: order.day,
            total: order.total,
        });

        Ok(order)
    }

    fn cancel(&self, actor: &Actor, order_id: &str) -> Result<Order, OrderError> {
        let canceled_at = TimeStamp::from(self.clock.now());

        let order = (&self.store.orders, &self.store.user_days).transaction(
            |(orders, user_days)| -> ConflictableTransactionResult<Order, OrderError> {
                let Some(mut order) = load_tx::<Order>(orders, order_id)? else {
                    return abort(OrderError::NotFound(format!("order {order_id}")));
                };

                let action = Action::CancelOrder {
                    owner_id: &order.user_id,
                    catering_id: &order.catering_id,
                    client_id: &order.client_id,
                };
                if let Err(err) = authorize(actor, &action) {
                    return abort(err);
                }

                if let Err(err) = order.cancel(&actor.user_id, canceled_at.clone()) {
                    return abort(err);
                }
                save_tx(orders, &order.id, &order)?;

                let user_key = user_day_key(&order.user_id, order.day);
                let holder = load_tx::<String>(user_days, &user_key)?;
                if holder.as_deref() == Some(order.id.as_str()) {
                    user_days.remove(user_key.as_bytes())?;
                }

                Ok(order)
            },
        )?;

        info!(
            order = %order.id,
            user = %order.user_id,
            day = %order.day,
            by = %actor.user_id,
            "order canceled"
        );

        self.notifier.publish(OrderEvent::Canceled {
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            client_id: order.client_id.clone(),
            day: order.day,
            canceled_by: actor.user_id.clone(),
        });

        Ok(order)
    }
}
