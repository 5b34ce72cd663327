//! Approval/Status Coordinator: moves orders from pending to approved, alone or a whole day at once
use crate::collaborators::{Clock, Organizations};
use crate::error::{OrderError, log_failure};
use crate::meal::{Day, TimeStamp};
use crate::order::{Order, OrderStatus};
use crate::policy::{Action, Actor, authorize};
use crate::store::{Store, client_day_key, index_ids_tx, load_tx, save_tx};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, abort};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayStatus {
    Pending,
    Approved,
}

impl fmt::Display for DayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayStatus::Pending => f.write_str("pending"),
            DayStatus::Approved => f.write_str("approved"),
        }
    }
}

impl FromStr for DayStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(DayStatus::Pending),
            "approved" => Ok(DayStatus::Approved),
            other => Err(anyhow::anyhow!("unknown day status {other:?}")),
        }
    }
}

/// How a day with no active orders is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub empty_day_status: DayStatus,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            empty_day_status: DayStatus::Approved,
        }
    }
}

/// Approved only when every non-canceled order is approved.
pub fn derive_day_status<'a>(
    orders: impl IntoIterator<Item = &'a Order>,
    policy: &ApprovalPolicy,
) -> DayStatus {
    let mut seen_active = false;
    for order in orders {
        match order.current_status() {
            OrderStatus::Canceled => continue,
            OrderStatus::Pending => return DayStatus::Pending,
            OrderStatus::Approved => seen_active = true,
        }
    }
    if seen_active {
        DayStatus::Approved
    } else {
        policy.empty_day_status
    }
}

pub struct ApprovalCoordinator {
    store: Store,
    organizations: Arc<dyn Organizations>,
    clock: Arc<dyn Clock>,
    policy: ApprovalPolicy,
}

impl ApprovalCoordinator {
    pub fn new(
        store: Store,
        organizations: Arc<dyn Organizations>,
        clock: Arc<dyn Clock>,
        policy: ApprovalPolicy,
    ) -> Self {
        Self {
            store,
            organizations,
            clock,
            policy,
        }
    }

    /// Approve every pending order of the client's day in one transaction.
    /// Returns how many orders changed; zero is not an error.
    pub fn approve_day(
        &self,
        actor: &Actor,
        client_id: &str,
        day: Day,
    ) -> Result<usize, OrderError> {
        self.approve_all(actor, client_id, day)
            .inspect_err(log_failure("approve_day"))
    }

    /// Approve a single order. Approving twice is a no-op, approving a canceled order conflicts.
    pub fn approve_order(&self, actor: &Actor, order_id: &str) -> Result<Order, OrderError> {
        self.approve_single(actor, order_id)
            .inspect_err(log_failure("approve_order"))
    }

    pub fn day_status(&self, client_id: &str, day: Day) -> Result<DayStatus, OrderError> {
        let key = client_day_key(client_id, day);
        let orders = self
            .store
            .indexed_orders(&self.store.client_days, &key)
            .inspect_err(log_failure("day_status"))?;
        let status = derive_day_status(&orders, &self.policy);
        debug!(client = client_id, %day, %status, orders = orders.len(), "day status derived");
        Ok(status)
    }

    fn approve_all(&self, actor: &Actor, client_id: &str, day: Day) -> Result<usize, OrderError> {
        // an unknown client reads the same as a foreign one
        let catering_id = self
            .organizations
            .catering_of_client(client_id)
            .ok_or(OrderError::Forbidden)?;
        authorize(
            actor,
            &Action::ApproveOrders {
                catering_id: &catering_id,
                client_id,
            },
        )?;

        let client_key = client_day_key(client_id, day);
        let approved_at = TimeStamp::from(self.clock.now());
        let trees = (&self.store.orders, &self.store.client_days);

        let approved = trees.transaction(
            |(orders, client_days)| -> ConflictableTransactionResult<usize, OrderError> {
                let mut approved = 0;
                for order_id in index_ids_tx(client_days, &client_key)? {
                    let Some(mut order) = load_tx::<Order>(orders, &order_id)? else {
                        return abort(OrderError::Internal(anyhow::anyhow!(
                            "index points at missing order {order_id}"
                        )));
                    };
                    // placed under a catering the client has since left
                    if order.catering_id != catering_id {
                        continue;
                    }
                    if order.current_status() != OrderStatus::Pending {
                        continue;
                    }
                    if let Err(err) = order.approve(&actor.user_id, approved_at.clone()) {
                        return abort(err);
                    }
                    save_tx(orders, &order.id, &order)?;
                    approved += 1;
                }
                Ok(approved)
            },
        )?;

        info!(client = client_id, %day, approved, by = %actor.user_id, "day approved");
        Ok(approved)
    }

    fn approve_single(&self, actor: &Actor, order_id: &str) -> Result<Order, OrderError> {
        let approved_at = TimeStamp::from(self.clock.now());

        let (order, changed) = self.store.orders.transaction(
            |orders| -> ConflictableTransactionResult<(Order, bool), OrderError> {
                let Some(mut order) = load_tx::<Order>(orders, order_id)? else {
                    return abort(OrderError::NotFound(format!("order {order_id}")));
                };
                let action = Action::ApproveOrders {
                    catering_id: &order.catering_id,
                    client_id: &order.client_id,
                };
                if let Err(err) = authorize(actor, &action) {
                    return abort(err);
                }
                let changed = match order.approve(&actor.user_id, approved_at.clone()) {
                    Ok(changed) => changed,
                    Err(err) => return abort(err),
                };
                if changed {
                    save_tx(orders, &order.id, &order)?;
                }
                Ok((order, changed))
            },
        )?;

        if changed {
            info!(order = %order.id, by = %actor.user_id, "order approved");
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{FixedClock, InMemoryOrganizations};
    use crate::meal::{DishReference, MealVersion};
    use crate::order::OrderRequest;
    use crate::store::encode;
    use chrono::Utc;
    use std::io;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn order(status: OrderStatus) -> Order {
        let day = Day::from_ymd(2024, 6, 1).unwrap();
        let version = MealVersion {
            id: "meal_v1".into(),
            group_key: "mealgrp_a".into(),
            sequence: 1,
            catering_id: "cat_a".into(),
            client_id: "cli_b".into(),
            day,
            created_at: TimeStamp::new(),
            editor: "Ann".into(),
            dishes: vec![DishReference {
                id: "soup".into(),
                name: "Soup".into(),
                price: 300,
                weight: 300,
                category_id: "soups".into(),
                images: vec![],
            }],
            menu_digest: String::new(),
        };
        let request = OrderRequest::new("u1", "cat_a", "cli_b", day).add_dish("soup");
        let mut order =
            Order::place("order_1".into(), &request, &version, "u1", TimeStamp::new()).unwrap();
        match status {
            OrderStatus::Pending => {}
            OrderStatus::Approved => {
                order.approve("admin", TimeStamp::new()).unwrap();
            }
            OrderStatus::Canceled => order.cancel("u1", TimeStamp::new()).unwrap(),
        }
        order
    }

    #[test]
    fn one_pending_order_keeps_the_day_pending() {
        let orders = [order(OrderStatus::Approved), order(OrderStatus::Pending)];
        let status = derive_day_status(&orders, &ApprovalPolicy::default());
        assert_eq!(status, DayStatus::Pending);
    }

    #[test]
    fn canceled_orders_do_not_count() {
        let orders = [order(OrderStatus::Approved), order(OrderStatus::Canceled)];
        let status = derive_day_status(&orders, &ApprovalPolicy::default());
        assert_eq!(status, DayStatus::Approved);
    }

    #[test]
    fn empty_day_follows_the_policy() {
        let only_canceled = [order(OrderStatus::Canceled)];
        let lenient = ApprovalPolicy::default();
        let strict = ApprovalPolicy {
            empty_day_status: DayStatus::Pending,
        };

        assert_eq!(derive_day_status(&[], &lenient), DayStatus::Approved);
        assert_eq!(derive_day_status(&[], &strict), DayStatus::Pending);
        let only_canceled = derive_day_status(&only_canceled, &strict);
        assert_eq!(only_canceled, DayStatus::Pending);
    }

    #[test]
    fn day_status_parses_case_insensitively() {
        let approved: DayStatus = "Approved".parse().unwrap();
        let pending: DayStatus = " pending ".parse().unwrap();

        assert_eq!(approved, DayStatus::Approved);
        assert_eq!(pending, DayStatus::Pending);
        assert!("maybe".parse::<DayStatus>().is_err());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn storage_failures_are_logged_as_errors() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("approval.db"))?);
        let store = Store::new(db)?;
        let day = Day::from_ymd(2024, 6, 1).unwrap();

        // an index entry whose order was never written
        let ghost = vec!["order_ghost".to_string()];
        let key = client_day_key("cli_b", day);
        store.client_days.insert(key.as_bytes(), encode(&ghost)?)?;

        let organizations = Arc::new(InMemoryOrganizations::new());
        organizations.attach("cli_b", "cat_a");
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let policy = ApprovalPolicy::default();
        let coordinator = ApprovalCoordinator::new(store, organizations, clock, policy);

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let admin = Actor::client_admin("cla_1", "Boris", "cat_a", "cli_b");
        let user = Actor::user("u_uma", "Uma", "cat_a", "cli_b");
        let (failed, denied) = tracing::subscriber::with_default(subscriber, || {
            (
                coordinator.approve_day(&admin, "cli_b", day),
                coordinator.approve_day(&user, "cli_b", day),
            )
        });
        assert!(matches!(failed, Err(OrderError::Internal(_))));
        assert!(matches!(denied, Err(OrderError::Forbidden)));

        // the denial is a client error and only warns
        let logs = logs.contents();
        let errors: Vec<&str> = logs.lines().filter(|l| l.contains("ERROR")).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("approve_day"));
        Ok(())
    }
}
