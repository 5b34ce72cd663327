//! sled trees, key layout and cbor helpers shared by the components
use crate::error::OrderError;
use crate::meal::{Day, MealGroup, MealVersion};
use crate::order::Order;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Db, Tree};
use std::sync::Arc;

const MEAL_GROUPS: &str = "meal_groups";
const MEAL_VERSIONS: &str = "meal_versions";
const ORDERS: &str = "orders";
const USER_DAYS: &str = "user_days";
const CLIENT_DAYS: &str = "client_days";
const CATERING_DAYS: &str = "catering_days";

/// Handles to every tree. Cloning is cheap, trees are reference counted.
#[derive(Clone)]
pub struct Store {
    instance: Arc<Db>,
    /// (catering, client, day) -> MealGroup
    pub(crate) meal_groups: Tree,
    /// version id -> MealVersion
    pub(crate) meal_versions: Tree,
    /// order id -> Order
    pub(crate) orders: Tree,
    /// (user, day) -> id of the user's one active order
    pub(crate) user_days: Tree,
    /// (client, day) -> ids of every order placed, canceled ones included
    pub(crate) client_days: Tree,
    /// (catering, day) -> ids of every order placed, canceled ones included
    pub(crate) catering_days: Tree,
}

impl Store {
    pub fn new(instance: Arc<Db>) -> Result<Self, OrderError> {
        Ok(Self {
            meal_groups: instance.open_tree(MEAL_GROUPS)?,
            meal_versions: instance.open_tree(MEAL_VERSIONS)?,
            orders: instance.open_tree(ORDERS)?,
            user_days: instance.open_tree(USER_DAYS)?,
            client_days: instance.open_tree(CLIENT_DAYS)?,
            catering_days: instance.open_tree(CATERING_DAYS)?,
            instance,
        })
    }

    pub fn flush(&self) -> Result<usize, OrderError> {
        Ok(self.instance.flush()?)
    }

    pub(crate) fn group(&self, key: &str) -> Result<Option<MealGroup>, OrderError> {
        self.meal_groups
            .get(key.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub(crate) fn version(&self, version_id: &str) -> Result<Option<MealVersion>, OrderError> {
        self.meal_versions
            .get(version_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub(crate) fn order(&self, order_id: &str) -> Result<Option<Order>, OrderError> {
        self.orders
            .get(order_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub(crate) fn active_order_id(
        &self,
        user_id: &str,
        day: Day,
    ) -> Result<Option<String>, OrderError> {
        self.user_days
            .get(user_day_key(user_id, day).as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub(crate) fn indexed_orders(&self, index: &Tree, key: &str) -> Result<Vec<Order>, OrderError> {
        let ids: Vec<String> = match index.get(key.as_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => return Ok(vec![]),
        };
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            let order = self
                .order(&id)?
                .ok_or_else(|| anyhow::anyhow!("index points at missing order {id}"))?;
            orders.push(order);
        }
        Ok(orders)
    }
}

pub(crate) fn group_key(catering_id: &str, client_id: &str, day: Day) -> String {
    format!("{catering_id}/{client_id}/{day}")
}

pub(crate) fn user_day_key(user_id: &str, day: Day) -> String {
    format!("{user_id}/{day}")
}

pub(crate) fn client_day_key(client_id: &str, day: Day) -> String {
    format!("{client_id}/{day}")
}

pub(crate) fn catering_day_key(catering_id: &str, day: Day) -> String {
    format!("{catering_id}/{day}")
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, OrderError> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T, OrderError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

// Inside a transaction every failure has to abort, so these wrap the plain helpers.
pub(crate) fn encode_tx<T: minicbor::Encode<()>>(
    value: &T,
) -> ConflictableTransactionResult<Vec<u8>, OrderError> {
    encode(value).map_err(ConflictableTransactionError::Abort)
}

pub(crate) fn decode_tx<T>(bytes: &[u8]) -> ConflictableTransactionResult<T, OrderError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    decode(bytes).map_err(ConflictableTransactionError::Abort)
}

pub(crate) fn load_tx<T>(
    tree: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<Option<T>, OrderError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => decode_tx(&bytes).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn save_tx<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &str,
    value: &T,
) -> ConflictableTransactionResult<(), OrderError> {
    tree.insert(key.as_bytes(), encode_tx(value)?)?;
    Ok(())
}

pub(crate) fn index_ids_tx(
    tree: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<Vec<String>, OrderError> {
    Ok(load_tx(tree, key)?.unwrap_or_default())
}

pub(crate) fn push_index_tx(
    tree: &TransactionalTree,
    key: &str,
    id: &str,
) -> ConflictableTransactionResult<(), OrderError> {
    let mut ids = index_ids_tx(tree, key)?;
    ids.push(id.to_string());
    save_tx(tree, key, &ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keys_are_scoped_by_day() {
        let day = Day::from_ymd(2024, 6, 1).unwrap();
        assert_eq!(group_key("cat_a", "cli_b", day), "cat_a/cli_b/2024-06-01");
        assert_eq!(user_day_key("u1", day), "u1/2024-06-01");
        assert_ne!(
            client_day_key("cli_b", day),
            client_day_key("cli_b", day.offset(1).unwrap())
        );
    }

    #[test]
    fn missing_index_reads_as_empty() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("store.db"))?);
        let store = Store::new(db)?;

        let day = Day::from_ymd(2024, 6, 1).unwrap();
        let orders = store.indexed_orders(&store.client_days, &client_day_key("cli_b", day))?;
        assert!(orders.is_empty());
        assert!(store.active_order_id("u1", day)?.is_none());
        Ok(())
    }
}
