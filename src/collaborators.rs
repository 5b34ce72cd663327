//! Seams to the systems around the engine: catalog, organizations, notifications, time.
use crate::meal::{Day, DishReference, ImageRef};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, mpsc::Sender};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Deleted,
}

/// A dish as the catalog currently holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDish {
    pub id: String,
    pub name: String,
    pub price: u64,
    pub weight: u32,
    pub category_id: String,
    pub images: Vec<ImageRef>,
    pub lifecycle: Lifecycle,
}

impl CatalogDish {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: u64, weight: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            weight,
            category_id: String::new(),
            images: vec![],
            lifecycle: Lifecycle::Active,
        }
    }
    pub fn in_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = category_id.into();
        self
    }
    pub fn with_image(mut self, id: impl Into<String>, path: impl Into<String>) -> Self {
        self.images.push(ImageRef {
            id: id.into(),
            path: path.into(),
        });
        self
    }
    pub fn deleted(mut self) -> Self {
        self.lifecycle = Lifecycle::Deleted;
        self
    }

    /// Freeze the current catalog state into a snapshot.
    pub fn snapshot(&self) -> DishReference {
        DishReference {
            id: self.id.clone(),
            name: self.name.clone(),
            price: self.price,
            weight: self.weight,
            category_id: self.category_id.clone(),
            images: self.images.clone(),
        }
    }
}

pub trait Catalog: Send + Sync {
    /// Dish owned by `catering_id`, whatever its lifecycle.
    fn lookup(&self, catering_id: &str, dish_id: &str) -> Option<CatalogDish>;

    fn dish_exists(&self, catering_id: &str, dish_id: &str) -> bool {
        self.lookup(catering_id, dish_id).is_some()
    }
    fn is_deleted(&self, catering_id: &str, dish_id: &str) -> bool {
        self.lookup(catering_id, dish_id)
            .is_some_and(|dish| dish.lifecycle == Lifecycle::Deleted)
    }
}

pub trait Organizations: Send + Sync {
    fn catering_of_client(&self, client_id: &str) -> Option<String>;

    fn client_belongs_to_catering(&self, client_id: &str, catering_id: &str) -> bool {
        self.catering_of_client(client_id)
            .is_some_and(|owner| owner == catering_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    Placed {
        order_id: String,
        user_id: String,
        client_id: String,
        day: Day,
        total: u64,
    },
    Canceled {
        order_id: String,
        user_id: String,
        client_id: String,
        day: Day,
        canceled_by: String,
    },
}

/// Fire and forget. Implementations must not block the caller.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: OrderEvent);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> Day {
        Day::from(self.now())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a chosen instant, movable by hand.
#[derive(Debug)]
pub struct FixedClock(RwLock<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(RwLock::new(now))
    }
    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = write_lock(&self.0);
        *guard = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *read_lock(&self.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn publish(&self, event: OrderEvent) {
        info!(?event, "order event");
    }
}

/// Forwards events into a channel. A dropped receiver only loses events.
#[derive(Debug)]
pub struct ChannelNotifier(Sender<OrderEvent>);

impl ChannelNotifier {
    pub fn new(sender: Sender<OrderEvent>) -> Self {
        Self(sender)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, event: OrderEvent) {
        if self.0.send(event).is_err() {
            debug!("order event receiver is gone, dropping event");
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    dishes: RwLock<HashMap<(String, String), CatalogDish>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn upsert(&self, catering_id: impl Into<String>, dish: CatalogDish) {
        let mut dishes = write_lock(&self.dishes);
        dishes.insert((catering_id.into(), dish.id.clone()), dish);
    }
    /// Soft delete: the dish stays resolvable but can no longer be pinned.
    pub fn delete(&self, catering_id: &str, dish_id: &str) -> bool {
        let mut dishes = write_lock(&self.dishes);
        match dishes.get_mut(&(catering_id.to_string(), dish_id.to_string())) {
            Some(dish) => {
                dish.lifecycle = Lifecycle::Deleted;
                true
            }
            None => false,
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn lookup(&self, catering_id: &str, dish_id: &str) -> Option<CatalogDish> {
        let dishes = read_lock(&self.dishes);
        dishes
            .get(&(catering_id.to_string(), dish_id.to_string()))
            .cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrganizations {
    clients: RwLock<HashMap<String, String>>, // client -> catering
}

impl InMemoryOrganizations {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn attach(&self, client_id: impl Into<String>, catering_id: impl Into<String>) {
        let mut clients = write_lock(&self.clients);
        clients.insert(client_id.into(), catering_id.into());
    }
}

impl Organizations for InMemoryOrganizations {
    fn catering_of_client(&self, client_id: &str) -> Option<String> {
        let clients = read_lock(&self.clients);
        clients.get(client_id).cloned()
    }
}

// Poisoning is ignored: every write is a single insert or assignment.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
