//! Orders, their witness chain and the status derived from it
use crate::error::OrderError;
use crate::meal::{Day, MealVersion, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Approved,
    Canceled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OrderItem {
    #[n(0)]
    pub dish_id: String, // references a DishReference of the bound version
    #[n(1)]
    pub quantity: u32,
}

impl OrderItem {
    pub fn new(dish_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            dish_id: dish_id.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum WitnessKind {
    #[n(0)]
    Place,
    #[n(1)]
    Approve,
    #[n(2)]
    Cancel,
}

/// One recorded action on an order. The chain is append only.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OrderWitness {
    #[n(0)]
    pub actor_id: String,
    #[n(1)]
    pub timestamp: TimeStamp<Utc>,
    #[n(2)]
    pub kind: WitnessKind,
}

impl OrderWitness {
    pub fn new(actor_id: String, timestamp: TimeStamp<Utc>, kind: WitnessKind) -> Self {
        Self {
            actor_id,
            timestamp,
            kind,
        }
    }
}

/// Draft of an order before it is bound to a meal version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub user_id: String,
    pub catering_id: String,
    pub client_id: String,
    pub day: Day,
    pub items: Vec<OrderItem>,
    pub comment: Option<String>,
}

impl OrderRequest {
    pub fn new(
        user_id: impl Into<String>,
        catering_id: impl Into<String>,
        client_id: impl Into<String>,
        day: Day,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            catering_id: catering_id.into(),
            client_id: client_id.into(),
            day,
            items: vec![],
            comment: None,
        }
    }
    pub fn add_dish(self, dish_id: impl Into<String>) -> Self {
        self.add_dishes(dish_id, 1)
    }
    pub fn add_dishes(mut self, dish_id: impl Into<String>, quantity: u32) -> Self {
        self.items.push(OrderItem::new(dish_id, quantity));
        self
    }
    pub fn set_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Merges repeated dishes, keeping first-seen order.
    pub fn normalized_items(&self) -> Result<Vec<OrderItem>, OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::EmptyOrder);
        }

        let mut merged: Vec<OrderItem> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity(item.dish_id.clone()));
            }
            match merged.iter_mut().find(|m| m.dish_id == item.dish_id) {
                Some(existing) => {
                    existing.quantity = existing
                        .quantity
                        .checked_add(item.quantity)
                        .ok_or_else(|| OrderError::InvalidQuantity(item.dish_id.clone()))?;
                }
                None => merged.push(item.clone()),
            }
        }
        Ok(merged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Order {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub catering_id: String,
    #[n(3)]
    pub client_id: String,
    #[n(4)]
    pub day: Day,
    #[n(5)]
    pub meal_version_id: String,
    #[n(6)]
    pub items: Vec<OrderItem>,
    #[n(7)]
    pub total: u64, // sum of pinned prices, minor currency units
    #[n(8)]
    pub comment: Option<String>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub witness_set: Vec<OrderWitness>,
}

impl Order {
    /// Binds a request to `version`. Every dish must be pinned by that version.
    pub fn place(
        id: String,
        request: &OrderRequest,
        version: &MealVersion,
        actor_id: &str,
        at: TimeStamp<Utc>,
    ) -> Result<Self, OrderError> {
        let items = request.normalized_items()?;

        let mut total: u64 = 0;
        for item in &items {
            let dish = version.dish(&item.dish_id).ok_or_else(|| {
                OrderError::InvalidReference(format!(
                    "dish {} is not offered by {} {}",
                    item.dish_id,
                    version.label(),
                    version.id
                ))
            })?;
            total = dish
                .price
                .checked_mul(u64::from(item.quantity))
                .and_then(|line| total.checked_add(line))
                .ok_or_else(|| OrderError::InvalidQuantity(item.dish_id.clone()))?;
        }

        Ok(Self {
            id,
            user_id: request.user_id.clone(),
            catering_id: version.catering_id.clone(),
            client_id: version.client_id.clone(),
            day: version.day,
            meal_version_id: version.id.clone(),
            items,
            total,
            comment: request.comment.clone(),
            created_at: at.clone(),
            witness_set: vec![OrderWitness::new(
                actor_id.to_string(),
                at,
                WitnessKind::Place,
            )],
        })
    }

    pub fn insert_witness(&mut self, witness: OrderWitness) {
        self.witness_set.push(witness);
    }

    /// Folds the witness chain. The first cancel wins and nothing moves it again.
    pub fn current_status(&self) -> OrderStatus {
        self.witness_set
            .iter()
            .fold(OrderStatus::Pending, |state, witness| {
                match (state, witness.kind) {
                    (OrderStatus::Canceled, _) => OrderStatus::Canceled,
                    (_, WitnessKind::Cancel) => OrderStatus::Canceled,
                    (_, WitnessKind::Approve) => OrderStatus::Approved,
                    (state, WitnessKind::Place) => state,
                }
            })
    }

    pub fn is_active(&self) -> bool {
        self.current_status() != OrderStatus::Canceled
    }

    /// Returns false when the order was already approved, leaving the chain untouched.
    pub fn approve(&mut self, actor_id: &str, at: TimeStamp<Utc>) -> Result<bool, OrderError> {
        match self.current_status() {
            OrderStatus::Pending => {
                self.insert_witness(OrderWitness::new(
                    actor_id.to_string(),
                    at,
                    WitnessKind::Approve,
                ));
                Ok(true)
            }
            OrderStatus::Approved => Ok(false),
            OrderStatus::Canceled => Err(OrderError::Conflict(format!(
                "order {} is canceled",
                self.id
            ))),
        }
    }

    pub fn cancel(&mut self, actor_id: &str, at: TimeStamp<Utc>) -> Result<(), OrderError> {
        if !self.is_active() {
            return Err(OrderError::Conflict(format!(
                "order {} is already canceled",
                self.id
            )));
        }
        self.insert_witness(OrderWitness::new(
            actor_id.to_string(),
            at,
            WitnessKind::Cancel,
        ));
        Ok(())
    }

    pub fn quantity_of(&self, dish_id: &str) -> u32 {
        self.items
            .iter()
            .filter(|item| item.dish_id == dish_id)
            .map(|item| item.quantity)
            .sum()
    }
}
