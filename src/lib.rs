//! Meal versioning and order approval for catering tenants.
//!
//! Caterings pin a versioned menu per client and day, users order against the
//! current version, and administrators approve the day's orders.

pub mod approval;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod ledger;
pub mod meal;
pub mod order;
pub mod policy;
pub mod report;
pub mod service;
pub mod store;
pub mod utils;
pub mod versioner;
