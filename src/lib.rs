//! Invoice settlement bridge between a card-payment gateway and an ERP back office.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod queue;
pub mod services;
pub mod workers;
