//! Order store: the `PaymentStore` port, its Postgres implementation and an
//! in-memory implementation used by tests and local runs.

pub mod error;
pub mod memory;
#[cfg(feature = "database")]
pub mod payment_repository;
#[cfg(feature = "database")]
mod pool;
pub mod repository;

#[cfg(feature = "database")]
pub use pool::{
    get_pool_stats, health_check, init_pool, init_pool_from_config, PoolConfig, PoolStats,
};
