//! Economy and building placement core for a floating sky island.
//!
//! A [`GameSession`] owns one island. User operations and the production tick
//! both go through it and are serialized on a single lock, then written back
//! to an [`IslandStore`].

mod catalog;
mod config;
mod error;
mod island;
mod ledger;
pub mod placement;
mod registry;
mod scheduler;
mod session;
mod store;

pub use catalog::{Catalog, CatalogError};
pub use config::GameConfig;
pub use error::GameError;
pub use island::Island;
pub use ledger::Ledger;
pub use registry::BuildingRegistry;
pub use scheduler::ProductionScheduler;
pub use session::GameSession;
pub use store::{IslandRecord, IslandStore, SqliteStore};

use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_ms() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000).try_into().unwrap_or(i64::MAX)
}

fn new_id(prefix: &str) -> String {
    let c = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{c}", now_ms())
}
