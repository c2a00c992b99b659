//! App-state sync domain models and stores.

mod app_sync_model;
mod memory_store;

pub use app_sync_model::*;
pub use memory_store::*;
