//! Shared model for app-state synchronization: collections, keys and store contracts.

pub mod errors;
pub mod sync;

pub use errors::{Result, StoreError};
pub use sync::*;
