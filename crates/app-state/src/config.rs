//! Processor configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Behavior switches for a [`crate::Processor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorConfig {
    /// Recompute the accumulator of recovery snapshots from their record MACs.
    pub strict_recovery: bool,
    /// Abort encoding when the store cannot answer a previous-value lookup.
    pub strict_previous_value_lookup: bool,
}

impl ProcessorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
