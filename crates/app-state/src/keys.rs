//! Derivation and caching of the per-purpose keys behind an app-state key ID.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use syncd_core::AppStateKeyStore;

use crate::crypto::hkdf_sha256;
use crate::error::{AppStateError, Result};

const MUTATION_KEYS_INFO: &[u8] = b"WhatsApp Mutation Keys";
const EXPANDED_SIZE: usize = 160;

/// The five 32-byte keys expanded from one root key.
#[derive(Clone, PartialEq, Eq)]
pub struct ExpandedAppStateKeys {
    pub index: [u8; 32],
    pub value_encryption: [u8; 32],
    pub value_mac: [u8; 32],
    pub snapshot_mac: [u8; 32],
    pub patch_mac: [u8; 32],
}

impl std::fmt::Debug for ExpandedAppStateKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExpandedAppStateKeys(..)")
    }
}

fn slot(expanded: &[u8; EXPANDED_SIZE], n: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&expanded[n * 32..(n + 1) * 32]);
    out
}

/// Expand a root key with HKDF-SHA256 into the mutation key set.
pub fn expand_app_state_keys(key_data: &[u8]) -> ExpandedAppStateKeys {
    let mut expanded = [0u8; EXPANDED_SIZE];
    hkdf_sha256(key_data, MUTATION_KEYS_INFO, &mut expanded);
    ExpandedAppStateKeys {
        index: slot(&expanded, 0),
        value_encryption: slot(&expanded, 1),
        value_mac: slot(&expanded, 2),
        snapshot_mac: slot(&expanded, 3),
        patch_mac: slot(&expanded, 4),
    }
}

/// Memoizes expanded keys by key ID. Safe to share between threads.
#[derive(Default)]
pub struct KeyCache {
    entries: Mutex<HashMap<String, ExpandedAppStateKeys>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(key_id: &[u8]) -> String {
        STANDARD_NO_PAD.encode(key_id)
    }

    /// Return the expanded keys for `key_id`, consulting `store` on a miss.
    pub fn get(&self, store: &dyn AppStateKeyStore, key_id: &[u8]) -> Result<ExpandedAppStateKeys> {
        let cache_key = Self::cache_key(key_id);
        if let Some(keys) = self.entries().get(&cache_key) {
            return Ok(keys.clone());
        }

        let root = store
            .get_key(key_id)?
            .ok_or_else(|| AppStateError::key_not_found(key_id))?;
        let keys = expand_app_state_keys(&root.data);
        debug!("[AppState] Expanded app state key {}", cache_key);

        self.entries()
            .entry(cache_key)
            .or_insert_with(|| keys.clone());
        Ok(keys)
    }

    // Entries depend only on their root key; a poisoned map is still consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, ExpandedAppStateKeys>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
