//! In-memory implementation of the app-state key and record stores.

use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::app_sync_model::{
    AppStateKeyStore, AppStateRecordStore, AppStateSyncKey, CollectionName, MutationMac,
    LTHASH_SIZE,
};
use crate::errors::{Result, StoreError};

struct CollectionRecord {
    version: u64,
    hash: [u8; LTHASH_SIZE],
    // index MAC -> (version, value MAC)
    macs: HashMap<Vec<u8>, (u64, Vec<u8>)>,
}

impl CollectionRecord {
    fn empty() -> Self {
        Self {
            version: 0,
            hash: [0; LTHASH_SIZE],
            macs: HashMap::new(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::internal("memory store lock poisoned"))
}

/// Process-local store, suitable for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryAppStateStore {
    keys: Mutex<HashMap<Vec<u8>, AppStateSyncKey>>,
    collections: Mutex<HashMap<CollectionName, CollectionRecord>>,
}

impl MemoryAppStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a root key received over the key-share channel.
    pub fn put_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        lock(&self.keys)?.insert(key_id.to_vec(), key);
        Ok(())
    }

    /// Number of mutation MACs remembered for a collection.
    pub fn mutation_mac_count(&self, collection: CollectionName) -> Result<usize> {
        Ok(lock(&self.collections)?
            .get(&collection)
            .map(|record| record.macs.len())
            .unwrap_or(0))
    }
}

impl AppStateKeyStore for MemoryAppStateStore {
    fn get_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        Ok(lock(&self.keys)?.get(key_id).cloned())
    }

    fn key_exists(&self, key_id: &[u8]) -> Result<bool> {
        Ok(lock(&self.keys)?.contains_key(key_id))
    }

    fn latest_key_id(&self) -> Result<Option<Vec<u8>>> {
        let keys = lock(&self.keys)?;
        Ok(keys
            .iter()
            .max_by(|(a_id, a), (b_id, b)| a.timestamp.cmp(&b.timestamp).then(a_id.cmp(b_id)))
            .map(|(key_id, _)| key_id.clone()))
    }
}

impl AppStateRecordStore for MemoryAppStateStore {
    fn get_version_and_hash(&self, collection: CollectionName) -> Result<(u64, [u8; LTHASH_SIZE])> {
        Ok(lock(&self.collections)?
            .get(&collection)
            .map(|record| (record.version, record.hash))
            .unwrap_or((0, [0; LTHASH_SIZE])))
    }

    fn put_version_and_hash(
        &self,
        collection: CollectionName,
        version: u64,
        hash: &[u8; LTHASH_SIZE],
    ) -> Result<()> {
        let mut collections = lock(&self.collections)?;
        let record = collections
            .entry(collection)
            .or_insert_with(CollectionRecord::empty);
        record.version = version;
        record.hash = *hash;
        Ok(())
    }

    fn delete_version(&self, collection: CollectionName) -> Result<()> {
        if lock(&self.collections)?.remove(&collection).is_some() {
            debug!("[AppState] Dropped stored state for {}", collection);
        }
        Ok(())
    }

    fn get_last_value_mac(
        &self,
        collection: CollectionName,
        index_mac: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.collections)?
            .get(&collection)
            .and_then(|record| record.macs.get(index_mac))
            .map(|(_, value_mac)| value_mac.clone()))
    }

    fn put_mutation_macs(
        &self,
        collection: CollectionName,
        version: u64,
        macs: &[MutationMac],
    ) -> Result<()> {
        let mut collections = lock(&self.collections)?;
        let record = collections
            .entry(collection)
            .or_insert_with(CollectionRecord::empty);
        for mac in macs {
            record
                .macs
                .insert(mac.index_mac.clone(), (version, mac.value_mac.clone()));
        }
        Ok(())
    }

    fn delete_mutation_macs(
        &self,
        collection: CollectionName,
        index_macs: &[Vec<u8>],
    ) -> Result<()> {
        if let Some(record) = lock(&self.collections)?.get_mut(&collection) {
            for index_mac in index_macs {
                record.macs.remove(index_mac);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(timestamp: i64) -> AppStateSyncKey {
        AppStateSyncKey {
            data: vec![1; 32],
            fingerprint: Vec::new(),
            timestamp,
        }
    }

    #[test]
    fn latest_key_id_picks_newest_timestamp() {
        let store = MemoryAppStateStore::new();
        assert_eq!(store.latest_key_id().expect("latest"), None);

        store.put_key(b"old", key(10)).expect("put old");
        store.put_key(b"new", key(20)).expect("put new");

        assert_eq!(store.latest_key_id().expect("latest"), Some(b"new".to_vec()));
        assert!(store.key_exists(b"old").expect("exists"));
        assert!(!store.key_exists(b"missing").expect("exists"));
    }

    #[test]
    fn delete_version_drops_mutation_macs() {
        let store = MemoryAppStateStore::new();
        let collection = CollectionName::RegularHigh;
        store
            .put_version_and_hash(collection, 5, &[3; LTHASH_SIZE])
            .expect("put version");
        store
            .put_mutation_macs(
                collection,
                5,
                &[MutationMac {
                    index_mac: vec![1; 32],
                    value_mac: vec![2; 32],
                }],
            )
            .expect("put macs");

        store.delete_version(collection).expect("delete");

        assert_eq!(
            store.get_version_and_hash(collection).expect("get"),
            (0, [0; LTHASH_SIZE])
        );
        assert_eq!(
            store.get_last_value_mac(collection, &[1; 32]).expect("get mac"),
            None
        );
    }

    #[test]
    fn mutation_macs_are_scoped_per_collection() {
        let store = MemoryAppStateStore::new();
        let mac = MutationMac {
            index_mac: vec![7; 32],
            value_mac: vec![8; 32],
        };
        store
            .put_mutation_macs(CollectionName::Regular, 1, &[mac])
            .expect("put macs");

        assert_eq!(
            store
                .get_last_value_mac(CollectionName::Regular, &[7; 32])
                .expect("get"),
            Some(vec![8; 32])
        );
        assert_eq!(
            store
                .get_last_value_mac(CollectionName::RegularLow, &[7; 32])
                .expect("get"),
            None
        );

        store
            .delete_mutation_macs(CollectionName::Regular, &[vec![7; 32]])
            .expect("delete macs");
        assert_eq!(
            store
                .mutation_mac_count(CollectionName::Regular)
                .expect("count"),
            0
        );
    }
}
