//! The app-state engine: verifies inbound patches, encodes outbound ones and
//! applies fatal-recovery snapshots against the key and record stores.

use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::Arc;
use syncd_core::{AppStateKeyStore, AppStateRecordStore, CollectionName, MutationMac, LTHASH_SIZE};

use crate::config::ProcessorConfig;
use crate::decode::{decode_mutation, Mutation};
use crate::encode::{self, EncodedPatch, PatchInfo};
use crate::error::{AppStateError, Result};
use crate::hash::{previous_value, verify_patch_mac, Cursor, HashState, PreviousValue};
use crate::keys::{ExpandedAppStateKeys, KeyCache};
use crate::patch_list::PatchList;
use crate::proto::{SyncdMutation, SyncdOperation, SyncdPatch, SyncdSnapshot, SyncdSnapshotRecovery};
use crate::recovery::{self, RecoveredState};

/// Output of [`Processor::decode_patches`].
#[derive(Debug)]
pub struct DecodedPatches {
    /// Mutations in list order: snapshot records first, then each patch.
    pub mutations: Vec<Mutation>,
    pub state: HashState,
    /// Non-fatal hash update diagnostics.
    pub warnings: Vec<AppStateError>,
    /// The list carried a snapshot, so `state` replaces rather than extends
    /// what the record store holds.
    pub from_snapshot: bool,
}

/// App-state engine bound to one device's key and record stores.
pub struct Processor {
    key_cache: KeyCache,
    key_store: Arc<dyn AppStateKeyStore>,
    record_store: Arc<dyn AppStateRecordStore>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        key_store: Arc<dyn AppStateKeyStore>,
        record_store: Arc<dyn AppStateRecordStore>,
    ) -> Self {
        Self::with_config(key_store, record_store, ProcessorConfig::default())
    }

    pub fn with_config(
        key_store: Arc<dyn AppStateKeyStore>,
        record_store: Arc<dyn AppStateRecordStore>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            key_cache: KeyCache::new(),
            key_store,
            record_store,
            config,
        }
    }

    /// Expanded keys for `key_id`, served from the cache when possible.
    pub fn get_keys(&self, key_id: &[u8]) -> Result<ExpandedAppStateKeys> {
        self.key_cache.get(self.key_store.as_ref(), key_id)
    }

    /// Key IDs referenced by `list` that the key store does not have.
    ///
    /// Each ID is reported once. Store failures are logged and the ID is
    /// treated as present.
    pub fn find_missing_key_ids(&self, list: &PatchList) -> Vec<Vec<u8>> {
        let snapshot_ids = list.snapshot.iter().flat_map(|snapshot| {
            std::iter::once(snapshot.key_id_bytes())
                .chain(snapshot.records.iter().map(|record| record.key_id_bytes()))
        });
        let patch_ids = list.patches.iter().flat_map(|patch| {
            std::iter::once(patch.key_id_bytes()).chain(
                patch
                    .mutations
                    .iter()
                    .map(|mutation| mutation.record_or_default().key_id_bytes()),
            )
        });

        let mut checked = HashSet::new();
        let mut missing = Vec::new();
        for key_id in snapshot_ids.chain(patch_ids) {
            if key_id.is_empty() || !checked.insert(key_id) {
                continue;
            }
            match self.key_store.key_exists(key_id) {
                Ok(true) => {}
                Ok(false) => missing.push(key_id.to_vec()),
                Err(err) => warn!(
                    "[AppState] Failed to check if app state key exists: {}",
                    err
                ),
            }
        }
        missing
    }

    /// Verify and decode every patch of `list`, in list order.
    ///
    /// Nothing is written to the record store; see [`Processor::commit_decoded`].
    pub fn decode_patches(
        &self,
        list: &PatchList,
        initial: HashState,
        validate_macs: bool,
    ) -> Result<DecodedPatches> {
        let name = list.name.ok_or(AppStateError::MissingCollectionName)?;
        let expected = list.snapshot.as_ref().map_or(0, |s| s.records.len())
            + list.patches.iter().map(|p| p.mutations.len()).sum::<usize>();

        let mut state = initial;
        let mut committed = mem::take(&mut state.mutations);
        let mut mutations = Vec::with_capacity(expected);
        let mut warnings = Vec::new();

        if let Some(snapshot) = &list.snapshot {
            let version = snapshot.version_number();
            let (snapshot_state, snapshot_mutations, snapshot_warnings) = self
                .decode_snapshot(name, snapshot, validate_macs)
                .map_err(|err| err.in_snapshot(version))?;
            state = snapshot_state;
            committed = snapshot_mutations.clone();
            mutations.extend(snapshot_mutations);
            warnings.extend(snapshot_warnings);
        }
        // The store still describes the state before the snapshot.
        let consult_store = list.snapshot.is_none();

        let mut decoded = Vec::new();
        for (position, patch) in list.patches.iter().enumerate() {
            let version = patch.version_number();
            let patch_warnings = self
                .apply_patch(name, list, position, &committed, &mut state, validate_macs, consult_store)
                .map_err(|err| err.in_patch(version))?;
            warnings.extend(patch_warnings);

            for (i, raw) in patch.mutations.iter().enumerate() {
                let keys = self
                    .get_keys(raw.record_or_default().key_id_bytes())
                    .map_err(|err| err.in_mutation(i + 1).in_patch(version))?;
                let mutation = decode_mutation(raw, &keys, i, validate_macs, version)
                    .map_err(|err| err.in_patch(version))?;
                decoded.push(mutation);
            }
        }

        debug!(
            "[AppState] Decoded {} patches for {} up to v{}",
            list.patches.len(),
            name,
            state.version
        );
        committed.extend(decoded.iter().cloned());
        state.mutations = committed;
        mutations.extend(decoded);

        Ok(DecodedPatches {
            mutations,
            state,
            warnings,
            from_snapshot: list.snapshot.is_some(),
        })
    }

    /// Fold one patch into `state` and check its MACs.
    #[allow(clippy::too_many_arguments)]
    fn apply_patch(
        &self,
        name: CollectionName,
        list: &PatchList,
        position: usize,
        committed: &[Mutation],
        state: &mut HashState,
        validate_macs: bool,
        consult_store: bool,
    ) -> Result<Vec<AppStateError>> {
        let patch: &SyncdPatch = &list.patches[position];
        state.version = patch.version_number();

        let warnings = state.update_hash(&patch.mutations, |index_mac, i| {
            let cursor = Cursor {
                patch: position,
                mutation: i,
            };
            match previous_value(committed, &list.patches, index_mac, cursor) {
                PreviousValue::Set(value_mac) => Ok(Some(value_mac.to_vec())),
                PreviousValue::Removed => Ok(None),
                PreviousValue::Unknown if consult_store => {
                    Ok(self.record_store.get_last_value_mac(name, index_mac)?)
                }
                PreviousValue::Unknown => Ok(None),
            }
        })?;

        if validate_macs {
            let result = self.verify_patch(name, patch, state);
            if result.is_err() && !warnings.is_empty() {
                warn!(
                    "[AppState] Warnings while updating hash for {}: {:?}",
                    name, warnings
                );
            }
            result?;
        }
        Ok(warnings)
    }

    fn verify_patch(&self, name: CollectionName, patch: &SyncdPatch, state: &HashState) -> Result<()> {
        let keys = self.get_keys(patch.key_id_bytes())?;
        if !state.verify_snapshot_mac(name, &keys.snapshot_mac, patch.snapshot_mac()) {
            return Err(AppStateError::MismatchingLtHash);
        }
        if !verify_patch_mac(patch, name, &keys.patch_mac, patch.version_number()) {
            return Err(AppStateError::MismatchingPatchMac);
        }
        Ok(())
    }

    /// Rebuild state from a full snapshot: every record is a SET on top of an
    /// empty accumulator.
    fn decode_snapshot(
        &self,
        name: CollectionName,
        snapshot: &SyncdSnapshot,
        validate_macs: bool,
    ) -> Result<(HashState, Vec<Mutation>, Vec<AppStateError>)> {
        let version = snapshot.version_number();
        let mut state = HashState::new(version, [0; LTHASH_SIZE]);
        let raw: Vec<SyncdMutation> = snapshot
            .records
            .iter()
            .map(|record| SyncdMutation {
                operation: Some(SyncdOperation::Set as i32),
                record: Some(record.clone()),
            })
            .collect();

        let warnings = state.update_hash(&raw, |_, _| Ok(None))?;

        if validate_macs {
            let keys = self.get_keys(snapshot.key_id_bytes())?;
            if !state.verify_snapshot_mac(name, &keys.snapshot_mac, snapshot.mac()) {
                if !warnings.is_empty() {
                    warn!(
                        "[AppState] Warnings while updating hash for {}: {:?}",
                        name, warnings
                    );
                }
                return Err(AppStateError::MismatchingLtHash);
            }
        }

        let mut mutations = Vec::with_capacity(raw.len());
        for (i, mutation) in raw.iter().enumerate() {
            let keys = self
                .get_keys(mutation.record_or_default().key_id_bytes())
                .map_err(|err| err.in_mutation(i + 1))?;
            mutations.push(decode_mutation(mutation, &keys, i, validate_macs, version)?);
        }
        Ok((state, mutations, warnings))
    }

    /// Encode `info` as the patch following `state`, signed with the newest
    /// key in the key store.
    pub fn encode_patch(&self, state: HashState, info: PatchInfo) -> Result<EncodedPatch> {
        let key_id = self
            .key_store
            .latest_key_id()?
            .ok_or(AppStateError::NoLatestKey)?;
        let keys = self.get_keys(&key_id)?;
        let collection = info.collection;
        let encoded = encode::encode_patch(
            state,
            info,
            &key_id,
            &keys,
            |index_mac| Ok(self.record_store.get_last_value_mac(collection, index_mac)?),
            self.config.strict_previous_value_lookup,
        )?;
        if !encoded.warnings.is_empty() {
            warn!(
                "[AppState] Warnings while updating hash for {} (sending new app state): {:?}",
                collection, encoded.warnings
            );
        }
        debug!(
            "[AppState] Encoded patch v{} for {} with {} mutations",
            encoded.state.version,
            collection,
            encoded.patch.mutations.len()
        );
        Ok(encoded)
    }

    /// Replace the stored state of a collection with a recovery snapshot.
    ///
    /// The previous version, accumulator and mutation MACs are dropped, not
    /// merged.
    pub fn apply_recovery(&self, snapshot: &SyncdSnapshotRecovery) -> Result<RecoveredState> {
        let rebuilt = recovery::rebuild(
            snapshot,
            |key_id| self.get_keys(key_id),
            self.config.strict_recovery,
        )?;
        let recovered = rebuilt.recovered;
        let collection = recovered.collection;
        let version = recovered.state.version;

        self.record_store.delete_version(collection)?;
        self.record_store
            .put_version_and_hash(collection, version, &recovered.state.hash)?;
        self.record_store
            .put_mutation_macs(collection, version, &rebuilt.macs)?;

        debug!(
            "[AppState] Recovered {} at v{} with {} records",
            collection,
            version,
            recovered.mutations.len()
        );
        Ok(recovered)
    }

    /// Persist a decoded or encoded state and its mutation MACs.
    ///
    /// A SET that is removed later in `mutations` is not stored.
    pub fn commit(
        &self,
        collection: CollectionName,
        state: &HashState,
        mutations: &[Mutation],
    ) -> Result<()> {
        let mut removed: Vec<Vec<u8>> = Vec::new();
        let mut added: Vec<(u64, MutationMac)> = Vec::new();
        for mutation in mutations {
            match mutation.operation {
                SyncdOperation::Remove => {
                    added.retain(|(_, mac)| mac.index_mac != mutation.index_mac);
                    removed.push(mutation.index_mac.clone());
                }
                SyncdOperation::Set => added.push((
                    mutation.patch_version,
                    MutationMac {
                        index_mac: mutation.index_mac.clone(),
                        value_mac: mutation.value_mac.clone(),
                    },
                )),
            }
        }

        let mut by_version: BTreeMap<u64, Vec<MutationMac>> = BTreeMap::new();
        for (version, mac) in added {
            by_version.entry(version).or_default().push(mac);
        }

        self.record_store
            .put_version_and_hash(collection, state.version, &state.hash)?;
        self.record_store
            .delete_mutation_macs(collection, &removed)?;
        for (version, macs) in &by_version {
            self.record_store
                .put_mutation_macs(collection, *version, macs)?;
        }
        Ok(())
    }

    /// Commit the result of [`Processor::decode_patches`], resetting the
    /// collection first when it was rebuilt from a snapshot.
    pub fn commit_decoded(&self, collection: CollectionName, decoded: &DecodedPatches) -> Result<()> {
        if decoded.from_snapshot {
            self.record_store.delete_version(collection)?;
        }
        self.commit(collection, &decoded.state, &decoded.mutations)
    }

    /// Stored version and accumulator of a collection, with an empty log.
    pub fn load_state(&self, collection: CollectionName) -> Result<HashState> {
        let (version, hash) = self.record_store.get_version_and_hash(collection)?;
        Ok(HashState::new(version, hash))
    }
}
