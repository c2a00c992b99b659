//! Collection hash state and the MACs computed over it.

use syncd_core::{CollectionName, LTHASH_SIZE};

use crate::crypto::{hmac_sha256, verify_hmac_sha256, MAC_SIZE};
use crate::decode::Mutation;
use crate::error::{AppStateError, Result};
use crate::lthash::WAPATCH_INTEGRITY;
use crate::proto::{SyncdMutation, SyncdOperation, SyncdPatch};

/// Version, accumulator and committed mutation log of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct HashState {
    pub version: u64,
    pub hash: [u8; LTHASH_SIZE],
    pub mutations: Vec<Mutation>,
}

impl Default for HashState {
    fn default() -> Self {
        Self::new(0, [0; LTHASH_SIZE])
    }
}

impl HashState {
    pub fn new(version: u64, hash: [u8; LTHASH_SIZE]) -> Self {
        Self {
            version,
            hash,
            mutations: Vec::new(),
        }
    }

    /// Fold `mutations` into the accumulator.
    ///
    /// `previous_set` is asked for the value MAC that was live at an index MAC
    /// just before the mutation at the given position. Missing previous values
    /// for REMOVE operations come back as warnings; lookup errors abort.
    pub fn update_hash<F>(
        &mut self,
        mutations: &[SyncdMutation],
        mut previous_set: F,
    ) -> Result<Vec<AppStateError>>
    where
        F: FnMut(&[u8], usize) -> Result<Option<Vec<u8>>>,
    {
        let mut added: Vec<&[u8]> = Vec::with_capacity(mutations.len());
        let mut removed: Vec<Vec<u8>> = Vec::new();
        let mut warnings = Vec::new();

        for (i, mutation) in mutations.iter().enumerate() {
            let record = mutation.record_or_default();
            let operation = mutation.operation();
            if operation == SyncdOperation::Set {
                let value_mac = record.value_mac().ok_or_else(|| {
                    AppStateError::malformed("value blob shorter than its MAC").in_mutation(i + 1)
                })?;
                added.push(value_mac);
            }

            let index_mac = record.index_blob();
            match previous_set(index_mac, i).map_err(|err| err.in_mutation(i + 1))? {
                Some(previous) => removed.push(previous),
                None if operation == SyncdOperation::Remove => {
                    warnings.push(AppStateError::MissingPreviousSetValue {
                        index_mac: index_mac.to_vec(),
                    });
                }
                None => {}
            }
        }

        let removed: Vec<&[u8]> = removed.iter().map(Vec::as_slice).collect();
        self.hash = WAPATCH_INTEGRITY.subtract_then_add(&self.hash, &removed, &added);
        Ok(warnings)
    }

    fn snapshot_mac_input(&self, name: CollectionName) -> Vec<u8> {
        let name = name.as_str().as_bytes();
        let mut input = Vec::with_capacity(LTHASH_SIZE + 8 + name.len());
        input.extend_from_slice(&self.hash);
        input.extend_from_slice(&self.version.to_be_bytes());
        input.extend_from_slice(name);
        input
    }

    /// MAC over the accumulator, version and collection name.
    pub fn generate_snapshot_mac(&self, name: CollectionName, key: &[u8]) -> [u8; MAC_SIZE] {
        hmac_sha256(key, &[self.snapshot_mac_input(name).as_slice()])
    }

    pub fn verify_snapshot_mac(&self, name: CollectionName, key: &[u8], expected: &[u8]) -> bool {
        verify_hmac_sha256(key, &[self.snapshot_mac_input(name).as_slice()], expected)
    }
}

fn patch_mac_input(patch: &SyncdPatch, name: CollectionName, version: u64) -> Vec<u8> {
    let mut input = patch.snapshot_mac().to_vec();
    for mutation in &patch.mutations {
        let blob = mutation.record_or_default().value_blob();
        input.extend_from_slice(&blob[blob.len().saturating_sub(MAC_SIZE)..]);
    }
    input.extend_from_slice(&version.to_be_bytes());
    input.extend_from_slice(name.as_str().as_bytes());
    input
}

/// MAC over a patch's snapshot MAC, the value MACs of its mutations, the
/// version and collection name.
pub fn generate_patch_mac(
    patch: &SyncdPatch,
    name: CollectionName,
    key: &[u8],
    version: u64,
) -> [u8; MAC_SIZE] {
    hmac_sha256(key, &[patch_mac_input(patch, name, version).as_slice()])
}

pub fn verify_patch_mac(patch: &SyncdPatch, name: CollectionName, key: &[u8], version: u64) -> bool {
    verify_hmac_sha256(
        key,
        &[patch_mac_input(patch, name, version).as_slice()],
        patch.patch_mac(),
    )
}

/// Position of a mutation inside the batch of patches being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub patch: usize,
    pub mutation: usize,
}

/// Outcome of resolving the value that was live at an index MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousValue<'a> {
    /// Last operation was a SET with this value MAC.
    Set(&'a [u8]),
    /// Last operation was a REMOVE.
    Removed,
    /// Neither the committed log nor the batch mention the index.
    Unknown,
}

/// Resolve the value at `index_mac` as of just before `cursor`.
///
/// The batch is scanned backwards from the mutation preceding `cursor`; the
/// committed log is only consulted when the batch has no match.
pub fn previous_value<'a>(
    committed: &'a [Mutation],
    in_flight: &'a [SyncdPatch],
    index_mac: &[u8],
    cursor: Cursor,
) -> PreviousValue<'a> {
    let earlier_patches = in_flight.iter().take(cursor.patch).rev().flat_map(|patch| {
        patch.mutations.iter().rev()
    });
    let same_patch = in_flight
        .get(cursor.patch)
        .map(|patch| &patch.mutations[..cursor.mutation.min(patch.mutations.len())])
        .unwrap_or_default()
        .iter()
        .rev();

    for mutation in same_patch.chain(earlier_patches) {
        let record = mutation.record_or_default();
        if record.index_blob() != index_mac {
            continue;
        }
        return match (mutation.operation(), record.value_mac()) {
            (SyncdOperation::Set, Some(value_mac)) => PreviousValue::Set(value_mac),
            _ => PreviousValue::Removed,
        };
    }

    committed
        .iter()
        .rev()
        .find(|mutation| mutation.index_mac == index_mac)
        .map(|mutation| match mutation.operation {
            SyncdOperation::Set => PreviousValue::Set(&mutation.value_mac),
            SyncdOperation::Remove => PreviousValue::Removed,
        })
        .unwrap_or(PreviousValue::Unknown)
}
