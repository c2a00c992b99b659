//! Fatal recovery: rebuilding a collection from a server-supplied snapshot.

use flate2::read::GzDecoder;
use prost::Message;
use std::io::Read;
use syncd_core::{CollectionName, MutationMac, LTHASH_SIZE};

use crate::crypto::{hmac_sha256, MAC_SIZE};
use crate::decode::Mutation;
use crate::error::{AppStateError, Result};
use crate::hash::HashState;
use crate::keys::ExpandedAppStateKeys;
use crate::lthash::WAPATCH_INTEGRITY;
use crate::proto::{SyncdOperation, SyncdSnapshotFatalRecoveryResponse, SyncdSnapshotRecovery};

/// Outcome of applying a recovery snapshot.
#[derive(Debug, Clone)]
pub struct RecoveredState {
    pub collection: CollectionName,
    /// Every record of the snapshot, as SET mutations.
    pub mutations: Vec<Mutation>,
    /// New baseline; its log holds `mutations`.
    pub state: HashState,
}

/// Unwrap (and gunzip, if flagged) the snapshot carried by a recovery response.
pub fn parse_recovery(response: &SyncdSnapshotFatalRecoveryResponse) -> Result<SyncdSnapshotRecovery> {
    let data = response.collection_snapshot();
    if !response.is_compressed() {
        return Ok(SyncdSnapshotRecovery::decode(data)?);
    }
    let mut decompressed = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut decompressed)
        .map_err(AppStateError::Decompress)?;
    Ok(SyncdSnapshotRecovery::decode(decompressed.as_slice())?)
}

/// Snapshot contents ready to be written to the record store.
pub(crate) struct Rebuilt {
    pub recovered: RecoveredState,
    pub macs: Vec<MutationMac>,
}

/// Derive index MACs for every record of `recovery`.
///
/// With `strict`, every record MAC must be a full value MAC and their
/// accumulator must equal the snapshot's hash.
pub(crate) fn rebuild<F>(recovery: &SyncdSnapshotRecovery, mut keys_for: F, strict: bool) -> Result<Rebuilt>
where
    F: FnMut(&[u8]) -> Result<ExpandedAppStateKeys>,
{
    let raw_hash = recovery.collection_lthash();
    let hash: [u8; LTHASH_SIZE] = raw_hash
        .try_into()
        .map_err(|_| AppStateError::InvalidLtHashLength(raw_hash.len()))?;
    let collection = recovery
        .collection_name()
        .parse::<CollectionName>()
        .map_err(|err| AppStateError::UnknownCollection(err.0))?;
    let version = recovery
        .version
        .as_ref()
        .and_then(|version| version.version)
        .unwrap_or(0);

    let mut mutations = Vec::with_capacity(recovery.mutation_records.len());
    let mut macs = Vec::with_capacity(recovery.mutation_records.len());
    for (i, record) in recovery.mutation_records.iter().enumerate() {
        let mutation = rebuild_record(record, &mut keys_for, strict, version).map_err(|err| {
            AppStateError::Record {
                index: i + 1,
                source: Box::new(err),
            }
        })?;
        macs.push(MutationMac {
            index_mac: mutation.index_mac.clone(),
            value_mac: mutation.value_mac.clone(),
        });
        mutations.push(mutation);
    }

    if strict {
        let value_macs: Vec<&[u8]> = macs.iter().map(|mac| mac.value_mac.as_slice()).collect();
        let expected = WAPATCH_INTEGRITY.subtract_then_add(&[0; LTHASH_SIZE], &[], &value_macs);
        if expected != hash {
            return Err(AppStateError::MismatchingLtHash);
        }
    }

    let mut state = HashState::new(version, hash);
    state.mutations = mutations.clone();
    Ok(Rebuilt {
        recovered: RecoveredState {
            collection,
            mutations,
            state,
        },
        macs,
    })
}

fn rebuild_record<F>(
    record: &crate::proto::SyncdPlainTextRecord,
    keys_for: &mut F,
    strict: bool,
    version: u64,
) -> Result<Mutation>
where
    F: FnMut(&[u8]) -> Result<ExpandedAppStateKeys>,
{
    let keys = keys_for(record.key_id())?;
    let data = record.value.clone().unwrap_or_default();
    let index: Vec<String> = serde_json::from_slice(data.index()).map_err(AppStateError::Index)?;
    if strict && record.mac().len() != MAC_SIZE {
        return Err(AppStateError::malformed(format!(
            "record MAC has {} bytes",
            record.mac().len()
        )));
    }
    Ok(Mutation {
        operation: SyncdOperation::Set,
        key_id: record.key_id().to_vec(),
        index_mac: hmac_sha256(&keys.index, &[data.index()]).to_vec(),
        value_mac: record.mac().to_vec(),
        version: data.version(),
        value: data.value,
        index,
        patch_version: version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{SyncActionData, SyncdPlainTextRecord, SyncdVersion};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn recovery(hash_len: usize) -> SyncdSnapshotRecovery {
        SyncdSnapshotRecovery {
            version: Some(SyncdVersion { version: Some(9) }),
            collection_name: Some("regular_low".to_string()),
            mutation_records: vec![SyncdPlainTextRecord {
                value: Some(SyncActionData {
                    index: Some(br#"["pin_v1","1@s.whatsapp.net"]"#.to_vec()),
                    version: Some(5),
                    ..Default::default()
                }),
                key_id: Some(b"kid".to_vec()),
                mac: Some(vec![7; 32]),
            }],
            collection_lthash: Some(vec![0; hash_len]),
        }
    }

    fn keys(_: &[u8]) -> Result<ExpandedAppStateKeys> {
        Ok(crate::keys::expand_app_state_keys(b"root"))
    }

    #[test]
    fn parses_uncompressed_and_gzip_payloads() {
        let bytes = recovery(LTHASH_SIZE).encode_to_vec();
        let plain = SyncdSnapshotFatalRecoveryResponse {
            collection_snapshot: Some(bytes.clone()),
            is_compressed: Some(false),
        };
        assert_eq!(parse_recovery(&plain).expect("plain"), recovery(LTHASH_SIZE));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).expect("compress");
        let gzipped = SyncdSnapshotFatalRecoveryResponse {
            collection_snapshot: Some(encoder.finish().expect("finish")),
            is_compressed: Some(true),
        };
        assert_eq!(parse_recovery(&gzipped).expect("gzip"), recovery(LTHASH_SIZE));
    }

    #[test]
    fn corrupt_gzip_is_a_decompress_error() {
        let response = SyncdSnapshotFatalRecoveryResponse {
            collection_snapshot: Some(vec![0x1F, 0x8B, 0x00, 0x01, 0x02]),
            is_compressed: Some(true),
        };
        assert!(matches!(
            parse_recovery(&response),
            Err(AppStateError::Decompress(_))
        ));
    }

    #[test]
    fn rejects_short_lthash() {
        let err = rebuild(&recovery(64), keys, false).err().expect("error");
        assert!(matches!(err, AppStateError::InvalidLtHashLength(64)));
    }

    #[test]
    fn rebuild_derives_index_macs() {
        let rebuilt = rebuild(&recovery(LTHASH_SIZE), keys, false).expect("rebuild");
        let expected = hmac_sha256(
            &crate::keys::expand_app_state_keys(b"root").index,
            &[br#"["pin_v1","1@s.whatsapp.net"]"#.as_slice()],
        );
        assert_eq!(rebuilt.recovered.collection, CollectionName::RegularLow);
        assert_eq!(rebuilt.recovered.state.version, 9);
        assert_eq!(rebuilt.macs[0].index_mac, expected.to_vec());
        assert_eq!(rebuilt.recovered.mutations[0].version, 5);
        assert_eq!(rebuilt.recovered.mutations[0].patch_version, 9);
    }

    #[test]
    fn strict_rebuild_checks_accumulator() {
        let err = rebuild(&recovery(LTHASH_SIZE), keys, true).err().expect("error");
        assert!(matches!(err, AppStateError::MismatchingLtHash));

        let mut consistent = recovery(LTHASH_SIZE);
        consistent.collection_lthash = Some(
            WAPATCH_INTEGRITY
                .subtract_then_add(&[0; LTHASH_SIZE], &[], &[[7u8; 32].as_slice()])
                .to_vec(),
        );
        assert!(rebuild(&consistent, keys, true).is_ok());
    }
}
