//! Outbound path: application intents to encrypted, MAC'd patches.

use chrono::{DateTime, Duration, Utc};
use prost::Message;
use std::mem;
use syncd_core::{
    CollectionName, INDEX_ARCHIVE, INDEX_DELETE_CHAT, INDEX_LABEL_ASSOCIATION_CHAT,
    INDEX_LABEL_ASSOCIATION_MESSAGE, INDEX_LABEL_EDIT, INDEX_MARK_CHAT_AS_READ, INDEX_MUTE,
    INDEX_PIN, INDEX_SETTING_PUSH_NAME, INDEX_STAR,
};

use crate::crypto::{cbc_encrypt, content_mac, hmac_sha256};
use crate::decode::Mutation;
use crate::error::{AppStateError, Result};
use crate::hash::{generate_patch_mac, previous_value, Cursor, HashState, PreviousValue};
use crate::keys::ExpandedAppStateKeys;
use crate::proto::{
    key_id as key_id_message, ArchiveChatAction, DeleteChatAction, LabelAssociationAction,
    LabelEditAction, MarkChatAsReadAction, MessageKey, MuteAction, PinAction, PushNameSetting,
    StarAction, SyncActionData, SyncActionMessage, SyncActionMessageRange, SyncActionValue,
    SyncdIndex, SyncdMutation, SyncdOperation, SyncdPatch, SyncdRecord, SyncdValue, SyncdVersion,
};

/// One SET to include in a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationInfo {
    /// Kind of setting followed by its parameters, e.g. `["mute", jid]`.
    pub index: Vec<String>,
    /// Schema version of the action; fixed per kind.
    pub version: i32,
    pub value: SyncActionValue,
}

/// A batch of mutations to one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchInfo {
    /// Stamped onto every value; the current time when `None`.
    pub timestamp: Option<DateTime<Utc>>,
    pub collection: CollectionName,
    pub mutations: Vec<MutationInfo>,
}

/// Result of encoding a patch.
#[derive(Debug)]
pub struct EncodedPatch {
    pub patch: SyncdPatch,
    /// Serialized `patch`, ready for the transport layer.
    pub bytes: Vec<u8>,
    /// State after the patch, including the new mutations in its log.
    pub state: HashState,
    /// Previous-value lookups that failed and were treated as "no prior value".
    pub warnings: Vec<AppStateError>,
}

fn encrypt_mutation(
    info: MutationInfo,
    timestamp_ms: i64,
    key_id: &[u8],
    keys: &ExpandedAppStateKeys,
    patch_version: u64,
) -> Result<(SyncdMutation, Mutation)> {
    let mut value = info.value;
    value.timestamp = Some(timestamp_ms);

    let index_bytes = serde_json::to_vec(&info.index)?;
    let plaintext = SyncActionData {
        index: Some(index_bytes.clone()),
        value: Some(value.clone()),
        padding: Some(Vec::new()),
        version: Some(info.version),
    }
    .encode_to_vec();

    let mut blob = cbc_encrypt(&keys.value_encryption, &plaintext);
    let value_mac = content_mac(SyncdOperation::Set, &blob, key_id, &keys.value_mac);
    let index_mac = hmac_sha256(&keys.index, &[index_bytes.as_slice()]);
    blob.extend_from_slice(&value_mac);

    let raw = SyncdMutation {
        operation: Some(SyncdOperation::Set as i32),
        record: Some(SyncdRecord {
            index: Some(SyncdIndex {
                blob: Some(index_mac.to_vec()),
            }),
            value: Some(SyncdValue { blob: Some(blob) }),
            key_id: key_id_message(key_id),
        }),
    };
    let decoded = Mutation {
        operation: SyncdOperation::Set,
        key_id: key_id.to_vec(),
        value: Some(value),
        version: info.version,
        index: info.index,
        index_mac: index_mac.to_vec(),
        value_mac: value_mac.to_vec(),
        patch_version,
    };
    Ok((raw, decoded))
}

/// Encrypt `info` with `keys` and fold it into `state`.
///
/// Previous values are resolved from earlier mutations of the same patch,
/// then the state's log, then `stored_value`. Failures of `stored_value` are
/// returned as warnings unless `strict_lookup` is set.
pub(crate) fn encode_patch<F>(
    mut state: HashState,
    info: PatchInfo,
    key_id: &[u8],
    keys: &ExpandedAppStateKeys,
    mut stored_value: F,
    strict_lookup: bool,
) -> Result<EncodedPatch>
where
    F: FnMut(&[u8]) -> Result<Option<Vec<u8>>>,
{
    let name = info.collection;
    let timestamp_ms = info.timestamp.unwrap_or_else(Utc::now).timestamp_millis();
    let version = state.version + 1;

    let mut raw_mutations = Vec::with_capacity(info.mutations.len());
    let mut decoded = Vec::with_capacity(info.mutations.len());
    for (i, mutation_info) in info.mutations.into_iter().enumerate() {
        let (raw, mutation) = encrypt_mutation(mutation_info, timestamp_ms, key_id, keys, version)
            .map_err(|err| err.in_mutation(i + 1))?;
        raw_mutations.push(raw);
        decoded.push(mutation);
    }

    let mut patch = SyncdPatch {
        version: Some(SyncdVersion {
            version: Some(version),
        }),
        mutations: raw_mutations,
        key_id: key_id_message(key_id),
        ..Default::default()
    };

    let committed = mem::take(&mut state.mutations);
    let mut warnings = Vec::new();
    let in_flight = std::slice::from_ref(&patch);
    let hash_warnings = state.update_hash(&patch.mutations, |index_mac, i| {
        let cursor = Cursor {
            patch: 0,
            mutation: i,
        };
        match previous_value(&committed, in_flight, index_mac, cursor) {
            PreviousValue::Set(value_mac) => Ok(Some(value_mac.to_vec())),
            PreviousValue::Removed => Ok(None),
            PreviousValue::Unknown => match stored_value(index_mac) {
                Ok(value_mac) => Ok(value_mac),
                Err(err) if strict_lookup => Err(err),
                Err(err) => {
                    warnings.push(err);
                    Ok(None)
                }
            },
        }
    })?;
    warnings.extend(hash_warnings);

    state.version = version;
    state.mutations = committed;
    state.mutations.extend(decoded);

    patch.snapshot_mac = Some(state.generate_snapshot_mac(name, &keys.snapshot_mac).to_vec());
    patch.patch_mac = Some(generate_patch_mac(&patch, name, &keys.patch_mac, version).to_vec());
    let bytes = patch.encode_to_vec();

    Ok(EncodedPatch {
        patch,
        bytes,
        state,
        warnings,
    })
}

// Patch builders

fn single(collection: CollectionName, mutation: MutationInfo) -> PatchInfo {
    PatchInfo {
        timestamp: None,
        collection,
        mutations: vec![mutation],
    }
}

fn jid_user(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or_default();
    user.split(':').next().unwrap_or_default()
}

fn message_range(
    last_message_timestamp: Option<DateTime<Utc>>,
    last_message_key: Option<MessageKey>,
) -> SyncActionMessageRange {
    let timestamp = last_message_timestamp.unwrap_or_else(Utc::now).timestamp();
    SyncActionMessageRange {
        last_message_timestamp: Some(timestamp),
        messages: last_message_key
            .map(|key| SyncActionMessage {
                key: Some(key),
                timestamp: Some(timestamp),
            })
            .into_iter()
            .collect(),
        ..Default::default()
    }
}

/// Mute or unmute a chat; a `None` duration mutes forever.
pub fn build_mute(target: &str, mute: bool, duration: Option<Duration>) -> PatchInfo {
    let end = duration
        .filter(|duration| *duration > Duration::zero())
        .map(|duration| (Utc::now() + duration).timestamp_millis());
    build_mute_abs(target, mute, end)
}

/// Mute or unmute a chat until an absolute time in milliseconds.
pub fn build_mute_abs(target: &str, mute: bool, mute_end_timestamp: Option<i64>) -> PatchInfo {
    let mute_end_timestamp = match mute_end_timestamp {
        None if mute => Some(-1),
        other => other,
    };
    single(
        CollectionName::RegularHigh,
        MutationInfo {
            index: vec![INDEX_MUTE.to_string(), target.to_string()],
            version: 2,
            value: SyncActionValue {
                mute_action: Some(MuteAction {
                    muted: Some(mute),
                    mute_end_timestamp,
                    ..Default::default()
                }),
                ..Default::default()
            },
        },
    )
}

fn pin_mutation(target: &str, pin: bool) -> MutationInfo {
    MutationInfo {
        index: vec![INDEX_PIN.to_string(), target.to_string()],
        version: 5,
        value: SyncActionValue {
            pin_action: Some(PinAction { pinned: Some(pin) }),
            ..Default::default()
        },
    }
}

pub fn build_pin(target: &str, pin: bool) -> PatchInfo {
    single(CollectionName::RegularLow, pin_mutation(target, pin))
}

/// Archive or unarchive a chat. Archiving also unpins it.
pub fn build_archive(
    target: &str,
    archive: bool,
    last_message_timestamp: Option<DateTime<Utc>>,
    last_message_key: Option<MessageKey>,
) -> PatchInfo {
    let mut mutations = vec![MutationInfo {
        index: vec![INDEX_ARCHIVE.to_string(), target.to_string()],
        version: 3,
        value: SyncActionValue {
            archive_chat_action: Some(ArchiveChatAction {
                archived: Some(archive),
                message_range: Some(message_range(last_message_timestamp, last_message_key)),
            }),
            ..Default::default()
        },
    }];
    if archive {
        mutations.push(pin_mutation(target, false));
    }
    PatchInfo {
        timestamp: None,
        collection: CollectionName::RegularLow,
        mutations,
    }
}

pub fn build_mark_chat_as_read(
    target: &str,
    read: bool,
    last_message_timestamp: Option<DateTime<Utc>>,
    last_message_key: Option<MessageKey>,
) -> PatchInfo {
    single(
        CollectionName::RegularLow,
        MutationInfo {
            index: vec![INDEX_MARK_CHAT_AS_READ.to_string(), target.to_string()],
            version: 3,
            value: SyncActionValue {
                mark_chat_as_read_action: Some(MarkChatAsReadAction {
                    read: Some(read),
                    message_range: Some(message_range(last_message_timestamp, last_message_key)),
                }),
                ..Default::default()
            },
        },
    )
}

fn labeled(labeled: bool) -> SyncActionValue {
    SyncActionValue {
        label_association_action: Some(LabelAssociationAction {
            labeled: Some(labeled),
        }),
        ..Default::default()
    }
}

pub fn build_label_chat(target: &str, label_id: &str, is_labeled: bool) -> PatchInfo {
    single(
        CollectionName::Regular,
        MutationInfo {
            index: vec![
                INDEX_LABEL_ASSOCIATION_CHAT.to_string(),
                label_id.to_string(),
                target.to_string(),
            ],
            version: 3,
            value: labeled(is_labeled),
        },
    )
}

pub fn build_label_message(
    target: &str,
    label_id: &str,
    message_id: &str,
    is_labeled: bool,
) -> PatchInfo {
    single(
        CollectionName::Regular,
        MutationInfo {
            index: vec![
                INDEX_LABEL_ASSOCIATION_MESSAGE.to_string(),
                label_id.to_string(),
                target.to_string(),
                message_id.to_string(),
                "0".to_string(),
                "0".to_string(),
            ],
            version: 3,
            value: labeled(is_labeled),
        },
    )
}

pub fn build_label_edit(label_id: &str, name: &str, color: i32, deleted: bool) -> PatchInfo {
    single(
        CollectionName::Regular,
        MutationInfo {
            index: vec![INDEX_LABEL_EDIT.to_string(), label_id.to_string()],
            version: 3,
            value: SyncActionValue {
                label_edit_action: Some(LabelEditAction {
                    name: Some(name.to_string()),
                    color: Some(color),
                    deleted: Some(deleted),
                    ..Default::default()
                }),
                ..Default::default()
            },
        },
    )
}

pub fn build_setting_push_name(push_name: &str) -> PatchInfo {
    single(
        CollectionName::CriticalBlock,
        MutationInfo {
            index: vec![INDEX_SETTING_PUSH_NAME.to_string()],
            version: 1,
            value: SyncActionValue {
                push_name_setting: Some(PushNameSetting {
                    name: Some(push_name.to_string()),
                }),
                ..Default::default()
            },
        },
    )
}

/// Star or unstar a message. The sender is written as `"0"` when it is the
/// chat itself.
pub fn build_star(
    target: &str,
    sender: &str,
    message_id: &str,
    from_me: bool,
    starred: bool,
) -> PatchInfo {
    let sender = if jid_user(target) == jid_user(sender) {
        "0"
    } else {
        sender
    };
    single(
        CollectionName::RegularHigh,
        MutationInfo {
            index: vec![
                INDEX_STAR.to_string(),
                target.to_string(),
                message_id.to_string(),
                if from_me { "1" } else { "0" }.to_string(),
                sender.to_string(),
            ],
            version: 2,
            value: SyncActionValue {
                star_action: Some(StarAction {
                    starred: Some(starred),
                }),
                ..Default::default()
            },
        },
    )
}

pub fn build_delete_chat(
    target: &str,
    last_message_timestamp: Option<DateTime<Utc>>,
    last_message_key: Option<MessageKey>,
    delete_media: bool,
) -> PatchInfo {
    single(
        CollectionName::RegularHigh,
        MutationInfo {
            index: vec![
                INDEX_DELETE_CHAT.to_string(),
                target.to_string(),
                if delete_media { "1" } else { "0" }.to_string(),
            ],
            version: 6,
            value: SyncActionValue {
                delete_chat_action: Some(DeleteChatAction {
                    message_range: Some(message_range(last_message_timestamp, last_message_key)),
                }),
                ..Default::default()
            },
        },
    )
}
