//! Protobuf messages exchanged with the server and stored inside encrypted values.
//!
//! Only the fields the engine reads or writes are declared; unknown fields are
//! skipped by the decoder.

// ---------------------------------------------------------------------------
// Server sync containers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SyncdOperation {
    Set = 0,
    Remove = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdVersion {
    #[prost(uint64, optional, tag = "1")]
    pub version: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExitCode {
    #[prost(uint64, optional, tag = "1")]
    pub code: Option<u64>,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdIndex {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdValue {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyId {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdRecord {
    #[prost(message, optional, tag = "1")]
    pub index: Option<SyncdIndex>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncdValue>,
    #[prost(message, optional, tag = "3")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdMutation {
    #[prost(enumeration = "SyncdOperation", optional, tag = "1")]
    pub operation: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub record: Option<SyncdRecord>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdMutations {
    #[prost(message, repeated, tag = "1")]
    pub mutations: Vec<SyncdMutation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExternalBlobReference {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub direct_path: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub handle: Option<String>,
    #[prost(uint64, optional, tag = "4")]
    pub file_size_bytes: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub file_enc_sha256: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdSnapshot {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub records: Vec<SyncdRecord>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdPatch {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub mutations: Vec<SyncdMutation>,
    #[prost(message, optional, tag = "3")]
    pub external_mutations: Option<ExternalBlobReference>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub snapshot_mac: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub patch_mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "6")]
    pub key_id: Option<KeyId>,
    #[prost(message, optional, tag = "7")]
    pub exit_code: Option<ExitCode>,
    #[prost(uint32, optional, tag = "8")]
    pub device_index: Option<u32>,
}

// ---------------------------------------------------------------------------
// Decrypted action payloads
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageKey {
    #[prost(string, optional, tag = "1")]
    pub remote_jid: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub from_me: Option<bool>,
    #[prost(string, optional, tag = "3")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub participant: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionMessage {
    #[prost(message, optional, tag = "1")]
    pub key: Option<MessageKey>,
    #[prost(int64, optional, tag = "2")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionMessageRange {
    #[prost(int64, optional, tag = "1")]
    pub last_message_timestamp: Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub last_system_message_timestamp: Option<i64>,
    #[prost(message, repeated, tag = "3")]
    pub messages: Vec<SyncActionMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StarAction {
    #[prost(bool, optional, tag = "1")]
    pub starred: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactAction {
    #[prost(string, optional, tag = "1")]
    pub full_name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub first_name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub lid_jid: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MuteAction {
    #[prost(bool, optional, tag = "1")]
    pub muted: Option<bool>,
    #[prost(int64, optional, tag = "2")]
    pub mute_end_timestamp: Option<i64>,
    #[prost(bool, optional, tag = "3")]
    pub auto_muted: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinAction {
    #[prost(bool, optional, tag = "1")]
    pub pinned: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecurityNotificationSetting {
    #[prost(bool, optional, tag = "1")]
    pub show_notification: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushNameSetting {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LabelEditAction {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub color: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub predefined_id: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub deleted: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LabelAssociationAction {
    #[prost(bool, optional, tag = "1")]
    pub labeled: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocaleSetting {
    #[prost(string, optional, tag = "1")]
    pub locale: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArchiveChatAction {
    #[prost(bool, optional, tag = "1")]
    pub archived: Option<bool>,
    #[prost(message, optional, tag = "2")]
    pub message_range: Option<SyncActionMessageRange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteMessageForMeAction {
    #[prost(bool, optional, tag = "1")]
    pub delete_media: Option<bool>,
    #[prost(int64, optional, tag = "2")]
    pub message_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarkChatAsReadAction {
    #[prost(bool, optional, tag = "1")]
    pub read: Option<bool>,
    #[prost(message, optional, tag = "2")]
    pub message_range: Option<SyncActionMessageRange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClearChatAction {
    #[prost(message, optional, tag = "1")]
    pub message_range: Option<SyncActionMessageRange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteChatAction {
    #[prost(message, optional, tag = "1")]
    pub message_range: Option<SyncActionMessageRange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnarchiveChatsSetting {
    #[prost(bool, optional, tag = "1")]
    pub unarchive_chats: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionValue {
    #[prost(int64, optional, tag = "1")]
    pub timestamp: Option<i64>,
    #[prost(message, optional, tag = "2")]
    pub star_action: Option<StarAction>,
    #[prost(message, optional, tag = "3")]
    pub contact_action: Option<ContactAction>,
    #[prost(message, optional, tag = "4")]
    pub mute_action: Option<MuteAction>,
    #[prost(message, optional, tag = "5")]
    pub pin_action: Option<PinAction>,
    #[prost(message, optional, tag = "6")]
    pub security_notification_setting: Option<SecurityNotificationSetting>,
    #[prost(message, optional, tag = "7")]
    pub push_name_setting: Option<PushNameSetting>,
    #[prost(message, optional, tag = "14")]
    pub label_edit_action: Option<LabelEditAction>,
    #[prost(message, optional, tag = "15")]
    pub label_association_action: Option<LabelAssociationAction>,
    #[prost(message, optional, tag = "16")]
    pub locale_setting: Option<LocaleSetting>,
    #[prost(message, optional, tag = "17")]
    pub archive_chat_action: Option<ArchiveChatAction>,
    #[prost(message, optional, tag = "18")]
    pub delete_message_for_me_action: Option<DeleteMessageForMeAction>,
    #[prost(message, optional, tag = "20")]
    pub mark_chat_as_read_action: Option<MarkChatAsReadAction>,
    #[prost(message, optional, tag = "21")]
    pub clear_chat_action: Option<ClearChatAction>,
    #[prost(message, optional, tag = "22")]
    pub delete_chat_action: Option<DeleteChatAction>,
    #[prost(message, optional, tag = "23")]
    pub unarchive_chats_setting: Option<UnarchiveChatsSetting>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionData {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub index: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncActionValue>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub padding: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "4")]
    pub version: Option<i32>,
}

// ---------------------------------------------------------------------------
// Fatal recovery
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdPlainTextRecord {
    #[prost(message, optional, tag = "1")]
    pub value: Option<SyncActionData>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub key_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub mac: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdSnapshotRecovery {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(string, optional, tag = "2")]
    pub collection_name: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub mutation_records: Vec<SyncdPlainTextRecord>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub collection_lthash: Option<Vec<u8>>,
}

/// Envelope delivered by the primary device in answer to a fatal recovery request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdSnapshotFatalRecoveryResponse {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub collection_snapshot: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "2")]
    pub is_compressed: Option<bool>,
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl SyncdRecord {
    pub fn index_blob(&self) -> &[u8] {
        self.index
            .as_ref()
            .and_then(|index| index.blob.as_deref())
            .unwrap_or_default()
    }

    pub fn value_blob(&self) -> &[u8] {
        self.value
            .as_ref()
            .and_then(|value| value.blob.as_deref())
            .unwrap_or_default()
    }

    pub fn key_id_bytes(&self) -> &[u8] {
        key_id_bytes(self.key_id.as_ref())
    }

    /// Trailing 32 bytes of the value blob, if it is long enough to carry one.
    pub fn value_mac(&self) -> Option<&[u8]> {
        let blob = self.value_blob();
        blob.len()
            .checked_sub(crate::crypto::MAC_SIZE)
            .map(|start| &blob[start..])
    }
}

impl SyncdMutation {
    pub fn record_or_default(&self) -> &SyncdRecord {
        static EMPTY: SyncdRecord = SyncdRecord {
            index: None,
            value: None,
            key_id: None,
        };
        self.record.as_ref().unwrap_or(&EMPTY)
    }
}

impl SyncdPatch {
    pub fn version_number(&self) -> u64 {
        self.version
            .as_ref()
            .and_then(|version| version.version)
            .unwrap_or(0)
    }

    pub fn key_id_bytes(&self) -> &[u8] {
        key_id_bytes(self.key_id.as_ref())
    }
}

impl SyncdSnapshot {
    pub fn version_number(&self) -> u64 {
        self.version
            .as_ref()
            .and_then(|version| version.version)
            .unwrap_or(0)
    }

    pub fn key_id_bytes(&self) -> &[u8] {
        key_id_bytes(self.key_id.as_ref())
    }
}

fn key_id_bytes(key_id: Option<&KeyId>) -> &[u8] {
    key_id.and_then(|key| key.id.as_deref()).unwrap_or_default()
}

pub(crate) fn key_id(id: &[u8]) -> Option<KeyId> {
    Some(KeyId {
        id: Some(id.to_vec()),
    })
}
