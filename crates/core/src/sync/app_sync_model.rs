//! App-state sync domain models and store contracts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::Result;

/// Size in bytes of a collection accumulator.
pub const LTHASH_SIZE: usize = 128;

/// Canonical list of app-state collections, in the order they are usually fetched.
pub const ALL_COLLECTIONS: [CollectionName; 5] = [
    CollectionName::CriticalBlock,
    CollectionName::CriticalUnblockLow,
    CollectionName::RegularHigh,
    CollectionName::Regular,
    CollectionName::RegularLow,
];

/// Named partition of app-state mutations with its own version and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionName {
    /// Push name, locale and security notification settings.
    CriticalBlock,
    /// The contact list.
    CriticalUnblockLow,
    /// Pin, archive and read markers.
    RegularLow,
    /// Mutes, stars and chat deletions.
    RegularHigh,
    /// Labels and protocol info such as key expiration.
    Regular,
}

impl CollectionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriticalBlock => "critical_block",
            Self::CriticalUnblockLow => "critical_unblock_low",
            Self::RegularLow => "regular_low",
            Self::RegularHigh => "regular_high",
            Self::Regular => "regular",
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a collection name is not one of [`ALL_COLLECTIONS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCollection(pub String);

impl fmt::Display for UnknownCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown app state collection '{}'", self.0)
    }
}

impl std::error::Error for UnknownCollection {}

impl FromStr for CollectionName {
    type Err = UnknownCollection;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        ALL_COLLECTIONS
            .iter()
            .copied()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| UnknownCollection(value.to_string()))
    }
}

// First element of a mutation index, grouped by collection.

// regular_low
pub const INDEX_PIN: &str = "pin_v1";
pub const INDEX_ARCHIVE: &str = "archive";
pub const INDEX_MARK_CHAT_AS_READ: &str = "markChatAsRead";
pub const INDEX_SETTING_UNARCHIVE_CHATS: &str = "setting_unarchiveChats";

// regular
pub const INDEX_LABEL_ASSOCIATION_MESSAGE: &str = "label_message";
pub const INDEX_LABEL_EDIT: &str = "label_edit";
pub const INDEX_LABEL_ASSOCIATION_CHAT: &str = "label_jid";

// regular_high
pub const INDEX_STAR: &str = "star";
pub const INDEX_MUTE: &str = "mute";
pub const INDEX_DELETE_MESSAGE_FOR_ME: &str = "deleteMessageForMe";
pub const INDEX_CLEAR_CHAT: &str = "clearChat";
pub const INDEX_DELETE_CHAT: &str = "deleteChat";

// critical_unblock_low
pub const INDEX_CONTACT: &str = "contact";

// critical_block
pub const INDEX_SETTING_SECURITY_NOTIFICATION: &str = "setting_securityNotification";
pub const INDEX_SETTING_PUSH_NAME: &str = "setting_pushName";
pub const INDEX_SETTING_LOCALE: &str = "setting_locale";

/// Raw app-state root key as distributed by the key-share channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKey {
    pub data: Vec<u8>,
    pub fingerprint: Vec<u8>,
    pub timestamp: i64,
}

/// Index MAC to value MAC pair remembered for later previous-value lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationMac {
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
}

/// Key store contract used by the app-state engine.
///
/// `Ok(None)` means the key was never issued; `Err` is reserved for store failures.
pub trait AppStateKeyStore: Send + Sync {
    fn get_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>>;
    fn key_exists(&self, key_id: &[u8]) -> Result<bool>;
    fn latest_key_id(&self) -> Result<Option<Vec<u8>>>;
}

/// Record store contract: per-collection version, accumulator and mutation MACs.
pub trait AppStateRecordStore: Send + Sync {
    /// Version zero and an all-zero hash when nothing is stored.
    fn get_version_and_hash(&self, collection: CollectionName) -> Result<(u64, [u8; LTHASH_SIZE])>;

    fn put_version_and_hash(
        &self,
        collection: CollectionName,
        version: u64,
        hash: &[u8; LTHASH_SIZE],
    ) -> Result<()>;

    /// Removes the version record together with every mutation MAC of the collection.
    fn delete_version(&self, collection: CollectionName) -> Result<()>;

    fn get_last_value_mac(
        &self,
        collection: CollectionName,
        index_mac: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    fn put_mutation_macs(
        &self,
        collection: CollectionName,
        version: u64,
        macs: &[MutationMac],
    ) -> Result<()>;

    fn delete_mutation_macs(
        &self,
        collection: CollectionName,
        index_macs: &[Vec<u8>],
    ) -> Result<()>;
}
