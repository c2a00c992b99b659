//! Error types for the app-state engine.

use syncd_core::StoreError;
use thiserror::Error;

/// Result type alias for app-state operations.
pub type Result<T> = std::result::Result<T, AppStateError>;

/// How a caller should react to a failed decode, encode or recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Corruption or a misbehaving server: resync or request fatal recovery.
    Integrity,
    /// Fetch the missing key, then retry the same input.
    MissingKey,
    /// Input can never succeed as-is.
    Malformed,
    /// The backing store failed; retrying may succeed.
    Store,
}

/// Errors that can occur while processing app-state patches.
#[derive(Debug, Error)]
pub enum AppStateError {
    /// Key ID is not known to the key store
    #[error("didn't find app state key {}", hex(.key_id))]
    KeyNotFound { key_id: Vec<u8> },

    /// Key store has no key to encode new patches with
    #[error("no app state key available for encoding")]
    NoLatestKey,

    /// Store backend error
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("mismatching content MAC")]
    MismatchingContentMac,

    #[error("mismatching index MAC")]
    MismatchingIndexMac,

    #[error("mismatching LTHash")]
    MismatchingLtHash,

    #[error("mismatching patch MAC")]
    MismatchingPatchMac,

    /// Hash-update diagnostic: no prior SET found for a REMOVE
    #[error("missing value MAC of previous SET operation for {}", hex(.index_mac))]
    MissingPreviousSetValue { index_mac: Vec<u8> },

    #[error("failed to decrypt: {0}")]
    Decrypt(String),

    #[error("failed to decode protobuf: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    /// Mutation index is not a JSON array of strings
    #[error("failed to parse index: {0}")]
    Index(#[source] serde_json::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decompress: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("invalid lthash length: {0}")]
    InvalidLtHashLength(usize),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("unknown app state collection '{0}'")]
    UnknownCollection(String),

    /// Container attributes that failed to parse
    #[error("invalid attributes: {}", .0.join("; "))]
    Attributes(Vec<String>),

    #[error("patch list has no collection name")]
    MissingCollectionName,

    #[error("failed to process mutation #{index}: {source}")]
    Mutation {
        index: usize,
        source: Box<AppStateError>,
    },

    #[error("failed to process patch v{version}: {source}")]
    Patch {
        version: u64,
        source: Box<AppStateError>,
    },

    #[error("failed to process snapshot v{version}: {source}")]
    Snapshot {
        version: u64,
        source: Box<AppStateError>,
    },

    #[error("failed to parse patch #{position}: {source}")]
    PatchList {
        position: usize,
        source: Box<AppStateError>,
    },

    #[error("failed to recover record #{index}: {source}")]
    Record {
        index: usize,
        source: Box<AppStateError>,
    },
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

impl AppStateError {
    /// Create a malformed-input error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Create a key-not-found error
    pub fn key_not_found(key_id: &[u8]) -> Self {
        Self::KeyNotFound {
            key_id: key_id.to_vec(),
        }
    }

    /// Annotate with the 1-based position of a mutation inside its patch.
    pub fn in_mutation(self, index: usize) -> Self {
        Self::Mutation {
            index,
            source: Box::new(self),
        }
    }

    /// Annotate with the version of the patch being processed.
    pub fn in_patch(self, version: u64) -> Self {
        Self::Patch {
            version,
            source: Box::new(self),
        }
    }

    pub fn in_snapshot(self, version: u64) -> Self {
        Self::Snapshot {
            version,
            source: Box::new(self),
        }
    }

    /// Innermost error, with positional context stripped.
    pub fn root(&self) -> &AppStateError {
        match self {
            Self::Mutation { source, .. }
            | Self::Patch { source, .. }
            | Self::Snapshot { source, .. }
            | Self::PatchList { source, .. }
            | Self::Record { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify error for caller recovery policy.
    pub fn failure_class(&self) -> FailureClass {
        match self.root() {
            Self::MismatchingContentMac
            | Self::MismatchingIndexMac
            | Self::MismatchingLtHash
            | Self::MismatchingPatchMac => FailureClass::Integrity,
            Self::KeyNotFound { .. } | Self::NoLatestKey => FailureClass::MissingKey,
            Self::Store(_) => FailureClass::Store,
            _ => FailureClass::Malformed,
        }
    }

    /// True when retrying after fetching keys or waiting out the store can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.failure_class(),
            FailureClass::MissingKey | FailureClass::Store
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_strips_positional_context() {
        let err = AppStateError::MismatchingIndexMac
            .in_mutation(3)
            .in_patch(12);
        assert!(matches!(err.root(), AppStateError::MismatchingIndexMac));
        assert_eq!(
            err.to_string(),
            "failed to process patch v12: failed to process mutation #3: mismatching index MAC"
        );
    }

    #[test]
    fn failure_class_for_integrity_errors() {
        let err = AppStateError::MismatchingPatchMac.in_patch(4);
        assert_eq!(err.failure_class(), FailureClass::Integrity);
        assert!(!err.is_retryable());
    }

    #[test]
    fn failure_class_for_missing_key_is_retryable() {
        let err = AppStateError::key_not_found(&[0xAB, 0x01]).in_mutation(1);
        assert_eq!(err.failure_class(), FailureClass::MissingKey);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("AB01"));
    }

    #[test]
    fn failure_class_for_bad_lthash_is_malformed() {
        let err = AppStateError::InvalidLtHashLength(64);
        assert_eq!(err.failure_class(), FailureClass::Malformed);
    }
}
