//! App-state synchronization engine.
//!
//! Verifies and decrypts inbound app-state patches, encodes outbound ones,
//! and keeps the per-collection LtHash accumulator in step with the server.

pub mod config;
pub mod crypto;
pub mod decode;
pub mod encode;
pub mod error;
pub mod hash;
pub mod keys;
pub mod lthash;
pub mod node;
pub mod patch_list;
pub mod processor;
pub mod proto;
pub mod recovery;

pub use config::ProcessorConfig;
pub use decode::{decode_mutation, Mutation, SyncAction};
pub use encode::{
    build_archive, build_delete_chat, build_label_chat, build_label_edit, build_label_message,
    build_mark_chat_as_read, build_mute, build_mute_abs, build_pin, build_setting_push_name,
    build_star, EncodedPatch, MutationInfo, PatchInfo,
};
pub use error::{AppStateError, FailureClass, Result};
pub use hash::{previous_value, Cursor, HashState, PreviousValue};
pub use keys::{expand_app_state_keys, ExpandedAppStateKeys, KeyCache};
pub use node::{AttrReader, Node, NodeContent};
pub use patch_list::{parse_patch_list, ExternalBlobFetcher, ParsedPatchList, PatchList};
pub use processor::{DecodedPatches, Processor};
pub use recovery::{parse_recovery, RecoveredState};
