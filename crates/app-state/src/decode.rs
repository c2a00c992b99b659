//! Decryption and verification of individual mutations.

use prost::Message;
use syncd_core::{
    INDEX_ARCHIVE, INDEX_CLEAR_CHAT, INDEX_CONTACT, INDEX_DELETE_CHAT,
    INDEX_DELETE_MESSAGE_FOR_ME, INDEX_LABEL_ASSOCIATION_CHAT, INDEX_LABEL_ASSOCIATION_MESSAGE,
    INDEX_LABEL_EDIT, INDEX_MARK_CHAT_AS_READ, INDEX_MUTE, INDEX_PIN,
    INDEX_SETTING_LOCALE, INDEX_SETTING_PUSH_NAME, INDEX_SETTING_SECURITY_NOTIFICATION,
    INDEX_SETTING_UNARCHIVE_CHATS, INDEX_STAR,
};

use crate::crypto::{cbc_decrypt, verify_content_mac, verify_hmac_sha256, IV_SIZE, MAC_SIZE};
use crate::error::{AppStateError, Result};
use crate::keys::ExpandedAppStateKeys;
use crate::proto::{
    ArchiveChatAction, ClearChatAction, ContactAction, DeleteChatAction,
    DeleteMessageForMeAction, LabelAssociationAction, LabelEditAction, LocaleSetting,
    MarkChatAsReadAction, MuteAction, PinAction, PushNameSetting, SecurityNotificationSetting,
    StarAction, SyncActionData, SyncActionValue, SyncdMutation, SyncdOperation,
    UnarchiveChatsSetting,
};

/// A verified, decrypted app-state mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub operation: SyncdOperation,
    pub key_id: Vec<u8>,
    pub value: Option<SyncActionValue>,
    /// Schema version of the action, chosen by the author.
    pub version: i32,
    pub index: Vec<String>,
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
    /// Version of the patch or snapshot that carried this mutation.
    pub patch_version: u64,
}

/// Typed view over the action carried by a mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction<'a> {
    Star(&'a StarAction),
    Contact(&'a ContactAction),
    Mute(&'a MuteAction),
    Pin(&'a PinAction),
    PushName(&'a PushNameSetting),
    LabelEdit(&'a LabelEditAction),
    LabelAssociation(&'a LabelAssociationAction),
    Locale(&'a LocaleSetting),
    Archive(&'a ArchiveChatAction),
    MarkChatAsRead(&'a MarkChatAsReadAction),
    ClearChat(&'a ClearChatAction),
    DeleteChat(&'a DeleteChatAction),
    DeleteMessageForMe(&'a DeleteMessageForMeAction),
    SecurityNotification(&'a SecurityNotificationSetting),
    UnarchiveChats(&'a UnarchiveChatsSetting),
    /// Index kind not understood, or the matching action field is absent.
    Unknown,
}

impl Mutation {
    /// Resolve the action by the first index element.
    pub fn action(&self) -> SyncAction<'_> {
        let Some(value) = self.value.as_ref() else {
            return SyncAction::Unknown;
        };
        let kind = self.index.first().map(String::as_str).unwrap_or_default();
        let action = match kind {
            INDEX_STAR => value.star_action.as_ref().map(SyncAction::Star),
            INDEX_CONTACT => value.contact_action.as_ref().map(SyncAction::Contact),
            INDEX_MUTE => value.mute_action.as_ref().map(SyncAction::Mute),
            INDEX_PIN => value.pin_action.as_ref().map(SyncAction::Pin),
            INDEX_SETTING_PUSH_NAME => value.push_name_setting.as_ref().map(SyncAction::PushName),
            INDEX_LABEL_EDIT => value.label_edit_action.as_ref().map(SyncAction::LabelEdit),
            INDEX_LABEL_ASSOCIATION_CHAT | INDEX_LABEL_ASSOCIATION_MESSAGE => value
                .label_association_action
                .as_ref()
                .map(SyncAction::LabelAssociation),
            INDEX_SETTING_LOCALE => value.locale_setting.as_ref().map(SyncAction::Locale),
            INDEX_ARCHIVE => value.archive_chat_action.as_ref().map(SyncAction::Archive),
            INDEX_MARK_CHAT_AS_READ => value
                .mark_chat_as_read_action
                .as_ref()
                .map(SyncAction::MarkChatAsRead),
            INDEX_CLEAR_CHAT => value.clear_chat_action.as_ref().map(SyncAction::ClearChat),
            INDEX_DELETE_CHAT => value.delete_chat_action.as_ref().map(SyncAction::DeleteChat),
            INDEX_DELETE_MESSAGE_FOR_ME => value
                .delete_message_for_me_action
                .as_ref()
                .map(SyncAction::DeleteMessageForMe),
            INDEX_SETTING_SECURITY_NOTIFICATION => value
                .security_notification_setting
                .as_ref()
                .map(SyncAction::SecurityNotification),
            INDEX_SETTING_UNARCHIVE_CHATS => value
                .unarchive_chats_setting
                .as_ref()
                .map(SyncAction::UnarchiveChats),
            _ => None,
        };
        action.unwrap_or(SyncAction::Unknown)
    }
}

/// Decrypt and verify one mutation of a patch or snapshot.
///
/// `position` is the zero-based position inside the patch; failures are
/// reported with its one-based number.
pub fn decode_mutation(
    mutation: &SyncdMutation,
    keys: &ExpandedAppStateKeys,
    position: usize,
    validate_macs: bool,
    patch_version: u64,
) -> Result<Mutation> {
    decode_inner(mutation, keys, validate_macs, patch_version)
        .map_err(|err| err.in_mutation(position + 1))
}

fn decode_inner(
    mutation: &SyncdMutation,
    keys: &ExpandedAppStateKeys,
    validate_macs: bool,
    patch_version: u64,
) -> Result<Mutation> {
    let record = mutation.record_or_default();
    let operation = mutation.operation();
    let key_id = record.key_id_bytes();

    let blob = record.value_blob();
    if blob.len() < IV_SIZE + MAC_SIZE {
        return Err(AppStateError::malformed(format!(
            "value blob of {} bytes is too short",
            blob.len()
        )));
    }
    let (content, value_mac) = blob.split_at(blob.len() - MAC_SIZE);
    if validate_macs && !verify_content_mac(operation, content, key_id, &keys.value_mac, value_mac)
    {
        return Err(AppStateError::MismatchingContentMac);
    }

    let (iv, ciphertext) = content.split_at(IV_SIZE);
    let plaintext = cbc_decrypt(&keys.value_encryption, iv, ciphertext)?;
    let data = SyncActionData::decode(plaintext.as_slice())?;

    let index_mac = record.index_blob();
    if validate_macs && !verify_hmac_sha256(&keys.index, &[data.index()], index_mac) {
        return Err(AppStateError::MismatchingIndexMac);
    }
    let index: Vec<String> = serde_json::from_slice(data.index()).map_err(AppStateError::Index)?;

    Ok(Mutation {
        operation,
        key_id: key_id.to_vec(),
        version: data.version(),
        value: data.value,
        index,
        index_mac: index_mac.to_vec(),
        value_mac: value_mac.to_vec(),
        patch_version,
    })
}
