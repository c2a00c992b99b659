//! MAC, HKDF and AES-CBC primitives used by the patch pipeline.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Sha256, Sha512};

use crate::error::{AppStateError, Result};
use crate::proto::SyncdOperation;

/// Length of every MAC carried on the wire.
pub const MAC_SIZE: usize = 32;
/// AES-CBC initialization vector length.
pub const IV_SIZE: usize = 16;

const AES_BLOCK_SIZE: usize = 16;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

fn keyed<M: Mac + hmac::digest::KeyInit>(key: &[u8], parts: &[&[u8]]) -> M {
    let mut mac =
        <M as hmac::digest::KeyInit>::new_from_slice(key).expect("HMAC accepts keys of any size");
    for part in parts {
        mac.update(part);
    }
    mac
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; MAC_SIZE] {
    keyed::<HmacSha256>(key, parts).finalize().into_bytes().into()
}

/// Constant-time check of an HMAC-SHA256 tag.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    keyed::<HmacSha256>(key, parts).verify_slice(tag).is_ok()
}

fn content_mac_parts<'a>(
    operation: &'a [u8; 1],
    key_id: &'a [u8],
    data: &'a [u8],
    key_len: &'a [u8; 8],
) -> [&'a [u8]; 4] {
    [&operation[..], key_id, data, &key_len[..]]
}

fn operation_byte(operation: SyncdOperation) -> [u8; 1] {
    [operation as u8 + 1]
}

fn key_id_length(key_id: &[u8]) -> [u8; 8] {
    (key_id.len() as u64 + 1).to_be_bytes()
}

/// Value MAC of an encrypted mutation: truncated HMAC-SHA512 over the
/// operation, key ID, ciphertext and key ID length.
pub fn content_mac(
    operation: SyncdOperation,
    data: &[u8],
    key_id: &[u8],
    key: &[u8],
) -> [u8; MAC_SIZE] {
    let (op, len) = (operation_byte(operation), key_id_length(key_id));
    let full = keyed::<HmacSha512>(key, &content_mac_parts(&op, key_id, data, &len))
        .finalize()
        .into_bytes();
    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&full[..MAC_SIZE]);
    out
}

/// Constant-time check of a value MAC produced by [`content_mac`].
pub fn verify_content_mac(
    operation: SyncdOperation,
    data: &[u8],
    key_id: &[u8],
    key: &[u8],
    tag: &[u8],
) -> bool {
    if tag.len() != MAC_SIZE {
        return false;
    }
    let (op, len) = (operation_byte(operation), key_id_length(key_id));
    keyed::<HmacSha512>(key, &content_mac_parts(&op, key_id, data, &len))
        .verify_truncated_left(tag)
        .is_ok()
}

/// Fill `out` with HKDF-SHA256 output using a zero salt.
pub fn hkdf_sha256(ikm: &[u8], info: &[u8], out: &mut [u8]) {
    Hkdf::<Sha256>::new(None, ikm)
        .expand(info, out)
        .expect("output length within HKDF-SHA256 limit");
}

/// AES-256-CBC encrypt with a fresh random IV; returns `iv || ciphertext`.
pub fn cbc_encrypt(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    cbc_encrypt_with_iv(key, &iv, plaintext)
}

/// AES-256-CBC encrypt with a caller-chosen IV; returns `iv || ciphertext`.
pub fn cbc_encrypt_with_iv(key: &[u8; 32], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let ciphertext = cbc::Encryptor::<Aes256>::new(key.into(), iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// AES-256-CBC decrypt and strip PKCS#7 padding.
pub fn cbc_decrypt(key: &[u8; 32], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(AppStateError::Decrypt(format!(
            "ciphertext length {} is not a positive multiple of the block size",
            ciphertext.len()
        )));
    }
    cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|_| AppStateError::Decrypt(format!("invalid IV length {}", iv.len())))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| AppStateError::Decrypt("invalid padding".to_string()))
}
