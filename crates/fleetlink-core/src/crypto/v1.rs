// ============================================
// File: crates/fleetlink-core/src/crypto/v1.rs
// ============================================
//! # Codec v1 (Legacy) Cryptography
//!
//! ## Creation Reason
//! Older device firmware speaks a fixed-key AES-256-CBC scheme with hex
//! framing. It must keep working alongside v2.
//!
//! ## Wire Format
//! ```text
//! lowercase_hex( AES-256-CBC-PKCS7(key, iv, plaintext) )
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The IV is fixed: identical plaintexts produce identical frames
//! - No authentication: a bad key usually shows up as a padding error,
//!   but can also yield garbage that fails JSON parsing later
//! - Do not add new features to v1; new firmware uses v2
//!
//! ## Last Modified
//! v0.1.0 - Initial legacy codec

use aes_gcm::aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::keys::LegacyKey;
use super::MAX_PLAINTEXT_SIZE;
use crate::error::{CoreError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size; every v1 ciphertext is a multiple of this.
const BLOCK_SIZE: usize = 16;

/// Encrypts a plaintext into a v1 hex frame.
///
/// # Errors
/// - `MessageTooLarge` if the plaintext exceeds the size bound
/// - `Encryption` if the cipher cannot be initialised
pub fn encrypt_v1(key: &LegacyKey, plaintext: &[u8]) -> Result<String> {
    if plaintext.len() > MAX_PLAINTEXT_SIZE {
        return Err(CoreError::too_large(MAX_PLAINTEXT_SIZE, plaintext.len()));
    }

    let cipher = Aes256CbcEnc::new_from_slices(key.key(), key.iv())
        .map_err(|_| CoreError::encryption("failed to create AES-256-CBC cipher"))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    Ok(hex::encode(ciphertext))
}

/// Decrypts a v1 hex frame.
///
/// # Errors
/// - `InvalidMessage` for empty, non-hex or misaligned input
/// - `DecryptionFailed` if the padding does not verify
pub fn decrypt_v1(key: &LegacyKey, frame: &str) -> Result<Vec<u8>> {
    let frame = frame.trim();
    if frame.is_empty() {
        return Err(CoreError::invalid_message("empty v1 frame"));
    }

    let ciphertext = hex::decode(frame)
        .map_err(|e| CoreError::invalid_message(format!("v1 frame is not hex: {e}")))?;

    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CoreError::invalid_message(format!(
            "v1 ciphertext length {} is not block aligned",
            ciphertext.len()
        )));
    }
    if ciphertext.len() > MAX_PLAINTEXT_SIZE + BLOCK_SIZE {
        return Err(CoreError::too_large(MAX_PLAINTEXT_SIZE, ciphertext.len()));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.key(), key.iv())
        .map_err(|_| CoreError::encryption("failed to create AES-256-CBC cipher"))?;

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CoreError::DecryptionFailed)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MasterSecret;

    fn legacy(seed: u8) -> LegacyKey {
        MasterSecret::from_bytes([seed; 36]).v1_key()
    }

    #[test]
    fn test_v1_roundtrip() {
        let key = legacy(1);
        let plaintext = br#"{"type":"event","name":"connect","data":{}}"#;

        let frame = encrypt_v1(&key, plaintext).unwrap();
        assert!(frame.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(frame.len() % 32, 0);

        let decrypted = decrypt_v1(&key, &frame).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_v1_accepts_uppercase_hex() {
        let key = legacy(2);
        let frame = encrypt_v1(&key, b"hello").unwrap().to_uppercase();
        assert_eq!(decrypt_v1(&key, &frame).unwrap(), b"hello");
    }

    #[test]
    fn test_v1_is_deterministic() {
        let key = legacy(3);
        assert_eq!(
            encrypt_v1(&key, b"same").unwrap(),
            encrypt_v1(&key, b"same").unwrap()
        );
    }

    #[test]
    fn test_v1_rejects_malformed() {
        let key = legacy(4);
        assert!(matches!(
            decrypt_v1(&key, ""),
            Err(CoreError::InvalidMessage { .. })
        ));
        assert!(matches!(
            decrypt_v1(&key, "not-hex"),
            Err(CoreError::InvalidMessage { .. })
        ));
        assert!(matches!(
            decrypt_v1(&key, "abcd"),
            Err(CoreError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn test_v1_wrong_key_fails() {
        let frame = encrypt_v1(&legacy(5), b"payload that spans blocks!").unwrap();
        // CBC has no tag: a wrong key fails padding or yields different bytes
        match decrypt_v1(&legacy(6), &frame) {
            Err(e) => assert!(matches!(e, CoreError::DecryptionFailed)),
            Ok(bytes) => assert_ne!(bytes, b"payload that spans blocks!"),
        }
    }
}
