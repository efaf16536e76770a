// ============================================
// File: crates/fleetlink-core/src/crypto/v2.rs
// ============================================
//! # Codec v2 Cryptography
//!
//! ## Creation Reason
//! Current device firmware uses per-device AES-256-GCM keys with a
//! random 16-byte IV per message and binds the first frame of every
//! session to the device's MAC address.
//!
//! ## Wire Format
//! Each segment is independently base64url encoded without padding:
//! ```text
//! ┌──────────────┬──────────────┬───────────────┬──────────────────┐
//! │ IV (16 B)    │ Tag (16 B)   │ MAC (6 B)     │ Ciphertext       │
//! │ 22 chars     │ 22 chars     │ 8 chars       │ variable         │
//! │              │              │ first frame   │                  │
//! └──────────────┴──────────────┴───────────────┴──────────────────┘
//! ```
//!
//! ## Main Logical Flow
//! 1. `decode_v2_frame`: split and decode the header (cheap, no crypto)
//! 2. Caller resolves the key from the frame's MAC
//! 3. `decrypt_v2`: authenticate and decrypt, AAD = MAC bytes if present
//!
//! ## ⚠️ Important Note for Next Developer
//! - The MAC segment is only present when the caller expects it; there is
//!   no in-band flag, so `expect_mac` must track the connection state
//! - NEVER reuse an IV under the same key; always use `encrypt_v2`
//! - Plaintext is bounded by `MAX_PLAINTEXT_SIZE` so one frame cannot
//!   monopolise the runtime
//!
//! ## Last Modified
//! v0.1.0 - Initial v2 codec

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fleetlink_common::MacAddress;
use rand::RngCore;

use super::keys::SymmetricKey;
use super::{GCM_IV_SIZE, GCM_TAG_SIZE, MAX_PLAINTEXT_SIZE};
use crate::error::{CoreError, Result};

/// AES-256-GCM with a 16-byte nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

// ============================================
// Constants
// ============================================

/// Encoded length of the IV segment.
pub const IV_CHARS: usize = 22;

/// Encoded length of the auth tag segment.
pub const TAG_CHARS: usize = 22;

/// Encoded length of the MAC segment.
pub const MAC_CHARS: usize = 8;

/// Minimum length of any v2 frame.
pub const MIN_FRAME_LEN: usize = IV_CHARS + TAG_CHARS;

/// Minimum length of a session's first v2 frame.
pub const MIN_FIRST_FRAME_LEN: usize = MIN_FRAME_LEN + MAC_CHARS;

// ============================================
// V2Frame
// ============================================

/// A decoded (but not yet decrypted) v2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Frame {
    /// Per-message IV.
    pub iv: [u8; GCM_IV_SIZE],
    /// GCM authentication tag.
    pub tag: [u8; GCM_TAG_SIZE],
    /// Device MAC, only on a session's first frame.
    pub mac: Option<MacAddress>,
    /// Encrypted payload.
    pub ciphertext: Vec<u8>,
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| CoreError::invalid_message(format!("bad {what} segment: {e}")))
}

fn decode_fixed<const N: usize>(segment: &str, what: &str) -> Result<[u8; N]> {
    let bytes = decode_segment(segment, what)?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        CoreError::invalid_message(format!("{what} must be {N} bytes, got {}", v.len()))
    })
}

/// Splits and decodes a v2 frame header.
///
/// # Arguments
/// * `text` - Raw frame as received from the socket
/// * `expect_mac` - `true` for the first frame of a session
///
/// # Errors
/// Returns `InvalidMessage` if the frame is shorter than the header or
/// any segment is not valid base64url.
pub fn decode_v2_frame(text: &str, expect_mac: bool) -> Result<V2Frame> {
    let min = if expect_mac { MIN_FIRST_FRAME_LEN } else { MIN_FRAME_LEN };
    if text.len() < min {
        return Err(CoreError::invalid_message(format!(
            "v2 frame too short: need at least {min} chars, got {}",
            text.len()
        )));
    }
    if !text.is_ascii() {
        return Err(CoreError::invalid_message("v2 frame contains non-ASCII data"));
    }

    let iv = decode_fixed::<GCM_IV_SIZE>(&text[..IV_CHARS], "iv")?;
    let tag = decode_fixed::<GCM_TAG_SIZE>(&text[IV_CHARS..MIN_FRAME_LEN], "tag")?;

    let (mac, body) = if expect_mac {
        let raw = decode_segment(&text[MIN_FRAME_LEN..MIN_FIRST_FRAME_LEN], "mac")?;
        let mac = MacAddress::from_slice(&raw)?;
        (Some(mac), &text[MIN_FIRST_FRAME_LEN..])
    } else {
        (None, &text[MIN_FRAME_LEN..])
    };

    let ciphertext = decode_segment(body, "ciphertext")?;
    if ciphertext.len() > MAX_PLAINTEXT_SIZE {
        return Err(CoreError::too_large(MAX_PLAINTEXT_SIZE, ciphertext.len()));
    }

    Ok(V2Frame {
        iv,
        tag,
        mac,
        ciphertext,
    })
}

fn cipher(key: &SymmetricKey) -> Result<Aes256Gcm16> {
    Aes256Gcm16::new_from_slice(key.as_bytes())
        .map_err(|_| CoreError::encryption("failed to create AES-256-GCM cipher"))
}

/// Decrypts a decoded v2 frame.
///
/// # Errors
/// Returns `DecryptionFailed` if the tag does not verify (wrong key,
/// wrong MAC, or tampered data).
pub fn decrypt_v2(key: &SymmetricKey, frame: &V2Frame) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    let aad: &[u8] = match &frame.mac {
        Some(mac) => mac.as_bytes(),
        None => &[],
    };

    let mut buffer = frame.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&frame.iv),
            aad,
            &mut buffer,
            Tag::<U16>::from_slice(&frame.tag),
        )
        .map_err(|_| CoreError::DecryptionFailed)?;

    Ok(buffer)
}

/// Decodes and decrypts a v2 frame in one step.
///
/// # Errors
/// See [`decode_v2_frame`] and [`decrypt_v2`].
pub fn open_v2(key: &SymmetricKey, text: &str, expect_mac: bool) -> Result<Vec<u8>> {
    let frame = decode_v2_frame(text, expect_mac)?;
    decrypt_v2(key, &frame)
}

/// Encrypts a plaintext into a v2 frame.
///
/// A fresh random IV is drawn for every call. When `mac` is given it is
/// embedded after the tag and bound as AAD (device-side first frame).
///
/// # Errors
/// - `MessageTooLarge` if the plaintext exceeds the size bound
/// - `Encryption` if the cipher fails
pub fn encrypt_v2(key: &SymmetricKey, plaintext: &[u8], mac: Option<&MacAddress>) -> Result<String> {
    if plaintext.len() > MAX_PLAINTEXT_SIZE {
        return Err(CoreError::too_large(MAX_PLAINTEXT_SIZE, plaintext.len()));
    }

    let cipher = cipher(key)?;
    let mut iv = [0u8; GCM_IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    let aad: &[u8] = match mac {
        Some(mac) => mac.as_bytes(),
        None => &[],
    };

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), aad, &mut buffer)
        .map_err(|_| CoreError::encryption("AES-256-GCM encryption failed"))?;

    let mut out = String::with_capacity(MIN_FIRST_FRAME_LEN + buffer.len() * 4 / 3 + 4);
    out.push_str(&URL_SAFE_NO_PAD.encode(iv));
    out.push_str(&URL_SAFE_NO_PAD.encode(tag));
    if let Some(mac) = mac {
        out.push_str(&URL_SAFE_NO_PAD.encode(mac.as_bytes()));
    }
    out.push_str(&URL_SAFE_NO_PAD.encode(&buffer));

    Ok(out)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[test]
    fn test_v2_roundtrip() {
        let key = SymmetricKey::generate();
        let cases: [&[u8]; 4] = [b"", b"x", br#"{"type":"event","name":"stats"}"#, &[0u8; 4096]];
        for plaintext in cases {
            let frame = encrypt_v2(&key, plaintext, None).unwrap();
            assert_eq!(open_v2(&key, &frame, false).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_v2_wrong_key_fails() {
        let frame = encrypt_v2(&SymmetricKey::generate(), b"secret", None).unwrap();
        let result = open_v2(&SymmetricKey::generate(), &frame, false);
        assert!(matches!(result, Err(CoreError::DecryptionFailed)));
    }

    #[test]
    fn test_v2_first_frame_carries_mac() {
        let key = SymmetricKey::generate();
        let frame = encrypt_v2(&key, b"hello", Some(&mac())).unwrap();

        let decoded = decode_v2_frame(&frame, true).unwrap();
        assert_eq!(decoded.mac, Some(mac()));
        assert_eq!(decrypt_v2(&key, &decoded).unwrap(), b"hello");
    }

    #[test]
    fn test_v2_mac_is_authenticated() {
        let key = SymmetricKey::generate();
        let frame = encrypt_v2(&key, b"hello", Some(&mac())).unwrap();

        // Swap in another device's MAC segment
        let other: MacAddress = "01:02:03:04:05:06".parse().unwrap();
        let forged = format!(
            "{}{}{}",
            &frame[..MIN_FRAME_LEN],
            URL_SAFE_NO_PAD.encode(other.as_bytes()),
            &frame[MIN_FIRST_FRAME_LEN..]
        );

        let decoded = decode_v2_frame(&forged, true).unwrap();
        assert!(matches!(decrypt_v2(&key, &decoded), Err(CoreError::DecryptionFailed)));
    }

    #[test]
    fn test_v2_short_frame_is_invalid() {
        assert!(matches!(
            decode_v2_frame("abc", false),
            Err(CoreError::InvalidMessage { .. })
        ));

        // Long enough for a later frame, too short for a first frame
        let key = SymmetricKey::generate();
        let frame = encrypt_v2(&key, b"", None).unwrap();
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        assert!(decode_v2_frame(&frame, false).is_ok());
        assert!(matches!(
            decode_v2_frame(&frame, true),
            Err(CoreError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn test_v2_tamper_detected() {
        let key = SymmetricKey::generate();
        let frame = encrypt_v2(&key, b"important payload", None).unwrap();

        let mut decoded = decode_v2_frame(&frame, false).unwrap();
        decoded.ciphertext[0] ^= 0x01;
        assert!(matches!(decrypt_v2(&key, &decoded), Err(CoreError::DecryptionFailed)));
    }

    #[test]
    fn test_v2_size_bound() {
        let key = SymmetricKey::generate();
        let big = vec![0u8; MAX_PLAINTEXT_SIZE + 1];
        assert!(matches!(
            encrypt_v2(&key, &big, None),
            Err(CoreError::MessageTooLarge { .. })
        ));
    }
}
