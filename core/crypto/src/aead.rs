//! Authenticated encryption using AES-256-GCM.
//!
//! Ciphertext layout is always `IV(12) || CIPHERTEXT || TAG(16)`. The IV is
//! 96 bits, the size GCM is defined for; reusing an IV under the same key
//! breaks confidentiality, so every encryption draws a fresh random one.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};

use crate::keys::KEY_LENGTH;
use vaulthalla_common::{Error, Result};

/// IV size for AES-256-GCM (96 bits).
pub const IV_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Usage(format!(
            "invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}

/// Encrypt `plaintext`, returning `IV || CIPHERTEXT || TAG`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let iv = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&iv, plaintext)
        .map_err(|e| Error::Integrity(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a payload shaped `IV || CIPHERTEXT || TAG`, verifying the tag.
pub fn decrypt(key: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if payload.len() < IV_SIZE + TAG_SIZE {
        return Err(Error::Integrity("ciphertext shorter than IV + tag".to_string()));
    }

    let (iv_bytes, body) = payload.split_at(IV_SIZE);
    let iv = Nonce::from_slice(iv_bytes);

    cipher
        .decrypt(iv, body)
        .map_err(|_| Error::Integrity("AEAD authentication failed".to_string()))
}

/// Encrypt with an explicit IV. Only for cases needing deterministic output
/// (e.g. re-enveloping during key rotation, where the new IV is freshly
/// generated by the caller and never reused). Caller owns IV uniqueness.
pub fn encrypt_with_iv(key: &[u8], iv_bytes: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let iv = Nonce::from_slice(iv_bytes);

    let ciphertext = cipher
        .encrypt(iv, plaintext)
        .map_err(|e| Error::Integrity(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(iv_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Hello, Vaulthalla!";

        let ciphertext = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn ciphertext_layout_matches_iv_ct_tag() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let ciphertext = encrypt(&key, plaintext).unwrap();

        assert_eq!(ciphertext.len(), IV_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn empty_plaintext_still_meets_minimum_length() {
        let key = [7u8; KEY_LENGTH];
        let ciphertext = encrypt(&key, b"").unwrap();
        assert_eq!(ciphertext.len(), IV_SIZE + TAG_SIZE);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), b"");
    }

    #[test]
    fn different_iv_each_time() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Same plaintext";

        let ct1 = encrypt(&key, plaintext).unwrap();
        let ct2 = encrypt(&key, plaintext).unwrap();

        assert_ne!(&ct1[..IV_SIZE], &ct2[..IV_SIZE]);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn wrong_key_fails_auth() {
        let key1 = [1u8; KEY_LENGTH];
        let key2 = [2u8; KEY_LENGTH];
        let plaintext = b"Secret data";

        let ciphertext = encrypt(&key1, plaintext).unwrap();
        assert!(decrypt(&key2, &ciphertext).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Important data";

        let mut ciphertext = encrypt(&key, plaintext).unwrap();
        ciphertext[IV_SIZE + 2] ^= 0xFF;

        assert!(decrypt(&key, &ciphertext).is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short_key = [0u8; 16];
        assert!(encrypt(&short_key, b"data").is_err());
    }

    #[test]
    fn payload_shorter_than_iv_plus_tag_rejected() {
        let key = [1u8; KEY_LENGTH];
        assert!(decrypt(&key, &[0u8; 10]).is_err());
    }

    #[test]
    fn explicit_iv_is_reproducible() {
        let key = [42u8; KEY_LENGTH];
        let iv = [9u8; IV_SIZE];
        let plaintext = b"deterministic under a fixed IV";

        let ct1 = encrypt_with_iv(&key, &iv, plaintext).unwrap();
        let ct2 = encrypt_with_iv(&key, &iv, plaintext).unwrap();

        assert_eq!(ct1, ct2);
        assert_eq!(decrypt(&key, &ct1).unwrap(), plaintext);
    }
}
