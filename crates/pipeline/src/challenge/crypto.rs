//! Key derivation and authenticated sealing for the encrypted-cookie
//! challenge. The derived key never leaves this module.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use waf_common::error::WafError;

const PBKDF2_ITERATIONS: u32 = 100_000;
/// Fixed per §4.12 — the secret itself, not the salt, provides entropy.
const SALT: &[u8; 16] = b"waf-cookie-salt!";
const NONCE_LEN: usize = 12;

pub fn derive_key(secret: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), SALT, PBKDF2_ITERATIONS, &mut key);
    key
}

pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<String, WafError> {
    let cipher = Aes256Gcm::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| WafError::verification("encrypted cookie sealing failed"))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
}

pub fn open(key: &[u8; 32], payload: &str) -> Option<Vec<u8>> {
    let combined = BASE64.decode(payload).ok()?;
    if combined.len() < NONCE_LEN {
        return None;
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let key = derive_key("test-secret");
        let sealed = seal(&key, b"hello challenge").unwrap();
        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, b"hello challenge");
    }

    #[test]
    fn tampered_payload_fails_to_open() {
        let key = derive_key("test-secret");
        let mut sealed = seal(&key, b"hello challenge").unwrap();
        sealed.push('A');
        assert!(open(&key, &sealed).is_none());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let key_a = derive_key("secret-a");
        let key_b = derive_key("secret-b");
        let sealed = seal(&key_a, b"hello challenge").unwrap();
        assert!(open(&key_b, &sealed).is_none());
    }
}
