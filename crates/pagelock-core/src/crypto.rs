//! Document encryption.
//!
//! Every document stored remotely is `base64(nonce || ciphertext + tag)` where
//! the key is SHA-256 of the shared credential and the cipher is
//! XChaCha20-Poly1305 with a fresh random 24-byte nonce per document write.
//!
//! The key is a pure function of the credential: anyone holding the credential
//! can read every document stored under it.

use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CodecError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

/// Symmetric document key derived from a shared secret.
#[derive(Clone)]
pub struct DocumentKey(Zeroizing<[u8; KEY_LEN]>);

impl DocumentKey {
    pub fn derive(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&digest[..KEY_LEN]);
        Self(key)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.0[..]))
    }
}

impl std::fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DocumentKey(..)")
    }
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` and return the transport-encoded wire blob.
pub fn encrypt_document(key: &DocumentKey, plaintext: &[u8]) -> Result<String, CodecError> {
    let nonce = generate_nonce();
    let ciphertext = key
        .cipher()
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CodecError::Encrypt)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(general_purpose::STANDARD.encode(blob))
}

/// Reverse of [`encrypt_document`].
pub fn decrypt_document(key: &DocumentKey, wire: &str) -> Result<Zeroizing<Vec<u8>>, CodecError> {
    let blob = general_purpose::STANDARD.decode(wire.trim())?;
    if blob.len() < NONCE_LEN {
        return Err(CodecError::Truncated(blob.len()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let plaintext = key
        .cipher()
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CodecError::Decrypt)?;
    Ok(Zeroizing::new(plaintext))
}

/// Convenience wrapper deriving the key from `secret` on every call.
pub fn encrypt(secret: &str, plaintext: &[u8]) -> Result<String, CodecError> {
    encrypt_document(&DocumentKey::derive(secret), plaintext)
}

pub fn decrypt(secret: &str, wire: &str) -> Result<Zeroizing<Vec<u8>>, CodecError> {
    decrypt_document(&DocumentKey::derive(secret), wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_various_payloads() {
        let secret = "d3b07384d113edec49eaa6238ad5ff00";
        let payloads: [&[u8]; 4] = [b"", b"x", b"{\"n\":1}", &[0u8, 255, 7, 128, 0, 0, 1]];
        for payload in payloads {
            let wire = encrypt(secret, payload).unwrap();
            assert_eq!(decrypt(secret, &wire).unwrap().as_slice(), payload);
        }
        let large = vec![0x5au8; 64 * 1024];
        let wire = encrypt(secret, &large).unwrap();
        assert_eq!(decrypt(secret, &wire).unwrap().as_slice(), large.as_slice());
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = DocumentKey::derive("secret");
        let a = encrypt_document(&key, b"same").unwrap();
        let b = encrypt_document(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_fails() {
        let wire = encrypt("right", b"payload").unwrap();
        assert!(matches!(decrypt("wrong", &wire), Err(CodecError::Decrypt)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(decrypt("s", "not base64!"), Err(CodecError::Base64(_))));
        let short = general_purpose::STANDARD.encode([1u8; 10]);
        assert!(matches!(decrypt("s", &short), Err(CodecError::Truncated(10))));
    }

    #[test]
    fn tampering_is_detected() {
        let wire = encrypt("s", b"payload").unwrap();
        let mut blob = general_purpose::STANDARD.decode(&wire).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = general_purpose::STANDARD.encode(blob);
        assert!(matches!(decrypt("s", &tampered), Err(CodecError::Decrypt)));
    }
}
