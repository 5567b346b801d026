//! Asymmetric payload encryption: RSA-OAEP(SHA-256) in fixed-size
//! chunks, Base64-standard encoded on the wire.
//!
//! OAEP bounds a single encryption at `keysize − 2·hashsize − 2`
//! bytes, so larger payloads are split into chunks of exactly that
//! size and the ciphertexts concatenated. Decryption splits the raw
//! ciphertext back into `keysize`-byte blocks. Chunking is transparent
//! to callers: decrypt ∘ encrypt is the identity for any payload.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::digest::Digest;
use sha2::Sha256;

use pulse_core::PulseError;

/// Agent-side half: encrypts with the server's public key.
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    /// Read a PEM public key (SPKI or PKCS#1).
    pub fn from_pem_file(path: &Path) -> Result<Self, PulseError> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| PulseError::Config(format!("read public key {}: {}", path.display(), e)))?;
        let key = RsaPublicKey::from_public_key_pem(&pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
            .map_err(|e| PulseError::Config(format!("parse public key {}: {}", path.display(), e)))?;
        Ok(Self { key })
    }

    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` chunk by chunk and Base64-encode the
    /// concatenated ciphertexts.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, PulseError> {
        let key_size = self.key.size();
        let chunk_size = key_size - 2 * Sha256::output_size() - 2;

        let mut ciphertext = Vec::with_capacity(plaintext.len().div_ceil(chunk_size) * key_size);
        let mut rng = rand::thread_rng();
        for chunk in plaintext.chunks(chunk_size) {
            let block = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                .map_err(|e| PulseError::Decode(format!("encrypt: {}", e)))?;
            ciphertext.extend_from_slice(&block);
        }
        Ok(BASE64.encode(ciphertext))
    }
}

/// Server-side half: decrypts with the private key.
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    /// Read a PEM private key (PKCS#8 or PKCS#1).
    pub fn from_pem_file(path: &Path) -> Result<Self, PulseError> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| PulseError::Config(format!("read private key {}: {}", path.display(), e)))?;
        let key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
            .map_err(|e| PulseError::Config(format!("parse private key {}: {}", path.display(), e)))?;
        Ok(Self { key })
    }

    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Base64-decode `body` and decrypt it in keysize-byte blocks.
    pub fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>, PulseError> {
        let ciphertext = BASE64
            .decode(body)
            .map_err(|e| PulseError::Decode(format!("body base64: {}", e)))?;
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        let key_size = self.key.size();
        if ciphertext.len() % key_size != 0 {
            return Err(PulseError::Decode(format!(
                "ciphertext length {} is not a multiple of key size {}",
                ciphertext.len(),
                key_size
            )));
        }

        let mut plaintext = Vec::new();
        for block in ciphertext.chunks(key_size) {
            let chunk = self
                .key
                .decrypt(Oaep::new::<Sha256>(), block)
                .map_err(|e| PulseError::Decode(format!("decrypt: {}", e)))?;
            plaintext.extend_from_slice(&chunk);
        }
        Ok(plaintext)
    }
}
