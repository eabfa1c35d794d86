// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload transforms: zstd compression, AES-256-GCM encryption, SHA-256 checksums.
//!
//! Compression always runs before encryption (ciphertext doesn't compress),
//! so decoding runs the other way round:
//!
//! ```text
//! encode:  payload ──zstd──► compressed ──AES-GCM──► nonce ‖ ciphertext
//! decode:  nonce ‖ ciphertext ──AES-GCM──► compressed ──zstd──► payload
//! ```
//!
//! Decompression uses magic-bytes detection, so a payload flagged as
//! compressed that isn't zstd framed is passed through unchanged.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Zstd magic bytes (little-endian): 0xFD2FB528
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// AES-GCM standard nonce length
const NONCE_LEN: usize = 12;

/// Check if data is zstd-compressed by checking magic bytes.
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Compress bytes with a zstd level (1-22).
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, CacheError> {
    zstd::encode_all(data, level).map_err(|e| CacheError::Compression(e.to_string()))
}

/// Decompress bytes; returns the input if it isn't zstd framed.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    if is_compressed(data) {
        zstd::decode_all(data).map_err(|e| CacheError::Compression(e.to_string()))
    } else {
        Ok(data.to_vec())
    }
}

/// Hex SHA-256 of the original payload.
#[must_use]
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// AES-256-GCM with a random 96-bit nonce prepended to each ciphertext.
pub struct Cipher {
    inner: Aes256Gcm,
}

impl Cipher {
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            inner: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CacheError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|e| CacheError::Cipher(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        if data.len() < NONCE_LEN {
            return Err(CacheError::Cipher(format!("ciphertext too short ({} bytes)", data.len())));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.inner
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CacheError::Cipher(e.to_string()))
    }
}

/// Applies the transforms requested per entry.
pub struct PayloadCodec {
    cipher: Option<Cipher>,
    level: i32,
}

impl PayloadCodec {
    #[must_use]
    pub fn new(key: Option<&[u8; 32]>, level: i32) -> Self {
        Self {
            cipher: key.map(Cipher::new),
            level,
        }
    }

    #[must_use]
    pub fn can_encrypt(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encode(&self, payload: &[u8], compress: bool, encrypt: bool) -> Result<Vec<u8>, CacheError> {
        let staged = if compress {
            self::compress(payload, self.level)?
        } else {
            payload.to_vec()
        };
        if !encrypt {
            return Ok(staged);
        }
        self.cipher
            .as_ref()
            .ok_or(CacheError::EncryptionUnavailable)?
            .encrypt(&staged)
    }

    pub fn decode(&self, stored: &[u8], compressed: bool, encrypted: bool) -> Result<Vec<u8>, CacheError> {
        let staged = if encrypted {
            self.cipher
                .as_ref()
                .ok_or(CacheError::EncryptionUnavailable)?
                .decrypt(stored)?
        } else {
            stored.to_vec()
        };
        if compressed {
            decompress(&staged)
        } else {
            Ok(staged)
        }
    }
}
