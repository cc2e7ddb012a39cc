//! # Payload Transformers
//!
//! Byte-level stages applied after formatting: compression first, then
//! encryption. Both emit standard base64 text so that every payload stays
//! printable for text-oriented transports.

use aes::Aes128;
use base64::{engine::general_purpose, Engine as _};
use cbc::Encryptor;
use cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression as Level;
use sha1::{Digest, Sha1};
use std::io::Write;

use crate::models::{Compression, EncryptionAlgo, EncryptionDetails};

const AES_BLOCK: usize = 16;

/// Compression stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Gzip,
    /// `ZIP` registrations use a zlib stream.
    Zlib,
}

impl Compressor {
    pub fn for_kind(kind: Compression) -> Option<Compressor> {
        match kind {
            Compression::None => None,
            Compression::Gzip => Some(Compressor::Gzip),
            Compression::Zip => Some(Compressor::Zlib),
        }
    }

    pub fn transform(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let compressed = match self {
            Compressor::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                encoder.finish()?
            }
            Compressor::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                encoder.finish()?
            }
        };
        Ok(general_purpose::STANDARD.encode(compressed).into_bytes())
    }
}

/// AES-128-CBC encryption stage.
///
/// The key is the first 16 bytes of SHA-1 over the configured key string.
/// The IV string is copied into a zeroed 16-byte block and truncated.
#[derive(Clone, PartialEq, Eq)]
pub struct AesEncryptor {
    key: [u8; AES_BLOCK],
    iv: [u8; AES_BLOCK],
}

impl std::fmt::Debug for AesEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesEncryptor { .. }")
    }
}

impl AesEncryptor {
    pub fn new(key: &str, init_vector: &str) -> Self {
        let digest = Sha1::digest(key.as_bytes());
        let mut key_block = [0u8; AES_BLOCK];
        key_block.copy_from_slice(&digest[..AES_BLOCK]);

        let mut iv = [0u8; AES_BLOCK];
        let iv_bytes = init_vector.as_bytes();
        let n = iv_bytes.len().min(AES_BLOCK);
        iv[..n].copy_from_slice(&iv_bytes[..n]);

        Self { key: key_block, iv }
    }

    pub fn for_details(details: &EncryptionDetails, algo: EncryptionAlgo) -> Option<Self> {
        match algo {
            EncryptionAlgo::None => None,
            EncryptionAlgo::Aes => Some(Self::new(&details.key, &details.init_vector)),
        }
    }

    pub fn transform(&self, data: &[u8]) -> Vec<u8> {
        let ciphertext = Encryptor::<Aes128>::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data);
        general_purpose::STANDARD.encode(ciphertext).into_bytes()
    }
}
