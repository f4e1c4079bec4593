//! Credential-derived AES-256-CBC session crypto
//!
//! Key material comes from PBKDF2-HMAC-SHA-256 over the literal
//! `username:password` string with a fixed salt, split 32+16 into key and IV.
//! The IV is therefore identical for every transfer under a given credential,
//! and the stream carries no integrity tag. Both properties are fixed by the
//! deployed receiver fleet; they are the first things to revisit if the wire
//! format can ever be versioned (random IV, AEAD).

use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;

use crate::protocol::{kdf, IV_LEN};
use crate::wire::Credential;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const BLOCK_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext ends mid-block; stream truncated")]
    Truncated,
    #[error("final block failed PKCS7 unpadding; stream corrupted or truncated")]
    Padding,
}

/// Key and IV for one session. Both sides derive the same pair from the
/// credential; the receiver then overwrites the IV with whatever arrived on
/// the wire, so the two stay interoperable even if a sender picks its own.
#[derive(Clone)]
pub struct CipherContext {
    pub key: [u8; kdf::KEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl CipherContext {
    pub fn derive(credential: &Credential) -> Self {
        Self::derive_from(&credential.wire_string())
    }

    /// Stretches the raw credential string into 48 bytes and splits them.
    pub fn derive_from(credential: &str) -> Self {
        let mut okm = [0u8; kdf::DERIVED_LEN];
        pbkdf2_hmac::<Sha256>(credential.as_bytes(), kdf::SALT, kdf::ITERATIONS, &mut okm);
        let mut key = [0u8; kdf::KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        key.copy_from_slice(&okm[..kdf::KEY_LEN]);
        iv.copy_from_slice(&okm[kdf::KEY_LEN..]);
        Self { key, iv }
    }

    /// Replaces the derived IV with the one read off the wire.
    pub fn with_iv(self, iv: [u8; IV_LEN]) -> Self {
        Self { iv, ..self }
    }

    pub fn encryptor(&self) -> StreamEncryptor {
        StreamEncryptor {
            state: Aes256CbcEnc::new(&self.key.into(), &self.iv.into()),
            pending: Vec::with_capacity(BLOCK_LEN),
        }
    }

    pub fn decryptor(&self) -> StreamDecryptor {
        StreamDecryptor {
            state: Aes256CbcDec::new(&self.key.into(), &self.iv.into()),
            pending: Vec::with_capacity(2 * BLOCK_LEN),
        }
    }
}

/// Incremental CBC encryptor for chunked input of arbitrary sizes.
///
/// `update` encrypts every whole block it can and carries the unaligned tail;
/// `finalize` pads the tail (PKCS7) and emits the last block. Total output is
/// always `(plaintext / 16 + 1) * 16` bytes, one full pad block for inputs
/// that are already block-aligned.
pub struct StreamEncryptor {
    state: Aes256CbcEnc,
    // unaligned tail from the previous update, always < BLOCK_LEN
    pending: Vec<u8>,
}

impl StreamEncryptor {
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.pending.len() + input.len());
        buf.append(&mut self.pending);
        buf.extend_from_slice(input);

        let aligned = buf.len() - buf.len() % BLOCK_LEN;
        self.pending.extend_from_slice(&buf[aligned..]);
        buf.truncate(aligned);
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            self.state.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        buf
    }

    pub fn finalize(mut self) -> Vec<u8> {
        let mut block = [0u8; BLOCK_LEN];
        let tail_len = self.pending.len();
        block[..tail_len].copy_from_slice(&self.pending);
        // tail_len < BLOCK_LEN always holds, so padding cannot fail
        match self.state.encrypt_padded_mut::<Pkcs7>(&mut block, tail_len) {
            Ok(out) => out.to_vec(),
            Err(_) => unreachable!("pad buffer is one full block"),
        }
    }
}

/// Incremental CBC decryptor that tolerates arbitrary read sizes.
///
/// The last ciphertext block carries the padding, and until the stream ends
/// any aligned block we hold might be that last one. `update` therefore
/// releases everything except the final 16 aligned bytes; `finalize` unpads
/// whatever is left and rejects streams that do not end on a block boundary.
pub struct StreamDecryptor {
    state: Aes256CbcDec,
    // raw ciphertext held back: the unaligned tail plus, when aligned, the
    // candidate final block
    pending: Vec<u8>,
}

impl StreamDecryptor {
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let len = self.pending.len();
        let rem = len % BLOCK_LEN;
        let hold = if rem == 0 { BLOCK_LEN.min(len) } else { rem };

        let tail = self.pending.split_off(len - hold);
        let mut out = std::mem::replace(&mut self.pending, tail);
        for block in out.chunks_exact_mut(BLOCK_LEN) {
            self.state.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    pub fn finalize(mut self) -> Result<Vec<u8>, CryptoError> {
        if self.pending.len() != BLOCK_LEN {
            return Err(CryptoError::Truncated);
        }
        let mut block = [0u8; BLOCK_LEN];
        block.copy_from_slice(&self.pending);
        let out = self
            .state
            .decrypt_padded_mut::<Pkcs7>(&mut block)
            .map_err(|_| CryptoError::Padding)?;
        Ok(out.to_vec())
    }
}
