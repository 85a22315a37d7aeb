//! AES-128-CBC with PKCS#7 padding.
//!
//! Used for three things: sealing the root metadata, wrapping per-object key
//! records under the root key, and encrypting object bodies. Bodies are
//! streamed through [`CbcEncryptor`] / [`CbcDecryptor`], which implement
//! [`ByteTransform`] so they slot into any storage pipeline.
//!
//! CBC provides confidentiality only. Integrity of vault contents rests on
//! the vault backend.

use aes::cipher::generic_array::GenericArray;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::CryptoError;
use super::keys::{IV_SIZE, KEY_SIZE};
use crate::storage::ByteTransform;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Ciphertext length for a plaintext of `len` bytes.
pub const fn ciphertext_len(len: usize) -> usize {
    (len / BLOCK_SIZE + 1) * BLOCK_SIZE
}

/// Encrypt a whole buffer.
pub fn encrypt(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt a whole buffer.
///
/// # Errors
///
/// `CryptoError::DecryptionFailed` when the length is not a whole number of
/// blocks or the padding is malformed, which is what a wrong key looks like.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Streaming CBC encryptor.
///
/// Input is buffered until a full block is available; the final partial block
/// is padded by [`ByteTransform::finish`].
pub struct CbcEncryptor {
    cipher: Aes128CbcEnc,
    pending: Vec<u8>,
}

impl CbcEncryptor {
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            cipher: Aes128CbcEnc::new(key.into(), iv.into()),
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }
}

impl std::fmt::Debug for CbcEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcEncryptor")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ByteTransform for CbcEncryptor {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pending.extend_from_slice(input);
        let ready = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(out)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, CryptoError> {
        let Self { cipher, pending } = *self;
        let mut last = [0u8; BLOCK_SIZE];
        last[..pending.len()].copy_from_slice(&pending);
        let block = cipher
            .encrypt_padded_mut::<Pkcs7>(&mut last, pending.len())
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(block.to_vec())
    }
}

/// Streaming CBC decryptor.
///
/// The last full block is held back until [`ByteTransform::finish`], where the
/// padding is checked and stripped.
pub struct CbcDecryptor {
    cipher: Aes128CbcDec,
    pending: Vec<u8>,
}

impl CbcDecryptor {
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            cipher: Aes128CbcDec::new(key.into(), iv.into()),
            pending: Vec::with_capacity(2 * BLOCK_SIZE),
        }
    }
}

impl std::fmt::Debug for CbcDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcDecryptor")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ByteTransform for CbcDecryptor {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.pending.extend_from_slice(input);
        if self.pending.len() <= BLOCK_SIZE {
            return Ok(Vec::new());
        }
        let mut ready = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        if ready == self.pending.len() {
            ready -= BLOCK_SIZE;
        }
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(out)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, CryptoError> {
        let Self { cipher, mut pending } = *self;
        if pending.len() != BLOCK_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let plaintext = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut pending)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(plaintext.to_vec())
    }
}
