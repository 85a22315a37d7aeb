//! Cryptographic primitives for the vault: root/content keys, passphrase
//! stretching, locator derivation and AES-128-CBC.

pub mod cbc;
pub mod kdf;
pub mod keys;
mod thread_safety; // Send + Sync impls for RootKey

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Ciphertext could not be decrypted.
    ///
    /// **[USER ERROR]** Almost always the wrong key: with CBC a wrong key shows
    /// up as malformed padding. Truncated ciphertext produces the same error.
    #[error("Decryption failed - wrong key or corrupted ciphertext")]
    DecryptionFailed,

    /// Padding the final block failed.
    ///
    /// **[PROGRAMMING ERROR]** The padding buffer is sized by construction.
    #[error("Encryption failed while padding the final block")]
    EncryptionFailed,

    /// Key derivation failed inside scrypt.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The scrypt cost parameters are invalid.
    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    /// Key material had an unexpected length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Key access failed due to memory protection error or lock poisoning.
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

// Re-export commonly used types
pub use cbc::{CbcDecryptor, CbcEncryptor};
pub use kdf::{PassphraseKey, ScryptParams, derive_passphrase_key, object_locator};
pub use keys::{ContentKey, KeyAccessError, RootKey};
