//! Passphrase stretching and locator derivation.
//!
//! The root secret is stretched exactly once, for sealing the root metadata:
//!
//! ```text
//! digest         = HMAC-SHA256(key = secret, msg = secret)
//! passphrase_key = scrypt(secret, salt = digest, N, r, p)[0..16]
//! sealing_iv     = digest[0..16]
//! ```
//!
//! Object locators are `hex(HMAC-SHA256(key = root_iv, msg = name))`.

use ring::hmac;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};
use zeroize::Zeroizing;

use super::CryptoError;
use super::keys::{IV_SIZE, KEY_SIZE};

/// Default scrypt cost, as log2(N). N = 16384.
pub const DEFAULT_SCRYPT_LOG_N: u8 = 14;
/// Default scrypt block size.
pub const DEFAULT_SCRYPT_BLOCK_SIZE: u32 = 8;
/// Default scrypt parallelization.
pub const DEFAULT_SCRYPT_PARALLELIZATION: u32 = 1;

/// Cheap cost used by tests (N = 16). Never use for a real vault.
const FAST_SCRYPT_LOG_N: u8 = 4;

/// Scrypt tuning for passphrase stretching.
///
/// The cost factor is injectable so tests can run with trivial parameters
/// while production vaults use [`ScryptParams::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScryptParams {
    /// Cost factor as log2(N).
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Parallelization.
    pub p: u32,
}

impl Default for ScryptParams {
    fn default() -> Self {
        Self {
            log_n: DEFAULT_SCRYPT_LOG_N,
            r: DEFAULT_SCRYPT_BLOCK_SIZE,
            p: DEFAULT_SCRYPT_PARALLELIZATION,
        }
    }
}

impl ScryptParams {
    /// Weak parameters for tests.
    pub fn insecure_fast() -> Self {
        Self {
            log_n: FAST_SCRYPT_LOG_N,
            ..Self::default()
        }
    }

    /// Same parameters with a different cost factor.
    pub fn with_log_n(self, log_n: u8) -> Self {
        Self { log_n, ..self }
    }

    fn to_scrypt(self) -> Result<scrypt::Params, CryptoError> {
        scrypt::Params::new(self.log_n, self.r, self.p, KEY_SIZE).map_err(|e| {
            CryptoError::InvalidScryptParams(format!(
                "N=2^{}, r={}, p={}: {}",
                self.log_n, self.r, self.p, e
            ))
        })
    }
}

/// Key and IV derived from the root secret, used only to seal the root metadata.
pub struct PassphraseKey {
    pub key: Zeroizing<[u8; KEY_SIZE]>,
    pub iv: Zeroizing<[u8; IV_SIZE]>,
}

impl std::fmt::Debug for PassphraseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PassphraseKey([REDACTED])")
    }
}

/// Derive the sealing key and IV from the root secret.
///
/// This is CPU-bound; async callers run it on the blocking pool.
///
/// # Errors
///
/// - `CryptoError::InvalidScryptParams`: the cost parameters are rejected by scrypt
/// - `CryptoError::KeyDerivationFailed`: scrypt itself failed
#[instrument(level = "debug", skip(secret), fields(log_n = params.log_n))]
pub fn derive_passphrase_key(
    secret: &[u8],
    params: &ScryptParams,
) -> Result<PassphraseKey, CryptoError> {
    let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let digest = Zeroizing::new(hmac::sign(&hmac_key, secret).as_ref().to_vec());

    let scrypt_params = params.to_scrypt()?;
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    scrypt::scrypt(secret, &digest, &scrypt_params, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(format!("scrypt: {e}")))?;

    let mut iv = Zeroizing::new([0u8; IV_SIZE]);
    iv.copy_from_slice(&digest[..IV_SIZE]);

    trace!("Derived passphrase key");
    Ok(PassphraseKey { key, iv })
}

/// Deterministic storage locator for a logical object name.
pub fn object_locator(root_iv: &[u8; IV_SIZE], name: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, root_iv);
    hex::encode(hmac::sign(&key, name.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn passphrase_key_matches_reference_vector() {
        let params = ScryptParams::insecure_fast();
        let derived = derive_passphrase_key(b"test", &params).unwrap();

        assert_eq!(*derived.key, hex!("d8cf5d45dd60e595af2b61aac5110934"));
        assert_eq!(*derived.iv, hex!("88cd2108b5347d973cf39cdf9053d7dd"));
    }

    #[test]
    fn derivation_depends_on_cost() {
        let cheap = derive_passphrase_key(b"secret", &ScryptParams::insecure_fast()).unwrap();
        let dearer =
            derive_passphrase_key(b"secret", &ScryptParams::insecure_fast().with_log_n(5)).unwrap();

        assert_ne!(*cheap.key, *dearer.key);
        // The IV only depends on the secret
        assert_eq!(*cheap.iv, *dearer.iv);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = ScryptParams {
            log_n: 64,
            r: 1,
            p: 1,
        };
        let result = derive_passphrase_key(b"secret", &params);
        assert!(matches!(result, Err(CryptoError::InvalidScryptParams(_))));
    }

    #[test]
    fn locator_matches_reference_vector() {
        let locator = object_locator(&[0x22; IV_SIZE], "test-container/some-key");
        assert_eq!(
            locator,
            "17b8afe72dbebdc01c9c26434a3d68d20f03e3e0e4b12ed8d4b2141450010c3c"
        );
    }

    #[test]
    fn locator_is_deterministic_and_opaque() {
        let iv = [0x42; IV_SIZE];
        let a = object_locator(&iv, "state");
        let b = object_locator(&iv, "state");
        assert_eq!(a, b);
        assert_ne!(a, "state");
        assert_eq!(a.len(), 64);
        assert_ne!(object_locator(&[0x43; IV_SIZE], "state"), a);
    }

    #[test]
    fn default_params_parse_from_partial_config() {
        let params: ScryptParams = serde_json::from_str(r#"{"log_n": 10}"#).unwrap();
        assert_eq!(params.log_n, 10);
        assert_eq!(params.r, DEFAULT_SCRYPT_BLOCK_SIZE);
        assert_eq!(params.p, DEFAULT_SCRYPT_PARALLELIZATION);
    }
}
