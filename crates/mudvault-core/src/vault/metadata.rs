//! Sealed root metadata (`keys.v0`).
//!
//! Plaintext is JSON `{"v": 0, "keys": [{"key": <buffer>, "iv": <buffer>}]}`,
//! AES-128-CBC encrypted under the passphrase-derived key and IV. Byte
//! fields use the Node.js buffer shape `{"type": "Buffer", "data": [..]}`
//! so existing vaults open unchanged.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DeserializeAs, SerializeAs, serde_as};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use super::KeyStoreError;
use crate::crypto::cbc;
use crate::crypto::keys::{IV_SIZE, KEY_SIZE, RootKey};
use crate::crypto::kdf::PassphraseKey;

/// The only metadata version this crate understands.
pub const METADATA_VERSION: u32 = 0;

#[derive(Serialize, Deserialize)]
struct RootMetadata {
    v: u32,
    keys: Vec<KeyEntry>,
}

#[serde_as]
#[derive(Serialize, Deserialize)]
struct KeyEntry {
    #[serde_as(as = "NodeBuffer")]
    key: Vec<u8>,
    #[serde_as(as = "NodeBuffer")]
    iv: Vec<u8>,
}

const BUFFER_TYPE: &str = "Buffer";

/// `serde_with` adapter for the JSON form of a Node.js `Buffer`.
struct NodeBuffer;

#[derive(Serialize)]
struct BufferRef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a [u8],
}

#[derive(Deserialize)]
struct BufferOwned {
    #[serde(rename = "type")]
    kind: String,
    data: Vec<u8>,
}

impl SerializeAs<Vec<u8>> for NodeBuffer {
    fn serialize_as<S: Serializer>(source: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        BufferRef {
            kind: BUFFER_TYPE,
            data: source,
        }
        .serialize(serializer)
    }
}

impl<'de> DeserializeAs<'de, Vec<u8>> for NodeBuffer {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let buffer = BufferOwned::deserialize(deserializer)?;
        if buffer.kind != BUFFER_TYPE {
            return Err(D::Error::custom(format!(
                "expected a {BUFFER_TYPE}, found '{}'",
                buffer.kind
            )));
        }
        Ok(buffer.data)
    }
}

impl Drop for KeyEntry {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

/// Encrypt the root key into the sealed metadata format.
pub(crate) fn seal(root: &RootKey, passphrase: &PassphraseKey) -> Result<Vec<u8>, KeyStoreError> {
    let metadata = root.with_key_and_iv(|key, iv| RootMetadata {
        v: METADATA_VERSION,
        keys: vec![KeyEntry {
            key: key.to_vec(),
            iv: iv.to_vec(),
        }],
    })?;
    let plaintext = Zeroizing::new(serde_json::to_vec(&metadata)?);
    Ok(cbc::encrypt(&passphrase.key, &passphrase.iv, &plaintext))
}

/// Decrypt sealed metadata and load the first key as the root key.
///
/// A decryption or JSON failure means the secret was wrong.
pub(crate) fn open(sealed: &[u8], passphrase: &PassphraseKey) -> Result<RootKey, KeyStoreError> {
    let plaintext = Zeroizing::new(
        cbc::decrypt(&passphrase.key, &passphrase.iv, sealed)
            .map_err(|_| KeyStoreError::InvalidSecret)?,
    );
    let metadata: RootMetadata = serde_json::from_slice(&plaintext).map_err(|e| {
        debug!(error = %e, "Root metadata did not parse");
        KeyStoreError::InvalidSecret
    })?;

    if metadata.v != METADATA_VERSION {
        return Err(KeyStoreError::UnsupportedMetadata {
            reason: format!("version {}", metadata.v),
        });
    }
    let entry = metadata
        .keys
        .first()
        .ok_or_else(|| KeyStoreError::UnsupportedMetadata {
            reason: "no keys".to_string(),
        })?;

    let key: &[u8; KEY_SIZE] =
        entry
            .key
            .as_slice()
            .try_into()
            .map_err(|_| KeyStoreError::UnsupportedMetadata {
                reason: format!("root key is {} bytes", entry.key.len()),
            })?;
    let iv: &[u8; IV_SIZE] =
        entry
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| KeyStoreError::UnsupportedMetadata {
                reason: format!("root IV is {} bytes", entry.iv.len()),
            })?;

    Ok(RootKey::new(key, iv)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ScryptParams, derive_passphrase_key};

    fn passphrase(secret: &str) -> PassphraseKey {
        derive_passphrase_key(secret.as_bytes(), &ScryptParams::insecure_fast()).unwrap()
    }

    #[test]
    fn seal_then_open_recovers_root_key() {
        let root = RootKey::random().unwrap();
        let pk = passphrase("correct horse");

        let sealed = seal(&root, &pk).unwrap();
        let opened = open(&sealed, &pk).unwrap();
        assert!(opened.matches(&root).unwrap());
    }

    #[test]
    fn wrong_passphrase_is_invalid_secret() {
        let root = RootKey::random().unwrap();
        let sealed = seal(&root, &passphrase("right")).unwrap();
        assert!(matches!(
            open(&sealed, &passphrase("wrong")),
            Err(KeyStoreError::InvalidSecret)
        ));
    }

    #[test]
    fn plaintext_layout_is_versioned_json() {
        let root = RootKey::new(&[0x11; KEY_SIZE], &[0x22; IV_SIZE]).unwrap();
        let pk = passphrase("layout");
        let sealed = seal(&root, &pk).unwrap();

        let plaintext = cbc::decrypt(&pk.key, &pk.iv, &sealed).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(json["v"], 0);
        assert_eq!(json["keys"][0]["key"]["type"], "Buffer");
        assert_eq!(json["keys"][0]["key"]["data"], serde_json::to_value([0x11u8; KEY_SIZE]).unwrap());
        assert_eq!(json["keys"][0]["iv"]["type"], "Buffer");
        assert_eq!(json["keys"][0]["iv"]["data"], serde_json::to_value([0x22u8; IV_SIZE]).unwrap());
    }

    #[test]
    fn opens_metadata_written_as_node_buffers() {
        let pk = passphrase("secret");
        let body = br#"{"v":0,"keys":[{"key":{"type":"Buffer","data":[0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15]},"iv":{"type":"Buffer","data":[16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31]}}]}"#;
        let sealed = cbc::encrypt(&pk.key, &pk.iv, body);

        let opened = open(&sealed, &pk).unwrap();
        let expected = RootKey::new(
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
            &[16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31],
        )
        .unwrap();
        assert!(opened.matches(&expected).unwrap());
    }

    #[test]
    fn base64_fields_do_not_parse() {
        let pk = passphrase("secret");
        let body = br#"{"v":0,"keys":[{"key":"EREREREREREREREREREREQ==","iv":"IiIiIiIiIiIiIiIiIiIiIg=="}]}"#;
        let sealed = cbc::encrypt(&pk.key, &pk.iv, body);
        assert!(matches!(open(&sealed, &pk), Err(KeyStoreError::InvalidSecret)));
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let pk = passphrase("future");
        let body = br#"{"v":1,"keys":[{"key":{"type":"Buffer","data":[1,2]},"iv":{"type":"Buffer","data":[3,4]}}]}"#;
        let sealed = cbc::encrypt(&pk.key, &pk.iv, body);
        assert!(matches!(
            open(&sealed, &pk),
            Err(KeyStoreError::UnsupportedMetadata { .. })
        ));
    }

    #[test]
    fn empty_key_list_is_unsupported() {
        let pk = passphrase("empty");
        let sealed = cbc::encrypt(&pk.key, &pk.iv, br#"{"v":0,"keys":[]}"#);
        assert!(matches!(
            open(&sealed, &pk),
            Err(KeyStoreError::UnsupportedMetadata { .. })
        ));
    }
}
