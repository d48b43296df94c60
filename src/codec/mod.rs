//! Opaque key codec.
//!
//! Turns a [`Key`] into `@<type>:<16 hex chars>` and back. The id is encrypted
//! with triple DES (CBC, no padding, one 8-byte block) under a key derived per
//! type with PBKDF2-HMAC-SHA1 from `password + ":" + type`. The IV is fixed for
//! the process, so the same (type, id) always encodes to the same text: the
//! output is unguessable but not confidential.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;
use serde::Deserialize;
use sha1::Sha1;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::key::Key;

type TdesCbcEnc = cbc::Encryptor<TdesEde3>;
type TdesCbcDec = cbc::Decryptor<TdesEde3>;

/// Length of a derived triple DES key in bytes.
const DERIVED_KEY_LEN: usize = 24;
/// One encrypted 64-bit id rendered as hex.
const CIPHERTEXT_HEX_LEN: usize = 16;
/// Marker that distinguishes opaque keys from plain `type:id` keys.
const OPAQUE_PREFIX: char = '@';

type DerivedKey = [u8; DERIVED_KEY_LEN];

/// Key codec configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyCodecConfig {
    /// Shared secret mixed into every per-type password.
    pub password: String,
    /// PBKDF2 salt.
    pub salt: String,
    /// Cipher IV as 16 hex characters.
    pub iv: String,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl Default for KeyCodecConfig {
    fn default() -> Self {
        Self {
            password: "changeme".to_string(),
            salt: "asalt".to_string(),
            iv: "0123456789ABCDEF".to_string(),
            iterations: 1024,
        }
    }
}

/// Cache of derived cipher keys, keyed by type name.
///
/// Clones share the same underlying map. Two callers racing on the same type
/// may both derive the key; the results are identical so the last insert wins.
#[derive(Debug, Clone, Default)]
pub struct DerivedKeyCache {
    keys: Arc<RwLock<HashMap<String, DerivedKey>>>,
}

impl DerivedKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, type_name: &str) -> Option<DerivedKey> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        keys.get(type_name).copied()
    }

    fn insert(&self, type_name: &str, key: DerivedKey) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(type_name.to_string(), key);
    }

    /// Number of types with a cached key.
    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reversible obfuscation of keys for use outside the store.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    password: String,
    salt: Vec<u8>,
    iv: [u8; 8],
    iterations: u32,
    cache: DerivedKeyCache,
}

impl KeyCodec {
    /// Create a codec from configuration, using the given cache.
    pub fn new(config: &KeyCodecConfig, cache: DerivedKeyCache) -> Result<Self> {
        let iv_bytes = hex::decode(&config.iv).map_err(|e| {
            StoreError::Config(config::ConfigError::Message(format!(
                "key_codec.iv must be 16 hex characters: {e}"
            )))
        })?;
        let iv: [u8; 8] = iv_bytes.try_into().map_err(|_| {
            StoreError::Config(config::ConfigError::Message(
                "key_codec.iv must decode to exactly 8 bytes".to_string(),
            ))
        })?;

        if config.iterations == 0 {
            return Err(StoreError::Config(config::ConfigError::Message(
                "key_codec.iterations must be positive".to_string(),
            )));
        }

        Ok(Self {
            password: config.password.clone(),
            salt: config.salt.as_bytes().to_vec(),
            iv,
            iterations: config.iterations,
            cache,
        })
    }

    /// The cache this codec populates.
    pub fn cache(&self) -> &DerivedKeyCache {
        &self.cache
    }

    /// Encode a key as `@<type>:<hex>`.
    pub fn encode(&self, key: &Key) -> Result<String> {
        let type_name = key.type_name();
        if type_name.is_empty() || type_name.contains(':') || type_name.starts_with(OPAQUE_PREFIX)
        {
            return Err(StoreError::InvalidKey(format!(
                "type name '{type_name}' cannot be encoded"
            )));
        }

        let derived = self.derived_key(type_name);
        let cipher = TdesCbcEnc::new_from_slices(&derived, &self.iv)
            .map_err(|_| StoreError::InvalidKey("cipher initialization failed".to_string()))?;
        let encrypted = cipher.encrypt_padded_vec_mut::<NoPadding>(&key.id().to_be_bytes());

        Ok(format!("{OPAQUE_PREFIX}{type_name}:{}", hex::encode(encrypted)))
    }

    /// Decode an opaque key. Text without the `@` marker is parsed as a plain key.
    pub fn decode(&self, text: &str) -> Result<Key> {
        let invalid = || StoreError::InvalidKey(format!("'{text}' is not a valid key"));

        if text.is_empty() || !text.contains(':') {
            return Err(invalid());
        }

        let Some(body) = text.strip_prefix(OPAQUE_PREFIX) else {
            return text.parse();
        };

        let mut parts = body.split(':');
        let (Some(type_name), Some(ciphertext), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        if type_name.is_empty()
            || ciphertext.len() != CIPHERTEXT_HEX_LEN
            || !ciphertext.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(invalid());
        }

        let encrypted = hex::decode(ciphertext).map_err(|_| invalid())?;
        let derived = self.derived_key(type_name);
        let cipher = TdesCbcDec::new_from_slices(&derived, &self.iv).map_err(|_| invalid())?;
        let plain = cipher
            .decrypt_padded_vec_mut::<NoPadding>(&encrypted)
            .map_err(|_| invalid())?;
        let id_bytes: [u8; 8] = plain.try_into().map_err(|_| invalid())?;

        Ok(Key::new(type_name, u64::from_be_bytes(id_bytes)))
    }

    fn derived_key(&self, type_name: &str) -> DerivedKey {
        if let Some(key) = self.cache.get(type_name) {
            return key;
        }

        debug!(type_name, "Deriving key codec cipher key");
        let password = format!("{}:{}", self.password, type_name);
        let mut key = [0u8; DERIVED_KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), &self.salt, self.iterations, &mut key);

        self.cache.insert(type_name, key);
        key
    }
}
