use async_trait::async_trait;
use aws_lc_rs::aead::{AES_256_GCM, Aad, NONCE_LEN, Nonce, RandomizedNonceKey};
use aws_lc_rs::rand::fill;
use base64::{Engine, prelude::BASE64_STANDARD};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{ErrorKind, EtlResult};
use crate::secret::kms::KeyManagementService;
use crate::{bail, etl_error};

/// Length in bytes of an AES-256-GCM key.
pub const LOCAL_KEY_LEN: usize = 32;

/// In-process key-management service holding named AES-256-GCM keys.
///
/// Ciphertext produced and accepted by this service is the 12 byte nonce followed by the sealed
/// data and its authentication tag.
#[derive(Default)]
pub struct LocalKms {
    keys: HashMap<String, RandomizedNonceKey>,
}

impl LocalKms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the service from base64 encoded keys keyed by key name.
    pub fn from_config(keys: &BTreeMap<String, SecretString>) -> EtlResult<Self> {
        let mut kms = Self::new();
        for (key_name, encoded_key) in keys {
            let key_bytes = BASE64_STANDARD
                .decode(encoded_key.expose_secret())
                .map_err(|err| {
                    etl_error!(
                        ErrorKind::ConfigError,
                        "Local KMS key is not valid base64",
                        key_name,
                        source: err
                    )
                })?;

            kms = kms.with_key(key_name.clone(), &key_bytes)?;
        }

        Ok(kms)
    }

    /// Adds a key from its raw bytes.
    pub fn with_key(mut self, key_name: impl Into<String>, key_bytes: &[u8]) -> EtlResult<Self> {
        let key_name = key_name.into();
        if key_bytes.len() != LOCAL_KEY_LEN {
            bail!(
                ErrorKind::ConfigError,
                "Local KMS key has the wrong length",
                format!(
                    "key `{key_name}` is {} bytes long, expected {LOCAL_KEY_LEN}",
                    key_bytes.len()
                )
            );
        }

        let key = RandomizedNonceKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| etl_error!(ErrorKind::ConfigError, "Local KMS key is invalid", key_name))?;
        self.keys.insert(key_name, key);

        Ok(self)
    }

    /// Adds a freshly generated random key.
    pub fn with_random_key(self, key_name: impl Into<String>) -> EtlResult<Self> {
        let mut key_bytes = [0u8; LOCAL_KEY_LEN];
        fill(&mut key_bytes)?;

        self.with_key(key_name, &key_bytes)
    }

    /// Encrypts `plaintext` with the key named `key_name`.
    pub fn encrypt(&self, key_name: &str, plaintext: &[u8]) -> EtlResult<Vec<u8>> {
        let key = self.key(key_name)?;

        let mut in_out = plaintext.to_vec();
        let nonce = key.seal_in_place_append_tag(Aad::empty(), &mut in_out)?;

        let nonce_bytes: &[u8; NONCE_LEN] = nonce.as_ref();
        let mut ciphertext = Vec::with_capacity(NONCE_LEN + in_out.len());
        ciphertext.extend_from_slice(nonce_bytes);
        ciphertext.extend_from_slice(&in_out);

        Ok(ciphertext)
    }

    /// Encrypts `plaintext` and encodes the result as standard base64, the form expected in
    /// pipeline configuration.
    pub fn encrypt_to_base64(&self, key_name: &str, plaintext: &str) -> EtlResult<String> {
        let ciphertext = self.encrypt(key_name, plaintext.as_bytes())?;

        Ok(BASE64_STANDARD.encode(ciphertext))
    }

    fn key(&self, key_name: &str) -> EtlResult<&RandomizedNonceKey> {
        self.keys.get(key_name).ok_or_else(|| {
            etl_error!(
                ErrorKind::CredentialDecryptionFailed,
                "Key is not known to the local KMS",
                key_name
            )
        })
    }
}

impl fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKms")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl KeyManagementService for LocalKms {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn decrypt(&self, key_name: &str, ciphertext: &[u8]) -> EtlResult<Vec<u8>> {
        let key = self.key(key_name)?;

        if ciphertext.len() < NONCE_LEN {
            bail!(
                ErrorKind::CredentialDecryptionFailed,
                "Ciphertext is too short",
                format!("expected at least {NONCE_LEN} bytes, got {}", ciphertext.len())
            );
        }

        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)?;

        let mut sealed = sealed.to_vec();
        let plaintext = key.open_in_place(nonce, Aad::empty(), &mut sealed)?;

        Ok(plaintext.to_vec())
    }
}
