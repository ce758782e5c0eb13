use async_trait::async_trait;
use std::fmt;

use crate::error::EtlResult;

/// A key-management service able to decrypt data with a named key.
///
/// Implementations fail with [`crate::error::ErrorKind::CredentialDecryptionFailed`] when the key
/// cannot be resolved or the ciphertext does not decrypt. They must never log the ciphertext or
/// the plaintext.
#[async_trait]
pub trait KeyManagementService: fmt::Debug + Send + Sync {
    /// Returns the name of the backend, used in logs.
    fn name(&self) -> &'static str;

    /// Decrypts `ciphertext` with the key named `key_name`.
    async fn decrypt(&self, key_name: &str, ciphertext: &[u8]) -> EtlResult<Vec<u8>>;
}
