use async_trait::async_trait;
use base64::{Engine, prelude::BASE64_STANDARD};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::secret::kms::KeyManagementService;

#[derive(Serialize)]
struct DecryptRequest {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

/// Google Cloud KMS accessed through its REST API.
pub struct CloudKms {
    client: reqwest::Client,
    base_url: String,
    access_token: SecretString,
}

impl CloudKms {
    /// Creates a client for the KMS API at `base_url` authenticated with `access_token`.
    pub fn new(base_url: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            access_token,
        }
    }

    /// Returns the `decrypt` endpoint for `key_name`.
    fn decrypt_url(&self, key_name: &str) -> String {
        format!(
            "{}/v1/{}:decrypt",
            self.base_url.trim_end_matches('/'),
            key_name.trim_start_matches('/')
        )
    }
}

impl fmt::Debug for CloudKms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudKms")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyManagementService for CloudKms {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn decrypt(&self, key_name: &str, ciphertext: &[u8]) -> EtlResult<Vec<u8>> {
        debug!(key_name, "requesting decryption from cloud kms");

        let response = self
            .client
            .post(self.decrypt_url(key_name))
            .bearer_auth(self.access_token.expose_secret())
            .json(&DecryptRequest {
                ciphertext: BASE64_STANDARD.encode(ciphertext),
            })
            .send()
            .await?
            .error_for_status()?
            .json::<DecryptResponse>()
            .await?;

        BASE64_STANDARD.decode(response.plaintext).map_err(|err| {
            etl_error!(
                ErrorKind::CredentialDecryptionFailed,
                "Cloud KMS returned plaintext that is not valid base64",
                key_name,
                source: err
            )
        })
    }
}
