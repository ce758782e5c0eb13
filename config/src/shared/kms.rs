use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

/// Public endpoint of Google Cloud KMS.
const CLOUD_KMS_BASE_URL: &str = "https://cloudkms.googleapis.com";

/// Key-management backend used to decrypt credential-bearing pipeline fields.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KmsConfig {
    /// Keys held in process, keyed by crypto key resource name.
    ///
    /// Each value is a base64 encoded 32 byte AES-256-GCM key.
    Local { keys: BTreeMap<String, SecretString> },
    /// Google Cloud KMS over its REST API.
    Cloud {
        /// Base URL of the KMS API, overridable for emulators.
        #[serde(default = "default_base_url")]
        base_url: String,
        /// OAuth2 access token with `cloudkms.cryptoKeyVersions.useToDecrypt`.
        access_token: SecretString,
    },
}

fn default_base_url() -> String {
    CLOUD_KMS_BASE_URL.to_owned()
}
