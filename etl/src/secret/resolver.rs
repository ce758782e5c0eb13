use base64::{Engine, prelude::BASE64_STANDARD};
use config::shared::{PipelineConfig, looks_like_base64_ciphertext};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::secret::kms::KeyManagementService;
use crate::{bail, etl_error};

/// A configuration value that is either plaintext or base64 encoded ciphertext.
#[derive(Debug, Clone)]
pub struct SecretField {
    /// Name of the configuration field, used in errors and logs.
    pub name: &'static str,
    pub raw: SecretString,
    pub encrypted: bool,
}

impl SecretField {
    pub fn plaintext(name: &'static str, raw: SecretString) -> Self {
        Self {
            name,
            raw,
            encrypted: false,
        }
    }

    pub fn encrypted(name: &'static str, raw: SecretString) -> Self {
        Self {
            name,
            raw,
            encrypted: true,
        }
    }
}

/// Plaintext credentials of a pipeline, ready to be handed to a driver.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub connection_url: SecretString,
    pub username: Option<SecretString>,
    pub password: Option<SecretString>,
}

/// Turns [`SecretField`]s into plaintext.
///
/// With no key configured every field is plaintext and returned unchanged. With a key, fields are
/// decoded from base64 and decrypted through the key-management service.
#[derive(Debug, Clone)]
pub struct SecretResolver {
    key_name: Option<String>,
    kms: Option<Arc<dyn KeyManagementService>>,
}

impl SecretResolver {
    pub fn new(key_name: Option<String>, kms: Option<Arc<dyn KeyManagementService>>) -> Self {
        Self { key_name, kms }
    }

    /// Creates a resolver for plaintext-only configurations.
    pub fn plaintext() -> Self {
        Self::new(None, None)
    }

    /// Wraps a configuration value, marking it encrypted when a key is configured.
    pub fn field(&self, name: &'static str, raw: &SecretString) -> SecretField {
        if self.key_name.is_some() {
            SecretField::encrypted(name, raw.clone())
        } else {
            SecretField::plaintext(name, raw.clone())
        }
    }

    /// Returns the plaintext of `field`.
    pub async fn resolve(&self, field: &SecretField) -> EtlResult<SecretString> {
        if !field.encrypted {
            return Ok(field.raw.clone());
        }

        let Some(key_name) = &self.key_name else {
            bail!(
                ErrorKind::CredentialDecryptionFailed,
                "Encrypted field has no key identifier",
                field.name
            );
        };
        let Some(kms) = &self.kms else {
            bail!(
                ErrorKind::CredentialDecryptionFailed,
                "No key-management service is configured",
                field.name
            );
        };

        debug!(field = field.name, kms = kms.name(), "decrypting credential");

        let ciphertext = BASE64_STANDARD
            .decode(field.raw.expose_secret().trim())
            .map_err(|err| {
                etl_error!(
                    ErrorKind::CredentialDecryptionFailed,
                    "Encrypted field is not valid base64",
                    field.name,
                    source: err
                )
            })?;

        let plaintext = kms.decrypt(key_name, &ciphertext).await.map_err(|err| {
            etl_error!(
                ErrorKind::CredentialDecryptionFailed,
                "Decryption of a credential failed",
                detail = format!("field `{}` with key `{key_name}`", field.name),
                source: err
            )
        })?;

        let plaintext = String::from_utf8(plaintext).map_err(|err| {
            etl_error!(
                ErrorKind::CredentialDecryptionFailed,
                "Decrypted credential is not valid UTF-8",
                field.name,
                source: err
            )
        })?;

        Ok(SecretString::new(plaintext))
    }

    /// Resolves the connection URL, username and password of `config`.
    pub async fn resolve_credentials(
        &self,
        config: &PipelineConfig,
    ) -> EtlResult<ResolvedCredentials> {
        let connection_url = self
            .resolve(&self.field("connection_url", &config.connection_url))
            .await?;

        let username = match &config.username {
            Some(username) => Some(self.resolve_optional("username", username).await?),
            None => None,
        };
        let password = match &config.password {
            Some(password) => Some(self.resolve_optional("password", password).await?),
            None => None,
        };

        Ok(ResolvedCredentials {
            connection_url,
            username,
            password,
        })
    }

    async fn resolve_optional(
        &self,
        name: &'static str,
        raw: &SecretString,
    ) -> EtlResult<SecretString> {
        let field = self.field(name, raw);
        if !field.encrypted && looks_like_base64_ciphertext(raw.expose_secret()) {
            warn!(
                field = name,
                "credential looks like base64 ciphertext but no kms key is configured, using it as plaintext"
            );
        }

        self.resolve(&field).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::kms::LocalKms;

    const KEY_NAME: &str = "projects/p/locations/global/keyRings/r/cryptoKeys/k";

    fn secret(value: &str) -> SecretString {
        SecretString::new(value.to_owned())
    }

    #[tokio::test]
    async fn plaintext_fields_are_returned_unchanged() {
        let resolver = SecretResolver::plaintext();

        for value in ["jdbc:mysql://h:3306/db", "", "dXNlcg==", "  spaced  "] {
            let field = resolver.field("connection_url", &secret(value));
            assert!(!field.encrypted);

            let plaintext = resolver.resolve(&field).await.unwrap();
            assert_eq!(plaintext.expose_secret(), value);
        }
    }

    #[tokio::test]
    async fn encrypted_fields_round_trip_through_the_kms() {
        let kms = Arc::new(LocalKms::new().with_random_key(KEY_NAME).unwrap());
        let resolver = SecretResolver::new(Some(KEY_NAME.to_owned()), Some(kms.clone()));

        for plaintext in ["jdbc:postgresql://h/db", "s3cr3t;with=chars", "ünïcode", ""] {
            let ciphertext = kms.encrypt_to_base64(KEY_NAME, plaintext).unwrap();
            let field = resolver.field("password", &secret(&ciphertext));
            assert!(field.encrypted);

            let resolved = resolver.resolve(&field).await.unwrap();
            assert_eq!(resolved.expose_secret(), plaintext);
        }
    }

    #[tokio::test]
    async fn ciphertext_from_another_key_does_not_decrypt() {
        let producer = LocalKms::new().with_random_key(KEY_NAME).unwrap();
        let ciphertext = producer.encrypt_to_base64(KEY_NAME, "s3cr3t").unwrap();

        let consumer = Arc::new(LocalKms::new().with_random_key(KEY_NAME).unwrap());
        let resolver = SecretResolver::new(Some(KEY_NAME.to_owned()), Some(consumer));

        let field = resolver.field("password", &secret(&ciphertext));
        let err = resolver.resolve(&field).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialDecryptionFailed);
    }

    #[tokio::test]
    async fn invalid_ciphertext_fails_with_decryption_error() {
        let kms = Arc::new(LocalKms::new().with_random_key(KEY_NAME).unwrap());
        let resolver = SecretResolver::new(Some(KEY_NAME.to_owned()), Some(kms));

        let field = resolver.field("connection_url", &secret("not base64!"));
        let err = resolver.resolve(&field).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialDecryptionFailed);

        let field = resolver.field("connection_url", &secret("dGhpcyBpcyBub3QgY2lwaGVydGV4dA=="));
        let err = resolver.resolve(&field).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialDecryptionFailed);
    }

    #[tokio::test]
    async fn encrypted_fields_without_kms_fail() {
        let resolver = SecretResolver::new(Some(KEY_NAME.to_owned()), None);

        let field = resolver.field("username", &secret("dXNlcg=="));
        let err = resolver.resolve(&field).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialDecryptionFailed);
    }
}
