use config::shared::{JDBC_URL_PREFIX, PipelineConfig, is_jdbc_url, looks_like_base64_ciphertext};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::error::{ErrorKind, EtlResult};
use crate::secret::ResolvedCredentials;
use crate::source::{DriverRegistry, SourceConnection, SourceDriver};
use crate::{bail, etl_error};

/// Separator between `key=value` entries of a connection properties string.
const PROPERTIES_SEPARATOR: char = ';';

/// Separator between a property name and its value.
const PROPERTY_KEY_VALUE_SEPARATOR: char = '=';

/// Plaintext connection parameters, ready for a driver.
///
/// Created once per run and consumed by the driver when the connection is opened.
#[derive(Clone)]
pub struct ResolvedConnection {
    pub url: SecretString,
    pub username: Option<SecretString>,
    pub password: Option<SecretString>,
    /// Driver properties. Values may hold credentials and are never logged.
    pub properties: BTreeMap<String, SecretString>,
}

impl ResolvedConnection {
    /// Returns the value of property `name`, if set.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .map(|value| value.expose_secret().as_str())
    }
}

impl fmt::Debug for ResolvedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConnection")
            .field("url", &"[REDACTED]")
            .field("username", &self.username.as_ref().map(|_| "[REDACTED]"))
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parses a `key=value;key=value` connection properties string.
///
/// Entries are split on `;` and then on the first `=`, so values may themselves contain `=`.
/// Empty entries, such as the one after a trailing `;`, are skipped. An entry without `=` or with
/// an empty key fails with [`ErrorKind::MalformedProperties`]. A repeated key keeps its last value.
pub fn parse_connection_properties(properties: &str) -> EtlResult<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();

    for (index, entry) in properties.split(PROPERTIES_SEPARATOR).enumerate() {
        if entry.trim().is_empty() {
            continue;
        }

        let Some((key, value)) = entry.split_once(PROPERTY_KEY_VALUE_SEPARATOR) else {
            bail!(
                ErrorKind::MalformedProperties,
                "Connection property is missing `=`",
                format!("entry {} (`{}`) has no value separator", index + 1, entry.trim())
            );
        };

        let key = key.trim();
        if key.is_empty() {
            bail!(
                ErrorKind::MalformedProperties,
                "Connection property has an empty name",
                format!("entry {}", index + 1)
            );
        }

        parsed.insert(key.to_owned(), value.to_owned());
    }

    Ok(parsed)
}

/// Checks that a configured connection URL is either a raw `jdbc:` URL or base64 ciphertext.
///
/// Ciphertext is only format-checked here. Decryption happens in [`crate::secret::SecretResolver`].
pub fn validate_connection_url(url: &str) -> EtlResult<()> {
    if is_jdbc_url(url) || looks_like_base64_ciphertext(url) {
        return Ok(());
    }

    bail!(
        ErrorKind::ConfigError,
        "Connection URL is neither a JDBC URL nor base64 encoded ciphertext",
        format!("expected a value starting with `{JDBC_URL_PREFIX}` or base64 text")
    )
}

/// Validated connection parameters for one run, bound to the driver that will open them.
///
/// Everything that does not depend on decrypted credentials is checked when the value is built,
/// so configuration errors surface before any key-management call is made.
#[derive(Debug)]
pub struct ConnectionConfig {
    driver: Arc<dyn SourceDriver>,
    driver_jars: Vec<String>,
    properties: BTreeMap<String, SecretString>,
}

impl ConnectionConfig {
    /// Checks `config` against the driver registry, checks the shape of the connection URL and
    /// parses the connection properties.
    pub fn new(config: &PipelineConfig, registry: &DriverRegistry) -> EtlResult<Self> {
        let driver = registry.resolve(&config.driver_class_name)?;

        validate_connection_url(config.connection_url.expose_secret())?;

        let properties = match &config.connection_properties {
            Some(properties) => parse_connection_properties(properties)?
                .into_iter()
                .map(|(key, value)| (key, SecretString::new(value)))
                .collect(),
            None => BTreeMap::new(),
        };

        Ok(Self {
            driver,
            driver_jars: config.driver_jars.clone(),
            properties,
        })
    }

    pub fn driver_class_name(&self) -> &'static str {
        self.driver.class_name()
    }

    /// Combines the parsed properties with plaintext `credentials`.
    pub fn resolve(&self, credentials: ResolvedCredentials) -> EtlResult<ResolvedConnection> {
        let url = credentials.connection_url;
        if !url.expose_secret().starts_with(JDBC_URL_PREFIX) {
            bail!(
                ErrorKind::ConfigError,
                "Resolved connection URL is not a JDBC URL",
                format!("expected a value starting with `{JDBC_URL_PREFIX}`")
            );
        }

        if !self.driver.accepts_url(url.expose_secret()) {
            bail!(
                ErrorKind::ConfigError,
                "Connection URL is not supported by the configured driver",
                self.driver.class_name()
            );
        }

        Ok(ResolvedConnection {
            url,
            username: credentials.username,
            password: credentials.password,
            properties: self.properties.clone(),
        })
    }

    /// Opens the single connection used by the extraction stage.
    ///
    /// Any driver failure is reported as [`ErrorKind::SourceConnectionFailed`].
    pub async fn open(
        self,
        credentials: ResolvedCredentials,
    ) -> EtlResult<Box<dyn SourceConnection>> {
        let connection = self.resolve(credentials)?;

        info!(
            driver = self.driver.class_name(),
            driver_jars = ?self.driver_jars,
            "opening source connection"
        );

        self.driver
            .connect(connection)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::SourceConnectionFailed => err,
                _ => etl_error!(
                    ErrorKind::SourceConnectionFailed,
                    "Failed to open source connection",
                    source: err
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DriverPolicy;
    use crate::source::memory::MemoryDriver;
    use crate::test_utils::pipeline::{TEST_CONNECTION_URL, test_pipeline_config};

    fn memory_registry() -> DriverRegistry {
        DriverRegistry::new(DriverPolicy::permissive()).with_driver(MemoryDriver::new())
    }

    fn plaintext_credentials(url: &str) -> ResolvedCredentials {
        ResolvedCredentials {
            connection_url: SecretString::new(url.to_owned()),
            username: Some(SecretString::new("loader".to_owned())),
            password: None,
        }
    }

    #[test]
    fn parses_key_value_pairs() {
        let properties = parse_connection_properties("k1=v1;k2=v2").unwrap();

        assert_eq!(
            properties,
            BTreeMap::from([
                ("k1".to_owned(), "v1".to_owned()),
                ("k2".to_owned(), "v2".to_owned())
            ])
        );
    }

    #[test]
    fn splits_on_the_first_separator_and_skips_empty_entries() {
        let properties =
            parse_connection_properties("options=-c search_path=app;;ApplicationName=loader;")
                .unwrap();

        assert_eq!(properties["options"], "-c search_path=app");
        assert_eq!(properties["ApplicationName"], "loader");
        assert_eq!(properties.len(), 2);
        assert!(parse_connection_properties("").unwrap().is_empty());
    }

    #[test]
    fn entries_without_separator_are_malformed() {
        let err = parse_connection_properties("k1;k2=v2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedProperties);

        let err = parse_connection_properties("=v").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedProperties);
    }

    #[test]
    fn later_keys_override_earlier_ones() {
        let properties = parse_connection_properties("k=1;k=2").unwrap();

        assert_eq!(properties["k"], "2");
    }

    #[test]
    fn accepts_jdbc_urls_and_ciphertext() {
        assert!(validate_connection_url("jdbc:mysql://h:3306/db").is_ok());
        assert!(validate_connection_url("Y2lwaGVydGV4dA==").is_ok());

        let err = validate_connection_url("mysql://h:3306/db").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn debug_output_is_redacted() {
        let connection = ResolvedConnection {
            url: SecretString::new("jdbc:postgresql://h/db".to_owned()),
            username: Some(SecretString::new("alice".to_owned())),
            password: Some(SecretString::new("hunter2".to_owned())),
            properties: BTreeMap::from([(
                "password".to_owned(),
                SecretString::new("hunter3".to_owned()),
            )]),
        };

        let debug = format!("{connection:?}");
        assert!(!debug.contains("postgresql"));
        assert!(!debug.contains("alice"));
        assert!(!debug.contains("hunter"));
        assert_eq!(connection.property("password"), Some("hunter3"));
    }

    #[test]
    fn malformed_properties_fail_before_credentials_are_needed() {
        let mut config = test_pipeline_config("select 1", "project:dataset.table");
        config.connection_properties = Some("useSSL=false;autoReconnect".to_owned());

        let err = ConnectionConfig::new(&config, &memory_registry()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedProperties);
    }

    #[test]
    fn resolved_connection_carries_credentials_and_properties() {
        let mut config = test_pipeline_config("select 1", "project:dataset.table");
        config.connection_properties = Some("useSSL=false".to_owned());

        let connection_config = ConnectionConfig::new(&config, &memory_registry()).unwrap();
        let connection = connection_config
            .resolve(plaintext_credentials(TEST_CONNECTION_URL))
            .unwrap();

        assert_eq!(connection.url.expose_secret(), TEST_CONNECTION_URL);
        assert_eq!(connection.property("useSSL"), Some("false"));
        assert!(connection.password.is_none());

        let err = connection_config
            .resolve(plaintext_credentials("mysql://h:3306/db"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
