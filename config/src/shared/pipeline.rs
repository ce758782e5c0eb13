use base64::{Engine, prelude::BASE64_STANDARD};
use secrecy::ExposeSecret;
use serde::{Deserialize, Deserializer};
use std::fmt;

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Prefix of every plaintext JDBC connection URL.
pub const JDBC_URL_PREFIX: &str = "jdbc:";

/// Separator used when driver jar locations are supplied as a single string.
const DRIVER_JARS_SEPARATOR: char = ',';

/// Configuration of a single JDBC to warehouse load job.
///
/// The connection URL, username and password are either plaintext or base64 encoded ciphertext,
/// depending on whether [`PipelineConfig::kms_encryption_key`] is set.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Storage paths of the JDBC driver archives, in load order.
    #[serde(deserialize_with = "deserialize_driver_jars")]
    pub driver_jars: Vec<String>,
    /// Fully qualified JDBC driver class name, e.g. `org.postgresql.Driver`.
    pub driver_class_name: String,
    /// JDBC connection URL, plaintext or encrypted.
    pub connection_url: SerializableSecretString,
    /// Connection properties in the form `[propertyName=property;]*`.
    #[serde(default)]
    pub connection_properties: Option<String>,
    /// Connection username, plaintext or encrypted.
    #[serde(default)]
    pub username: Option<SerializableSecretString>,
    /// Connection password, plaintext or encrypted.
    #[serde(default)]
    pub password: Option<SerializableSecretString>,
    /// Query executed on the source to extract the data.
    pub query: String,
    /// Destination table in the form `<project>:<dataset>.<table>`.
    pub output_table: String,
    /// Directory that holds staged batches before they are committed.
    pub staging_directory: String,
    /// Crypto key resource name used to decrypt the credential-bearing fields.
    #[serde(default)]
    pub kms_encryption_key: Option<String>,
    /// Map columns by their SQL alias instead of their underlying name.
    #[serde(default)]
    pub use_column_alias: bool,
    /// Replace the destination table contents instead of appending to them.
    #[serde(default, alias = "is_truncate")]
    pub truncate_before_write: bool,
}

impl PipelineConfig {
    /// Validates the shape of every field.
    ///
    /// This is a syntactic check only: nothing is decrypted and no connection is opened.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.driver_jars.is_empty() || self.driver_jars.iter().any(|jar| jar.trim().is_empty())
        {
            return Err(ValidationError::MissingField("driver_jars"));
        }

        for (name, value) in [
            ("driver_class_name", &self.driver_class_name),
            ("query", &self.query),
            ("output_table", &self.output_table),
            ("staging_directory", &self.staging_directory),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(name));
            }
        }

        let connection_url = self.connection_url.expose_secret();
        match &self.kms_encryption_key {
            Some(key_name) => {
                if !is_valid_kms_key_name(key_name) {
                    return Err(ValidationError::InvalidKmsKeyName(key_name.clone()));
                }

                if !looks_like_base64_ciphertext(connection_url) {
                    return Err(ValidationError::InvalidConnectionUrl);
                }
            }
            None => {
                if !is_jdbc_url(connection_url) {
                    if looks_like_base64_ciphertext(connection_url) {
                        return Err(ValidationError::EncryptedValueWithoutKey("connection_url"));
                    }

                    return Err(ValidationError::InvalidConnectionUrl);
                }
            }
        }

        if let Some(properties) = &self.connection_properties
            && !properties.is_empty()
            && !is_valid_connection_properties(properties)
        {
            return Err(ValidationError::InvalidConnectionProperties);
        }

        if TableReference::parse(&self.output_table).is_none() {
            return Err(ValidationError::InvalidOutputTable(self.output_table.clone()));
        }

        Ok(())
    }

    /// Returns `true` when the credential-bearing fields carry ciphertext.
    pub fn has_encrypted_credentials(&self) -> bool {
        self.kms_encryption_key.is_some()
    }
}

/// Reference to a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableReference {
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl TableReference {
    /// Parses `<project>:<dataset>.<table>`, `<project>.<dataset>.<table>` or `<dataset>.<table>`.
    pub fn parse(value: &str) -> Option<TableReference> {
        let (project, rest) = match value.split_once(':') {
            Some((project, rest)) => (Some(project), rest),
            None => (None, value),
        };

        let parts = rest.split('.').collect::<Vec<_>>();
        let (project, dataset, table) = match (project, parts.as_slice()) {
            (Some(project), [dataset, table]) => (Some(project), *dataset, *table),
            (None, [project, dataset, table]) => (Some(*project), *dataset, *table),
            (None, [dataset, table]) => (None, *dataset, *table),
            _ => return None,
        };

        if let Some(project) = project
            && !is_valid_project_id(project)
        {
            return None;
        }

        if !is_valid_table_segment(dataset) || !is_valid_table_segment(table) {
            return None;
        }

        Some(TableReference {
            project: project.map(str::to_owned),
            dataset: dataset.to_owned(),
            table: table.to_owned(),
        })
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{project}:{}.{}", self.dataset, self.table),
            None => write!(f, "{}.{}", self.dataset, self.table),
        }
    }
}

/// Returns `true` when `value` is a plaintext JDBC URL with only allowed characters.
pub fn is_jdbc_url(value: &str) -> bool {
    let Some(rest) = value.strip_prefix(JDBC_URL_PREFIX) else {
        return false;
    };

    !rest.is_empty()
        && rest.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '/' | ':' | '@' | '.' | '?' | '_' | '+' | '!' | '*' | '=')
                || ('&'..=';').contains(&c)
        })
}

/// Returns `true` when `value` has the shape of base64 encoded ciphertext.
///
/// This is a format check: the value decodes as standard base64 and is at least one full quantum.
pub fn looks_like_base64_ciphertext(value: &str) -> bool {
    value.len() >= 4 && BASE64_STANDARD.decode(value).is_ok()
}

/// Returns `true` when the connection property string only contains allowed characters.
pub fn is_valid_connection_properties(value: &str) -> bool {
    value.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(c, '_' | ';' | '!' | '*' | '&' | '=' | '@' | '\\' | '/')
            || ('#'..=':').contains(&c)
    })
}

/// Returns `true` for `projects/<p>/locations/<l>/keyRings/<r>/cryptoKeys/<k>`.
pub fn is_valid_kms_key_name(value: &str) -> bool {
    let segments = value.split('/').collect::<Vec<_>>();

    matches!(
        segments.as_slice(),
        ["projects", project, "locations", location, "keyRings", ring, "cryptoKeys", key]
            if [project, location, ring, key].iter().all(|segment| !segment.is_empty())
    )
}

fn is_valid_project_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

fn is_valid_table_segment(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '$'))
}

/// Accepts either a list of paths or a single comma separated string.
fn deserialize_driver_jars<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DriverJars {
        List(Vec<String>),
        Joined(String),
    }

    let jars = match DriverJars::deserialize(deserializer)? {
        DriverJars::List(jars) => jars,
        DriverJars::Joined(jars) => jars
            .split(DRIVER_JARS_SEPARATOR)
            .map(|jar| jar.trim().to_owned())
            .filter(|jar| !jar.is_empty())
            .collect(),
    };

    Ok(jars)
}
