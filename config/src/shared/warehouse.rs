use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Configuration for the destination warehouse.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseConfig {
    /// In-process warehouse, used for local runs.
    ///
    /// The output table is created empty with `fields` before the run, so a run exercises the
    /// whole job without a cloud project.
    Memory {
        #[serde(default)]
        fields: Vec<MemoryFieldConfig>,
    },
    /// Google BigQuery.
    BigQuery {
        /// Google Cloud project that runs the load jobs.
        project_id: String,
        /// Service account key for authenticating with BigQuery.
        service_account_key: SecretString,
    },
}

/// A field of the output table created in the in-memory warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryFieldConfig {
    pub name: String,
    /// Warehouse type name, such as `INT64` or `STRING`.
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

impl WarehouseConfig {
    /// Validates the warehouse configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let WarehouseConfig::Memory { fields } = self {
            if fields.is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: "warehouse.memory.fields".to_owned(),
                    constraint: "must describe at least one field of the output table".to_owned(),
                });
            }

            if fields.iter().any(|field| field.name.trim().is_empty()) {
                return Err(ValidationError::MissingField(
                    "warehouse.memory.fields.name",
                ));
            }
        }

        Ok(())
    }
}
