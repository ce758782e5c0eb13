use serde::Deserialize;

use crate::Config;
use crate::shared::{
    BatchConfig, DriverPolicyConfig, KmsConfig, PipelineConfig, SentryConfig, StagingConfig,
    ValidationError, WarehouseConfig,
};

/// Complete configuration for the loader binary.
///
/// Aggregates the job parameters with the collaborators the job runs against. Typically
/// loaded from configuration files at startup.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Parameters of the load job.
    pub pipeline: PipelineConfig,
    /// Key-management backend, required when the pipeline carries encrypted credentials.
    #[serde(default)]
    pub kms: Option<KmsConfig>,
    /// Destination warehouse.
    pub warehouse: WarehouseConfig,
    /// Staging write settings.
    #[serde(default)]
    pub staging: StagingConfig,
    /// Driver class name policy.
    #[serde(default)]
    pub drivers: DriverPolicyConfig,
    /// Batch sizing.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Optional Sentry configuration for error tracking.
    #[serde(default)]
    pub sentry: Option<SentryConfig>,
}

impl LoaderConfig {
    /// Validates the complete loader configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;
        self.batch.validate()?;
        self.staging.validate()?;
        self.warehouse.validate()?;

        if self.pipeline.has_encrypted_credentials() && self.kms.is_none() {
            return Err(ValidationError::MissingKmsBackend);
        }

        Ok(())
    }
}

impl Config for LoaderConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[
        "pipeline.driver_jars",
        "drivers.allowed",
        "drivers.denied",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader_config_json(kms: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "pipeline": {
                "driver_jars": "gs://bucket/postgres.jar",
                "driver_class_name": "org.postgresql.Driver",
                "connection_url": "amRiYzpwb3N0Z3Jlc3FsOi8vaC9kYg==",
                "query": "select 1",
                "output_table": "p:d.t",
                "staging_directory": "/tmp/staging",
                "kms_encryption_key": "projects/p/locations/global/keyRings/r/cryptoKeys/k",
                "is_truncate": true
            },
            "kms": kms,
            "warehouse": {
                "memory": {
                    "fields": [
                        { "name": "id", "type": "INT64", "required": true },
                        { "name": "full_name", "type": "STRING" }
                    ]
                }
            }
        })
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: LoaderConfig = serde_json::from_value(loader_config_json(serde_json::json!({
            "local": { "keys": {} }
        })))
        .unwrap();

        assert!(config.pipeline.truncate_before_write);
        assert!(!config.pipeline.use_column_alias);
        assert_eq!(config.batch.max_size, BatchConfig::DEFAULT_MAX_SIZE);
        assert_eq!(
            config.staging.max_concurrent_writes,
            StagingConfig::DEFAULT_MAX_CONCURRENT_WRITES
        );
        let WarehouseConfig::Memory { fields } = &config.warehouse else {
            panic!("expected the memory warehouse");
        };
        assert_eq!(fields.len(), 2);
        assert!(fields[0].required);
        assert!(!fields[1].required);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn memory_warehouse_needs_output_table_fields() {
        let mut json = loader_config_json(serde_json::json!({ "local": { "keys": {} } }));
        json["warehouse"] = serde_json::json!({ "memory": {} });
        let config: LoaderConfig = serde_json::from_value(json).unwrap();

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { ref field, .. }) if field == "warehouse.memory.fields"
        ));
    }

    #[test]
    fn encrypted_pipeline_requires_kms_backend() {
        let config: LoaderConfig =
            serde_json::from_value(loader_config_json(serde_json::Value::Null)).unwrap();

        assert_eq!(config.validate(), Err(ValidationError::MissingKmsBackend));
    }
}
