use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings for writing staged batches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StagingConfig {
    /// Maximum number of batch files written concurrently.
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
}

impl StagingConfig {
    /// Default number of concurrent staging writes.
    pub const DEFAULT_MAX_CONCURRENT_WRITES: usize = 4;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_writes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "staging.max_concurrent_writes".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_writes: default_max_concurrent_writes(),
        }
    }
}

fn default_max_concurrent_writes() -> usize {
    StagingConfig::DEFAULT_MAX_CONCURRENT_WRITES
}
