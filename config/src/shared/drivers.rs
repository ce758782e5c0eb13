use serde::{Deserialize, Serialize};

/// Allow and deny lists for JDBC driver class names.
///
/// A class name on the deny list is always rejected. When the allow list is empty every
/// registered driver is accepted, otherwise only listed class names are.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DriverPolicyConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
}
