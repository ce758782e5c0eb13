use config::shared::DriverPolicyConfig;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::source::SourceDriver;
use crate::source::postgres::PostgresDriver;

/// Allow and deny lists for driver class names.
///
/// The deny list always wins. An empty allow list allows every class that is not denied.
#[derive(Debug, Clone, Default)]
pub struct DriverPolicy {
    allowed: BTreeSet<String>,
    denied: BTreeSet<String>,
}

impl DriverPolicy {
    pub fn new(
        allowed: impl IntoIterator<Item = String>,
        denied: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            denied: denied.into_iter().collect(),
        }
    }

    /// Returns a policy that allows every class.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, class_name: &str) -> bool {
        if self.denied.contains(class_name) {
            return false;
        }

        self.allowed.is_empty() || self.allowed.contains(class_name)
    }
}

impl From<&DriverPolicyConfig> for DriverPolicy {
    fn from(config: &DriverPolicyConfig) -> Self {
        Self::new(config.allowed.iter().cloned(), config.denied.iter().cloned())
    }
}

/// Registered source drivers, looked up by class name under a [`DriverPolicy`].
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<&'static str, Arc<dyn SourceDriver>>,
    policy: DriverPolicy,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub fn new(policy: DriverPolicy) -> Self {
        Self {
            drivers: HashMap::new(),
            policy,
        }
    }

    /// Creates a registry with the built-in drivers.
    pub fn with_builtin_drivers(policy: DriverPolicy) -> Self {
        Self::new(policy).with_driver(PostgresDriver)
    }

    /// Registers `driver`, replacing any driver with the same class name.
    pub fn with_driver<D>(mut self, driver: D) -> Self
    where
        D: SourceDriver + 'static,
    {
        self.register(Arc::new(driver));
        self
    }

    pub fn register(&mut self, driver: Arc<dyn SourceDriver>) {
        self.drivers.insert(driver.class_name(), driver);
    }

    /// Returns the driver for `class_name`.
    ///
    /// Fails with [`ErrorKind::DriverNotAllowed`] when the policy rejects the class and with
    /// [`ErrorKind::DriverNotFound`] when no driver is registered under it.
    pub fn resolve(&self, class_name: &str) -> EtlResult<Arc<dyn SourceDriver>> {
        if !self.policy.is_allowed(class_name) {
            bail!(
                ErrorKind::DriverNotAllowed,
                "Driver class is not allowed by the driver policy",
                class_name
            );
        }

        let Some(driver) = self.drivers.get(class_name) else {
            bail!(
                ErrorKind::DriverNotFound,
                "No driver is registered for the driver class",
                class_name
            );
        };

        debug!(class_name, "resolved source driver");

        Ok(driver.clone())
    }
}
