//! Profile-type driver registry (design notes §4.4, §6).
//!
//! A `ProfileDriver` is the capability a node action delegates to once it has
//! acquired its lock: create/delete/update the backing resource, probe its
//! health, recover it, and join/leave a cluster. The registry is a
//! type-name-keyed factory table, generalizing the provider-lookup pattern
//! used for policy and profile dispatch elsewhere in this crate; the one
//! driver shipped here (`NullDriver`) simulates a backend for tests and for
//! running the engine without real infrastructure.

use crate::error::{EngineError, Result};
use crate::model::{Node, Profile};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The action a recovery request asks the driver to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Rebuild,
    Recreate,
}

#[async_trait]
pub trait ProfileDriver: Send + Sync {
    fn profile_type(&self) -> &str;

    /// Provisions the backing resource; returns its physical id.
    async fn create(&self, profile: &Profile, node: &Node) -> Result<String>;
    async fn delete(&self, profile: &Profile, node: &Node) -> Result<()>;
    /// Applies `new_profile`'s spec to an existing node in place.
    async fn update(&self, profile: &Profile, node: &Node, new_profile: &Profile) -> Result<()>;
    /// Returns `true` if the backing resource reports healthy.
    async fn check(&self, profile: &Profile, node: &Node) -> Result<bool>;
    async fn recover(&self, profile: &Profile, node: &Node, action: RecoveryAction) -> Result<String>;
    async fn join(&self, profile: &Profile, node: &Node, cluster_id: Uuid) -> Result<()>;
    async fn leave(&self, profile: &Profile, node: &Node) -> Result<()>;
}

#[derive(Default)]
pub struct ProfileRegistry {
    drivers: HashMap<String, Arc<dyn ProfileDriver>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn ProfileDriver>) {
        self.drivers.insert(driver.profile_type().to_string(), driver);
    }

    pub fn get(&self, profile_type: &str) -> Result<Arc<dyn ProfileDriver>> {
        self.drivers
            .get(profile_type)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no profile driver registered for type {profile_type}")))
    }
}

/// A profile driver that simulates a backend instantly and always succeeds.
/// Used as the default driver for tests and as a stand-in until a real
/// infrastructure driver is registered.
pub struct NullDriver {
    profile_type: String,
}

impl NullDriver {
    pub fn new(profile_type: impl Into<String>) -> Self {
        Self {
            profile_type: profile_type.into(),
        }
    }
}

#[async_trait]
impl ProfileDriver for NullDriver {
    fn profile_type(&self) -> &str {
        &self.profile_type
    }

    async fn create(&self, _profile: &Profile, _node: &Node) -> Result<String> {
        Ok(format!("sim-{}", Uuid::new_v4()))
    }

    async fn delete(&self, _profile: &Profile, _node: &Node) -> Result<()> {
        Ok(())
    }

    async fn update(&self, _profile: &Profile, _node: &Node, _new_profile: &Profile) -> Result<()> {
        Ok(())
    }

    async fn check(&self, _profile: &Profile, _node: &Node) -> Result<bool> {
        Ok(true)
    }

    async fn recover(&self, _profile: &Profile, _node: &Node, _action: RecoveryAction) -> Result<String> {
        Ok(format!("sim-{}", Uuid::new_v4()))
    }

    async fn join(&self, _profile: &Profile, _node: &Node, _cluster_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn leave(&self, _profile: &Profile, _node: &Node) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_dispatches_by_profile_type() {
        let mut registry = ProfileRegistry::new();
        registry.register(Arc::new(NullDriver::new("os.nova.server")));
        let driver = registry.get("os.nova.server").unwrap();
        assert_eq!(driver.profile_type(), "os.nova.server");
        assert!(registry.get("os.heat.stack").is_err());
    }
}
