//! `EngineHandle`: the single `Arc`-shared struct wiring storage, locking,
//! the profile/policy registries, the dispatcher, and the health manager
//! together (design notes §6's RPC boundary, realised in-process).
//!
//! Grounded on the teacher's `Orchestrator` — one `Arc`-wrapped struct
//! holding `Arc<...>` subsystem handles with a `new()`/`start()`/`shutdown()`
//! lifecycle — kept the shape, replaced every subsystem. The health manager
//! needs to issue actions back through this handle while this handle also
//! owns the health manager, so construction uses `Arc::new_cyclic`: a
//! `Weak<EngineHandle>`-holding wrapper implements [`ActionIssuer`] and is
//! handed to the health manager before the `Arc<EngineHandle>` itself exists.

use crate::action::ExecutionContext;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, Result};
use crate::health::{ActionIssuer, HealthManager};
use crate::lock::LockManager;
use crate::model::{Action, ActionCause, Cluster, DataMap, Policy, Profile};
use crate::policy::PolicyRegistry;
use crate::profile::ProfileRegistry;
use crate::storage::StorageAdapter;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use uuid::Uuid;

pub struct EngineHandle {
    pub storage: Arc<dyn StorageAdapter>,
    pub locks: Arc<LockManager>,
    pub profiles: Arc<ProfileRegistry>,
    pub policies: Arc<PolicyRegistry>,
    pub health: Arc<HealthManager>,
    pub config: Arc<Config>,
    engine_id: String,
    dispatcher: Arc<Dispatcher>,
}

struct WeakIssuer(Weak<EngineHandle>);

#[async_trait]
impl ActionIssuer for WeakIssuer {
    async fn cluster_check(&self, cluster_id: Uuid) -> Result<Uuid> {
        let engine = self.0.upgrade().ok_or_else(|| EngineError::Internal("engine shut down".to_string()))?;
        engine.check_cluster(cluster_id).await
    }

    async fn node_recover(&self, node_id: Uuid, reason: &str) -> Result<Uuid> {
        let engine = self.0.upgrade().ok_or_else(|| EngineError::Internal("engine shut down".to_string()))?;
        let mut inputs = DataMap::new();
        inputs.insert("recovery_action".to_string(), serde_json::json!("REBUILD"));
        inputs.insert("reason".to_string(), serde_json::json!(reason));
        engine.submit_node_action(node_id, "NODE_RECOVER", inputs).await
    }
}

impl EngineHandle {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        profiles: ProfileRegistry,
        policies: PolicyRegistry,
        config: Config,
        engine_id: impl Into<String>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let locks = Arc::new(LockManager::new(storage.clone(), config.lock_retention_s));
        let profiles = Arc::new(profiles);
        let policies = Arc::new(policies);
        let engine_id = engine_id.into();

        Arc::new_cyclic(|weak| {
            let issuer: Arc<dyn ActionIssuer> = Arc::new(WeakIssuer(weak.clone()));
            let health = Arc::new(HealthManager::new(storage.clone(), issuer, config.periodic_interval_max_s));
            let ctx = ExecutionContext {
                storage: storage.clone(),
                locks: locks.clone(),
                profiles: profiles.clone(),
                policies: policies.clone(),
                health: health.clone(),
                config: config.clone(),
                clock: Arc::new(crate::clock::SystemClock),
            };
            let dispatcher = Arc::new(Dispatcher::new(
                ctx,
                engine_id.clone(),
                config.workers_per_engine,
                std::time::Duration::from_secs(1),
            ));
            Self {
                storage,
                locks,
                profiles,
                policies,
                health,
                config,
                engine_id,
                dispatcher,
            }
        })
    }

    /// Starts the dispatch loop and claims this engine's share of the health
    /// registry. Call once after construction.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.dispatcher.clone().spawn();
        self.health.claim_and_start(&self.engine_id).await?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    fn execution_ctx(&self) -> ExecutionContext {
        ExecutionContext {
            storage: self.storage.clone(),
            locks: self.locks.clone(),
            profiles: self.profiles.clone(),
            policies: self.policies.clone(),
            health: self.health.clone(),
            config: self.config.clone(),
            clock: Arc::new(crate::clock::SystemClock),
        }
    }

    async fn submit_cluster_action(&self, cluster_id: Uuid, verb: &str, inputs: DataMap) -> Result<Uuid> {
        let ctx = self.execution_ctx();
        let mut action = Action::new(verb, cluster_id, verb, ActionCause::RpcRequest, self.config.default_action_timeout_s, ctx.now());
        action.inputs = inputs;
        self.storage.action_create(action).await
    }

    async fn submit_node_action(&self, node_id: Uuid, verb: &str, inputs: DataMap) -> Result<Uuid> {
        let ctx = self.execution_ctx();
        let mut action = Action::new(verb, node_id, verb, ActionCause::RpcRequest, self.config.default_action_timeout_s, ctx.now());
        action.inputs = inputs;
        self.storage.action_create(action).await
    }

    pub async fn create_cluster(
        &self,
        name: impl Into<String>,
        profile_id: Uuid,
        desired_capacity: i64,
        min_size: i64,
        max_size: i64,
        timeout_s: u64,
    ) -> Result<(Uuid, Uuid)> {
        let now = self.execution_ctx().now();
        let cluster = Cluster::new(name, profile_id, desired_capacity, min_size, max_size, timeout_s, now);
        let cluster_id = self.storage.cluster_create(cluster).await?;
        let action_id = self.submit_cluster_action(cluster_id, "CLUSTER_CREATE", DataMap::new()).await?;
        Ok((cluster_id, action_id))
    }

    pub async fn delete_cluster(&self, cluster_id: Uuid) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_DELETE", DataMap::new()).await
    }

    pub async fn update_cluster(&self, cluster_id: Uuid, inputs: DataMap) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_UPDATE", inputs).await
    }

    pub async fn resize_cluster(&self, cluster_id: Uuid, inputs: DataMap) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_RESIZE", inputs).await
    }

    pub async fn scale_out_cluster(&self, cluster_id: Uuid, inputs: DataMap) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_SCALE_OUT", inputs).await
    }

    pub async fn scale_in_cluster(&self, cluster_id: Uuid, inputs: DataMap) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_SCALE_IN", inputs).await
    }

    pub async fn add_nodes(&self, cluster_id: Uuid, inputs: DataMap) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_ADD_NODES", inputs).await
    }

    pub async fn del_nodes(&self, cluster_id: Uuid, inputs: DataMap) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_DEL_NODES", inputs).await
    }

    pub async fn check_cluster(&self, cluster_id: Uuid) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_CHECK", DataMap::new()).await
    }

    pub async fn recover_cluster(&self, cluster_id: Uuid) -> Result<Uuid> {
        self.submit_cluster_action(cluster_id, "CLUSTER_RECOVER", DataMap::new()).await
    }

    pub async fn attach_policy(&self, cluster_id: Uuid, policy_id: Uuid) -> Result<Uuid> {
        let mut inputs = DataMap::new();
        inputs.insert("policy_id".to_string(), serde_json::json!(policy_id.to_string()));
        self.submit_cluster_action(cluster_id, "CLUSTER_ATTACH_POLICY", inputs).await
    }

    pub async fn detach_policy(&self, cluster_id: Uuid, policy_id: Uuid) -> Result<Uuid> {
        let mut inputs = DataMap::new();
        inputs.insert("policy_id".to_string(), serde_json::json!(policy_id.to_string()));
        self.submit_cluster_action(cluster_id, "CLUSTER_DETACH_POLICY", inputs).await
    }

    pub async fn update_policy(&self, cluster_id: Uuid, policy_id: Uuid, enabled: Option<bool>, priority: Option<i32>) -> Result<Uuid> {
        let mut inputs = DataMap::new();
        inputs.insert("policy_id".to_string(), serde_json::json!(policy_id.to_string()));
        if let Some(enabled) = enabled {
            inputs.insert("enabled".to_string(), serde_json::json!(enabled));
        }
        if let Some(priority) = priority {
            inputs.insert("priority".to_string(), serde_json::json!(priority));
        }
        self.submit_cluster_action(cluster_id, "CLUSTER_UPDATE_POLICY", inputs).await
    }

    pub async fn create_profile(&self, name: impl Into<String>, r#type: impl Into<String>, spec: DataMap) -> Result<Uuid> {
        let profile = Profile::new(name, r#type, spec, self.execution_ctx().now());
        self.storage.profile_create(profile).await
    }

    pub async fn create_policy(&self, name: impl Into<String>, r#type: impl Into<String>, spec: DataMap, cooldown_s: u64) -> Result<Uuid> {
        let policy = Policy::new(name, r#type, spec, cooldown_s, self.execution_ctx().now());
        self.storage.policy_create(policy).await
    }
}
