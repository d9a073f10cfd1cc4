//! Priority-ordered BEFORE/AFTER policy check pipeline (design notes §4.5).

pub mod health;
pub mod loadbalance;
pub mod placement;
pub mod scaling;

pub use health::{HealthControl, HealthPolicy};
pub use loadbalance::LoadBalancePolicy;
pub use placement::PlacementPolicy;
pub use scaling::{ScaleDirection, ScalingPolicy};

use crate::error::Result;
use crate::model::{Action, Node};
use crate::storage::StorageAdapter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyWhen {
    Before,
    After,
}

/// Shared state a policy implementation needs beyond the action it is
/// decorating: the cluster's current members (for placement/scaling math)
/// and a handle to disable/enable health monitoring.
pub struct PolicyContext {
    pub storage: Arc<dyn StorageAdapter>,
    pub health: Arc<dyn HealthControl>,
    pub now: DateTime<Utc>,
}

impl PolicyContext {
    pub async fn cluster_nodes(&self, cluster_id: Uuid) -> Result<Vec<Node>> {
        self.storage.node_list_by_cluster(cluster_id).await
    }
}

#[async_trait]
pub trait PolicyType: Send + Sync {
    fn policy_type(&self) -> &str;
    fn priority(&self) -> i32;
    /// `(WHEN, action verb)` pairs this policy type cares about.
    fn target(&self) -> &[(PolicyWhen, &'static str)];

    /// Whether at most one binding of this policy type may be attached to a
    /// cluster at once. Defaults to `true`; types where multiple concurrent
    /// bindings make sense (load-balance, placement) override it.
    fn singleton(&self) -> bool {
        true
    }

    fn needs_check(&self, when: PolicyWhen, verb: &str) -> bool {
        self.target().iter().any(|(w, a)| *w == when && *a == verb)
    }

    async fn pre_op(&self, _cluster_id: Uuid, _action: &mut Action, _ctx: &PolicyContext) -> Result<()> {
        Ok(())
    }

    async fn post_op(&self, _cluster_id: Uuid, _action: &mut Action, _ctx: &PolicyContext) -> Result<()> {
        Ok(())
    }

    /// Called on ATTACH; returning `false` fails the attach action.
    async fn attach(&self, _cluster_id: Uuid, _spec: &serde_json::Value, _ctx: &PolicyContext) -> Result<bool> {
        Ok(true)
    }

    async fn detach(&self, _cluster_id: Uuid, _ctx: &PolicyContext) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct PolicyRegistry {
    types: HashMap<String, Arc<dyn PolicyType>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, policy_type: Arc<dyn PolicyType>) {
        self.types.insert(policy_type.policy_type().to_string(), policy_type);
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn PolicyType>> {
        self.types.get(type_name).cloned()
    }
}

/// Runs the BEFORE or AFTER pipeline for `action` against `cluster_id`'s
/// enabled bindings, ascending by priority. Returns once the first policy
/// sets `CHECK_ERROR` on the action, or after every interested policy has
/// run. On AFTER the engine stamps `last_op` for every enabled binding
/// whether or not that policy was interested (cooldown is only tracked on
/// AFTER, never BEFORE).
pub async fn policy_check(
    registry: &PolicyRegistry,
    ctx: &PolicyContext,
    cluster_id: Uuid,
    when: PolicyWhen,
    action: &mut Action,
) -> Result<()> {
    let verb = action.action.clone();
    let bindings = ctx.storage.cluster_policy_list(cluster_id).await?;

    for binding in &bindings {
        let policy = ctx.storage.policy_get(binding.policy_id).await?;
        let Some(ptype) = registry.get(&policy.r#type) else { continue };
        if !ptype.needs_check(when, &verb) {
            continue;
        }
        if binding.cooldown_in_progress(policy.cooldown_s, ctx.now) {
            action
                .data
                .insert("status".to_string(), serde_json::json!("CHECK_ERROR"));
            action
                .data
                .insert("reason".to_string(), serde_json::json!("cooldown in progress"));
            break;
        }
        match when {
            PolicyWhen::Before => ptype.pre_op(cluster_id, action, ctx).await?,
            PolicyWhen::After => ptype.post_op(cluster_id, action, ctx).await?,
        }
        if action.data.get("status").and_then(|v| v.as_str()) == Some("CHECK_ERROR") {
            break;
        }
    }

    if when == PolicyWhen::After {
        for binding in bindings {
            let mut updated = binding.clone();
            updated.last_op = Some(ctx.now);
            ctx.storage.cluster_policy_update(updated).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, ActionCause, ClusterPolicyBinding, Policy};
    use crate::policy::health::NoopHealthControl;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn cooldown_in_progress_short_circuits_pipeline() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        let cluster_id = Uuid::new_v4();
        let mut policy = Policy::new("scale-out", "senlin.policy.scaling", serde_json::Map::new(), 300, now);
        policy.id = Uuid::new_v4();
        let policy_id = policy.id;
        storage.policy_create(policy).await.unwrap();

        let mut binding = ClusterPolicyBinding::new(cluster_id, policy_id, 100);
        binding.last_op = Some(now);
        storage.cluster_policy_attach(binding).await.unwrap();

        let mut registry = PolicyRegistry::new();
        registry.register(Arc::new(ScalingPolicy::new(ScaleDirection::Out)));

        let ctx = PolicyContext {
            storage: storage.clone(),
            health: Arc::new(NoopHealthControl),
            now: now + chrono::Duration::seconds(10),
        };
        let mut action = Action::new(
            "scale-out",
            cluster_id,
            "CLUSTER_SCALE_OUT",
            ActionCause::RpcRequest,
            3600,
            now,
        );
        policy_check(&registry, &ctx, cluster_id, PolicyWhen::Before, &mut action)
            .await
            .unwrap();
        assert_eq!(action.data.get("status").and_then(|v| v.as_str()), Some("CHECK_ERROR"));
        assert_eq!(action.data.get("reason").and_then(|v| v.as_str()), Some("cooldown in progress"));
    }
}
