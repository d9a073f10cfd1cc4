//! Health policy (design notes §4.5), `PRIORITY=600`.

use super::{PolicyContext, PolicyType, PolicyWhen};
use crate::error::Result;
use crate::model::Action;
use async_trait::async_trait;
use uuid::Uuid;

/// The health policy's view of the health manager: enable/disable monitoring
/// around member-removing actions, register/unregister on attach/detach.
/// Implemented by [`crate::health::HealthManager`]; kept as a trait here so
/// the policy pipeline doesn't depend on the manager's dispatch internals.
#[async_trait]
pub trait HealthControl: Send + Sync {
    async fn disable(&self, cluster_id: Uuid) -> Result<()>;
    async fn enable(&self, cluster_id: Uuid) -> Result<()>;
    async fn register(&self, cluster_id: Uuid, detection_type: &str, interval_s: u64) -> Result<()>;
    async fn unregister(&self, cluster_id: Uuid) -> Result<()>;
}

/// A `HealthControl` that does nothing; used where tests exercise a policy
/// in isolation from the health manager.
pub struct NoopHealthControl;

#[async_trait]
impl HealthControl for NoopHealthControl {
    async fn disable(&self, _cluster_id: Uuid) -> Result<()> {
        Ok(())
    }
    async fn enable(&self, _cluster_id: Uuid) -> Result<()> {
        Ok(())
    }
    async fn register(&self, _cluster_id: Uuid, _detection_type: &str, _interval_s: u64) -> Result<()> {
        Ok(())
    }
    async fn unregister(&self, _cluster_id: Uuid) -> Result<()> {
        Ok(())
    }
}

const MEMBER_REMOVING_VERBS: &[&str] = &["CLUSTER_DEL_NODES", "CLUSTER_SCALE_IN", "NODE_DELETE"];

pub struct HealthPolicy;

impl HealthPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Whether `action` will net-remove members, consulting the
    /// already-resolved `data['deletion']` if present (written by the
    /// resize/scaling policies), falling back to treating any explicit
    /// positive `deletion.count` as a removal.
    fn removes_members(&self, action: &Action) -> bool {
        if MEMBER_REMOVING_VERBS.contains(&action.action.as_str()) {
            return true;
        }
        if action.action == "CLUSTER_RESIZE" {
            return action
                .data
                .get("deletion")
                .and_then(|d| d.get("count"))
                .and_then(|c| c.as_i64())
                .map(|c| c > 0)
                .unwrap_or(false);
        }
        false
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyType for HealthPolicy {
    fn policy_type(&self) -> &str {
        "senlin.policy.health"
    }

    fn priority(&self) -> i32 {
        600
    }

    fn target(&self) -> &[(PolicyWhen, &'static str)] {
        static TARGET: &[(PolicyWhen, &str)] = &[
            (PolicyWhen::Before, "CLUSTER_CHECK"),
            (PolicyWhen::Before, "CLUSTER_DEL_NODES"),
            (PolicyWhen::Before, "CLUSTER_RECOVER"),
            (PolicyWhen::Before, "CLUSTER_RESIZE"),
            (PolicyWhen::Before, "CLUSTER_SCALE_IN"),
            (PolicyWhen::Before, "NODE_DELETE"),
            (PolicyWhen::After, "CLUSTER_DEL_NODES"),
            (PolicyWhen::After, "CLUSTER_SCALE_IN"),
            (PolicyWhen::After, "CLUSTER_RESIZE"),
            (PolicyWhen::After, "NODE_DELETE"),
        ];
        TARGET
    }

    async fn pre_op(&self, cluster_id: Uuid, action: &mut Action, ctx: &PolicyContext) -> Result<()> {
        if self.removes_members(action) {
            ctx.health.disable(cluster_id).await?;
        }
        Ok(())
    }

    async fn post_op(&self, cluster_id: Uuid, action: &mut Action, ctx: &PolicyContext) -> Result<()> {
        if self.removes_members(action) {
            ctx.health.enable(cluster_id).await?;
        }
        Ok(())
    }

    async fn attach(&self, cluster_id: Uuid, spec: &serde_json::Value, ctx: &PolicyContext) -> Result<bool> {
        let detection_type = spec
            .get("detection")
            .and_then(|d| d.get("type"))
            .and_then(|v| v.as_str())
            .unwrap_or("NODE_STATUS_POLLING");
        let interval_s = spec
            .get("detection")
            .and_then(|d| d.get("options"))
            .and_then(|o| o.get("interval"))
            .and_then(|v| v.as_u64())
            .unwrap_or(60);
        ctx.health.register(cluster_id, detection_type, interval_s).await?;
        Ok(true)
    }

    async fn detach(&self, cluster_id: Uuid, ctx: &PolicyContext) -> Result<()> {
        ctx.health.unregister(cluster_id).await
    }
}
