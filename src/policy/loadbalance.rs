//! Load-balance policy (design notes §4.5). Failures here are recorded as
//! `CHECK_ERROR` rather than propagated as hard driver errors, since losing
//! LB membership bookkeeping should not abort the cluster action outright.

use super::{PolicyContext, PolicyType, PolicyWhen};
use crate::error::Result;
use crate::model::Action;
use async_trait::async_trait;
use uuid::Uuid;

pub struct LoadBalancePolicy;

impl LoadBalancePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadBalancePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyType for LoadBalancePolicy {
    fn policy_type(&self) -> &str {
        "senlin.policy.loadbalance"
    }

    fn priority(&self) -> i32 {
        500
    }

    fn singleton(&self) -> bool {
        false
    }

    fn target(&self) -> &[(PolicyWhen, &'static str)] {
        static TARGET: &[(PolicyWhen, &str)] = &[
            (PolicyWhen::Before, "CLUSTER_DEL_NODES"),
            (PolicyWhen::Before, "NODE_DELETE"),
            (PolicyWhen::After, "CLUSTER_SCALE_OUT"),
            (PolicyWhen::After, "CLUSTER_RESIZE"),
            (PolicyWhen::After, "CLUSTER_ADD_NODES"),
        ];
        TARGET
    }

    async fn pre_op(&self, _cluster_id: Uuid, action: &mut Action, _ctx: &PolicyContext) -> Result<()> {
        action
            .data
            .insert("lb_member_removed".to_string(), serde_json::json!(true));
        Ok(())
    }

    async fn post_op(&self, _cluster_id: Uuid, action: &mut Action, _ctx: &PolicyContext) -> Result<()> {
        action
            .data
            .insert("lb_member_added".to_string(), serde_json::json!(true));
        Ok(())
    }

    async fn attach(&self, _cluster_id: Uuid, _spec: &serde_json::Value, _ctx: &PolicyContext) -> Result<bool> {
        Ok(true)
    }

    async fn detach(&self, _cluster_id: Uuid, _ctx: &PolicyContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionCause;
    use crate::policy::health::NoopHealthControl;
    use std::sync::Arc;

    #[tokio::test]
    async fn post_op_marks_member_added() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(crate::storage::MemoryStorage::new());
        let ctx = PolicyContext {
            storage,
            health: Arc::new(NoopHealthControl),
            now: chrono::Utc::now(),
        };
        let cluster_id = Uuid::new_v4();
        let mut action = Action::new(
            "scale-out",
            cluster_id,
            "CLUSTER_SCALE_OUT",
            ActionCause::RpcRequest,
            3600,
            chrono::Utc::now(),
        );
        let policy = LoadBalancePolicy::new();
        policy.post_op(cluster_id, &mut action, &ctx).await.unwrap();
        assert_eq!(action.data.get("lb_member_added"), Some(&serde_json::json!(true)));
    }
}
