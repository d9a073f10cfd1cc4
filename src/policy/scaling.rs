//! Scaling-out / scaling-in policy (design notes §4.5).

use super::{PolicyContext, PolicyType, PolicyWhen};
use crate::error::Result;
use crate::model::Action;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Out,
    In,
}

/// Resolves `adjustment` into a non-negative member count for a `CLUSTER_SCALE_OUT`
/// or `CLUSTER_SCALE_IN` action, clamping against `min_size`/`max_size` unless
/// `best_effort` and setting `CHECK_ERROR`/`CHECK_OK` with the exact reason
/// text callers depend on.
pub struct ScalingPolicy {
    direction: ScaleDirection,
    target_verb: &'static str,
}

impl ScalingPolicy {
    pub fn new(direction: ScaleDirection) -> Self {
        let target_verb = match direction {
            ScaleDirection::Out => "CLUSTER_SCALE_OUT",
            ScaleDirection::In => "CLUSTER_SCALE_IN",
        };
        Self { direction, target_verb }
    }
}

fn resolve_count(adjustment: &serde_json::Value, current: i64) -> i64 {
    let adjustment_type = adjustment.get("type").and_then(|v| v.as_str()).unwrap_or("CHANGE_IN_CAPACITY");
    let number = adjustment.get("number").and_then(|v| v.as_f64()).unwrap_or(1.0);
    let min_step = adjustment.get("min_step").and_then(|v| v.as_i64()).unwrap_or(1);
    match adjustment_type {
        "EXACT_CAPACITY" => number as i64 - current,
        "CHANGE_IN_PERCENTAGE" => {
            let magnitude = ((number * current as f64) / 100.0).floor() as i64;
            magnitude.max(min_step)
        }
        _ => number as i64,
    }
}

#[async_trait]
impl PolicyType for ScalingPolicy {
    fn policy_type(&self) -> &str {
        match self.direction {
            ScaleDirection::Out => "senlin.policy.scaling_out",
            ScaleDirection::In => "senlin.policy.scaling_in",
        }
    }

    fn priority(&self) -> i32 {
        300
    }

    fn target(&self) -> &[(PolicyWhen, &'static str)] {
        static TARGET_OUT: &[(PolicyWhen, &str)] = &[(PolicyWhen::Before, "CLUSTER_SCALE_OUT")];
        static TARGET_IN: &[(PolicyWhen, &str)] = &[(PolicyWhen::Before, "CLUSTER_SCALE_IN")];
        match self.direction {
            ScaleDirection::Out => TARGET_OUT,
            ScaleDirection::In => TARGET_IN,
        }
    }

    async fn pre_op(&self, cluster_id: Uuid, action: &mut Action, ctx: &PolicyContext) -> Result<()> {
        let cluster = ctx.storage.cluster_get(cluster_id).await?;
        let current = cluster.desired_capacity;
        let data_key = match self.direction {
            ScaleDirection::Out => "creation",
            ScaleDirection::In => "deletion",
        };
        let adjustment = action
            .inputs
            .get("adjustment")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let best_effort = adjustment.get("best_effort").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut count = action
            .inputs
            .get("count")
            .and_then(|v| v.as_i64())
            .unwrap_or_else(|| resolve_count(&adjustment, current));

        let negative_reason = match self.direction {
            ScaleDirection::Out => "ScalingOutPolicy generates a negative count for scaling out operation.",
            ScaleDirection::In => "ScalingInPolicy generates a negative count for scaling in operation.",
        };
        if count < 0 {
            set_check_error(action, negative_reason);
            return Ok(());
        }

        let projected = match self.direction {
            ScaleDirection::Out => current + count,
            ScaleDirection::In => current - count,
        };

        let over_limit = match self.direction {
            ScaleDirection::Out => cluster.max_size != -1 && projected > cluster.max_size,
            ScaleDirection::In => projected < cluster.min_size,
        };

        if over_limit {
            if best_effort {
                count = match self.direction {
                    ScaleDirection::Out => (cluster.max_size - current).max(0),
                    ScaleDirection::In => (current - cluster.min_size).max(0),
                };
                set_check_ok(action, "Do best effort scaling");
            } else {
                let reason = match self.direction {
                    ScaleDirection::Out => "Attempted scaling exceeds maximum size",
                    ScaleDirection::In => "Attempted scaling below minimum size",
                };
                set_check_error(action, reason);
                return Ok(());
            }
        } else {
            set_check_ok(action, "Scaling request validated");
        }

        action
            .data
            .insert(data_key.to_string(), serde_json::json!({ "count": count }));
        Ok(())
    }
}

fn set_check_error(action: &mut Action, reason: &str) {
    action.data.insert("status".to_string(), serde_json::json!("CHECK_ERROR"));
    action.data.insert("reason".to_string(), serde_json::json!(reason));
}

fn set_check_ok(action: &mut Action, reason: &str) {
    action.data.insert("status".to_string(), serde_json::json!("CHECK_OK"));
    action.data.insert("reason".to_string(), serde_json::json!(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionCause;
    use crate::policy::health::NoopHealthControl;
    use crate::storage::MemoryStorage;
    use chrono::Utc;
    use std::sync::Arc;

    fn ctx(storage: Arc<dyn crate::storage::StorageAdapter>) -> PolicyContext {
        PolicyContext {
            storage,
            health: Arc::new(NoopHealthControl),
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn exceeds_maximum_is_check_error_without_best_effort() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let cluster = crate::model::Cluster::new("web", Uuid::new_v4(), 4, 1, 4, 3600, Utc::now());
        let cluster_id = cluster.id;
        storage.cluster_create(cluster).await.unwrap();

        let policy = ScalingPolicy::new(ScaleDirection::Out);
        let mut action = Action::new(
            "scale-out",
            cluster_id,
            "CLUSTER_SCALE_OUT",
            ActionCause::RpcRequest,
            3600,
            Utc::now(),
        );
        action
            .inputs
            .insert("adjustment".to_string(), serde_json::json!({"type": "CHANGE_IN_CAPACITY", "number": 3}));

        policy.pre_op(cluster_id, &mut action, &ctx(storage)).await.unwrap();
        assert_eq!(action.data.get("status").and_then(|v| v.as_str()), Some("CHECK_ERROR"));
        assert_eq!(
            action.data.get("reason").and_then(|v| v.as_str()),
            Some("Attempted scaling exceeds maximum size")
        );
    }

    #[tokio::test]
    async fn best_effort_clamps_instead_of_failing() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let cluster = crate::model::Cluster::new("web", Uuid::new_v4(), 4, 1, 4, 3600, Utc::now());
        let cluster_id = cluster.id;
        storage.cluster_create(cluster).await.unwrap();

        let policy = ScalingPolicy::new(ScaleDirection::Out);
        let mut action = Action::new(
            "scale-out",
            cluster_id,
            "CLUSTER_SCALE_OUT",
            ActionCause::RpcRequest,
            3600,
            Utc::now(),
        );
        action.inputs.insert(
            "adjustment".to_string(),
            serde_json::json!({"type": "CHANGE_IN_CAPACITY", "number": 3, "best_effort": true}),
        );

        policy.pre_op(cluster_id, &mut action, &ctx(storage)).await.unwrap();
        assert_eq!(action.data.get("status").and_then(|v| v.as_str()), Some("CHECK_OK"));
        assert_eq!(action.data.get("reason").and_then(|v| v.as_str()), Some("Do best effort scaling"));
        assert_eq!(action.data["creation"]["count"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn negative_count_is_always_check_error() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let cluster = crate::model::Cluster::new("web", Uuid::new_v4(), 2, 1, 4, 3600, Utc::now());
        let cluster_id = cluster.id;
        storage.cluster_create(cluster).await.unwrap();

        let policy = ScalingPolicy::new(ScaleDirection::Out);
        let mut action = Action::new(
            "scale-out",
            cluster_id,
            "CLUSTER_SCALE_OUT",
            ActionCause::RpcRequest,
            3600,
            Utc::now(),
        );
        action
            .inputs
            .insert("adjustment".to_string(), serde_json::json!({"type": "CHANGE_IN_CAPACITY", "number": -1}));

        policy.pre_op(cluster_id, &mut action, &ctx(storage)).await.unwrap();
        assert_eq!(action.data.get("status").and_then(|v| v.as_str()), Some("CHECK_ERROR"));
        assert_eq!(
            action.data.get("reason").and_then(|v| v.as_str()),
            Some("ScalingOutPolicy generates a negative count for scaling out operation.")
        );
    }
}
