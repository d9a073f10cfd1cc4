//! Affinity / zone / region placement policy (design notes §4.5).
//!
//! Runs BEFORE node-producing verbs and writes `action.data['placement']`
//! with a `{zone?, region?}` hint per new member, preferring whichever zone
//! or region is currently least populated.

use super::{PolicyContext, PolicyType, PolicyWhen};
use crate::error::Result;
use crate::model::{Action, Cluster};
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementDimension {
    Zone,
    Region,
}

pub struct PlacementPolicy {
    dimension: PlacementDimension,
    candidates: Vec<String>,
}

impl PlacementPolicy {
    pub fn new(dimension: PlacementDimension, candidates: Vec<String>) -> Self {
        Self { dimension, candidates }
    }

    fn key(&self) -> &'static str {
        match self.dimension {
            PlacementDimension::Zone => "zone",
            PlacementDimension::Region => "region",
        }
    }
}

#[async_trait]
impl PolicyType for PlacementPolicy {
    fn policy_type(&self) -> &str {
        match self.dimension {
            PlacementDimension::Zone => "senlin.policy.zone_placement",
            PlacementDimension::Region => "senlin.policy.region_placement",
        }
    }

    fn priority(&self) -> i32 {
        400
    }

    fn singleton(&self) -> bool {
        false
    }

    fn target(&self) -> &[(PolicyWhen, &'static str)] {
        static TARGET: &[(PolicyWhen, &str)] = &[
            (PolicyWhen::Before, "CLUSTER_CREATE"),
            (PolicyWhen::Before, "CLUSTER_RESIZE"),
            (PolicyWhen::Before, "CLUSTER_SCALE_OUT"),
            (PolicyWhen::Before, "CLUSTER_ADD_NODES"),
        ];
        TARGET
    }

    async fn pre_op(&self, cluster_id: Uuid, action: &mut Action, ctx: &PolicyContext) -> Result<()> {
        if self.candidates.is_empty() {
            return Ok(());
        }
        let count = match action.data.get("creation").and_then(|c| c.get("count")).and_then(|c| c.as_i64()) {
            Some(count) => count,
            // ScalingPolicy only resolves `data["creation"]["count"]` for
            // CLUSTER_SCALE_OUT/CLUSTER_RESIZE; for the other two target
            // verbs fall back to a count derived from the action itself.
            None => match action.action.as_str() {
                "CLUSTER_CREATE" => ctx.storage.cluster_get(cluster_id).await?.desired_capacity,
                "CLUSTER_ADD_NODES" => action
                    .inputs
                    .get("node_ids")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.len() as i64)
                    .unwrap_or(0),
                _ => 0,
            },
        };
        if count <= 0 {
            return Ok(());
        }

        let nodes = ctx.cluster_nodes(cluster_id).await?;
        let node_refs: Vec<&crate::model::Node> = nodes.iter().collect();
        let mut counts = match self.dimension {
            PlacementDimension::Zone => Cluster::zone_distribution(&node_refs),
            PlacementDimension::Region => Cluster::region_distribution(&node_refs),
        };
        for candidate in &self.candidates {
            counts.entry(candidate.clone()).or_insert(0);
        }

        let mut placements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let pick = self
                .candidates
                .iter()
                .min_by_key(|c| counts.get(*c).copied().unwrap_or(0))
                .cloned()
                .expect("candidates non-empty");
            *counts.entry(pick.clone()).or_insert(0) += 1;
            placements.push(serde_json::json!({ self.key(): pick }));
        }

        action.data.insert(
            "placement".to_string(),
            serde_json::json!({ "count": count, "placements": placements }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionCause, Node};
    use crate::policy::health::NoopHealthControl;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[tokio::test]
    async fn prefers_least_populated_zone() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let cluster_id = Uuid::new_v4();
        let mut crowded = Node::new_orphan("n1", Uuid::new_v4(), chrono::Utc::now());
        crowded.cluster_id = Some(cluster_id);
        crowded.data.insert("placement".to_string(), serde_json::json!({"zone": "az1"}));
        storage.node_create(crowded).await.unwrap();

        let ctx = PolicyContext {
            storage: storage.clone(),
            health: Arc::new(NoopHealthControl),
            now: chrono::Utc::now(),
        };
        let policy = PlacementPolicy::new(PlacementDimension::Zone, vec!["az1".into(), "az2".into()]);
        let mut action = Action::new(
            "create",
            cluster_id,
            "CLUSTER_CREATE",
            ActionCause::RpcRequest,
            3600,
            chrono::Utc::now(),
        );
        action.data.insert("creation".to_string(), serde_json::json!({"count": 1}));

        policy.pre_op(cluster_id, &mut action, &ctx).await.unwrap();
        let placements = action.data["placement"]["placements"].as_array().unwrap();
        assert_eq!(placements[0]["zone"], serde_json::json!("az2"));
    }

    #[tokio::test]
    async fn cluster_create_without_creation_count_falls_back_to_desired_capacity() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let cluster = crate::model::Cluster::new("web", Uuid::new_v4(), 2, 1, 4, 3600, chrono::Utc::now());
        let cluster_id = cluster.id;
        storage.cluster_create(cluster).await.unwrap();

        let ctx = PolicyContext {
            storage: storage.clone(),
            health: Arc::new(NoopHealthControl),
            now: chrono::Utc::now(),
        };
        let policy = PlacementPolicy::new(PlacementDimension::Zone, vec!["az1".into(), "az2".into()]);
        let mut action = Action::new(
            "create",
            cluster_id,
            "CLUSTER_CREATE",
            ActionCause::RpcRequest,
            3600,
            chrono::Utc::now(),
        );

        policy.pre_op(cluster_id, &mut action, &ctx).await.unwrap();
        let placements = action.data["placement"]["placements"].as_array().unwrap();
        assert_eq!(placements.len(), 2);
    }

    #[tokio::test]
    async fn cluster_add_nodes_counts_from_node_ids() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let cluster_id = Uuid::new_v4();
        let ctx = PolicyContext {
            storage: storage.clone(),
            health: Arc::new(NoopHealthControl),
            now: chrono::Utc::now(),
        };
        let policy = PlacementPolicy::new(PlacementDimension::Zone, vec!["az1".into(), "az2".into()]);
        let mut action = Action::new(
            "add-nodes",
            cluster_id,
            "CLUSTER_ADD_NODES",
            ActionCause::RpcRequest,
            3600,
            chrono::Utc::now(),
        );
        action.inputs.insert(
            "node_ids".to_string(),
            serde_json::json!([Uuid::new_v4().to_string(), Uuid::new_v4().to_string()]),
        );

        policy.pre_op(cluster_id, &mut action, &ctx).await.unwrap();
        let placements = action.data["placement"]["placements"].as_array().unwrap();
        assert_eq!(placements.len(), 2);
    }
}
