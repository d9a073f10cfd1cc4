use super::DataMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Init,
    Active,
    Creating,
    Updating,
    Deleting,
    Error,
    Warning,
    Recovering,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub physical_id: Option<String>,
    pub cluster_id: Option<Uuid>,
    pub profile_id: Uuid,
    /// -1 if orphan (no cluster_id).
    pub index: i64,
    pub role: String,
    pub init_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: NodeStatus,
    pub status_reason: String,
    pub metadata: DataMap,
    pub data: DataMap,
}

impl Node {
    pub fn new_orphan(name: impl Into<String>, profile_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            physical_id: None,
            cluster_id: None,
            profile_id,
            index: -1,
            role: String::new(),
            init_at: now,
            created_at: None,
            updated_at: None,
            status: NodeStatus::Init,
            status_reason: "Initializing".to_string(),
            metadata: DataMap::new(),
            data: DataMap::new(),
        }
    }

    pub fn new_member(
        name: impl Into<String>,
        profile_id: Uuid,
        cluster_id: Uuid,
        index: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut n = Self::new_orphan(name, profile_id, now);
        n.cluster_id = Some(cluster_id);
        n.index = index;
        n
    }

    pub fn set_status(&mut self, status: NodeStatus, reason: impl Into<String>, now: DateTime<Utc>) {
        if matches!(self.status, NodeStatus::Creating) && matches!(status, NodeStatus::Active) {
            self.created_at = Some(now);
        }
        if matches!(self.status, NodeStatus::Updating | NodeStatus::Recovering)
            && matches!(status, NodeStatus::Active)
        {
            self.updated_at = Some(now);
        }
        self.status = status;
        self.status_reason = reason.into();
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, NodeStatus::Active)
    }

    pub fn is_creating(&self) -> bool {
        matches!(self.status, NodeStatus::Creating)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, NodeStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_member_has_cluster_and_index() {
        let cid = Uuid::new_v4();
        let n = Node::new_member("node-1", Uuid::new_v4(), cid, 1, Utc::now());
        assert_eq!(n.cluster_id, Some(cid));
        assert_eq!(n.index, 1);
        assert_eq!(n.status, NodeStatus::Init);
    }

    #[test]
    fn orphan_has_no_cluster_and_negative_index() {
        let n = Node::new_orphan("spare", Uuid::new_v4(), Utc::now());
        assert!(n.cluster_id.is_none());
        assert_eq!(n.index, -1);
    }
}
