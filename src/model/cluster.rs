use super::DataMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle states a cluster can occupy between creation and deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    Init,
    Active,
    Creating,
    Updating,
    Resizing,
    Deleting,
    Checking,
    Recovering,
    Critical,
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub profile_id: Uuid,
    pub user: String,
    pub project: String,
    pub domain: String,
    pub init_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub min_size: i64,
    /// -1 means unbounded.
    pub max_size: i64,
    pub desired_capacity: i64,
    pub next_index: i64,
    pub timeout_s: u64,
    pub status: ClusterStatus,
    pub status_reason: String,
    pub metadata: DataMap,
    pub data: DataMap,
}

impl Cluster {
    pub fn new(
        name: impl Into<String>,
        profile_id: Uuid,
        desired_capacity: i64,
        min_size: i64,
        max_size: i64,
        timeout_s: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            profile_id,
            user: String::new(),
            project: String::new(),
            domain: String::new(),
            init_at: now,
            created_at: None,
            updated_at: None,
            min_size,
            max_size,
            desired_capacity,
            next_index: 1,
            timeout_s,
            status: ClusterStatus::Init,
            status_reason: "Initializing".to_string(),
            metadata: DataMap::new(),
            data: DataMap::new(),
        }
    }

    /// `min_size <= desired_capacity` and (`max_size == -1` or `desired_capacity <= max_size`).
    pub fn invariants_hold(&self) -> bool {
        self.min_size <= self.desired_capacity
            && (self.max_size == -1 || self.desired_capacity <= self.max_size)
    }

    pub fn clamp_capacity(&self, candidate: i64) -> i64 {
        let floor = candidate.max(self.min_size);
        if self.max_size == -1 {
            floor
        } else {
            floor.min(self.max_size)
        }
    }

    pub fn set_status(&mut self, status: ClusterStatus, reason: impl Into<String>, now: DateTime<Utc>) {
        use ClusterStatus::*;
        if matches!(self.status, Creating) && matches!(status, Active) {
            self.created_at = Some(now);
        }
        if matches!(self.status, Updating | Resizing) && matches!(status, Active) {
            self.updated_at = Some(now);
        }
        self.status = status;
        self.status_reason = reason.into();
    }

    pub fn take_next_index(&mut self) -> i64 {
        let idx = self.next_index;
        self.next_index += 1;
        idx
    }

    /// Placement distribution helpers (supplemental, §4.4), read-only queries
    /// over a cluster's current node set keyed on each node's
    /// `data["placement"]` map.
    pub fn zone_distribution(nodes: &[&super::Node]) -> HashMap<String, usize> {
        distribution(nodes, "zone")
    }

    pub fn region_distribution(nodes: &[&super::Node]) -> HashMap<String, usize> {
        distribution(nodes, "region")
    }

    pub fn nodes_by_zone<'a>(nodes: &[&'a super::Node], zone: &str) -> Vec<&'a super::Node> {
        nodes_matching(nodes, "zone", zone)
    }

    pub fn nodes_by_region<'a>(nodes: &[&'a super::Node], region: &str) -> Vec<&'a super::Node> {
        nodes_matching(nodes, "region", region)
    }
}

fn distribution(nodes: &[&super::Node], key: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for node in nodes {
        if let Some(placement) = node.data.get("placement").and_then(|v| v.as_object()) {
            if let Some(v) = placement.get(key).and_then(|v| v.as_str()) {
                *counts.entry(v.to_string()).or_insert(0) += 1;
            }
        }
    }
    counts
}

fn nodes_matching<'a>(nodes: &[&'a super::Node], key: &str, value: &str) -> Vec<&'a super::Node> {
    nodes
        .iter()
        .filter(|n| {
            n.data
                .get("placement")
                .and_then(|v| v.as_object())
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                == Some(value)
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn new_cluster_satisfies_invariants() {
        let c = Cluster::new("web", Uuid::new_v4(), 2, 1, 4, 3600, now());
        assert!(c.invariants_hold());
        assert_eq!(c.status, ClusterStatus::Init);
    }

    #[test]
    fn clamp_respects_unbounded_max() {
        let c = Cluster::new("web", Uuid::new_v4(), 2, 1, -1, 3600, now());
        assert_eq!(c.clamp_capacity(1000), 1000);
        assert_eq!(c.clamp_capacity(-5), 1);
    }

    #[test]
    fn set_status_stamps_created_at_on_create_completion() {
        let mut c = Cluster::new("web", Uuid::new_v4(), 2, 1, 4, 3600, now());
        c.set_status(ClusterStatus::Creating, "creating", now());
        assert!(c.created_at.is_none());
        let t = now();
        c.set_status(ClusterStatus::Active, "created", t);
        assert_eq!(c.created_at, Some(t));
    }

    #[test]
    fn take_next_index_is_monotonic() {
        let mut c = Cluster::new("web", Uuid::new_v4(), 2, 1, 4, 3600, now());
        assert_eq!(c.take_next_index(), 1);
        assert_eq!(c.take_next_index(), 2);
        assert_eq!(c.next_index, 3);
    }
}
