//! Per-engine health manager (design notes §4.6).
//!
//! Owns the subset of [`crate::model::HealthRegistry`] rows claimed by this
//! engine and, for each, runs a background activity: a jittered polling
//! timer that issues `CLUSTER_CHECK`, or (conceptually) a lifecycle-event
//! subscription translated through [`lifecycle_event_reason`]. `register`,
//! `unregister`, `enable`, and `disable` implement [`HealthControl`] so the
//! health policy can drive this manager without depending on its dispatch
//! internals.

use crate::error::Result;
use crate::model::{CheckType, HealthRegistry};
use crate::policy::HealthControl;
use crate::storage::StorageAdapter;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The RPC boundary a health manager uses to turn a detected condition into
/// an action. Backed in-process by [`crate::engine::EngineHandle`].
#[async_trait]
pub trait ActionIssuer: Send + Sync {
    async fn cluster_check(&self, cluster_id: Uuid) -> Result<Uuid>;
    async fn node_recover(&self, node_id: Uuid, reason: &str) -> Result<Uuid>;
}

/// Verbatim event -> recovery-reason mapping read off VM lifecycle
/// notifications (design notes §4.6).
const EVENT_REASON_TABLE: &[(&str, &str)] = &[
    ("compute.instance.delete.end", "DELETE"),
    ("compute.instance.pause.end", "PAUSE"),
    ("compute.instance.power_off.end", "POWER_OFF"),
    ("compute.instance.rebuild.error", "REBUILD"),
    ("compute.instance.shutdown.end", "SHUTDOWN"),
    ("compute.instance.soft_delete.end", "SOFT_DELETE"),
];

pub fn lifecycle_event_reason(event_name: &str) -> Option<&'static str> {
    EVENT_REASON_TABLE
        .iter()
        .find(|(name, _)| *name == event_name)
        .map(|(_, reason)| *reason)
}

pub struct HealthManager {
    storage: Arc<dyn StorageAdapter>,
    issuer: Arc<dyn ActionIssuer>,
    periodic_interval_max_s: u64,
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl HealthManager {
    pub fn new(storage: Arc<dyn StorageAdapter>, issuer: Arc<dyn ActionIssuer>, periodic_interval_max_s: u64) -> Self {
        Self {
            storage,
            issuer,
            periodic_interval_max_s,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Claims unowned registry rows for `engine_id` and starts pollers for
    /// the ones this engine now owns.
    pub async fn claim_and_start(&self, engine_id: &str) -> Result<usize> {
        let claimed = self.storage.health_registry_claim(engine_id).await?;
        let n = claimed.len();
        for entry in claimed {
            if entry.enabled && matches!(entry.check_type, CheckType::NodeStatusPolling) {
                self.spawn_poller(entry.cluster_id, entry.interval_s);
            }
        }
        Ok(n)
    }

    pub async fn handle_lifecycle_event(&self, event_name: &str, node_id: Uuid) -> Result<()> {
        if let Some(reason) = lifecycle_event_reason(event_name) {
            self.issuer.node_recover(node_id, reason).await?;
        }
        Ok(())
    }

    fn spawn_poller(&self, cluster_id: Uuid, interval_s: u64) {
        let interval_s = interval_s.min(self.periodic_interval_max_s).max(1);
        let issuer = self.issuer.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_s));
            loop {
                ticker.tick().await;
                let _ = issuer.cluster_check(cluster_id).await;
            }
        });
        self.tasks.lock().insert(cluster_id, handle);
    }

    fn stop_poller(&self, cluster_id: Uuid) {
        if let Some(handle) = self.tasks.lock().remove(&cluster_id) {
            handle.abort();
        }
    }
}

#[async_trait]
impl HealthControl for HealthManager {
    async fn disable(&self, cluster_id: Uuid) -> Result<()> {
        if let Some(mut entry) = self.storage.health_registry_get(cluster_id).await? {
            entry.enabled = false;
            self.storage.health_registry_upsert(entry).await?;
        }
        self.stop_poller(cluster_id);
        Ok(())
    }

    async fn enable(&self, cluster_id: Uuid) -> Result<()> {
        if let Some(mut entry) = self.storage.health_registry_get(cluster_id).await? {
            entry.enabled = true;
            let interval_s = entry.interval_s;
            let check_type = entry.check_type;
            self.storage.health_registry_upsert(entry).await?;
            if matches!(check_type, CheckType::NodeStatusPolling) {
                self.spawn_poller(cluster_id, interval_s);
            }
        }
        Ok(())
    }

    async fn register(&self, cluster_id: Uuid, detection_type: &str, interval_s: u64) -> Result<()> {
        let check_type = if detection_type == "VM_LIFECYCLE_EVENTS" {
            CheckType::LifecycleEvents
        } else {
            CheckType::NodeStatusPolling
        };
        let entry = HealthRegistry::new(cluster_id, check_type, interval_s);
        self.storage.health_registry_upsert(entry).await?;
        if matches!(check_type, CheckType::NodeStatusPolling) {
            self.spawn_poller(cluster_id, interval_s);
        }
        Ok(())
    }

    async fn unregister(&self, cluster_id: Uuid) -> Result<()> {
        self.storage.health_registry_remove(cluster_id).await?;
        self.stop_poller(cluster_id);
        Ok(())
    }
}

impl Drop for HealthManager {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use parking_lot::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingIssuer {
        recovered: StdMutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl ActionIssuer for RecordingIssuer {
        async fn cluster_check(&self, _cluster_id: Uuid) -> Result<Uuid> {
            Ok(Uuid::new_v4())
        }
        async fn node_recover(&self, node_id: Uuid, reason: &str) -> Result<Uuid> {
            self.recovered.lock().push((node_id, reason.to_string()));
            Ok(Uuid::new_v4())
        }
    }

    #[test]
    fn lifecycle_table_maps_known_events() {
        assert_eq!(lifecycle_event_reason("compute.instance.delete.end"), Some("DELETE"));
        assert_eq!(lifecycle_event_reason("compute.instance.rebuild.error"), Some("REBUILD"));
        assert_eq!(lifecycle_event_reason("compute.instance.unrelated"), None);
    }

    #[tokio::test]
    async fn unknown_event_does_not_issue_recovery() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let issuer = Arc::new(RecordingIssuer::default());
        let manager = HealthManager::new(storage, issuer.clone(), 3600);
        manager.handle_lifecycle_event("compute.instance.unrelated", Uuid::new_v4()).await.unwrap();
        assert!(issuer.recovered.lock().is_empty());
    }

    #[tokio::test]
    async fn known_event_issues_node_recover_with_mapped_reason() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let issuer = Arc::new(RecordingIssuer::default());
        let manager = HealthManager::new(storage, issuer.clone(), 3600);
        let node_id = Uuid::new_v4();
        manager.handle_lifecycle_event("compute.instance.pause.end", node_id).await.unwrap();
        assert_eq!(issuer.recovered.lock().as_slice(), [(node_id, "PAUSE".to_string())]);
    }

    #[tokio::test]
    async fn register_then_disable_stops_tracking_enabled_flag() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let issuer = Arc::new(RecordingIssuer::default());
        let manager = HealthManager::new(storage.clone(), issuer, 3600);
        let cluster_id = Uuid::new_v4();
        manager.register(cluster_id, "NODE_STATUS_POLLING", 60).await.unwrap();
        manager.disable(cluster_id).await.unwrap();
        let entry = storage.health_registry_get(cluster_id).await.unwrap().unwrap();
        assert!(!entry.enabled);
    }
}
