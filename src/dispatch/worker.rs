//! A single worker's view of one claimed action: run it to a terminal
//! state (or back to `READY` on a retryable condition) and log the outcome.

use crate::action::{self, ExecutionContext};
use crate::error::Result;
use crate::model::ActionResult;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn run_one(ctx: &ExecutionContext, action_id: Uuid) -> Result<()> {
    match action::run(ctx, action_id).await? {
        ActionResult::Ok => info!("action {action_id} succeeded"),
        ActionResult::Error => warn!("action {action_id} failed"),
        ActionResult::Retry => info!("action {action_id} abandoned for retry"),
        ActionResult::Cancel => info!("action {action_id} cancelled"),
        ActionResult::Timeout => warn!("action {action_id} timed out"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::Config;
    use crate::lock::LockManager;
    use crate::model::{Action, ActionCause, ActionStatus, Cluster, DataMap, Profile};
    use crate::policy::health::NoopHealthControl;
    use crate::policy::PolicyRegistry;
    use crate::profile::{NullDriver, ProfileRegistry};
    use crate::storage::{MemoryStorage, StorageAdapter};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn run_one_drives_a_cluster_create_to_success() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let locks = Arc::new(LockManager::new(storage.clone(), 600));
        let mut profiles = ProfileRegistry::new();
        profiles.register(Arc::new(NullDriver::new("os.nova.server")));
        let ctx = ExecutionContext {
            storage: storage.clone(),
            locks,
            profiles: Arc::new(profiles),
            policies: Arc::new(PolicyRegistry::new()),
            health: Arc::new(NoopHealthControl),
            config: Arc::new(Config::default()),
            clock: Arc::new(FakeClock::new(Utc::now())),
        };

        let profile = Profile::new("web", "os.nova.server", DataMap::new(), ctx.now());
        let profile_id = storage.profile_create(profile).await.unwrap();
        let cluster = Cluster::new("web", profile_id, 1, 0, 2, 3600, ctx.now());
        let cluster_id = storage.cluster_create(cluster).await.unwrap();
        let action = Action::new("create", cluster_id, "CLUSTER_CREATE", ActionCause::RpcRequest, 3600, ctx.now());
        let action_id = action.id;
        storage.action_create(action).await.unwrap();
        storage.action_acquire_first_ready("engine-1", ctx.now()).await.unwrap();

        run_one(&ctx, action_id).await.unwrap();
        let action = storage.action_get(action_id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Succeeded);
    }
}
