//! Per-engine dispatch loop: long-polls the ready queue and hands each
//! claimed action to a bounded worker pool.
//!
//! Grounded on the teacher's actor-system supervisor loop
//! (`tokio::select!` racing a shutdown broadcast against work, one
//! `tokio::spawn` per unit of concurrency) adapted from a mailbox-per-actor
//! model to a poll-and-execute one: there is no named actor here, only "one
//! ready action, one spawned task", bounded by a `Semaphore` instead of a
//! mailbox queue depth.

pub mod worker;

use crate::action::ExecutionContext;
use crate::error::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub struct Dispatcher {
    ctx: ExecutionContext,
    engine_id: String,
    concurrency: Arc<Semaphore>,
    poll_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl Dispatcher {
    pub fn new(ctx: ExecutionContext, engine_id: impl Into<String>, workers: usize, poll_interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx,
            engine_id: engine_id.into(),
            concurrency: Arc::new(Semaphore::new(workers.max(1))),
            poll_interval,
            shutdown_tx,
        }
    }

    /// Spawns the long-poll loop and returns its join handle. The loop exits
    /// once every [`Dispatcher::shutdown`] receiver has fired and all
    /// in-flight worker tasks have finished.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut in_flight = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!("dispatcher {} received shutdown", self.engine_id);
                    break;
                }
                claimed = self.ctx.storage.action_acquire_first_ready(&self.engine_id, self.ctx.now()) => {
                    match claimed {
                        Ok(action) => {
                            let permit = self.concurrency.clone().acquire_owned().await.expect("semaphore not closed");
                            let ctx = self.ctx.clone();
                            let action_id = action.id;
                            in_flight.push(tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = worker::run_one(&ctx, action_id).await {
                                    error!("action {action_id} worker error: {e}");
                                }
                            }));
                            in_flight.retain(|h: &JoinHandle<()>| !h.is_finished());
                        }
                        Err(EngineError::NotFound(_)) => {
                            tokio::time::sleep(self.poll_interval).await;
                        }
                        Err(e) => {
                            warn!("dispatcher {} poll error: {e}", self.engine_id);
                            tokio::time::sleep(self.poll_interval).await;
                        }
                    }
                }
            }
        }
        for handle in in_flight {
            let _ = handle.await;
        }
    }
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
    use std::time::Duration as StdDuration;

    fn test_ctx() -> ExecutionContext {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let locks = Arc::new(LockManager::new(storage.clone(), 600));
        let mut profiles = ProfileRegistry::new();
        profiles.register(Arc::new(NullDriver::new("os.nova.server")));
        ExecutionContext {
            storage,
            locks,
            profiles: Arc::new(profiles),
            policies: Arc::new(PolicyRegistry::new()),
            health: Arc::new(NoopHealthControl),
            config: Arc::new(Config::default()),
            clock: Arc::new(FakeClock::new(Utc::now())),
        }
    }

    #[tokio::test]
    async fn dispatches_a_single_ready_action_to_completion() {
        let ctx = test_ctx();
        let profile = Profile::new("web", "os.nova.server", DataMap::new(), ctx.now());
        let profile_id = ctx.storage.profile_create(profile).await.unwrap();
        let cluster = Cluster::new("web", profile_id, 0, 0, 2, 3600, ctx.now());
        let cluster_id = ctx.storage.cluster_create(cluster).await.unwrap();
        let action = Action::new("create", cluster_id, "CLUSTER_CREATE", ActionCause::RpcRequest, 3600, ctx.now());
        let action_id = action.id;
        ctx.storage.action_create(action).await.unwrap();

        let dispatcher = Arc::new(Dispatcher::new(ctx.clone(), "engine-1", 2, StdDuration::from_millis(5)));
        let handle = dispatcher.clone().spawn();

        let mut attempts = 0;
        loop {
            let a = ctx.storage.action_get(action_id).await.unwrap();
            if a.status.is_terminal() || attempts > 200 {
                assert_eq!(a.status, ActionStatus::Succeeded);
                break;
            }
            attempts += 1;
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }

        dispatcher.shutdown();
        handle.await.unwrap();
    }
}
