//! Action lifecycle execution: polymorphic dispatch by verb prefix onto the
//! cluster/node executors (design notes §4.3, §4.4, §9).

pub mod cluster;
pub mod node;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::lock::LockManager;
use crate::model::{ActionResult, ActionSignal};
use crate::policy::{HealthControl, PolicyRegistry};
use crate::profile::ProfileRegistry;
use crate::storage::StorageAdapter;
use std::sync::Arc;
use uuid::Uuid;

/// The verb family an action belongs to, used to pick an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Cluster,
    Node,
    Custom(String),
}

/// Classifies `verb` by its prefix: `CLUSTER_CREATE` -> [`ActionKind::Cluster`],
/// `NODE_CREATE` -> [`ActionKind::Node`], anything else -> `Custom`.
pub fn classify(verb: &str) -> ActionKind {
    match verb.split('_').next().unwrap_or("") {
        "CLUSTER" => ActionKind::Cluster,
        "NODE" => ActionKind::Node,
        _ => ActionKind::Custom(verb.to_string()),
    }
}

/// Everything an executor needs: storage, locking, the profile and policy
/// registries, the health-control handle the policy pipeline drives, a
/// config snapshot, and a clock (fakeable in tests).
#[derive(Clone)]
pub struct ExecutionContext {
    pub storage: Arc<dyn StorageAdapter>,
    pub locks: Arc<LockManager>,
    pub profiles: Arc<ProfileRegistry>,
    pub policies: Arc<PolicyRegistry>,
    pub health: Arc<dyn HealthControl>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
}

impl ExecutionContext {
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

/// Cooperative yield point, called at every child-spawn/completion-wait
/// boundary and before dispatch. Re-checks `action_id`'s timeout and any
/// pending signal: a `CANCEL` or a blown timeout resolve immediately; a
/// `SUSPEND` signal parks here (the action's own row is marked `SUSPENDED`
/// for visibility) until `RESUME` arrives, re-checking timeout on every
/// wakeup. Returns `None` when there is nothing to unwind for.
pub async fn checkpoint(ctx: &ExecutionContext, action_id: Uuid) -> Result<Option<ActionResult>> {
    loop {
        let action = ctx.storage.action_get(action_id).await?;
        if action.is_timeout(ctx.now()) {
            return Ok(Some(ActionResult::Timeout));
        }
        match ctx.storage.action_signal_query(action_id).await? {
            Some(ActionSignal::Cancel) => return Ok(Some(ActionResult::Cancel)),
            Some(ActionSignal::Suspend) => {
                if action.status != crate::model::ActionStatus::Suspended {
                    ctx.storage.action_mark_suspended(action_id, ctx.now()).await?;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            Some(ActionSignal::Resume) | None => {
                if action.status == crate::model::ActionStatus::Suspended {
                    ctx.storage.action_mark_running(action_id, ctx.now()).await?;
                }
                return Ok(None);
            }
        }
    }
}

/// Runs `action_id` to a terminal status: loads the action (already
/// `RUNNING`, set by `action_acquire_first_ready`), classifies its verb,
/// invokes the matching executor, and performs the terminal storage update.
/// Never lets an executor error escape uncaught — it is converted to a
/// `FAILED` transition with the error's message as the reason, per §7's
/// propagation policy.
pub async fn run(ctx: &ExecutionContext, action_id: Uuid) -> Result<ActionResult> {
    if let Some(outcome) = checkpoint(ctx, action_id).await? {
        return match outcome {
            ActionResult::Cancel => {
                ctx.storage.action_mark_cancelled(action_id, ctx.now()).await?;
                Ok(ActionResult::Cancel)
            }
            ActionResult::Timeout => {
                ctx.storage.action_mark_failed(action_id, ctx.now(), "TIMEOUT").await?;
                Ok(ActionResult::Timeout)
            }
            _ => unreachable!("checkpoint only ever resolves Cancel or Timeout"),
        };
    }
    let action = ctx.storage.action_get(action_id).await?;

    let outcome = match classify(&action.action) {
        ActionKind::Cluster => cluster::execute(ctx, action_id).await,
        ActionKind::Node => node::execute(ctx, action_id).await,
        ActionKind::Custom(verb) => Err(EngineError::Validation(format!("no executor registered for {verb}"))),
    };

    match outcome {
        Ok(()) => {
            ctx.storage.action_mark_succeeded(action_id, ctx.now()).await?;
            Ok(ActionResult::Ok)
        }
        Err(EngineError::Retry(_)) => {
            ctx.storage.action_abandon(action_id).await?;
            Ok(ActionResult::Retry)
        }
        Err(EngineError::Cancelled(reason)) => {
            ctx.storage.action_mark_cancelled(action_id, ctx.now()).await?;
            let _ = reason;
            Ok(ActionResult::Cancel)
        }
        Err(e) => {
            ctx.storage.action_mark_failed(action_id, ctx.now(), &e.to_string()).await?;
            Ok(ActionResult::Error)
        }
    }
}
