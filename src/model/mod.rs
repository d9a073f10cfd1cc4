//! The persisted data model (design notes §3).

pub mod action;
pub mod cluster;
pub mod event;
pub mod health_registry;
pub mod lock;
pub mod node;
pub mod policy;
pub mod profile;

pub use action::{Action, ActionCause, ActionResult, ActionSignal, ActionStatus};
pub use cluster::{Cluster, ClusterStatus};
pub use event::{Event, EventLevel};
pub use health_registry::{CheckType, HealthRegistry};
pub use lock::{LockScope, LockSemantics};
pub use node::{Node, NodeStatus};
pub use policy::{ClusterPolicyBinding, Policy};
pub use profile::Profile;

use serde_json::{Map, Value};

pub type DataMap = Map<String, Value>;
