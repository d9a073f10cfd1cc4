//! Server entry point: load config, wire up the engine, start the
//! dispatcher and health manager, and serve the REST v1 surface until a
//! shutdown signal arrives (design notes §6).

use clustered_engine::api::{ApiConfig, RestApiServer};
use clustered_engine::config::Config;
use clustered_engine::engine::EngineHandle;
use clustered_engine::policy::placement::PlacementDimension;
use clustered_engine::policy::{HealthPolicy, LoadBalancePolicy, PlacementPolicy, PolicyRegistry, ScaleDirection, ScalingPolicy};
use clustered_engine::profile::{NullDriver, ProfileRegistry};
use clustered_engine::storage::MemoryStorage;
use std::sync::Arc;

#[tokio::main]
async fn main() -> clustered_engine::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config = Config::from_env();
    let engine_id = std::env::var("ENGINE_ID").unwrap_or_else(|_| "engine-1".to_string());

    let storage: Arc<dyn clustered_engine::storage::StorageAdapter> = Arc::new(MemoryStorage::new());

    let mut profiles = ProfileRegistry::new();
    profiles.register(Arc::new(NullDriver::new("os.nova.server")));
    profiles.register(Arc::new(NullDriver::new("os.heat.stack")));

    let mut policies = PolicyRegistry::new();
    policies.register(Arc::new(ScalingPolicy::new(ScaleDirection::Out)));
    policies.register(Arc::new(ScalingPolicy::new(ScaleDirection::In)));
    policies.register(Arc::new(PlacementPolicy::new(PlacementDimension::Zone, Vec::new())));
    policies.register(Arc::new(LoadBalancePolicy::new()));
    policies.register(Arc::new(HealthPolicy::new()));

    let engine = EngineHandle::new(storage, profiles, policies, config.clone(), engine_id);
    engine.start().await?;

    let api_config = ApiConfig { listen_addr: config.listen_addr.clone(), ..ApiConfig::default() };
    let server = RestApiServer::new(api_config, engine.clone());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!("REST server exited: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    engine.shutdown();
    Ok(())
}
