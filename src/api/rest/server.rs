//! Router assembly and the `axum::serve` entry point (design notes §6).

use super::handlers;
use super::types::ApiConfig;
use crate::engine::EngineHandle;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub struct RestApiServer {
    config: ApiConfig,
    engine: Arc<EngineHandle>,
}

impl RestApiServer {
    pub fn new(config: ApiConfig, engine: Arc<EngineHandle>) -> Self {
        Self { config, engine }
    }

    fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/healthz", get(handlers::health_check))
            .route("/clusters", get(handlers::list_clusters).post(handlers::create_cluster))
            .route(
                "/clusters/{id}",
                get(handlers::get_cluster).patch(handlers::update_cluster).delete(handlers::delete_cluster),
            )
            .route("/clusters/{id}/actions", post(handlers::cluster_action))
            .route("/clusters/{id}/nodes", get(handlers::list_nodes))
            .route("/clusters/{id}/cluster-policies", get(handlers::list_cluster_policies))
            .route("/nodes/{id}", get(handlers::get_node))
            .route("/profiles", get(handlers::list_profiles).post(handlers::create_profile))
            .route("/profiles/{id}", get(handlers::get_profile))
            .route("/policies", get(handlers::list_policies).post(handlers::create_policy))
            .route("/policies/{id}", get(handlers::get_policy))
            .route("/actions/{id}", get(handlers::get_action))
            .route("/events/{obj_id}", get(handlers::list_events))
            .with_state(self.engine.clone())
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)));

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }

    pub async fn run(&self) -> crate::error::Result<()> {
        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| crate::error::EngineError::Io(format!("failed to bind {}: {e}", self.config.listen_addr)))?;
        tracing::info!("REST API server listening on {}", self.config.listen_addr);
        axum::serve(listener, router)
            .await
            .map_err(|e| crate::error::EngineError::Internal(format!("server error: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::policy::{PolicyRegistry, ScaleDirection, ScalingPolicy};
    use crate::profile::{NullDriver, ProfileRegistry};
    use crate::storage::MemoryStorage;

    #[test]
    fn build_router_does_not_panic() {
        let storage: Arc<dyn crate::storage::StorageAdapter> = Arc::new(MemoryStorage::new());
        let mut profiles = ProfileRegistry::new();
        profiles.register(Arc::new(NullDriver::new("os.nova.server")));
        let mut policies = PolicyRegistry::new();
        policies.register(Arc::new(ScalingPolicy::new(ScaleDirection::Out)));
        let engine = EngineHandle::new(storage, profiles, policies, Config::default(), "engine-test");
        let server = RestApiServer::new(ApiConfig::default(), engine);
        let _router = server.build_router();
    }
}
