//! REST v1 surface (design notes §6): a thin, shape-correct HTTP veneer
//! over [`crate::engine::EngineHandle`].

pub mod handlers;
pub mod server;
pub mod types;

pub use server::RestApiServer;
pub use types::{ApiConfig, ApiError, ApiResult};
