// Library entry point for tests and the binary

pub mod api_docs;
pub mod app;
pub mod auth;
pub mod budget_monitor;
pub mod config;
pub mod error;
pub mod handlers;
pub mod provider_registry;
pub mod routes;
pub mod scheduler;
pub mod setup;
pub mod simple_logger;
pub mod sync;

// Re-export commonly used types
pub use app::AppState;
pub use error::{ApiError, ApiResult};
