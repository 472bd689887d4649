//! xray-http: HTTP/JSON surface for the record store
//!
//! Architecture:
//! ```text
//! xray-service binary
//!     └── xray-http (this crate)
//!         ├── Middleware stack (CORS, tracing, timeout, compression, request log)
//!         ├── Error counting (prometheus)
//!         └── Router
//!             ├── /api/executions/*   → handlers::executions
//!             ├── /api/steps/*        → handlers::steps
//!             ├── /api/health         → handlers::health
//!             └── /metrics            → handlers::metrics
//! ```
//!
//! Every handler goes through `AppState::store`, an `Arc<dyn RecordStore>`,
//! so the router serves any backend.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use metrics::ApiMetrics;
pub use middleware::{MiddlewareConfig, MiddlewareStack};
pub use router::create_router;
pub use server::{HttpServer, HttpServerBuilder, ServerConfig};
pub use state::AppState;

// Re-export axum for callers composing their own routers
pub use axum;

/// Error types for the HTTP server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Server binding error: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
