//! API routes and handlers
//!
//! Every route is mounted under `/api/v1` by the binary.

use axum::{routing::get, Router};

use crate::AppState;

mod health;
mod servers;
mod tasks;

pub use health::*;

/// All API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check endpoints
        .route("/health", get(health::health_check))
        .route("/health/detailed", get(health::health_check_detailed))
        .route("/health/ready", get(health::readiness))
        // Backup tasks
        .nest("/tasks", tasks::routes())
        // Remote servers
        .nest("/servers", servers::routes())
}
