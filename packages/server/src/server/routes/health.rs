use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::BaseSessionStore;
use crate::server::app::AxumAppState;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Ok,
    Error,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: ComponentHealth,
}

/// Health check endpoint
///
/// 200 when the store answers a ping in time, 503 otherwise.
pub async fn health_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match tokio::time::timeout(PING_TIMEOUT, state.deps.storage.ping()).await {
        Ok(Ok(())) => ComponentHealth {
            status: ComponentStatus::Ok,
            error: None,
        },
        Ok(Err(e)) => ComponentHealth {
            status: ComponentStatus::Error,
            error: Some(format!("ping failed: {e}")),
        },
        Err(_) => ComponentHealth {
            status: ComponentStatus::Error,
            error: Some(format!("ping timed out after {}s", PING_TIMEOUT.as_secs())),
        },
    };

    let (code, status) = match database.status {
        ComponentStatus::Ok => (StatusCode::OK, "healthy"),
        ComponentStatus::Error => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };
    (code, Json(HealthResponse { status, database }))
}
