use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use session_protocol::{AccountCreated, AccountId, CreateSessionRequest, SessionCreated};

use crate::domains::sessions::{create_account, create_session};
use crate::kernel::BaseSessionStore;
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

pub async fn create_account_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
) -> Result<(StatusCode, Json<AccountCreated>), ApiError> {
    let id = create_account(&state.deps).await?;
    Ok((StatusCode::CREATED, Json(AccountCreated { id })))
}

pub async fn create_session_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path(account_id): Path<AccountId>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionCreated>), ApiError> {
    let metadata = body.map(|Json(req)| req.metadata).unwrap_or_default();
    let created = create_session(&state.deps, account_id, metadata).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
