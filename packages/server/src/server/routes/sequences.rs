//! Sequence allocation endpoint.
//!
//! POST /v1/scopes/:kind/:id/sequences
//!
//! Without `count` the response is `{ "seq": n }`; with `count` it is the
//! allocated range `{ "start": s, "count": c }`.

use axum::{
    extract::{Extension, Path},
    Json,
};
use session_protocol::{AllocateRequest, AllocateResponse, ScopeKey, ScopeKind};
use uuid::Uuid;

use crate::kernel::BaseSessionStore;
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

pub async fn allocate_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path((kind, id)): Path<(String, Uuid)>,
    body: Option<Json<AllocateRequest>>,
) -> Result<Json<AllocateResponse>, ApiError> {
    let kind: ScopeKind = kind
        .parse()
        .map_err(|e: session_protocol::ProtocolError| ApiError::bad_request(e.to_string()))?;
    let scope = ScopeKey::new(kind, id);
    let count = body.and_then(|Json(req)| req.count);

    let response = match count {
        None => AllocateResponse::Single {
            seq: state.allocator.allocate_next(scope).await?,
        },
        Some(count) => AllocateResponse::Batch(state.allocator.allocate_batch(scope, count).await?),
    };
    Ok(Json(response))
}
