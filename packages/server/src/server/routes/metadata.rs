use axum::{
    extract::{Extension, Path},
    Json,
};
use session_protocol::{
    DiscardCommittedRequest, MetadataWriteResult, SessionId, SessionMetadata,
    UpdateMetadataRequest,
};

use crate::domains::metadata::{discard_committed, get_metadata, update_metadata};
use crate::kernel::BaseSessionStore;
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

pub async fn get_metadata_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionMetadata>, ApiError> {
    Ok(Json(get_metadata(&state.deps, session_id).await?))
}

/// A stale `expectedVersion` is a normal 200 response carrying
/// `version-mismatch` and the current document.
pub async fn update_metadata_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<UpdateMetadataRequest>,
) -> Result<Json<MetadataWriteResult>, ApiError> {
    let result =
        update_metadata(&state.deps, session_id, request.expected_version, request.metadata)
            .await?;
    Ok(Json(result))
}

pub async fn discard_committed_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<DiscardCommittedRequest>,
) -> Result<Json<MetadataWriteResult>, ApiError> {
    let result =
        discard_committed(&state.deps, session_id, request.expected_version, request.local_ids)
            .await?;
    Ok(Json(result))
}
