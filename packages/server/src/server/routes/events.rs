//! Event log endpoints.
//!
//! POST /v1/sessions/:id/events   submit (idempotent on `realId`)
//! GET  /v1/sessions/:id/events   page with `?after_seq=&limit=`

use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use serde::Deserialize;
use session_protocol::{EventsPage, SessionId, SubmitEventRequest, SubmitReceipt, SEQ_FLOOR};

use crate::domains::events::{events_after, submit_event};
use crate::kernel::BaseSessionStore;
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    after_seq: Option<i64>,
    limit: Option<i64>,
}

pub async fn submit_event_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<SubmitEventRequest>,
) -> Result<Json<SubmitReceipt>, ApiError> {
    let receipt = submit_event(&state.deps, session_id, request).await?;
    Ok(Json(receipt))
}

pub async fn list_events_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsPage>, ApiError> {
    let after_seq = query.after_seq.unwrap_or(SEQ_FLOOR);
    let page = events_after(&state.deps, session_id, after_seq, query.limit).await?;
    Ok(Json(page))
}
