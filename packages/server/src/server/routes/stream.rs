//! SSE streaming endpoint.
//!
//! GET /v1/sessions/:id/updates
//!
//! Subscribes to the session's StreamHub topic and forwards every committed
//! update envelope as an SSE event named after its body type (`new-event`,
//! `update-metadata`). A subscriber that falls behind receives a `lagged`
//! event with the number of missed updates and should page
//! `/v1/sessions/:id/events` to catch up.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use session_protocol::SessionId;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::domains::metadata::get_metadata;
use crate::kernel::{BaseSessionStore, StreamHub};
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

pub async fn session_updates_handler<S: BaseSessionStore>(
    Extension(state): Extension<AxumAppState<S>>,
    Path(session_id): Path<SessionId>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // 404 for sessions that do not exist rather than an idle stream
    get_metadata(&state.deps, session_id).await?;

    let rx = state
        .deps
        .stream_hub
        .subscribe(&StreamHub::session_topic(session_id))
        .await;

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let updates = BroadcastStream::new(rx).filter_map(|result| async {
        match result {
            Ok(update) => Event::default()
                .event(update.body.type_name())
                .id(update.seq.to_string())
                .json_data(&update)
                .ok()
                .map(Ok),
            Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                .event("lagged")
                .json_data(serde_json::json!({ "missed": n }))
                .ok()
                .map(Ok),
        }
    });

    Ok(Sse::new(connected.chain(updates)).keep_alive(KeepAlive::default()))
}
