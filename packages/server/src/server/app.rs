//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domains::sequencing::SequenceAllocator;
use crate::kernel::{BaseSessionStore, ServerDeps};
use crate::server::routes::{
    allocate_handler, create_account_handler, create_session_handler, discard_committed_handler,
    get_metadata_handler, health_handler, list_events_handler, session_updates_handler,
    submit_event_handler, update_metadata_handler,
};

/// Shared application state
pub struct AxumAppState<S: BaseSessionStore> {
    pub deps: ServerDeps<S>,
    pub allocator: SequenceAllocator<S>,
}

impl<S: BaseSessionStore> Clone for AxumAppState<S> {
    fn clone(&self) -> Self {
        Self {
            deps: self.deps.clone(),
            allocator: self.allocator.clone(),
        }
    }
}

impl<S: BaseSessionStore> AxumAppState<S> {
    pub fn new(deps: ServerDeps<S>) -> Self {
        let allocator = SequenceAllocator::new(deps.coordinator.clone());
        Self { deps, allocator }
    }
}

/// Build the Axum application router
pub fn build_app<S: BaseSessionStore>(deps: ServerDeps<S>) -> Router {
    let app_state = AxumAppState::new(deps);

    // CORS configuration - viewers run on other origins
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/v1/accounts", post(create_account_handler::<S>))
        .route("/v1/accounts/:id/sessions", post(create_session_handler::<S>))
        .route("/v1/scopes/:kind/:id/sequences", post(allocate_handler::<S>))
        .route(
            "/v1/sessions/:id/events",
            post(submit_event_handler::<S>).get(list_events_handler::<S>),
        )
        .route(
            "/v1/sessions/:id/metadata",
            get(get_metadata_handler::<S>).post(update_metadata_handler::<S>),
        )
        .route(
            "/v1/sessions/:id/metadata/discarded",
            post(discard_committed_handler::<S>),
        )
        .route("/v1/sessions/:id/updates", get(session_updates_handler::<S>))
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
