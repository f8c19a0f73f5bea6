//! Test fixtures for creating test data.
//!
//! These fixtures go through the domain actions, so they work against any
//! store.

use anyhow::Result;
use serde_json::json;
use server_core::domains::sessions::{create_account, create_session};
use server_core::kernel::{BaseSessionStore, ServerDeps};
use session_protocol::{AccountId, LocalId, SessionId, SubmitEventRequest};

/// Create an account with one empty session
pub async fn create_test_session<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
) -> Result<(AccountId, SessionId)> {
    let account = create_account(deps).await?;
    let session = create_session(deps, account, json!({"title": "test session"})).await?;
    Ok((account, session.id))
}

/// A user message submitted under `real_id`
pub fn user_message(real_id: &str, text: &str) -> SubmitEventRequest {
    SubmitEventRequest {
        real_id: Some(LocalId::from(real_id)),
        content: json!({"role": "user", "text": text}),
        meta: Default::default(),
        created_at: None,
    }
}
