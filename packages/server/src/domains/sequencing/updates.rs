//! Account-sequenced update envelopes.

use chrono::{DateTime, Utc};
use session_protocol::{AccountId, ScopeKey, UpdateBody, UpdateEnvelope, UpdateId};

use super::allocator::{allocate_next_in, AllocationError};
use crate::kernel::BaseSessionStore;

/// Builds the envelope for `body`, consuming the next number of the
/// account scope inside the enclosing transaction. Publishing is left to
/// the caller's post-commit effects.
pub async fn next_update<S: BaseSessionStore>(
    storage: &S,
    tx: &mut S::Transaction,
    account_id: AccountId,
    body: UpdateBody,
    now: DateTime<Utc>,
) -> Result<UpdateEnvelope, AllocationError> {
    let seq = allocate_next_in(storage, tx, ScopeKey::Account(account_id)).await?;
    Ok(UpdateEnvelope {
        id: UpdateId::new(),
        seq,
        body,
        created_at: now,
    })
}
