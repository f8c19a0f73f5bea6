//! Client side of the session transcript.
//!
//! A device keeps one [`SessionSync`] per open session. Local writes go into
//! the [`LocalOptimisticQueue`] and show up immediately; authoritative events
//! arrive in any order, are put back in `seq` order by the [`ReorderBuffer`],
//! and the [`reducer`] merges both into the visible transcript.
//!
//! # Example
//!
//! ```rust,ignore
//! use transcript::{HttpClient, SessionSync};
//!
//! let client = HttpClient::new("http://localhost:8080");
//! let mut sync = SessionSync::new(session_id);
//!
//! let request = sync.send(json!({"role": "user", "text": "hello"}));
//! sync.submit_cancellable(&client, &request, &token).await?;
//! sync.catch_up(&client).await?;
//!
//! for entry in sync.transcript() {
//!     println!("{:?}: {:?}", entry.role, entry.text);
//! }
//! ```

pub mod client;
pub mod error;
pub mod queue;
pub mod reducer;
pub mod reorder;
pub mod session;

pub use client::{HttpClient, Transport};
pub use error::{ClientError, Result};
pub use queue::{LocalMessage, LocalOptimisticQueue, LocalStatus};
pub use reducer::{EntryId, EntryRole, Position, ReducerInput, ReducerState, TranscriptEntry};
pub use reorder::ReorderBuffer;
pub use session::SessionSync;
