//! Shared data model for sequenced session transcripts.
//!
//! Both the server of record and the client reducer speak these types:
//! typed ids, sequence scopes and ranges, events, metadata documents, update
//! envelopes, and the HTTP request/response bodies.

pub mod api;
pub mod entity_ids;
pub mod error;
pub mod event;
pub mod id;
pub mod metadata;
pub mod scope;
pub mod update;

pub use api::*;
pub use entity_ids::*;
pub use error::ProtocolError;
pub use event::{EventContent, EventMeta, SessionEvent, ToolCall};
pub use metadata::{MetadataWriteResult, SessionMetadata, INITIAL_METADATA_VERSION};
pub use scope::{ScopeKey, ScopeKind, SequenceRange, SEQ_FLOOR};
pub use update::{UpdateBody, UpdateEnvelope};
