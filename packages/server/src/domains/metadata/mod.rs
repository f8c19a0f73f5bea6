//! Metadata domain - versioned per-session documents.

pub mod actions;

pub use actions::{discard_committed, get_metadata, update_metadata, MetadataError};
