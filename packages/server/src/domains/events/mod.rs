//! Events domain - the append-only per-session log.

pub mod submission;

pub use submission::{events_after, page_limit, submit_event, SubmitError};
