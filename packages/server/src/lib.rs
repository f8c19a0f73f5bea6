// Session sync server - API core
//
// Server of record for agent session transcripts: assigns every event its
// position in the session log under concurrent writers, persists it, and
// pushes committed updates to connected viewers.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
