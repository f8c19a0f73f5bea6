//! Sessions domain - accounts and the sessions they own.

pub mod actions;

pub use actions::{create_account, create_session, SessionError};
