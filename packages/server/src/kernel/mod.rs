//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod stream_hub;
pub mod traits;
pub mod transaction;

pub use deps::ServerDeps;
pub use error::StoreError;
pub use memory::{MemoryStorage, MemoryTransaction};
pub use postgres::PgSessionStore;
pub use stream_hub::StreamHub;
pub use traits::*;
pub use transaction::{
    AfterCommit, Outcome, RetryPolicy, TransactionCoordinator, TransactionFailure,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY,
};
