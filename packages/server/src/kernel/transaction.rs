//! Serializable transactions with bounded retry and post-commit effects.
//!
//! A unit of work runs against a transaction handle and returns its result
//! together with the effects that must only happen once the write is durable:
//!
//! ```ignore
//! let seq = coordinator
//!     .run(move |tx| {
//!         let storage = storage.clone();
//!         Box::pin(async move {
//!             let end = storage.increment_counter(tx, scope, 1).await?;
//!             let mut after_commit = AfterCommit::new();
//!             after_commit.push("notify", move || async move { Ok(()) });
//!             Ok(Outcome::with_after_commit(end, after_commit))
//!         })
//!     })
//!     .await?;
//! ```
//!
//! # Retry policy
//!
//! A serialization conflict (from the unit or from commit) rolls back and
//! reruns the whole unit, up to `max_retries` more times, sleeping
//! `base_delay * retry_number` before each rerun. Every other error
//! propagates immediately. Running out of retries surfaces the last conflict
//! as an "exhausted" error, which callers report as "try again".
//!
//! # Post-commit effects
//!
//! Effects run sequentially after commit, outside the transaction. A failing
//! or panicking effect is logged and skipped; it never rolls back the write
//! and never prevents its siblings from running.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use super::error::StoreError;
use super::traits::BaseSessionStore;

/// Default number of reruns after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay unit between reruns.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(25);

// =============================================================================
// Retry policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reruns allowed after the first attempt.
    pub max_retries: u32,
    /// Linear backoff unit: rerun `n` waits `base_delay * n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Same retry bound, no sleeping between attempts.
    pub fn immediate() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, Duration::ZERO)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY)
    }
}

// =============================================================================
// Unit-of-work output
// =============================================================================

type DeferredEffect = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Effects to run after a successful commit.
#[derive(Default)]
pub struct AfterCommit {
    effects: Vec<(&'static str, DeferredEffect)>,
}

impl AfterCommit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an effect. `name` is only used for logging.
    pub fn push<F, Fut>(&mut self, name: &'static str, effect: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.effects.push((name, Box::new(move || effect().boxed())));
    }

    pub fn extend(&mut self, other: AfterCommit) {
        self.effects.extend(other.effects);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Runs every effect, isolating failures. Returns how many failed.
    pub async fn run(self) -> usize {
        let mut failures = 0;
        for (name, effect) in self.effects {
            // The closure itself may panic before handing back its future.
            let result = match std::panic::catch_unwind(AssertUnwindSafe(effect)) {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(payload) => Err(payload),
            };
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    error!(effect = name, error = %err, "post-commit effect failed");
                }
                Err(_) => {
                    failures += 1;
                    error!(effect = name, "post-commit effect panicked");
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for AfterCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.effects.iter().map(|(name, _)| name))
            .finish()
    }
}

/// What a unit of work hands back: its result plus deferred effects.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub after_commit: AfterCommit,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            after_commit: AfterCommit::new(),
        }
    }

    pub fn with_after_commit(value: T, after_commit: AfterCommit) -> Self {
        Self {
            value,
            after_commit,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors a unit of work may fail with.
///
/// Domain error types implement this so the coordinator can tell a
/// retryable conflict apart from a real failure, and can wrap the final
/// conflict once retries run out.
pub trait TransactionFailure: From<StoreError> + std::error::Error + Send + 'static {
    fn is_serialization_conflict(&self) -> bool;

    /// Converts the last conflict into the "retries exhausted" form.
    fn exhausted(attempts: u32, last: Self) -> Self;
}

// =============================================================================
// Coordinator
// =============================================================================

/// Runs units of work atomically against a [`BaseSessionStore`].
///
/// Holds no state between calls; cloning is cheap.
pub struct TransactionCoordinator<S: BaseSessionStore> {
    storage: Arc<S>,
    policy: RetryPolicy,
}

impl<S: BaseSessionStore> Clone for TransactionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            policy: self.policy,
        }
    }
}

impl<S: BaseSessionStore> TransactionCoordinator<S> {
    pub fn new(storage: Arc<S>, policy: RetryPolicy) -> Self {
        Self { storage, policy }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Executes `unit` in a serializable transaction, retrying on conflict,
    /// then runs its post-commit effects and returns its value.
    pub async fn run<T, E, F>(&self, mut unit: F) -> Result<T, E>
    where
        T: Send,
        E: TransactionFailure,
        F: for<'t> FnMut(&'t mut S::Transaction) -> BoxFuture<'t, Result<Outcome<T>, E>> + Send,
    {
        let mut retries = 0;
        loop {
            match self.attempt(&mut unit).await {
                Ok(Outcome {
                    value,
                    after_commit,
                }) => {
                    if !after_commit.is_empty() {
                        after_commit.run().await;
                    }
                    return Ok(value);
                }
                Err(err) if err.is_serialization_conflict() => {
                    if retries >= self.policy.max_retries {
                        warn!(
                            attempts = retries + 1,
                            error = %err,
                            "transaction retries exhausted"
                        );
                        return Err(E::exhausted(retries + 1, err));
                    }
                    retries += 1;
                    let delay = self.policy.delay_for(retries);
                    debug!(
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "serialization conflict, rerunning transaction"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt<T, E, F>(&self, unit: &mut F) -> Result<Outcome<T>, E>
    where
        T: Send,
        E: TransactionFailure,
        F: for<'t> FnMut(&'t mut S::Transaction) -> BoxFuture<'t, Result<Outcome<T>, E>> + Send,
    {
        let mut tx = self.storage.begin().await?;
        match unit(&mut tx).await {
            Ok(outcome) => {
                self.storage.commit(tx).await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = self.storage.rollback(tx).await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
