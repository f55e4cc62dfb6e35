//! Shared handle passed to every engine.
//!
//! Bundles the persistence capability, the time source and the retry budget.
//! Engines receive it explicitly at construction; nothing is global.

use crate::clock::{Clock, SystemClock};
use crate::error::GovernanceResult;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::{is_store_error_retryable, GovernanceStore, StoreResult};
use crate::types::Timestamp;
use std::future::Future;
use std::sync::Arc;

pub struct Context<S: GovernanceStore + ?Sized> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryPolicy,
}

impl<S: GovernanceStore + ?Sized> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            retry: self.retry,
        }
    }
}

impl<S: GovernanceStore + ?Sized> Context<S> {
    /// Context on the wall clock with the default retry policy.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run one store call, retrying on serialization conflicts.
    ///
    /// Anything still failing after the budget surfaces as
    /// `StorageUnavailable`.
    pub async fn run<T, F, Fut>(&self, operation: F) -> GovernanceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        Ok(retry_with_backoff(&self.retry, operation, is_store_error_retryable).await?)
    }
}
