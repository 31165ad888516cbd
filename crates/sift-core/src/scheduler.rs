//! Bounded-concurrency admission gate.
//!
//! At most `limit` tasks hold a slot at once. Callers beyond that suspend on
//! a FIFO semaphore and are admitted in arrival order as slots free up.
//!
//! A slot is a guard: it is returned when the [`SchedulerSlot`] is dropped,
//! so every exit path of a task body (success, error, panic, or the future
//! being dropped) releases exactly once.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

/// Shared admission gate. Clones share the same slots.
#[derive(Clone, Debug)]
pub struct Scheduler {
    semaphore: Arc<Semaphore>,
    limit: usize,
    waiting: Arc<AtomicUsize>,
}

/// Proof of admission. Releases its slot on drop.
#[derive(Debug)]
pub struct SchedulerSlot {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the waiter count however `acquire` ends, including cancellation.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Scheduler {
    /// Create a gate admitting `limit` concurrent tasks (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Callers currently suspended waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Stop admitting work. Current and future waiters fail; slots already
    /// handed out stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Wait for a free slot. Waiters are served in arrival order.
    ///
    /// Fails only once the scheduler has been [closed](Self::close).
    pub async fn acquire(&self) -> Result<SchedulerSlot, AppError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Generic("scheduler is closed".into()))?;

        Ok(SchedulerSlot { _permit: permit })
    }

    /// Run `task` once a slot is free and return its result.
    ///
    /// The slot is held for the whole body and released on every exit path.
    pub async fn run<T, F, Fut>(&self, task: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let _slot = self.acquire().await?;
        task().await
    }
}
