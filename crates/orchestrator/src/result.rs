//! Single-assignment result of one orchestration run

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::OrchestrationError;

/// Observable state of an [`OrchestrationResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

enum Outcome<T> {
    Pending,
    Completed(T),
    Failed(OrchestrationError),
    Cancelled,
}

impl<T> Outcome<T> {
    fn state(&self) -> ResultState {
        match self {
            Outcome::Pending => ResultState::Pending,
            Outcome::Completed(_) => ResultState::Completed,
            Outcome::Failed(_) => ResultState::Failed,
            Outcome::Cancelled => ResultState::Cancelled,
        }
    }

    fn terminal_error(&self) -> OrchestrationError {
        match self {
            Outcome::Cancelled => OrchestrationError::AlreadyCancelled,
            _ => OrchestrationError::AlreadyCompleted,
        }
    }
}

struct Shared<T> {
    outcome: Mutex<Outcome<T>>,
    done: Notify,
    cancellation: CancellationToken,
}

/// Handle to the eventual output of an orchestration
///
/// Moves from pending to exactly one of completed, failed or cancelled.
/// Clones observe the same state.
pub struct OrchestrationResult<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for OrchestrationResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for OrchestrationResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for OrchestrationResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationResult")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> OrchestrationResult<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                outcome: Mutex::new(Outcome::Pending),
                done: Notify::new(),
                cancellation: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> ResultState {
        self.shared.outcome.lock().state()
    }

    pub fn is_done(&self) -> bool {
        self.state() != ResultState::Pending
    }

    /// Token cancelled by [`cancel`](Self::cancel); every message of the run carries it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancellation.clone()
    }

    /// Wait for a terminal state and return the value or the captured error
    ///
    /// A timeout leaves the result pending.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<T, OrchestrationError>
    where
        T: Clone,
    {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait())
                .await
                .map_err(|_| OrchestrationError::Timeout(limit))?,
            None => self.wait().await,
        }

        match &*self.shared.outcome.lock() {
            Outcome::Completed(value) => Ok(value.clone()),
            Outcome::Failed(error) => Err(error.clone()),
            Outcome::Cancelled => Err(OrchestrationError::Cancelled),
            Outcome::Pending => Err(OrchestrationError::Internal(
                "result signalled while still pending".to_string(),
            )),
        }
    }

    pub fn cancel(&self) -> Result<(), OrchestrationError> {
        self.settle(Outcome::Cancelled)?;
        self.shared.cancellation.cancel();
        debug!("Orchestration cancelled");
        Ok(())
    }

    pub(crate) fn set_result(&self, value: T) -> Result<(), OrchestrationError> {
        self.settle(Outcome::Completed(value))
    }

    pub(crate) fn set_exception(&self, error: OrchestrationError) -> Result<(), OrchestrationError> {
        self.settle(Outcome::Failed(error))
    }

    fn settle(&self, outcome: Outcome<T>) -> Result<(), OrchestrationError> {
        {
            let mut current = self.shared.outcome.lock();
            if !matches!(*current, Outcome::Pending) {
                return Err(current.terminal_error());
            }
            *current = outcome;
        }
        self.shared.done.notify_waiters();
        Ok(())
    }

    /// Resolves once the result is terminal
    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.shared.done.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_times_out_and_stays_pending() {
        let result = OrchestrationResult::<String>::new();

        let err = result.get(Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Timeout(_)));
        assert_eq!(result.state(), ResultState::Pending);

        result.set_result("late".to_string()).unwrap();
        assert_eq!(result.get(None).await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_cancel_after_timed_out_get() {
        let result = OrchestrationResult::<String>::new();
        assert!(result.get(Some(Duration::from_millis(10))).await.is_err());

        result.cancel().unwrap();
        assert!(result.cancellation_token().is_cancelled());
        assert_eq!(result.get(None).await.unwrap_err(), OrchestrationError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_then_get() {
        let result = OrchestrationResult::<String>::new();
        let token = result.cancellation_token();

        result.cancel().unwrap();
        assert!(token.is_cancelled());

        let err = result.get(None).await.unwrap_err();
        assert_eq!(err, OrchestrationError::Cancelled);
        assert!(err.to_string().contains("canceled before completion"));
    }

    #[test]
    fn test_second_cancel_fails() {
        let result = OrchestrationResult::<()>::new();
        result.cancel().unwrap();
        assert_eq!(result.cancel().unwrap_err(), OrchestrationError::AlreadyCancelled);
    }

    #[test]
    fn test_cancel_after_completion_fails() {
        let result = OrchestrationResult::new();
        result.set_result(1).unwrap();
        assert_eq!(result.cancel().unwrap_err(), OrchestrationError::AlreadyCompleted);
        assert!(!result.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_single_assignment() {
        let result = OrchestrationResult::new();
        result.set_exception(OrchestrationError::EmptyMembers).unwrap();
        assert_eq!(result.set_result(1).unwrap_err(), OrchestrationError::AlreadyCompleted);
        assert_eq!(result.state(), ResultState::Failed);
    }

    #[tokio::test]
    async fn test_waiters_are_woken_by_completion() {
        let result = OrchestrationResult::new();
        let waiter = {
            let result = result.clone();
            tokio::spawn(async move { result.get(None).await })
        };
        tokio::task::yield_now().await;

        result.set_result(42u32).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_failure_is_readable_repeatedly() {
        let result = OrchestrationResult::<u8>::new();
        result
            .set_exception(OrchestrationError::UnknownParticipant("ghost".into()))
            .unwrap();

        for _ in 0..2 {
            assert_eq!(
                result.get(None).await.unwrap_err(),
                OrchestrationError::UnknownParticipant("ghost".into())
            );
        }
    }
}
