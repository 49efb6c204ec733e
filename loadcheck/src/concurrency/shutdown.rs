//! Cooperative cancellation of driver/worker pairs.
//!
//! Each pair owns [`ContinueFlag`]s that are polled at loop tops and after blocking waits. The
//! [`ShutdownCoordinator`] is shared by every pair: it carries operator shutdown requests and the
//! first fatal error, after which every pair stops at its next checkpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::{info, warn};

use crate::error::LoadCheckError;

/// Cancellation flag of one loop. Starts set; once cleared it stays cleared.
#[derive(Debug, Clone)]
pub struct ContinueFlag {
    inner: Arc<ContinueFlagInner>,
}

#[derive(Debug)]
struct ContinueFlagInner {
    set: AtomicBool,
    cleared: Notify,
}

impl ContinueFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContinueFlagInner {
                set: AtomicBool::new(true),
                cleared: Notify::new(),
            }),
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::Acquire)
    }

    /// Clears the flag. Returns `true` if this call cleared it.
    pub fn clear(&self) -> bool {
        let was_set = self.inner.set.swap(false, Ordering::AcqRel);
        self.inner.cleared.notify_waiters();
        was_set
    }

    /// Resolves once the flag is cleared.
    pub async fn cleared(&self) {
        loop {
            let notified = self.inner.cleared.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_set() {
                return;
            }

            notified.await;
        }
    }
}

impl Default for ContinueFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// State published by the [`ShutdownCoordinator`].
#[derive(Debug, Clone)]
pub enum CoordinatorState {
    Running,
    /// An operator asked every pair to stop.
    ShutdownRequested,
    /// A fatal error was raised. Every pair stops and the error is surfaced to the caller.
    Aborted(LoadCheckError),
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Running => "running",
            CoordinatorState::ShutdownRequested => "shutdown_requested",
            CoordinatorState::Aborted(_) => "aborted",
        }
    }
}

/// Process wide stop signal shared by every driver/worker pair.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    state: Arc<watch::Sender<CoordinatorState>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CoordinatorState::Running);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Asks every pair to stop at its next checkpoint.
    pub fn shutdown(&self) {
        let requested = self.state.send_if_modified(|state| {
            if matches!(state, CoordinatorState::Running) {
                *state = CoordinatorState::ShutdownRequested;
                return true;
            }

            false
        });

        if requested {
            info!("shutdown requested, stopping every pair");
        }
    }

    /// Records a fatal error and stops every pair.
    ///
    /// Only the first fatal error is kept. Returns `true` if `error` was recorded.
    pub fn abort(&self, error: LoadCheckError) -> bool {
        let mut error = Some(error);
        let mut previous = None;
        let recorded = self.state.send_if_modified(|state| {
            if matches!(state, CoordinatorState::Aborted(_)) {
                return false;
            }

            if let Some(error) = error.take() {
                previous = Some(state.as_str());
                *state = CoordinatorState::Aborted(error);
                return true;
            }

            false
        });

        if let Some(previous) = previous {
            warn!(previous_state = previous, "fatal failure recorded, aborting every pair");
        }

        recorded
    }

    pub fn is_stopped(&self) -> bool {
        !matches!(*self.state.borrow(), CoordinatorState::Running)
    }

    /// Returns the recorded fatal error, if any.
    pub fn fatal_error(&self) -> Option<LoadCheckError> {
        match &*self.state.borrow() {
            CoordinatorState::Aborted(error) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.borrow().clone()
    }

    /// Resolves once the coordinator leaves the running state.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| !matches!(state, CoordinatorState::Running))
            .await;
    }

    /// Resolves with the fatal error once one is recorded.
    pub async fn aborted(&self) -> LoadCheckError {
        let mut rx = self.state.subscribe();
        loop {
            if let CoordinatorState::Aborted(error) = &*rx.borrow_and_update() {
                return error.clone();
            }

            // The sender lives in `self`, so the channel stays open while we wait.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleeps for `duration`, returning early when `flag` is cleared or `coordinator` stops.
pub async fn sleep_until_cancelled(
    duration: Duration,
    flag: &ContinueFlag,
    coordinator: &ShutdownCoordinator,
) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = flag.cleared() => {}
        _ = coordinator.stopped() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::loadcheck_error;

    #[test]
    fn continue_flag_clears_once() {
        let flag = ContinueFlag::new();
        let other = flag.clone();
        assert!(flag.is_set());

        assert!(other.clear());
        assert!(!flag.is_set());
        assert!(!flag.clear());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleared_wakes_waiters() {
        let flag = ContinueFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cleared().await })
        };

        flag.clear();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn first_fatal_error_wins() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_stopped());

        assert!(coordinator.abort(loadcheck_error!(
            ErrorKind::GracefulApplicationFailure,
            "First"
        )));
        assert!(!coordinator.abort(loadcheck_error!(ErrorKind::Unknown, "Second")));

        let fatal = coordinator.fatal_error().unwrap();
        assert_eq!(fatal.description(), Some("First"));
        assert!(coordinator.is_stopped());
    }

    #[test]
    fn abort_overrides_shutdown_request() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();
        assert!(coordinator.is_stopped());
        assert!(coordinator.fatal_error().is_none());

        coordinator.abort(loadcheck_error!(
            ErrorKind::GracefulApplicationFailure,
            "Fatal"
        ));
        assert_eq!(coordinator.state().as_str(), "aborted");
    }

    #[tokio::test]
    async fn aborted_resolves_with_the_error() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.aborted().await })
        };

        coordinator.abort(loadcheck_error!(
            ErrorKind::GracefulApplicationFailure,
            "Fatal"
        ));

        let error = waiter.await.unwrap();
        assert_eq!(error.kind(), ErrorKind::GracefulApplicationFailure);
    }

    #[tokio::test]
    async fn sleep_returns_early_on_shutdown() {
        let flag = ContinueFlag::new();
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();

        tokio::time::timeout(
            Duration::from_secs(1),
            sleep_until_cancelled(Duration::from_secs(60), &flag, &coordinator),
        )
        .await
        .unwrap();
    }
}
