use crate::error::{ErrorKind, LoadCheckError};

/// What the harness does about a failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailureAction {
    /// Every pair stops and the error is surfaced to the caller, which terminates the process.
    AbortProcess,
    /// The pair that observed the failure stops; the other pairs keep running.
    StopPair,
    /// The task that hit the failure logs it and exits.
    StopThread,
}

impl FailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureAction::AbortProcess => "abort_process",
            FailureAction::StopPair => "stop_pair",
            FailureAction::StopThread => "stop_thread",
        }
    }
}

/// Policy describing how a [`LoadCheckError`] is handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FailurePolicy {
    action: FailureAction,
    solution: Option<&'static str>,
}

impl FailurePolicy {
    const fn new(action: FailureAction, solution: Option<&'static str>) -> Self {
        Self { action, solution }
    }

    pub fn action(&self) -> FailureAction {
        self.action
    }

    /// Returns an optional operator-facing hint.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds the [`FailurePolicy`] of an error from its kind.
pub fn build_failure_policy(error: &LoadCheckError) -> FailurePolicy {
    match error.kind() {
        ErrorKind::GracefulApplicationFailure => FailurePolicy::new(
            FailureAction::AbortProcess,
            Some("A procedure rolled back on an application error; inspect the backend logs."),
        ),
        ErrorKind::UngracefulApplicationFailure => FailurePolicy::new(FailureAction::StopPair, None),
        ErrorKind::RowCountMismatch => FailurePolicy::new(
            FailureAction::StopPair,
            Some("The backend lost or duplicated rows; compare the load and copy tables."),
        ),
        ErrorKind::BackendConnectionFailed => FailurePolicy::new(
            FailureAction::StopThread,
            Some("Verify that the backend is reachable."),
        ),
        _ => FailurePolicy::new(FailureAction::StopThread, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadcheck_error;

    #[test]
    fn graceful_failures_abort_the_process() {
        let error = loadcheck_error!(ErrorKind::GracefulApplicationFailure, "Insert failed");
        let policy = build_failure_policy(&error);

        assert_eq!(policy.action(), FailureAction::AbortProcess);
        assert!(policy.solution().is_some());
    }

    #[test]
    fn degraded_failures_stop_the_pair() {
        for kind in [
            ErrorKind::UngracefulApplicationFailure,
            ErrorKind::RowCountMismatch,
        ] {
            let error = loadcheck_error!(kind, "Degraded");
            assert_eq!(build_failure_policy(&error).action(), FailureAction::StopPair);
        }
    }

    #[test]
    fn other_failures_stop_the_thread() {
        for kind in [
            ErrorKind::BackendQueryFailed,
            ErrorKind::BackendConnectionFailed,
            ErrorKind::BackendCallFailed,
            ErrorKind::InvalidState,
            ErrorKind::LoadDriverPanic,
            ErrorKind::Unknown,
        ] {
            let error = loadcheck_error!(kind, "Unhandled");
            assert_eq!(
                build_failure_policy(&error).action(),
                FailureAction::StopThread
            );
        }
    }

    #[test]
    fn aggregated_errors_use_the_first_kind() {
        let error: LoadCheckError = vec![
            loadcheck_error!(ErrorKind::GracefulApplicationFailure, "Fatal"),
            loadcheck_error!(ErrorKind::RowCountMismatch, "Mismatch"),
        ]
        .into();

        assert_eq!(
            build_failure_policy(&error).action(),
            FailureAction::AbortProcess
        );
    }
}
