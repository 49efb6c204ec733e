use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, LoadCheckResult};

/// Evaluated by the load driver right before it polls the table row count.
pub const LOAD_DRIVER__BEFORE_ROW_COUNT: &str = "load_driver.before_row_count";

/// Evaluated by the reconciliation worker right before it issues a copy batch.
pub const RECONCILIATION__BEFORE_COPY: &str = "reconciliation.before_copy";

/// Fails with an error when the failpoint `name` is configured with `return`.
///
/// The optional parameter selects the error kind, so tests can steer the failure policy:
/// `graceful`, `ungraceful`, `mismatch`, anything else yields a triggered-failpoint error.
pub fn loadcheck_fail_point(name: &str) -> LoadCheckResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("graceful") => ErrorKind::GracefulApplicationFailure,
            Some("ungraceful") => ErrorKind::UngracefulApplicationFailure,
            Some("mismatch") => ErrorKind::RowCountMismatch,
            _ => triggered_kind(),
        };

        bail!(
            error_kind,
            "Failpoint triggered",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}

#[cfg(feature = "failpoints")]
fn triggered_kind() -> ErrorKind {
    ErrorKind::FailpointTriggered
}

#[cfg(not(feature = "failpoints"))]
#[allow(dead_code)]
fn triggered_kind() -> ErrorKind {
    ErrorKind::Unknown
}
