//! Metric names recorded by the harness.

/// Label for the monitored table.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the error kind of a failure.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for the procedure kind of a call.
pub const OPERATION_LABEL: &str = "operation";

/// Counter of rows accepted by the backend for insertion.
pub const LOADCHECK_ROWS_SUBMITTED_TOTAL: &str = "loadcheck_rows_submitted_total";

/// Counter of row submissions rejected by the backend.
pub const LOADCHECK_ROWS_REJECTED_TOTAL: &str = "loadcheck_rows_rejected_total";

/// Counter of copy callbacks, whatever their status.
pub const LOADCHECK_ROWS_RECONCILED_TOTAL: &str = "loadcheck_rows_reconciled_total";

/// Counter of rows removed through the direct-delete path.
pub const LOADCHECK_ROWS_DIRECT_DELETED_TOTAL: &str = "loadcheck_rows_direct_deleted_total";

/// Counter of non-successful classified responses.
pub const LOADCHECK_CALL_FAILURES_TOTAL: &str = "loadcheck_call_failures_total";

/// Counter of throttled driver iterations.
pub const LOADCHECK_THROTTLES_TOTAL: &str = "loadcheck_throttles_total";

/// Gauge of admission permits currently held.
pub const LOADCHECK_ADMISSION_IN_FLIGHT: &str = "loadcheck_admission_in_flight";

/// Counter of failures escalated through the failure policy.
pub const LOADCHECK_PAIR_FAILURES_TOTAL: &str = "loadcheck_pair_failures_total";
