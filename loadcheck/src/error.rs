//! Error types and result definitions for load-check operations.
//!
//! [`LoadCheckError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source and the callsite where it was raised. Errors can also be
//! aggregated, which is how the harness reports the failures of several driver/worker pairs at
//! once.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for load-check operations.
pub type LoadCheckResult<T> = Result<T, LoadCheckError>;

/// Payload stored for single [`LoadCheckError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the harness.
#[derive(Debug, Clone)]
pub struct LoadCheckError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload.
    Single(ErrorPayload),
    /// Multiple aggregated errors, one per failed pair.
    Many {
        errors: Vec<LoadCheckError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures observed by the harness.
///
/// The first three kinds are produced by response classification and drive the failure policy;
/// the remaining kinds describe failures of the harness machinery itself.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Response classification
    GracefulApplicationFailure,
    UngracefulApplicationFailure,
    RowCountMismatch,

    // Backend errors
    BackendQueryFailed,
    BackendConnectionFailed,
    BackendCallFailed,

    // Coordination errors
    AdmissionGateClosed,
    InvalidState,
    LoadDriverPanic,
    ReconciliationWorkerPanic,

    // Configuration & serialization errors
    ConfigError,
    SerializationError,
    IoError,

    // Unknown / Uncategorized
    Unknown,

    // Raised by fault injection tests.
    #[cfg(feature = "failpoints")]
    FailpointTriggered,
}

impl LoadCheckError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`] when
    /// the aggregate is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of a single error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the detail of this error, or of the first aggregated error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        LoadCheckError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for LoadCheckError {
    fn eq(&self, other: &LoadCheckError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for LoadCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write!(f, "\n  Backtrace:")?;
                    for line in payload.backtrace.to_string().lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for LoadCheckError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`LoadCheckError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for LoadCheckError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> LoadCheckError {
        LoadCheckError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`LoadCheckError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for LoadCheckError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> LoadCheckError {
        LoadCheckError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for LoadCheckError
where
    E: Into<LoadCheckError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> LoadCheckError {
        let location = Location::caller();
        let mut errors: Vec<LoadCheckError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        LoadCheckError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for LoadCheckError {
    #[track_caller]
    fn from(err: std::io::Error) -> LoadCheckError {
        let detail = err.to_string();
        LoadCheckError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for LoadCheckError {
    #[track_caller]
    fn from(err: serde_json::Error) -> LoadCheckError {
        let detail = err.to_string();
        LoadCheckError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("JSON serialization failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps pool and transport failures to [`ErrorKind::BackendConnectionFailed`] and everything
/// else to [`ErrorKind::BackendQueryFailed`].
impl From<sqlx::Error> for LoadCheckError {
    #[track_caller]
    fn from(err: sqlx::Error) -> LoadCheckError {
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut => ErrorKind::BackendConnectionFailed,
            _ => ErrorKind::BackendQueryFailed,
        };

        let detail = err.to_string();
        LoadCheckError::from_components(
            kind,
            Cow::Borrowed("Postgres backend operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<loadcheck_config::shared::ValidationError> for LoadCheckError {
    #[track_caller]
    fn from(err: loadcheck_config::shared::ValidationError) -> LoadCheckError {
        let detail = err.to_string();
        LoadCheckError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid harness configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
