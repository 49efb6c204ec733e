use std::sync::Once;

use loadcheck_config::environment::Environment;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Environment variable enabling log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Guards test tracing so it is installed once per test binary.
static TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    /// A global subscriber was already installed.
    #[error("failed to install the tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Installs the global tracing subscriber for `app_name`.
///
/// `RUST_LOG` takes precedence. Without it, the application and the harness core log at `info`.
/// Production runs emit JSON lines, development runs emit human readable output.
pub fn init_tracing(app_name: &str, environment: Environment) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}=info,loadcheck=info",
            app_name.replace('-', "_")
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if environment.is_prod() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_thread_names(true))
            .try_init()?;
    }

    Ok(())
}

/// Installs a test subscriber when `ENABLE_TRACING` is set.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("loadcheck=debug"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
