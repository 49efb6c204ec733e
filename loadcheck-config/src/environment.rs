use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Variable naming the environment; unset means [`Environment::Dev`].
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Runtime environment the harness is started in.
///
/// Selects the `configuration/{environment}.*` overlay and the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local runs against a developer backend.
    #[default]
    Dev,
    /// Long-running self-check deployments.
    Prod,
}

/// `APP_ENVIRONMENT` named an environment the harness does not know.
#[derive(Debug, Error)]
#[error("`{name}` is not a supported environment, expected one of: {expected}")]
pub struct UnsupportedEnvironment {
    name: String,
    expected: String,
}

impl Environment {
    const ALL: [Environment; 2] = [Environment::Dev, Environment::Prod];

    /// Reads the environment from `APP_ENVIRONMENT`.
    pub fn load() -> Result<Environment, UnsupportedEnvironment> {
        Self::from_var(std::env::var(APP_ENVIRONMENT_ENV_NAME).ok().as_deref())
    }

    fn from_var(value: Option<&str>) -> Result<Environment, UnsupportedEnvironment> {
        match value.map(str::trim) {
            None | Some("") => Ok(Environment::default()),
            Some(name) => name.parse(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = UnsupportedEnvironment;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|environment| environment.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnsupportedEnvironment {
                name: name.to_string(),
                expected: Self::ALL.map(|environment| environment.as_str()).join(", "),
            })
    }
}
