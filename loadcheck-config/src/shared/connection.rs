use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions as SqlxConnectOptions, PgSslMode as SqlxSslMode};

use crate::shared::ValidationError;

/// Configuration for connecting to a Postgres backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    pub port: u16,
    /// Name of the database holding the load tables.
    pub name: String,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user. Redacted in debug output.
    pub password: Option<Secret<String>>,
    /// Whether the connection must verify the server certificate.
    #[serde(default)]
    pub require_tls: bool,
    /// Size of the connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl PgConnectionConfig {
    /// Default size of the connection pool.
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

    /// Validates the connection settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "backend.connection.max_connections".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Converts a connection configuration into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Creates connection options targeting the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<SqlxConnectOptions> for PgConnectionConfig {
    fn with_db(&self) -> SqlxConnectOptions {
        let ssl_mode = if self.require_tls {
            SqlxSslMode::VerifyFull
        } else {
            SqlxSslMode::Prefer
        };

        let mut options = SqlxConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.name)
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }
}

fn default_max_connections() -> u32 {
    PgConnectionConfig::DEFAULT_MAX_CONNECTIONS
}
