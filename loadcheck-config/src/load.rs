use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::{Environment, UnsupportedEnvironment};

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix for environment variable overrides, e.g. `APP_HARNESS__SEED`.
const ENV_PREFIX: &str = "APP";

/// Separator between the prefix and the first key segment.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator between nested key segments.
const ENV_SEPARATOR: &str = "__";

/// Separator for list values.
const LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration structures loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are parsed as comma-separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The working directory could not be resolved.
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// The `configuration` directory is absent.
    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// No file with a supported extension was found for `stem`.
    #[error("could not locate `{stem}` configuration in `{directory}` (tried {extensions})")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        extensions: String,
    },

    /// Building the layered configuration failed, usually because a file is malformed.
    #[error("failed to build configuration: {0}")]
    Build(#[source] config::ConfigError),

    /// The merged configuration does not match the target type.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),

    /// `APP_ENVIRONMENT` holds an unsupported value.
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] UnsupportedEnvironment),
}

/// Loads `T` from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// Sources are layered as `base.*`, then `{environment}.*`, then `APP_`-prefixed environment
/// variables. Nested keys use double underscores (`APP_HARNESS__DRIVER__BATCH_SIZE`).
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load()?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads `T` from an explicit configuration directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = find_configuration_file(directory, "base")?;
    let environment_file = find_configuration_file(directory, environment.as_str())?;

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in T::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(base_file))
        .add_source(config::File::from(environment_file))
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Build)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

/// Returns the first existing `{stem}.{extension}` file in `directory`.
fn find_configuration_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadConfigError::ConfigurationFileMissing {
            stem: stem.to_string(),
            directory: directory.to_path_buf(),
            extensions: CONFIG_FILE_EXTENSIONS.join(", "),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Dummy {
        #[allow(dead_code)]
        value: u32,
    }

    impl Config for Dummy {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = std::env::temp_dir().join("loadcheck-config-does-not-exist");
        let err = load_config_from::<Dummy>(&dir, Environment::Dev).unwrap_err();
        assert!(matches!(err, LoadConfigError::MissingConfigurationDirectory(_)));
    }

    #[test]
    fn missing_environment_file_is_reported() {
        let dir = std::env::temp_dir().join(format!(
            "loadcheck-config-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("base.yaml"), "value: 1\n").unwrap();

        let err = load_config_from::<Dummy>(&dir, Environment::Prod).unwrap_err();
        match err {
            LoadConfigError::ConfigurationFileMissing { stem, .. } => assert_eq!(stem, "prod"),
            other => panic!("unexpected error: {other}"),
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
