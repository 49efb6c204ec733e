use loadcheck_config::load_config;
use loadcheck_config::shared::RunnerConfig;

/// Loads the runner configuration and validates it.
pub fn load_runner_config() -> anyhow::Result<RunnerConfig> {
    let config = load_config::<RunnerConfig>()?;
    config.validate()?;

    Ok(config)
}
