use std::path::PathBuf;

use rust_cli_config::{Config, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the application root.
const CONFIGURATION_DIR: &str = "configuration";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between the prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Errors raised while loading layered configuration.
#[derive(Debug, Error)]
pub enum LoadSettingsError {
    #[error("Could not determine the current directory: {0}")]
    CurrentDir(#[from] std::io::Error),

    #[error("Failed to read or deserialize configuration: {0}")]
    Config(#[from] rust_cli_config::ConfigError),
}

/// Loads settings of type `T` from layered sources.
///
/// Sources are applied in order of increasing precedence:
/// 1. `configuration/base.yaml`
/// 2. `configuration/<environment>.yaml`
/// 3. `APP`-prefixed environment variables, with `__` separating nested keys
///    (e.g. `APP_SYNC__MAX_PERIOD_SECS=3600`).
///
/// Both files are optional so tests and local tooling can run with defaults
/// plus env overrides alone.
pub fn load_settings<T>(environment: Environment) -> Result<T, LoadSettingsError>
where
    T: DeserializeOwned,
{
    let configuration_dir = base_dir()?;

    let base_file = configuration_dir.join("base.yaml");
    let environment_file = configuration_dir.join(format!("{}.yaml", environment.as_str()));

    let settings = Config::builder()
        .add_source(File::from(base_file).required(false))
        .add_source(File::from(environment_file).required(false))
        .add_source(
            rust_cli_config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_PREFIX_SEPARATOR)
                .separator(ENV_SEPARATOR),
        )
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}

fn base_dir() -> Result<PathBuf, std::io::Error> {
    Ok(std::env::current_dir()?.join(CONFIGURATION_DIR))
}
