use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Environment variable pointing at another configuration directory.
const CONFIGURATION_DIR_ENV_NAME: &str = "APP_CONFIGURATION_DIR";

const BASE_FILE_STEM: &str = "base";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variable overrides, as in `APP_PIPELINE__ID`.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator of nested keys in environment variable overrides.
const ENV_SEPARATOR: &str = "__";

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// None of the supported extensions matched for a configuration file.
    #[error("could not locate the {stem} configuration in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        attempted: String,
    },

    /// A configuration file exists but is not valid.
    #[error("failed to load the configuration file `{path}`: {source}")]
    ConfigurationFileLoad {
        path: PathBuf,
        source: config::ConfigError,
    },

    /// `APP_ENVIRONMENT` names an unknown environment.
    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[from] io::Error),

    /// The merged sources do not describe a valid configuration.
    #[error("failed to deserialize the configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads the configuration of the current environment.
///
/// Reads `base.(yaml|yml|json)` and then `{environment}.(yaml|yml|json)` from the `configuration`
/// directory, or from `APP_CONFIGURATION_DIR` when set. `APP_`-prefixed environment variables
/// override both files, with nested keys separated by double underscores
/// (`APP_SOURCE__TABLE=customers`).
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let directory = match std::env::var_os(CONFIGURATION_DIR_ENV_NAME) {
        Some(directory) => PathBuf::from(directory),
        None => std::env::current_dir()
            .map_err(LoadConfigError::CurrentDir)?
            .join(CONFIGURATION_DIR),
    };

    load_config_from(&directory, Environment::load()?)
}

/// Loads the configuration of `environment` from the files in `directory`.
fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = configuration_file(directory, BASE_FILE_STEM)?;
    let environment_file = configuration_file(directory, environment.as_str())?;

    let overrides = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    config::Config::builder()
        .add_source(base_file)
        .add_source(environment_file)
        .add_source(overrides)
        .build()
        .and_then(config::Config::try_deserialize)
        .map_err(LoadConfigError::Deserialization)
}

/// Finds the file named `stem` in `directory` and checks that it parses on its own.
///
/// Parsing each file separately attributes syntax errors to the file that contains them.
fn configuration_file(
    directory: &Path,
    stem: &str,
) -> Result<config::File<config::FileSourceFile, config::FileFormat>, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect();

    let Some(path) = candidates.iter().find(|path| path.is_file()) else {
        let attempted = candidates
            .iter()
            .map(|path| format!("`{}`", path.display()))
            .collect::<Vec<_>>()
            .join(", ");

        return Err(LoadConfigError::ConfigurationFileMissing {
            stem: stem.to_string(),
            directory: directory.to_path_buf(),
            attempted,
        });
    };

    config::Config::builder()
        .add_source(config::File::from(path.as_path()))
        .build()
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            path: path.clone(),
            source,
        })?;

    Ok(config::File::from(path.as_path()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct Settings {
        table: String,
        batch: Batch,
    }

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct Batch {
        max_size: usize,
        interval_ms: u64,
    }

    fn configuration_directory(name: &str, files: &[(&str, &str)]) -> PathBuf {
        let directory = std::env::temp_dir().join(format!(
            "mirror-config-{name}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&directory).unwrap();

        for (file_name, content) in files {
            std::fs::write(directory.join(file_name), content).unwrap();
        }

        directory
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let directory = configuration_directory(
            "overrides",
            &[
                (
                    "base.yaml",
                    "table: customers\nbatch:\n  max_size: 1000\n  interval_ms: 1000\n",
                ),
                ("prod.json", r#"{ "batch": { "interval_ms": 250 } }"#),
            ],
        );

        let settings: Settings = load_config_from(&directory, Environment::Prod).unwrap();

        assert_eq!(
            settings,
            Settings {
                table: "customers".to_string(),
                batch: Batch {
                    max_size: 1000,
                    interval_ms: 250,
                },
            }
        );
    }

    #[test]
    fn missing_configuration_file_lists_attempted_paths() {
        let directory = configuration_directory("missing", &[]);

        let err = load_config_from::<Settings>(&directory, Environment::Dev).unwrap_err();
        let message = err.to_string();

        assert!(matches!(err, LoadConfigError::ConfigurationFileMissing { .. }));
        assert!(message.contains("the base configuration"));
        assert!(message.contains("base.yaml"));
        assert!(message.contains("base.json"));
    }

    #[test]
    fn syntax_error_names_the_broken_file() {
        let directory = configuration_directory(
            "broken",
            &[
                (
                    "base.yaml",
                    "table: customers\nbatch:\n  max_size: 1000\n  interval_ms: 1000\n",
                ),
                ("dev.yaml", "batch: [unclosed\n"),
            ],
        );

        let err = load_config_from::<Settings>(&directory, Environment::Dev).unwrap_err();

        let LoadConfigError::ConfigurationFileLoad { path, .. } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(path, directory.join("dev.yaml"));
    }

    #[test]
    fn missing_directory_is_reported() {
        let directory = std::env::temp_dir().join("mirror-config-does-not-exist");

        let err = load_config_from::<Settings>(&directory, Environment::Dev).unwrap_err();

        assert!(matches!(
            err,
            LoadConfigError::MissingConfigurationDirectory(path) if path == directory
        ));
    }
}
