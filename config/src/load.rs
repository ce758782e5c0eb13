use std::path::{Path, PathBuf};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Stem of the file loaded in every environment.
const BASE_FILE_STEM: &str = "base";

/// Prefix of environment variable overrides, e.g. `APP_PIPELINE__QUERY`.
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";
const LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration structures.
pub trait Config {
    /// Dotted keys whose environment variable values are comma-separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// None of the supported extensions exist for a configuration file.
    #[error("no `{stem}` configuration file in `{directory}`, tried {extensions}")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        extensions: String,
    },

    /// A configuration file exists but does not parse.
    #[error("failed to load configuration file `{path}`: {source}")]
    ConfigurationFileLoad {
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] std::io::Error),

    /// The merged sources do not match the configuration structure.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads `T` from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// Sources are layered, later ones winning: `base.(yaml|yml|json)`, then
/// `{dev|prod}.(yaml|yml|json)`, then `APP_`-prefixed environment variables. Nested keys are
/// separated by `__` in variable names and list keys take comma-separated values.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load()?;

    load_config_from(&current_dir.join(CONFIGURATION_DIR), environment)
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

    let mut builder = rust_cli_config::Config::builder();
    for stem in [BASE_FILE_STEM, environment.as_str()] {
        let path = find_configuration_file(directory, stem)?;
        builder = add_file_source(builder, path)?;
    }

    let settings = builder
        .add_source(environment_source::<T>())
        .build()
        .map_err(LoadConfigError::Deserialization)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn environment_source<T: Config>() -> rust_cli_config::Environment {
    let mut source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        source = source.try_parsing(true).list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            source = source.with_list_parse_key(key);
        }
    }

    source
}

/// Adds the file at `path`, building once so a broken file is reported by name.
fn add_file_source(
    builder: ConfigBuilder<DefaultState>,
    path: PathBuf,
) -> Result<ConfigBuilder<DefaultState>, LoadConfigError> {
    let builder = builder.add_source(rust_cli_config::File::from(path.clone()));
    if let Err(source) = builder.build_cloned() {
        return Err(LoadConfigError::ConfigurationFileLoad { path, source });
    }

    Ok(builder)
}

fn find_configuration_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadConfigError::ConfigurationFileMissing {
            stem: stem.to_owned(),
            directory: directory.to_path_buf(),
            extensions: CONFIG_FILE_EXTENSIONS.join(", "),
        })
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        query: String,
        max_size: usize,
        #[serde(default)]
        drivers: Vec<String>,
    }

    impl Config for TestConfig {
        const LIST_PARSE_KEYS: &'static [&'static str] = &["drivers"];
    }

    fn configuration_dir(name: &str, files: &[(&str, &str)]) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let directory =
            std::env::temp_dir().join(format!("config-{name}-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&directory).unwrap();
        for (name, contents) in files {
            std::fs::write(directory.join(name), contents).unwrap();
        }

        directory
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let directory = configuration_dir(
            "layering",
            &[
                ("base.yaml", "query: select 1\nmax_size: 10\n"),
                ("prod.json", r#"{ "max_size": 500 }"#),
            ],
        );

        let config: TestConfig = load_config_from(&directory, Environment::Prod).unwrap();

        assert_eq!(config.query, "select 1");
        assert_eq!(config.max_size, 500);
        assert!(config.drivers.is_empty());
        std::fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn missing_files_are_reported() {
        let directory =
            configuration_dir("missing", &[("base.yaml", "query: select 1\nmax_size: 10\n")]);

        let err = load_config_from::<TestConfig>(&directory, Environment::Dev).unwrap_err();

        assert!(matches!(
            err,
            LoadConfigError::ConfigurationFileMissing { ref stem, .. } if stem == "dev"
        ));
        std::fs::remove_dir_all(directory).unwrap();

        let err = load_config_from::<TestConfig>(
            Path::new("/nonexistent/configuration"),
            Environment::Dev,
        )
        .unwrap_err();
        assert!(matches!(err, LoadConfigError::MissingConfigurationDirectory(_)));
    }

    #[test]
    fn broken_files_are_reported_by_path() {
        let directory = configuration_dir(
            "broken",
            &[
                ("base.yaml", "query: [unterminated\n"),
                ("dev.yaml", "max_size: 1\n"),
            ],
        );

        let err = load_config_from::<TestConfig>(&directory, Environment::Dev).unwrap_err();

        match err {
            LoadConfigError::ConfigurationFileLoad { path, .. } => {
                assert!(path.ends_with("base.yaml"));
            }
            other => panic!("expected a file load error, got {other:?}"),
        }
        std::fs::remove_dir_all(directory).unwrap();
    }
}
