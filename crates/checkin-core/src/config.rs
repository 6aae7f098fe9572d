use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Name of the settings file looked up from the current directory upwards
pub const CONFIG_FILE: &str = "checkin.toml";

/// Errors while loading the [`Config`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file could not be read
    #[error("could not read {path}: {source}")]
    Read {
        /// File being read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// Settings file is not valid TOML for a [`Config`]
    #[error("invalid settings: {0}")]
    Toml(#[from] toml::de::Error),
    /// An environment override could not be parsed
    #[error("invalid value for {var}: {value:?}")]
    Env {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: OsString,
    },
    /// The maximum wait must be at least one second
    #[error("max-wait must be at least 1 second")]
    MaxWait,
}

/// Configuration of the check-in system
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    /// Seconds a client waits for an answer, and the ceiling of the worker's
    /// acknowledgement delay
    pub max_wait: u32,
    /// Path of the request channel (named pipe)
    pub fifo: PathBuf,
    /// Path of the passenger database
    pub database: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_wait: 5,
            fifo: PathBuf::from("server.fifo"),
            database: PathBuf::from("bd_passageiros.dat"),
        }
    }
}

impl Config {
    /// Load the configuration
    ///
    /// Starts from the defaults, applies the first `checkin.toml` found in the
    /// current directory or one of its parents, then the `CHECKIN_MAX_WAIT`,
    /// `CHECKIN_FIFO` and `CHECKIN_DATABASE` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Read {
            path: PathBuf::from("."),
            source,
        })?;
        let config = match find_file(&cwd)? {
            Some((path, contents)) => {
                let config = Self::from_toml(&contents)?;
                relative_to(config, path.parent().unwrap_or(Path::new(".")))
            }
            None => Self::default(),
        };
        config.with_overrides(std::env::vars_os())
    }

    /// Parse a settings file; missing keys keep their defaults
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()
    }

    /// Apply `CHECKIN_*` overrides from an environment listing
    pub fn with_overrides<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        for (key, value) in vars {
            match key.to_str() {
                Some("CHECKIN_MAX_WAIT") => {
                    self.max_wait = value
                        .to_str()
                        .and_then(|v| v.trim().parse().ok())
                        .ok_or(ConfigError::Env {
                            var: "CHECKIN_MAX_WAIT",
                            value,
                        })?;
                }
                Some("CHECKIN_FIFO") => self.fifo = PathBuf::from(value),
                Some("CHECKIN_DATABASE") => self.database = PathBuf::from(value),
                _ => {}
            }
        }
        self.validate()
    }

    /// Reject settings the system cannot run with
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_wait == 0 {
            return Err(ConfigError::MaxWait);
        }
        Ok(self)
    }
}

fn find_file(start: &Path) -> Result<Option<(PathBuf, String)>, ConfigError> {
    let mut path = start.to_path_buf();
    loop {
        path.push(CONFIG_FILE);

        match std::fs::read_to_string(&path) {
            Ok(s) => return Ok(Some((path, s))),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(ConfigError::Read { path, source }),
        }

        path.pop();
        if !path.pop() {
            return Ok(None);
        }
    }
}

/// Resolve relative paths against the directory holding the settings file
fn relative_to(mut config: Config, root: &Path) -> Config {
    if config.fifo.is_relative() {
        config.fifo = root.join(&config.fifo);
    }
    if config.database.is_relative() {
        config.database = root.join(&config.database);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(list: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        list.iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let config = Config::from_toml("max-wait = 2").unwrap();
        assert_eq!(config.max_wait, 2);
        assert_eq!(config.fifo, PathBuf::from("server.fifo"));
        assert_eq!(config.database, PathBuf::from("bd_passageiros.dat"));
    }

    #[test]
    fn rejects_zero_wait_and_unknown_keys() {
        assert!(matches!(
            Config::from_toml("max-wait = 0"),
            Err(ConfigError::MaxWait)
        ));
        assert!(matches!(
            Config::from_toml("seats = 3"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn environment_overrides() {
        let config = Config::default()
            .with_overrides(vars(&[
                ("CHECKIN_MAX_WAIT", "9"),
                ("CHECKIN_FIFO", "/tmp/x.fifo"),
                ("HOME", "/root"),
            ]))
            .unwrap();
        assert_eq!(config.max_wait, 9);
        assert_eq!(config.fifo, PathBuf::from("/tmp/x.fifo"));

        let err = Config::default()
            .with_overrides(vars(&[("CHECKIN_MAX_WAIT", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "CHECKIN_MAX_WAIT", .. }));
    }

    #[test]
    fn relative_paths_follow_the_settings_file() {
        let config = relative_to(Config::default(), Path::new("/srv/checkin"));
        assert_eq!(config.fifo, PathBuf::from("/srv/checkin/server.fifo"));
        assert_eq!(
            config.database,
            PathBuf::from("/srv/checkin/bd_passageiros.dat")
        );
    }
}
