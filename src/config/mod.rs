//! Configuration for discovery sweeps.
//!
//! Handles loading the ~/.devdisc.toml file and holds the typed options a
//! sweep reads: credentials, the post-action switch, timeouts and any
//! free-form extension options.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogConfig;
use crate::session::{Credentials, RemoteOs, SessionOptions};

/// Name of the configuration file in the home directory.
pub const CONFIG_FILE_NAME: &str = ".devdisc.toml";

/// Errors raised while loading or editing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read config file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("Invalid config file {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A built-in option was given a value of the wrong type.
    #[error("Option {option} expects {expected}")]
    TypeMismatch {
        /// Option being set.
        option: ConfigurationOption,
        /// Description of the accepted values.
        expected: &'static str,
    },

    /// The file holds a value no sweep can use.
    #[error("Invalid value for {option} in {path}: expected {expected}")]
    Invalid {
        /// File that failed.
        path: PathBuf,
        /// Offending option.
        option: ConfigurationOption,
        /// Description of the accepted values.
        expected: &'static str,
    },
}

/// Opaque key of a configuration option.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationOption(String);

impl ConfigurationOption {
    /// Key for the SSH username.
    pub const USERNAME: &'static str = "username";
    /// Key for the SSH password.
    pub const PASSWORD: &'static str = "password";
    /// Key for the post-discovery switch.
    pub const RUN_POST_ACTIONS: &'static str = "run_post_actions";
    /// Key for the per-command timeout in seconds.
    pub const COMMAND_TIMEOUT: &'static str = "command_timeout";
    /// Key for the connect timeout in seconds.
    pub const CONNECT_TIMEOUT: &'static str = "connect_timeout";
    /// Key for the SSH port.
    pub const PORT: &'static str = "port";
    /// Key for the number of devices processed concurrently.
    pub const DEVICE_PARALLELISM: &'static str = "device_parallelism";
    /// Key for the remote platform.
    pub const REMOTE_OS: &'static str = "remote_os";

    /// Creates an option key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the built-in key this option names, accepting the camelCase
    /// spellings (`runPostActions`) as well. Other keys are returned as is.
    #[must_use]
    pub fn canonical(&self) -> &str {
        match self.0.as_str() {
            "runPostActions" => Self::RUN_POST_ACTIONS,
            "commandTimeout" => Self::COMMAND_TIMEOUT,
            "connectTimeout" => Self::CONNECT_TIMEOUT,
            "deviceParallelism" => Self::DEVICE_PARALLELISM,
            "remoteOs" => Self::REMOTE_OS,
            other => other,
        }
    }
}

impl From<&str> for ConfigurationOption {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for ConfigurationOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text.
    Text(String),
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Types a [`ConfigValue`] can be read back as.
pub trait FromConfigValue: Sized {
    /// Converts `value`, or returns `None` if it holds another type.
    fn from_config_value(value: &ConfigValue) -> Option<Self>;
}

impl FromConfigValue for bool {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromConfigValue for i64 {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromConfigValue for String {
    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Options read by a discovery sweep.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationStore {
    username: Option<String>,
    password: Option<String>,
    #[serde(alias = "runPostActions")]
    run_post_actions: bool,
    /// Seconds.
    #[serde(alias = "commandTimeout")]
    command_timeout: u64,
    /// Seconds.
    #[serde(alias = "connectTimeout")]
    connect_timeout: u64,
    port: u16,
    #[serde(alias = "deviceParallelism")]
    device_parallelism: usize,
    #[serde(alias = "remoteOs")]
    remote_os: RemoteOs,
    log: LogConfig,
    #[serde(flatten)]
    extra: BTreeMap<ConfigurationOption, ConfigValue>,
}

impl Default for ConfigurationStore {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            run_post_actions: true,
            command_timeout: 300,
            connect_timeout: 10,
            port: 22,
            device_parallelism: 1,
            remote_os: RemoteOs::Linux,
            log: LogConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("run_post_actions", &self.run_post_actions)
            .field("command_timeout", &self.command_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("port", &self.port)
            .field("device_parallelism", &self.device_parallelism)
            .field("remote_os", &self.remote_os)
            .field("log", &self.log)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConfigurationStore {
    /// Creates a store with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the default config path (~/.devdisc.toml).
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }

    /// Parses a store from TOML text.
    ///
    /// # Errors
    /// Returns error if the text does not match the schema, or if `port`
    /// or `device_parallelism` is zero.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let store: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        store.validate(origin)?;
        Ok(store)
    }

    fn validate(&self, origin: &Path) -> Result<(), ConfigError> {
        let invalid = |option: &str, expected| ConfigError::Invalid {
            path: origin.to_path_buf(),
            option: ConfigurationOption::new(option),
            expected,
        };
        if self.port == 0 {
            return Err(invalid(ConfigurationOption::PORT, "a port number"));
        }
        if self.device_parallelism == 0 {
            return Err(invalid(ConfigurationOption::DEVICE_PARALLELISM, "a positive integer"));
        }
        Ok(())
    }

    /// Loads the store from `path`.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_toml(&text, path)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(store)
    }

    /// Loads the store from `path`, or returns defaults if it does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// SSH username, if configured.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    /// SSH password, if configured.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Credentials copied into every discovered device. Missing values are
    /// empty strings.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.username().unwrap_or_default(),
            self.password().unwrap_or_default(),
        )
    }

    /// Whether post-discovery actions run.
    #[must_use]
    pub fn run_post_actions(&self) -> bool {
        self.run_post_actions
    }

    /// Time allowed for a single remote command.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    /// Time allowed to open a session.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// SSH port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of devices processed at once (at least 1).
    #[must_use]
    pub fn device_parallelism(&self) -> usize {
        self.device_parallelism.max(1)
    }

    /// Remote platform.
    #[must_use]
    pub fn remote_os(&self) -> RemoteOs {
        self.remote_os
    }

    /// Logging configuration.
    #[must_use]
    pub fn log_config(&self) -> &LogConfig {
        &self.log
    }

    /// Session options derived from the timeouts and platform.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: self.connect_timeout(),
            command_timeout: self.command_timeout(),
            remote_os: self.remote_os,
        }
    }

    /// Sets the SSH username.
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    /// Sets the SSH password.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    /// Enables or disables post-discovery actions.
    pub fn set_run_post_actions(&mut self, enabled: bool) {
        self.run_post_actions = enabled;
    }

    /// Sets the per-command timeout.
    pub fn set_command_timeout(&mut self, timeout: Duration) {
        self.command_timeout = timeout.as_secs();
    }

    /// Sets the connect timeout.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout.as_secs();
    }

    /// Sets the SSH port.
    ///
    /// # Panics
    /// Panics if `port` is zero.
    pub fn set_port(&mut self, port: u16) {
        assert!(port > 0, "port must be positive");
        self.port = port;
    }

    /// Sets how many devices are processed at once.
    pub fn set_device_parallelism(&mut self, parallelism: usize) {
        self.device_parallelism = parallelism.max(1);
    }

    /// Sets the remote platform.
    pub fn set_remote_os(&mut self, os: RemoteOs) {
        self.remote_os = os;
    }

    /// Sets the log level.
    pub fn set_log_level(&mut self, level: &str) {
        self.log.level = LogConfig::parse_level(level);
    }

    /// Enables or disables the log file.
    pub fn set_log_file(&mut self, enabled: bool) {
        self.log.file = enabled;
    }

    /// Sets any option by key.
    ///
    /// Built-in keys are type checked; unknown keys are stored as given.
    ///
    /// # Errors
    /// Returns [`ConfigError::TypeMismatch`] if a built-in key receives a
    /// value it cannot hold. The store is unchanged in that case.
    pub fn set(
        &mut self,
        option: impl Into<ConfigurationOption>,
        value: impl Into<ConfigValue>,
    ) -> Result<(), ConfigError> {
        let option = option.into();
        let value = value.into();
        let mismatch = |expected| ConfigError::TypeMismatch {
            option: option.clone(),
            expected,
        };

        match (option.canonical(), &value) {
            (ConfigurationOption::USERNAME, ConfigValue::Text(s)) => self.username = Some(s.clone()),
            (ConfigurationOption::PASSWORD, ConfigValue::Text(s)) => self.password = Some(s.clone()),
            (ConfigurationOption::RUN_POST_ACTIONS, ConfigValue::Bool(b)) => {
                self.run_post_actions = *b;
            }
            (ConfigurationOption::COMMAND_TIMEOUT, ConfigValue::Integer(i)) => {
                self.command_timeout = u64::try_from(*i).map_err(|_| mismatch("a non-negative integer"))?;
            }
            (ConfigurationOption::CONNECT_TIMEOUT, ConfigValue::Integer(i)) => {
                self.connect_timeout = u64::try_from(*i).map_err(|_| mismatch("a non-negative integer"))?;
            }
            (ConfigurationOption::PORT, ConfigValue::Integer(i)) => {
                self.port = u16::try_from(*i)
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| mismatch("a port number"))?;
            }
            (ConfigurationOption::DEVICE_PARALLELISM, ConfigValue::Integer(i)) => {
                self.device_parallelism = usize::try_from(*i)
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| mismatch("a positive integer"))?;
            }
            (ConfigurationOption::REMOTE_OS, ConfigValue::Text(s)) => {
                self.remote_os = match s.to_lowercase().as_str() {
                    "linux" => RemoteOs::Linux,
                    "mac" | "macos" => RemoteOs::Mac,
                    "windows" => RemoteOs::Windows,
                    _ => return Err(mismatch("linux, mac or windows")),
                };
            }
            (ConfigurationOption::USERNAME | ConfigurationOption::PASSWORD, _) => {
                return Err(mismatch("text"));
            }
            (ConfigurationOption::RUN_POST_ACTIONS, _) => return Err(mismatch("a boolean")),
            (
                ConfigurationOption::COMMAND_TIMEOUT
                | ConfigurationOption::CONNECT_TIMEOUT
                | ConfigurationOption::PORT
                | ConfigurationOption::DEVICE_PARALLELISM,
                _,
            ) => return Err(mismatch("an integer")),
            (ConfigurationOption::REMOTE_OS, _) => return Err(mismatch("text")),
            _ => {
                self.extra.insert(option.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Returns the raw value of any option, if set.
    #[must_use]
    pub fn value(&self, option: &ConfigurationOption) -> Option<ConfigValue> {
        let integer = |v: u64| i64::try_from(v).ok().map(ConfigValue::Integer);
        match option.canonical() {
            ConfigurationOption::USERNAME => self.username.clone().map(ConfigValue::Text),
            ConfigurationOption::PASSWORD => self.password.clone().map(ConfigValue::Text),
            ConfigurationOption::RUN_POST_ACTIONS => Some(ConfigValue::Bool(self.run_post_actions)),
            ConfigurationOption::COMMAND_TIMEOUT => integer(self.command_timeout),
            ConfigurationOption::CONNECT_TIMEOUT => integer(self.connect_timeout),
            ConfigurationOption::PORT => Some(ConfigValue::Integer(i64::from(self.port))),
            ConfigurationOption::DEVICE_PARALLELISM => integer(self.device_parallelism() as u64),
            ConfigurationOption::REMOTE_OS => {
                let name = match self.remote_os {
                    RemoteOs::Linux => "linux",
                    RemoteOs::Mac => "mac",
                    RemoteOs::Windows => "windows",
                };
                Some(ConfigValue::Text(name.to_string()))
            }
            _ => self.extra.get(option).cloned(),
        }
    }

    /// Returns an option as `T`, or `None` if unset or of another type.
    #[must_use]
    pub fn typed_value<T: FromConfigValue>(&self, option: &ConfigurationOption) -> Option<T> {
        self.value(option)
            .as_ref()
            .and_then(T::from_config_value)
    }
}
