//! Configuration file resolution and environment overrides.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_LINK";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_LINK_CONFIG";

/// Config file looked up in the working directory.
const LOCAL_CONFIG_FILE: &str = "serial-link.toml";

/// Config file name inside the platform config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

/// A loaded configuration and the file it came from, if any.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// 1. `SERIAL_LINK_CONFIG` (explicit path)
    /// 2. `./serial-link.toml`
    /// 3. `config.toml` in the platform config directory
    /// 4. Built-in defaults
    ///
    /// `SERIAL_LINK_<SECTION>_<KEY>` variables override file values.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match &config_path {
            Some(path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides; bad overrides are ignored.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    default_config_path().filter(|path| path.exists())
}

/// Where a user-level config file lives on this platform.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-link").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(toml::from_str(&content)?)
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    let write_error = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(write_error)
}

/// Read `SERIAL_LINK_<suffix>` and parse it, if set.
fn env_value<T: FromStr>(suffix: &str, what: &str) -> ConfigResult<Option<T>> {
    let var = format!("{ENV_PREFIX}_{suffix}");
    match std::env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(var, format!("invalid {what}: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides to the configuration.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(port) = env_value::<String>("SERIAL_PORT", "port")? {
        config.serial.port = Some(port);
    }
    if let Some(baud) = env_value("SERIAL_BAUD", "baud rate")? {
        config.serial.baud = baud;
    }
    if let Some(bits) = env_value("SERIAL_DATA_BITS", "data bit count")? {
        config.serial.data_bits = bits;
    }
    if let Some(parity) = env_value("SERIAL_PARITY", "parity")? {
        config.serial.parity = parity;
    }
    if let Some(flow) = env_value("SERIAL_FLOW_CONTROL", "flow control")? {
        config.serial.flow_control = flow;
    }
    if let Some(raw) = env_value::<String>("SERIAL_DEBUG", "flag")? {
        config.serial.debug = parse_bool(&raw).ok_or_else(|| {
            ConfigError::env_parse(format!("{ENV_PREFIX}_SERIAL_DEBUG"), "expected true or false")
        })?;
    }
    if let Some(level) = env_value::<String>("LOGGING_LEVEL", "log level")? {
        config.logging.level = level;
    }

    Ok(())
}
