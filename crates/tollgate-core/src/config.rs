//! Tollgate configuration.
//!
//! Loaded from `~/.tollgate/tollgate.toml` unless another file is given:
//!
//! ```toml
//! [plugins]
//! modules = ["/opt/tollgate/plugins/libauth.so", "linked:echo"]
//!
//! [plugins.policy]
//! allowed_dirs = ["/opt/tollgate/plugins"]
//! max_file_size = 104857600
//! require_platform_extension = true
//! ```
//!
//! `TOLLGATE_PLUGINS` (a platform path list, `:`-separated on Unix)
//! replaces `plugins.modules` when set.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::plugin::{LoadPolicy, ModuleReference};

/// Environment variable overriding the plugin module list.
pub const PLUGINS_ENV: &str = "TOLLGATE_PLUGINS";

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "tollgate.toml";

/// Top level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TollgateConfig {
    pub plugins: PluginsConfig,
}

/// `[plugins]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginsConfig {
    /// Modules to load, in order.
    pub modules: Vec<ModuleReference>,

    /// Checks applied to native module files.
    pub policy: LoadPolicy,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// `~/.tollgate/tollgate.toml`, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tollgate").join(CONFIG_FILE_NAME))
}

impl TollgateConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read a config file. The file must exist.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(category = "config", path = %path.display(), "Config file loaded");
        Ok(config)
    }

    /// Load the effective configuration.
    ///
    /// With an explicit path the file must exist. Without one, the default
    /// file is read when present and an empty configuration is used
    /// otherwise. The `TOLLGATE_PLUGINS` override is applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => {
                    debug!(category = "config", "No config file, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_override(std::env::var_os(PLUGINS_ENV).as_deref());
        Ok(config)
    }

    /// Replace the module list with the entries of a path-list value.
    ///
    /// `None` leaves the configuration untouched; an empty value clears the
    /// list.
    pub fn apply_env_override(&mut self, value: Option<&OsStr>) {
        let Some(value) = value else {
            return;
        };
        self.plugins.modules = std::env::split_paths(value)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| ModuleReference::from(p.as_path()))
            .collect();
        info!(
            category = "config",
            count = self.plugins.modules.len(),
            "Plugin list overridden by {}",
            PLUGINS_ENV
        );
    }
}
