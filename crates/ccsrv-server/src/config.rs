//! Server configuration and module locators.
//!
//! Configuration is resolved in increasing precedence from built-in
//! defaults, an optional TOML file and the environment:
//!
//! ```toml
//! socket_path = "/run/ccsrv/bus.sock"
//! spec_dir = "/usr/share/ccsrv/spec"
//! ```
//!
//! | Variable         | Overrides     |
//! |------------------|---------------|
//! | `CCSRV_SOCKET`   | `socket_path` |
//! | `CCSRV_SPEC_DIR` | `spec_dir`    |

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ccsrv_core::ModuleName;

/// Environment variable overriding the bus socket path.
pub const SOCKET_ENV: &str = "CCSRV_SOCKET";

/// Environment variable overriding the spec file directory.
pub const SPEC_DIR_ENV: &str = "CCSRV_SPEC_DIR";

/// Default directory holding module spec files.
pub const DEFAULT_SPEC_DIR: &str = "/usr/share/ccsrv/spec";

/// Socket path used when no runtime directory is available.
const FALLBACK_SOCKET_PATH: &str = "/tmp/ccsrv.sock";

/// Extension of module spec files.
const SPEC_FILE_EXTENSION: &str = "spec";

/// Settings shared by every module process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Unix socket of the control-channel bus
    pub socket_path: PathBuf,

    /// Directory of module spec files
    pub spec_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            spec_dir: PathBuf::from(DEFAULT_SPEC_DIR),
        }
    }
}

/// `$XDG_RUNTIME_DIR/ccsrv/bus.sock`, or `/tmp/ccsrv.sock` without one.
fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .map(|dir| dir.join("ccsrv").join("bus.sock"))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_SOCKET_PATH))
}

impl ServerConfig {
    /// Resolves the configuration: defaults, then `path` if given, then
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Reads a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(ConfigError::Parse)
    }

    /// Applies environment-style overrides looked up through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(socket) = lookup(SOCKET_ENV) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(spec_dir) = lookup(SPEC_DIR_ENV) {
            self.spec_dir = PathBuf::from(spec_dir);
        }
        self
    }

    /// Where the session for `module` connects and which spec file
    /// describes it.
    pub fn locator_for(&self, module: &ModuleName) -> ModuleLocator {
        let spec_file = self
            .spec_dir
            .join(module.as_str())
            .with_extension(SPEC_FILE_EXTENSION);

        ModuleLocator {
            module: module.clone(),
            socket_path: self.socket_path.clone(),
            spec_file,
        }
    }
}

/// Everything a session opener needs to attach one module to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLocator {
    pub module: ModuleName,
    pub socket_path: PathBuf,
    pub spec_file: PathBuf,
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Invalid config in {}: {source}", .path.display())]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[source] toml::de::Error),
}
