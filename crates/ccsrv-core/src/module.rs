//! Module identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum length of a module name in bytes.
const MAX_MODULE_NAME_LEN: usize = 64;

/// Validated name of a module participating on the bus.
///
/// Names are non-empty, at most 64 bytes, and made of ASCII
/// alphanumerics, `-` and `_`. The name is used for logging and to locate
/// the module's spec file, so it must be safe to embed in a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName(String);

impl ModuleName {
    /// Validates and wraps a module name.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(CoreError::InvalidModuleName {
                name,
                reason: "name is empty".to_string(),
            });
        }

        if name.len() > MAX_MODULE_NAME_LEN {
            return Err(CoreError::InvalidModuleName {
                name,
                reason: format!("longer than {MAX_MODULE_NAME_LEN} bytes"),
            });
        }

        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(CoreError::InvalidModuleName {
                reason: format!("invalid character {bad:?}"),
                name,
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ModuleName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.0
    }
}
