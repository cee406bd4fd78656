//! Version negotiated when a module attaches to the bus.
//!
//! A module announces [`ProtocolVersion::CURRENT`] in its `hello`; the
//! bus replies with its own version in `welcome`. The session refuses to
//! continue when the majors differ.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// `major.minor` version of the bus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Same major, any minor.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// Checks a version announced by the peer against ours.
    pub fn ensure_compatible(&self) -> Result<(), VersionError> {
        if self.is_compatible_with(&Self::CURRENT) {
            return Ok(());
        }
        Err(VersionError::Incompatible {
            peer: *self,
            ours: Self::CURRENT,
        })
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Bus speaks protocol {peer}, module speaks {ours}")]
    Incompatible {
        peer: ProtocolVersion,
        ours: ProtocolVersion,
    },
}
