//! Protocol message types exchanged with the bus.

use std::path::PathBuf;

use ccsrv_core::{Answer, ModuleName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::ProtocolVersion;

/// Messages delivered by the bus to a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// Reply to the module's hello, carrying the bus protocol version
    Welcome { protocol_version: ProtocolVersion },

    /// Configuration update for the module
    Config {
        /// New configuration (typically a JSON object)
        config: Value,
        /// Sequence number echoed in the answer
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },

    /// Administrative command addressed to the module
    Command {
        /// Command name, e.g. "shutdown"
        command: String,
        /// Command arguments
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
        /// Sequence number echoed in the answer
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl BusMessage {
    /// Creates a welcome with the current protocol version.
    pub fn welcome() -> Self {
        Self::Welcome {
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a configuration update.
    pub fn config(config: Value) -> Self {
        Self::Config { config, seq: None }
    }

    /// Creates a command without arguments.
    pub fn command(command: &str) -> Self {
        Self::Command {
            command: command.to_string(),
            args: None,
            seq: None,
        }
    }

    /// Creates a command with arguments.
    pub fn command_with_args(command: &str, args: Value) -> Self {
        Self::Command {
            command: command.to_string(),
            args: Some(args),
            seq: None,
        }
    }

    /// Attaches a sequence number.
    pub fn with_seq(mut self, value: u64) -> Self {
        match &mut self {
            Self::Config { seq, .. } | Self::Command { seq, .. } => *seq = Some(value),
            Self::Welcome { .. } => {}
        }
        self
    }

    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Config { seq, .. } | Self::Command { seq, .. } => *seq,
            Self::Welcome { .. } => None,
        }
    }
}

/// Messages sent by a module to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleMessage {
    /// Sent once when the session is opened
    Hello {
        protocol_version: ProtocolVersion,
        module: ModuleName,
        /// Location of the module's specification file
        spec_file: PathBuf,
    },

    /// Reply to a delivered configuration update or command
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        answer: Answer,
    },

    /// The module is about to leave the bus
    Stopping {
        module: ModuleName,
        at: DateTime<Utc>,
    },
}

impl ModuleMessage {
    /// Creates a hello message with the current protocol version.
    pub fn hello(module: ModuleName, spec_file: impl Into<PathBuf>) -> Self {
        Self::Hello {
            protocol_version: ProtocolVersion::CURRENT,
            module,
            spec_file: spec_file.into(),
        }
    }

    /// Creates an answer reply.
    pub fn answer(seq: Option<u64>, answer: Answer) -> Self {
        Self::Answer { seq, answer }
    }

    /// Creates a stopping notification stamped with the current time.
    pub fn stopping(module: ModuleName) -> Self {
        Self::Stopping {
            module,
            at: Utc::now(),
        }
    }
}
