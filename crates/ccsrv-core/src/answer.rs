//! Answers returned by configuration and command handlers.
//!
//! Handlers never fail by returning an error; they encode the outcome in
//! an [`Answer`]. On the wire an answer looks like
//! `{"result": [0]}`, `{"result": [0, <value>]}` or
//! `{"result": [1, "message"]}`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::CoreError;

/// Status code of a successful answer.
pub const STATUS_SUCCESS: i32 = 0;

/// Status code used for generic failures (unknown command, rejected config).
pub const STATUS_FAILURE: i32 = 1;

/// Structured result of a handler: a status code plus an optional payload.
///
/// A zero status means success and the payload, if any, is an arbitrary
/// value. A non-zero status means failure and the payload is a
/// human-readable message.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    status: i32,
    payload: Option<Value>,
}

impl Answer {
    /// Success answer without a payload.
    pub fn success() -> Self {
        Self {
            status: STATUS_SUCCESS,
            payload: None,
        }
    }

    /// Success answer carrying a value.
    pub fn success_with(value: Value) -> Self {
        Self {
            status: STATUS_SUCCESS,
            payload: Some(value),
        }
    }

    /// Failure answer with the given status and message.
    ///
    /// A zero `status` is coerced to [`STATUS_FAILURE`] so that a failure
    /// can never be mistaken for success.
    pub fn failure(status: i32, message: impl Into<String>) -> Self {
        let status = if status == STATUS_SUCCESS {
            STATUS_FAILURE
        } else {
            status
        };
        Self {
            status,
            payload: Some(Value::String(message.into())),
        }
    }

    /// The answer given for a command nobody handles.
    pub fn unknown_command(name: &str) -> Self {
        Self::failure(STATUS_FAILURE, format!("Unknown command: {name}"))
    }

    pub fn status(&self) -> i32 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Payload of a successful answer.
    pub fn value(&self) -> Option<&Value> {
        if self.is_success() {
            self.payload.as_ref()
        } else {
            None
        }
    }

    /// Message of a failed answer.
    pub fn message(&self) -> Option<&str> {
        if self.is_success() {
            None
        } else {
            self.payload.as_ref().and_then(Value::as_str)
        }
    }

    /// Decodes an answer from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let wire: WireAnswer =
            serde_json::from_value(value).map_err(|e| CoreError::MalformedAnswer {
                reason: e.to_string(),
            })?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireAnswer) -> Result<Self, CoreError> {
        let mut parts = wire.result.into_iter();

        let status = parts
            .next()
            .ok_or_else(|| CoreError::MalformedAnswer {
                reason: "empty result list".to_string(),
            })?
            .as_i64()
            .and_then(|s| i32::try_from(s).ok())
            .ok_or_else(|| CoreError::MalformedAnswer {
                reason: "status is not a 32-bit integer".to_string(),
            })?;

        let payload = parts.next();
        if parts.next().is_some() {
            return Err(CoreError::MalformedAnswer {
                reason: "more than two result elements".to_string(),
            });
        }

        if status != STATUS_SUCCESS && !matches!(payload, None | Some(Value::String(_))) {
            return Err(CoreError::MalformedAnswer {
                reason: "failure payload must be a string".to_string(),
            });
        }

        Ok(Self { status, payload })
    }
}

impl Default for Answer {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_success(), &self.payload) {
            (true, None) => write!(f, "success"),
            (true, Some(value)) => write!(f, "success: {value}"),
            (false, _) => write!(
                f,
                "error {}: {}",
                self.status,
                self.message().unwrap_or("(no message)")
            ),
        }
    }
}

/// Wire representation: `{"result": [status, payload?]}`.
#[derive(Serialize, Deserialize)]
struct WireAnswer {
    result: Vec<Value>,
}

impl From<&Answer> for WireAnswer {
    fn from(answer: &Answer) -> Self {
        let mut result = vec![Value::from(answer.status)];
        if let Some(payload) = &answer.payload {
            result.push(payload.clone());
        }
        Self { result }
    }
}

impl Serialize for Answer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireAnswer::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Answer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireAnswer::deserialize(deserializer)?;
        Answer::from_wire(wire).map_err(serde::de::Error::custom)
    }
}
