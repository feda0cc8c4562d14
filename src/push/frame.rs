//! Push-channel frame model.
//!
//! Inbound frames are UTF-8 JSON objects discriminated by a string `type`
//! field. Anything else is malformed and gets dropped by the dispatcher.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Frame kinds
// ---------------------------------------------------------------------------

pub const KIND_STATUS: &str = "status";
pub const KIND_AGENT_STATUS: &str = "agent_status";
pub const KIND_TASK_UPDATE: &str = "task_update";
pub const KIND_LOGS: &str = "logs";
pub const KIND_LOG: &str = "log";
pub const KIND_BUS_MESSAGE: &str = "bus_message";
pub const KIND_COMMAND_OUTPUT: &str = "command_output";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("frame kind '{expected}' expected, got '{actual}'")]
    UnexpectedKind { expected: String, actual: String },
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFrame {
    kind: String,
    body: serde_json::Value,
    arrival: u64,
}

impl PushFrame {
    /// Decode `text`, stamping it with its arrival sequence.
    pub fn parse(text: &str, arrival: u64) -> Result<Self, FrameError> {
        let body: serde_json::Value = serde_json::from_str(text)?;
        let kind = body
            .as_object()
            .ok_or(FrameError::NotAnObject)?
            .get("type")
            .and_then(|value| value.as_str())
            .ok_or(FrameError::MissingType)?
            .to_string();
        Ok(Self {
            kind,
            body,
            arrival,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The whole frame object, `type` included.
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Position in the manager's delivery order.
    pub fn arrival(&self) -> u64 {
        self.arrival
    }

    /// Decode the frame object into `T`, ignoring the `type` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(T::deserialize(&self.body)?)
    }

    /// Log lines carried by a `logs` batch or a single `log` frame.
    pub fn log_lines(&self) -> Result<Vec<LogLine>, FrameError> {
        match self.kind.as_str() {
            KIND_LOGS => Ok(self.decode::<LogBatch>()?.lines),
            KIND_LOG => Ok(vec![self.decode::<LogLine>()?]),
            other => Err(FrameError::UnexpectedKind {
                expected: KIND_LOGS.to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn bus_message(&self) -> Result<BusMessage, FrameError> {
        self.expect_kind(KIND_BUS_MESSAGE)?;
        self.decode()
    }

    pub fn status(&self) -> Result<StatusUpdate, FrameError> {
        match self.kind.as_str() {
            KIND_STATUS | KIND_AGENT_STATUS | KIND_TASK_UPDATE => self.decode(),
            other => Err(FrameError::UnexpectedKind {
                expected: KIND_STATUS.to_string(),
                actual: other.to_string(),
            }),
        }
    }

    pub fn command_output(&self) -> Result<CommandOutputFrame, FrameError> {
        self.expect_kind(KIND_COMMAND_OUTPUT)?;
        self.decode()
    }

    fn expect_kind(&self, expected: &str) -> Result<(), FrameError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(FrameError::UnexpectedKind {
                expected: expected.to_string(),
                actual: self.kind.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogBatch {
    lines: Vec<LogLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Command output delivered over the push channel; mirrors the polled shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutputFrame {
    pub command_id: String,
    pub offset: u64,
    pub text: String,
    #[serde(default)]
    pub stream: Option<String>,
}

/// Outbound payload. Only delivered while connected; never queued.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Json(serde_json::Value),
    Text(String),
}

impl OutboundMessage {
    pub fn into_text(self) -> Result<String, serde_json::Error> {
        match self {
            Self::Json(value) => serde_json::to_string(&value),
            Self::Text(text) => Ok(text),
        }
    }
}

impl From<serde_json::Value> for OutboundMessage {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for OutboundMessage {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for OutboundMessage {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
