//! JSON-lines wire format.
//!
//! One request per stdin line, one reply or event per stdout line.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use base64::{engine::general_purpose, Engine as _};
use pcmbridge_core::{Error, FileEvent, StreamEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Malformed request line or arguments.
pub const ERR_BAD_REQUEST: &str = "ERR_BAD_REQUEST";

/// Method name nobody handles.
pub const ERR_NOT_IMPLEMENTED: &str = "ERR_NOT_IMPLEMENTED";

/// Inbound method call.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, WireError> {
        serde_json::from_str(line).map_err(|e| WireError::bad_request(format!("invalid request: {e}")))
    }

    /// Deserialize the arguments into `T`.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        let args = if self.args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.args.clone()
        };
        serde_json::from_value(args)
            .map_err(|e| WireError::bad_request(format!("{}: {e}", self.method)))
    }
}

/// Error body of a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl WireError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ERR_BAD_REQUEST, message)
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::new(ERR_NOT_IMPLEMENTED, format!("{method} is not implemented"))
    }
}

impl From<Error> for WireError {
    fn from(err: Error) -> Self {
        // Failed preconditions are routine for a controller.
        if err.is_session_error() {
            debug!("Rejected: {err}");
        } else {
            warn!("Request failed: {err}");
        }

        let err = err.at_boundary();
        match err {
            Error::InvalidArgument(msg) => Self::bad_request(msg),
            other => Self::new(other.code(), other.to_string()),
        }
    }
}

/// Anything written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Reply { id: Option<u64>, result: Value },
    Failure { id: Option<u64>, error: WireError },
    Event { event: &'static str, payload: Value },
}

impl Outbound {
    pub fn reply(id: Option<u64>, result: impl Into<Value>) -> Self {
        Self::Reply {
            id,
            result: result.into(),
        }
    }

    pub fn ok(id: Option<u64>) -> Self {
        Self::Reply {
            id,
            result: Value::Null,
        }
    }

    pub fn failure(id: Option<u64>, error: impl Into<WireError>) -> Self {
        Self::Failure {
            id,
            error: error.into(),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<StreamEvent> for Outbound {
    fn from(event: StreamEvent) -> Self {
        let payload = match event {
            StreamEvent::Position(ms) => Value::from(ms),
            _ => Value::Null,
        };
        Self::Event {
            event: event.method(),
            payload,
        }
    }
}

impl From<FileEvent> for Outbound {
    fn from(event: FileEvent) -> Self {
        Self::Event {
            event: event.method(),
            payload: Value::String(event.snapshot().to_json()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InitArgs {
    pub samplerate: u32,
    pub nchannels: u32,
    pub nbits: u32,
}

#[derive(Debug, Deserialize)]
pub struct WriteArgs {
    /// Base64 PCM bytes.
    pub buffer: String,
    pub size: usize,
}

impl WriteArgs {
    pub fn decode(&self) -> Result<Vec<u8>, WireError> {
        general_purpose::STANDARD
            .decode(&self.buffer)
            .map_err(|e| WireError::bad_request(format!("buffer is not base64: {e}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct CodecArgs {
    pub codec: i64,
}

#[derive(Debug, Deserialize)]
pub struct PathArgs {
    pub path: String,
}

/// Seek target. Carried in milliseconds despite the name.
#[derive(Debug, Deserialize)]
pub struct SeekArgs {
    pub sec: u64,
}

#[derive(Debug, Deserialize)]
pub struct VolumeArgs {
    pub volume: f64,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionArgs {
    pub sec: f64,
}
