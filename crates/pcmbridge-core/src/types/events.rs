//! Events emitted to the controlling side.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};

/// Streaming-domain notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A session started.
    Started,
    /// The device was paused.
    Paused,
    /// The device resumed after a pause.
    Resumed,
    /// Stop was requested. Teardown follows asynchronously.
    Stopped,
    /// The consumer loop exited and the device was released.
    Completed,
    /// Elapsed playback in milliseconds.
    Position(u64),
}

impl StreamEvent {
    /// Method name used on the wire.
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Started => "audio.onStart",
            Self::Paused => "audio.onPause",
            Self::Resumed => "audio.onResume",
            Self::Stopped => "audio.onStop",
            Self::Completed => "audio.onComplete",
            Self::Position(_) => "audio.onCurrentPosition",
        }
    }
}

/// Duration and position of the file being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub duration_ms: u64,
    pub current_position_ms: u64,
}

/// Wire shape of a snapshot. Values travel as strings.
#[derive(Serialize, Deserialize)]
struct SnapshotWire {
    duration: String,
    current_position: String,
}

impl ProgressSnapshot {
    pub const fn new(duration_ms: u64, current_position_ms: u64) -> Self {
        Self {
            duration_ms,
            current_position_ms,
        }
    }

    /// Encode as the JSON string carried by progress events.
    pub fn to_json(&self) -> String {
        let wire = SnapshotWire {
            duration: self.duration_ms.to_string(),
            current_position: self.current_position_ms.to_string(),
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        let wire: SnapshotWire = serde_json::from_str(json)?;
        let parse = |field: &str, value: &str| {
            value
                .parse::<u64>()
                .map_err(|e| crate::Error::InvalidArgument(format!("{field}: {e}")))
        };
        Ok(Self {
            duration_ms: parse("duration", &wire.duration)?,
            current_position_ms: parse("current_position", &wire.current_position)?,
        })
    }
}

/// File-playback notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// Periodic progress while a file session is live.
    Progress(ProgressSnapshot),
    /// The file played to the end.
    Finished(ProgressSnapshot),
}

impl FileEvent {
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Progress(_) => "updateProgress",
            Self::Finished(_) => "audioPlayerDidFinishPlaying",
        }
    }

    pub const fn snapshot(&self) -> &ProgressSnapshot {
        match self {
            Self::Progress(s) | Self::Finished(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_wire_format() {
        let json = ProgressSnapshot::new(180_000, 1_500).to_json();
        assert_eq!(json, r#"{"duration":"180000","current_position":"1500"}"#);
        assert_eq!(
            ProgressSnapshot::from_json(&json).unwrap(),
            ProgressSnapshot::new(180_000, 1_500)
        );
    }

    #[test]
    fn test_snapshot_rejects_garbage() {
        assert!(ProgressSnapshot::from_json(r#"{"duration":"x","current_position":"1"}"#).is_err());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(StreamEvent::Position(5).method(), "audio.onCurrentPosition");
        assert_eq!(
            FileEvent::Finished(ProgressSnapshot::default()).method(),
            "audioPlayerDidFinishPlaying"
        );
    }
}
