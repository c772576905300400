//! Wire protocol between the engine and display clients: newline-delimited
//! JSON, one tagged event per line, over a persistent duplex TCP session.
//!
//! Frames carry no per-frame identifier; delivery order is capture order,
//! and a client that reconnects mid-stream resynchronizes with `get_modes`
//! plus `start_rendering` rather than resuming a sequence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::audio::AudioSource;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ModeEntry {
    pub name: String,
    pub path: String,
}

fn default_level() -> f32 {
    0.5
}

fn default_frequency() -> f32 {
    440.0
}

/// Events a display client sends to the engine. The supervisory surface
/// (`health_check`, `set_modes_dir`, `shutdown`) rides the same channel.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    GetModes,
    LoadMode {
        path: String,
    },
    /// Load a mode from inline source instead of disk.
    LoadModeContent {
        filename: String,
        content: String,
    },
    KnobChange {
        knob: u8,
        value: f32,
    },
    StartRendering,
    StopRendering,
    SetAudio {
        source: AudioSource,
        #[serde(default = "default_level")]
        level: f32,
        #[serde(default = "default_frequency")]
        frequency: f32,
    },
    /// Client-captured waveform pushed upstream for audio-reactive modes.
    AudioData {
        samples: Vec<f32>,
    },
    HealthCheck,
    SetModesDir {
        dir: String,
    },
    Shutdown,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ModesList {
        modes: Vec<ModeEntry>,
    },
    /// Encoded raster payload (`data:image/jpeg;base64,...`). Delivered in
    /// capture order.
    Frame {
        image: String,
    },
    Status {
        message: String,
        severity: Severity,
    },
    RenderingState {
        is_running: bool,
    },
    Health {
        ready: bool,
    },
}

pub fn encode<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

pub fn decode_client(line: &str) -> Result<ClientEvent, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

pub fn decode_engine(line: &str) -> Result<EngineEvent, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}
