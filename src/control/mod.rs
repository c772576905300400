//! Live snapshot of everything external a mode can react to: knobs, audio
//! buffers, MIDI state, palette colors and the auto-clear flag.
//!
//! Inbound transport events are the only writers; the scheduler takes an
//! owned [`ControlState`] snapshot at each tick boundary, so a mode never
//! observes a mid-invocation change.

pub mod audio;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::util::{hue_to_rgb, unit};
use audio::{AudioSim, AudioSource, BUFFER_SIZE, peak_level};

pub const KNOB_COUNT: usize = 5;
pub const MIDI_NOTE_COUNT: usize = 128;

/// Default render resolution, matching the reference hardware output.
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

#[derive(Clone, Debug)]
pub struct ControlState {
    pub knobs: [f32; KNOB_COUNT],

    pub audio_in: Vec<f32>,
    pub audio_left: Vec<f32>,
    pub audio_right: Vec<f32>,
    pub audio_peak: f32,
    pub audio_peak_r: f32,
    /// Edge-triggered: true only on the tick where the peak level crossed
    /// the trigger threshold upward.
    pub audio_trig: bool,

    pub midi_note: i64,
    pub midi_velocity: i64,
    pub midi_note_new: bool,
    pub midi_notes: Vec<i64>,

    pub bg_color: [u8; 3],
    pub fg_color: [u8; 3],
    pub auto_clear: bool,

    pub mode_name: String,
    pub frame_count: u64,
    pub fps: f32,
    pub width: u32,
    pub height: u32,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            knobs: [0.5; KNOB_COUNT],
            audio_in: vec![0.0; BUFFER_SIZE],
            audio_left: vec![0.0; BUFFER_SIZE],
            audio_right: vec![0.0; BUFFER_SIZE],
            audio_peak: 0.0,
            audio_peak_r: 0.0,
            audio_trig: false,
            midi_note: 60,
            midi_velocity: 127,
            midi_note_new: false,
            midi_notes: vec![0; MIDI_NOTE_COUNT],
            bg_color: [0, 0, 0],
            fg_color: [255, 255, 255],
            auto_clear: true,
            mode_name: "unknown".to_string(),
            frame_count: 0,
            fps: 30.0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl ControlState {
    pub fn knob(&self, index: usize) -> f32 {
        self.knobs.get(index).copied().unwrap_or(0.0)
    }
}

/// Background color picker exposed to scripts: plain hue wheel.
pub fn color_picker(value: f32) -> [u8; 3] {
    hue_to_rgb(unit(value) * 360.0)
}

/// Foreground picker offsets the wheel half a turn so fg/bg driven from the
/// same knob stay visually distinct.
pub fn color_picker_fg(value: f32) -> [u8; 3] {
    hue_to_rgb(unit(value) * 360.0 + 180.0)
}

/// Fields a mode is allowed to write back at the end of an invocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModeWriteback {
    pub auto_clear: bool,
    pub bg_color: [u8; 3],
    pub fg_color: [u8; 3],
}

struct StoreInner {
    state: ControlState,
    sim: AudioSim,
}

/// Shared, last-write-wins store of all control inputs.
///
/// Fields are independent scalars/buffers; plain atomic replacement under a
/// single lock is all the coordination required even with several clients
/// writing concurrently.
#[derive(Clone)]
pub struct ControlStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl Default for ControlStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                state: ControlState::default(),
                sim: AudioSim::new(),
            })),
        }
    }

    pub fn with_resolution(width: u32, height: u32) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            inner.state.width = width;
            inner.state.height = height;
        }
        store
    }

    /// Set one knob (1-based, matching the wire protocol). Out-of-range
    /// knob numbers are ignored; values clamp into [0, 1].
    pub fn set_knob(&self, knob: u8, value: f32) {
        if !(1..=KNOB_COUNT as u8).contains(&knob) {
            return;
        }
        let mut inner = self.inner.write();
        inner.state.knobs[knob as usize - 1] = unit(value);
    }

    pub fn set_fps(&self, fps: f32) {
        self.inner.write().state.fps = fps;
    }

    pub fn set_mode_name(&self, name: impl Into<String>) {
        self.inner.write().state.mode_name = name.into();
    }

    pub fn configure_audio(
        &self,
        source: AudioSource,
        level: f32,
        frequency: f32,
    ) {
        let mut inner = self.inner.write();
        inner.sim.configure(source, level, frequency);
        if source == AudioSource::Silence {
            inner.state.audio_in = vec![0.0; BUFFER_SIZE];
            inner.state.audio_left = vec![0.0; BUFFER_SIZE];
            inner.state.audio_right = vec![0.0; BUFFER_SIZE];
        }
    }

    /// Client-captured waveform pushed upstream for audio-reactive modes.
    pub fn push_audio_data(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        let converted = inner.sim.accept_client_samples(samples);
        Self::apply_audio(&mut inner, converted);
    }

    /// Advance the audio simulation one tick. Called by the scheduler right
    /// before taking the snapshot; a no-op while live client audio stands.
    pub fn advance_audio(&self) {
        let mut inner = self.inner.write();
        if let Some(samples) = inner.sim.advance() {
            Self::apply_audio(&mut inner, samples);
        }
    }

    fn apply_audio(inner: &mut StoreInner, samples: Vec<f32>) {
        let peak = peak_level(&samples);
        let threshold = inner.sim.trigger_threshold();
        let was_over = inner.state.audio_peak >= threshold;

        inner.state.audio_left = samples.clone();
        inner.state.audio_right = samples.clone();
        inner.state.audio_in = samples;
        inner.state.audio_peak = peak;
        inner.state.audio_peak_r = peak;
        inner.state.audio_trig = peak >= threshold && !was_over;
    }

    /// Write back the mode-owned fields at an invocation boundary.
    pub fn apply_writeback(&self, writeback: ModeWriteback) {
        let mut inner = self.inner.write();
        inner.state.auto_clear = writeback.auto_clear;
        inner.state.bg_color = writeback.bg_color;
        inner.state.fg_color = writeback.fg_color;
    }

    pub fn set_frame_count(&self, frame_count: u64) {
        self.inner.write().state.frame_count = frame_count;
    }

    pub fn snapshot(&self) -> ControlState {
        self.inner.read().state.clone()
    }
}
