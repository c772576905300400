//! Simulated audio input for modes. Mirrors the reference hardware's
//! 100-sample buffers so audio-reactive modes behave the same against the
//! simulator as against the real device.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::util::{TWO_PI, unit};
use crate::ternary;

/// Buffer length used by the reference hardware.
pub const BUFFER_SIZE: usize = 100;

const SAMPLE_RATE: f32 = 44_100.0;
const FULL_SCALE: f32 = 32_767.0;

/// Peak level that flips the audio trigger for simulated sources.
pub const SIM_TRIGGER_THRESHOLD: f32 = 0.3;

/// Client-captured audio tends to be quieter, so its trigger fires lower.
pub const CLIENT_TRIGGER_THRESHOLD: f32 = 0.1;

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    Silence,
    #[default]
    Sine,
    Noise,
    Beat,
    /// Waveform pushed upstream by the display client (`audio_data` events).
    File,
}

/// Generates one audio buffer per tick according to the configured source.
#[derive(Debug)]
pub struct AudioSim {
    source: AudioSource,
    level: f32,
    frequency: f32,
    frame_count: u64,
    client_audio_received: bool,
}

impl Default for AudioSim {
    fn default() -> Self {
        Self {
            source: AudioSource::default(),
            level: 0.0,
            frequency: 440.0,
            frame_count: 0,
            client_audio_received: false,
        }
    }
}

impl AudioSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> AudioSource {
        self.source
    }

    pub fn configure(
        &mut self,
        source: AudioSource,
        level: f32,
        frequency: f32,
    ) {
        self.source = source;
        self.level = unit(level);
        self.frequency = frequency;

        // A fresh switch into client audio starts silent until the first
        // audio_data event lands.
        if source == AudioSource::File {
            self.client_audio_received = false;
        }
    }

    pub fn trigger_threshold(&self) -> f32 {
        ternary!(
            self.source == AudioSource::File && self.client_audio_received,
            CLIENT_TRIGGER_THRESHOLD,
            SIM_TRIGGER_THRESHOLD
        )
    }

    /// Convert a client-captured byte-domain waveform (0..=255, 128 =
    /// silence) into the signed full-scale buffer modes expect, downsampled
    /// to [`BUFFER_SIZE`].
    pub fn accept_client_samples(&mut self, samples: &[f32]) -> Vec<f32> {
        self.client_audio_received = true;

        let step = (samples.len() / BUFFER_SIZE).max(1);
        (0..BUFFER_SIZE)
            .map(|i| {
                samples
                    .get(i * step)
                    .map(|byte| (byte - 128.0) * 256.0)
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Produce the next simulated buffer, or `None` when live client audio
    /// has taken over and the last pushed buffer should keep standing.
    pub fn advance(&mut self) -> Option<Vec<f32>> {
        self.frame_count += 1;

        if self.source == AudioSource::File && self.client_audio_received {
            return None;
        }

        let samples = match self.source {
            AudioSource::Silence => vec![0.0; BUFFER_SIZE],
            AudioSource::Noise => self.noise(),
            AudioSource::Beat => self.beat(),
            // `File` before any client audio arrives falls back to a sine so
            // audio-reactive modes have something to chew on.
            AudioSource::Sine | AudioSource::File => self.sine(),
        };

        Some(samples)
    }

    fn sine(&self) -> Vec<f32> {
        let amplitude = self.level * FULL_SCALE;
        (0..BUFFER_SIZE)
            .map(|i| {
                let index = self.frame_count * BUFFER_SIZE as u64 + i as u64;
                let t = index as f32 / SAMPLE_RATE;
                amplitude * (TWO_PI * self.frequency * t).sin()
            })
            .collect()
    }

    fn noise(&self) -> Vec<f32> {
        let amplitude = self.level * FULL_SCALE;
        if amplitude <= 0.0 {
            return vec![0.0; BUFFER_SIZE];
        }
        let mut rng = rand::rng();
        (0..BUFFER_SIZE)
            .map(|_| rng.random_range(-amplitude..=amplitude))
            .collect()
    }

    fn beat(&self) -> Vec<f32> {
        const BEATS_PER_SECOND: f32 = 2.0;
        const KICK_HZ: f32 = 60.0;

        (0..BUFFER_SIZE)
            .map(|i| {
                let index = self.frame_count * BUFFER_SIZE as u64 + i as u64;
                let t = index as f32 / SAMPLE_RATE;
                let beat_phase = (t * BEATS_PER_SECOND) % 1.0;
                if beat_phase < 0.1 {
                    let envelope = (0.1 - beat_phase) / 0.1;
                    let amplitude = self.level * FULL_SCALE * envelope;
                    amplitude * (TWO_PI * KICK_HZ * t).sin()
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Peak of a buffer normalized into [0, 1].
pub fn peak_level(samples: &[f32]) -> f32 {
    samples
        .iter()
        .fold(0.0f32, |acc, s| acc.max(s.abs()))
        .min(FULL_SCALE)
        / FULL_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_yields_zero_peak() {
        let mut sim = AudioSim::new();
        sim.configure(AudioSource::Silence, 1.0, 440.0);
        let buffer = sim.advance().unwrap();
        assert_eq!(buffer.len(), BUFFER_SIZE);
        assert_eq!(peak_level(&buffer), 0.0);
    }

    #[test]
    fn sine_at_full_level_is_loud() {
        let mut sim = AudioSim::new();
        sim.configure(AudioSource::Sine, 1.0, 440.0);
        let buffer = sim.advance().unwrap();
        assert!(peak_level(&buffer) > 0.5);
    }

    #[test]
    fn zero_level_noise_is_silent() {
        let mut sim = AudioSim::new();
        sim.configure(AudioSource::Noise, 0.0, 440.0);
        let buffer = sim.advance().unwrap();
        assert_eq!(peak_level(&buffer), 0.0);
    }

    #[test]
    fn client_audio_takes_over_file_source() {
        let mut sim = AudioSim::new();
        sim.configure(AudioSource::File, 0.5, 440.0);

        // Until client audio arrives the fallback sine keeps running.
        assert!(sim.advance().is_some());

        let converted = sim.accept_client_samples(&[255.0; 400]);
        assert_eq!(converted.len(), BUFFER_SIZE);
        assert!(converted.iter().all(|s| *s > 30_000.0));

        assert!(sim.advance().is_none());
    }

    #[test]
    fn client_samples_center_at_silence() {
        let mut sim = AudioSim::new();
        let converted = sim.accept_client_samples(&[128.0; 100]);
        assert!(converted.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn reconfiguring_file_source_resets_client_takeover() {
        let mut sim = AudioSim::new();
        sim.configure(AudioSource::File, 0.5, 440.0);
        sim.accept_client_samples(&[200.0; 100]);
        assert!(sim.advance().is_none());

        sim.configure(AudioSource::File, 0.5, 440.0);
        assert!(sim.advance().is_some());
    }
}
