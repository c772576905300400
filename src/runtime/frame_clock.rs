//! Fixed-rate pacing for the render loop. Accumulator-based so short
//! scheduling hiccups are absorbed instead of drifting the nominal rate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_FPS: f32 = 30.0;

/// A slow draw can leave several frame intervals of debt behind; past this
/// many the clock forgives the rest so the loop never death-spirals.
const MAX_CATCH_UP_FRAMES: u32 = 3;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TickResult {
    pub should_render: bool,
    pub frames_advanced: u32,
}

#[derive(Debug)]
pub struct FrameClock {
    fps: f32,
    frame_count: u64,
    running: bool,
    force_render: bool,
    last_tick: Instant,
    accumulator: Duration,
    frame_intervals: VecDeque<Duration>,
    max_intervals: usize,
}

impl FrameClock {
    pub fn new(fps: f32) -> Self {
        Self::with_start(fps, Instant::now())
    }

    pub fn with_start(fps: f32, now: Instant) -> Self {
        Self {
            fps: fps.max(1.0),
            frame_count: 0,
            running: false,
            force_render: false,
            last_tick: now,
            accumulator: Duration::ZERO,
            frame_intervals: VecDeque::new(),
            max_intervals: 90,
        }
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn set_fps(&mut self, fps: f32) {
        self.fps = fps.max(1.0);
    }

    /// Frames advanced since creation. Not reset by stop/start, so a frame
    /// number never repeats within one engine lifetime.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Schedule exactly one frame on the next tick, running or not. Used
    /// for the preview frame after a mode loads while rendering is stopped.
    pub fn force_single_frame(&mut self) {
        self.force_render = true;
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.fps)
    }

    pub fn next_deadline(&self) -> Instant {
        let remaining = self
            .frame_duration()
            .checked_sub(self.accumulator)
            .unwrap_or_default();
        self.last_tick + remaining
    }

    pub fn average_fps(&self) -> f32 {
        if self.frame_intervals.is_empty() {
            return 0.0;
        }

        let sum: Duration = self.frame_intervals.iter().copied().sum();
        let avg = sum / self.frame_intervals.len() as u32;

        if avg.is_zero() {
            return 0.0;
        }

        1.0 / avg.as_secs_f32()
    }

    pub fn tick(&mut self, now: Instant) -> TickResult {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.accumulator += elapsed;

        if self.force_render {
            self.force_render = false;
            self.frame_count += 1;
            self.record_interval(elapsed);
            return TickResult {
                should_render: true,
                frames_advanced: 1,
            };
        }

        if !self.running {
            // Stopped time accrues no debt; restarting continues from "now"
            // instead of replaying the gap.
            self.accumulator = Duration::ZERO;
            return TickResult::default();
        }

        let frame_duration = self.frame_duration();
        let mut advanced = 0u32;

        while self.accumulator >= frame_duration {
            self.accumulator -= frame_duration;
            self.frame_count += 1;
            advanced += 1;
            if advanced == MAX_CATCH_UP_FRAMES {
                self.accumulator = Duration::ZERO;
                break;
            }
        }

        if advanced > 0 {
            self.record_interval(elapsed);
            TickResult {
                should_render: true,
                frames_advanced: advanced,
            }
        } else {
            TickResult::default()
        }
    }

    fn record_interval(&mut self, interval: Duration) {
        self.frame_intervals.push_back(interval);
        if self.frame_intervals.len() > self.max_intervals {
            self.frame_intervals.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_only_on_full_interval() {
        let start = Instant::now();
        let mut clock = FrameClock::with_start(30.0, start);
        clock.set_running(true);

        let half = start + clock.frame_duration() / 2;
        assert_eq!(clock.tick(half), TickResult::default());

        let full = half + clock.frame_duration() / 2;
        let tick = clock.tick(full);
        assert!(tick.should_render);
        assert_eq!(tick.frames_advanced, 1);
        assert_eq!(clock.frame_count(), 1);
    }

    #[test]
    fn catches_up_when_lagging_within_the_cap() {
        let start = Instant::now();
        let mut clock = FrameClock::with_start(30.0, start);
        clock.set_running(true);

        let tick = clock.tick(start + clock.frame_duration() * 2);
        assert_eq!(tick.frames_advanced, 2);
    }

    #[test]
    fn deep_lag_is_forgiven_past_the_cap() {
        let start = Instant::now();
        let mut clock = FrameClock::with_start(30.0, start);
        clock.set_running(true);

        let tick = clock.tick(start + Duration::from_secs(2));
        assert_eq!(tick.frames_advanced, MAX_CATCH_UP_FRAMES);

        // Debt was dropped: the next partial interval does not render.
        let later = start + Duration::from_secs(2) + Duration::from_millis(5);
        assert_eq!(clock.tick(later), TickResult::default());
    }

    #[test]
    fn stopped_clock_accrues_no_debt() {
        let start = Instant::now();
        let mut clock = FrameClock::with_start(30.0, start);

        let now = start + Duration::from_secs(1);
        assert_eq!(clock.tick(now), TickResult::default());
        assert_eq!(clock.frame_count(), 0);

        clock.set_running(true);
        let shortly_after = now + Duration::from_millis(5);
        assert_eq!(clock.tick(shortly_after), TickResult::default());
    }

    #[test]
    fn forced_frame_renders_while_stopped() {
        let start = Instant::now();
        let mut clock = FrameClock::with_start(30.0, start);

        clock.force_single_frame();
        let tick = clock.tick(start + Duration::from_millis(1));
        assert!(tick.should_render);
        assert_eq!(clock.frame_count(), 1);
    }

    #[test]
    fn frame_count_survives_stop_start() {
        let start = Instant::now();
        let mut clock = FrameClock::with_start(30.0, start);
        clock.set_running(true);
        clock.tick(start + clock.frame_duration());
        assert_eq!(clock.frame_count(), 1);

        clock.set_running(false);
        clock.tick(start + Duration::from_secs(5));
        clock.set_running(true);
        let now = start + Duration::from_secs(5) + clock.frame_duration();
        clock.tick(now);
        assert_eq!(clock.frame_count(), 2);
    }

    #[test]
    fn runtime_fps_changes_apply() {
        let start = Instant::now();
        let mut clock = FrameClock::with_start(60.0, start);
        clock.set_running(true);

        let at_60hz = start + clock.frame_duration();
        assert!(clock.tick(at_60hz).should_render);

        clock.set_fps(30.0);
        let partial = at_60hz + clock.frame_duration() / 3;
        assert_eq!(clock.tick(partial), TickResult::default());

        let full = at_60hz + clock.frame_duration();
        assert!(clock.tick(full).should_render);
    }
}
