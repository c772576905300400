//! The scheduler thread: paces the render loop, time-boxes every worker
//! request, and isolates mode failures so one bad script cannot take the
//! engine down.
//!
//! Failure policy per tick:
//! - draw error: the previous frame stays up, clients get an error status,
//!   and after [`MAX_CONSECUTIVE_ERRORS`] in a row rendering stops itself.
//! - draw overrun: the tick is abandoned at the frame budget, the previous
//!   frame is re-sent, and no new work is queued until the stuck invocation
//!   finally returns.

use std::sync::mpsc::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, channel,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::control::ControlStore;
use crate::core::logging::{info, warn};
use crate::mode::ModeLoadError;
use crate::transport::protocol::Severity;

use super::events::{AppEvent, Frame};
use super::frame_clock::FrameClock;
use super::worker::{self, LoadReply, TickError, TickReply, WorkerHandle};

/// Hard budget for one `draw` plus encode. Roughly seven frame intervals
/// at 30 fps; a mode this slow is broken, not just heavy.
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_millis(250);

/// Loads run the script top level plus `setup`, so they get a looser box.
pub const DEFAULT_LOAD_BUDGET: Duration = Duration::from_secs(5);

const MAX_CONSECUTIVE_ERRORS: u32 = 10;

pub enum SchedulerCommand {
    Start,
    Stop,
    /// Render a single frame regardless of the running flag. Used for the
    /// preview right after a mode loads.
    RenderOnce,
    Load {
        name: String,
        source: String,
        reply: Sender<LoadReply>,
    },
    Shutdown,
}

pub struct SchedulerHandle {
    tx: Sender<SchedulerCommand>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn send(&self, command: SchedulerCommand) {
        let _ = self.tx.send(command);
    }

    /// Load a mode and wait for the outcome. The scheduler always answers
    /// within its load budget; a dropped channel means it is gone.
    pub fn load(&self, name: String, source: String) -> LoadReply {
        let (reply, rx) = channel();
        let _ = self.tx.send(SchedulerCommand::Load {
            name,
            source,
            reply,
        });
        rx.recv().unwrap_or(Err(ModeLoadError::Busy))
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct SchedulerConfig {
    pub fps: f32,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub frame_budget: Duration,
    pub load_budget: Duration,
}

pub fn spawn(
    config: SchedulerConfig,
    store: ControlStore,
    events: Sender<AppEvent>,
) -> SchedulerHandle {
    let (tx, rx) = channel();
    let join = thread::spawn(move || {
        Scheduler::new(config, store, events, rx).run();
    });
    SchedulerHandle {
        tx,
        join: Some(join),
    }
}

struct Scheduler {
    store: ControlStore,
    events: Sender<AppEvent>,
    commands: Receiver<SchedulerCommand>,
    worker: WorkerHandle,
    clock: FrameClock,
    frame_budget: Duration,
    load_budget: Duration,
    seq: u64,
    last_image: Option<String>,
    /// Pre-encoded blank frame, sent when a tick fails before any frame
    /// has ever been captured.
    blank_image: Option<String>,
    /// Reply channel of a tick that overran its budget. While set, no new
    /// ticks are queued; the worker is still inside the stuck invocation.
    overdue: Option<Receiver<TickReply>>,
    /// A load that overran its budget, with the mode name it was for. The
    /// requester was already told Busy; if the load lands later its outcome
    /// is still published so state never contradicts the active mode.
    overdue_load: Option<(String, Receiver<LoadReply>)>,
    consecutive_errors: u32,
}

impl Scheduler {
    fn new(
        config: SchedulerConfig,
        store: ControlStore,
        events: Sender<AppEvent>,
        commands: Receiver<SchedulerCommand>,
    ) -> Self {
        let worker =
            worker::spawn(config.width, config.height, config.jpeg_quality);
        let blank_image =
            crate::surface::Surface::new(config.width, config.height)
                .encode_jpeg_data_uri(config.jpeg_quality)
                .ok();
        Self {
            store,
            events,
            commands,
            worker,
            clock: FrameClock::new(config.fps),
            frame_budget: config.frame_budget,
            load_budget: config.load_budget,
            seq: 0,
            last_image: None,
            blank_image,
            overdue: None,
            overdue_load: None,
            consecutive_errors: 0,
        }
    }

    fn worker_busy(&self) -> bool {
        self.overdue.is_some() || self.overdue_load.is_some()
    }

    fn run(mut self) {
        loop {
            let timeout = self
                .clock
                .next_deadline()
                .saturating_duration_since(Instant::now());

            match self.commands.recv_timeout(timeout) {
                Ok(SchedulerCommand::Start) => {
                    self.consecutive_errors = 0;
                    self.clock.set_running(true);
                }
                Ok(SchedulerCommand::Stop) => self.clock.set_running(false),
                Ok(SchedulerCommand::RenderOnce) => {
                    self.clock.force_single_frame()
                }
                Ok(SchedulerCommand::Load {
                    name,
                    source,
                    reply,
                }) => {
                    let result = self.handle_load(name, source);
                    let _ = reply.send(result);
                }
                Ok(SchedulerCommand::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.poll_overdue();

            if self.clock.tick(Instant::now()).should_render {
                self.render_frame();
            }
        }

        self.worker.shutdown();
    }

    fn handle_load(&mut self, name: String, source: String) -> LoadReply {
        if self.worker_busy() {
            return Err(ModeLoadError::Busy);
        }

        let state = self.store.snapshot();
        let reply =
            self.worker
                .request_load(name.clone(), source, state);

        match reply.recv_timeout(self.load_budget) {
            Ok(Ok(writeback)) => {
                self.store.apply_writeback(writeback);
                self.store.set_mode_name(name);
                self.consecutive_errors = 0;
                Ok(writeback)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("mode load overran its budget");
                self.overdue_load = Some((name, reply));
                Err(ModeLoadError::Busy)
            }
        }
    }

    /// Check whether a previously stuck invocation has finally returned.
    /// A late tick frame is stale and discarded; a late load outcome is
    /// still published, because the worker has already switched modes.
    fn poll_overdue(&mut self) {
        if let Some(pending) = &self.overdue
            && pending.try_recv().is_ok()
        {
            info!("slow mode caught up, resuming normal ticks");
            self.overdue = None;
        }

        if let Some((name, pending)) = self.overdue_load.take() {
            match pending.try_recv() {
                Ok(result) => self.publish_late_load(name, result),
                Err(TryRecvError::Empty) => {
                    self.overdue_load = Some((name, pending));
                }
                Err(TryRecvError::Disconnected) => {}
            }
        }
    }

    /// An overrun load finally finished. On success the switch is real on
    /// the worker, so the store and the clients must catch up with it.
    fn publish_late_load(&mut self, name: String, result: LoadReply) {
        match result {
            Ok(writeback) => {
                info!("overdue load of {name} finished, publishing it");
                self.store.apply_writeback(writeback);
                self.store.set_mode_name(name.clone());
                self.consecutive_errors = 0;
                let _ = self.events.send(AppEvent::SchedulerStatus {
                    message: format!("Loaded mode {name}"),
                    severity: Severity::Success,
                });
            }
            Err(e) => {
                let _ = self.events.send(AppEvent::SchedulerStatus {
                    message: format!("Mode {name} failed to load: {e}"),
                    severity: Severity::Error,
                });
            }
        }
    }

    fn render_frame(&mut self) {
        if self.worker_busy() {
            self.resend_last_frame();
            return;
        }

        self.store.advance_audio();
        self.store.set_frame_count(self.clock.frame_count());
        self.store.set_fps(self.clock.average_fps());

        let reply = self.worker.request_tick(self.store.snapshot());
        match reply.recv_timeout(self.frame_budget) {
            Ok(Ok(output)) => {
                self.store.apply_writeback(output.writeback);
                self.consecutive_errors = 0;
                self.seq += 1;
                self.last_image = Some(output.image.clone());
                let _ = self.events.send(AppEvent::FrameCaptured(Frame {
                    seq: self.seq,
                    image: output.image,
                }));
            }
            Ok(Err(TickError::Draw(e))) => {
                self.record_error(e.to_string());
                self.resend_last_frame();
            }
            Ok(Err(TickError::Encode(e))) => {
                self.record_error(format!("frame encoding failed: {e}"));
                self.resend_last_frame();
            }
            Err(_) => {
                warn!(
                    "draw overran the {}ms budget, reusing previous frame",
                    self.frame_budget.as_millis()
                );
                self.overdue = Some(reply);
                let _ = self.events.send(AppEvent::SchedulerStatus {
                    message: "Mode is running slow".to_string(),
                    severity: Severity::Warning,
                });
                self.resend_last_frame();
            }
        }
    }

    fn resend_last_frame(&mut self) {
        let image = self.last_image.as_ref().or(self.blank_image.as_ref());
        if let Some(image) = image {
            self.seq += 1;
            let _ = self.events.send(AppEvent::FrameCaptured(Frame {
                seq: self.seq,
                image: image.clone(),
            }));
        }
    }

    fn record_error(&mut self, message: String) {
        self.consecutive_errors += 1;
        warn!(
            "frame failed ({}/{MAX_CONSECUTIVE_ERRORS}): {message}",
            self.consecutive_errors
        );
        let _ = self.events.send(AppEvent::SchedulerStatus {
            message: format!("Render error: {message}"),
            severity: Severity::Error,
        });

        if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            self.clock.set_running(false);
            self.consecutive_errors = 0;
            let _ = self.events.send(AppEvent::SchedulerStopped {
                reason: format!(
                    "stopped after {MAX_CONSECUTIVE_ERRORS} consecutive \
                     render errors"
                ),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            fps: 60.0,
            width: 16,
            height: 16,
            jpeg_quality: 85,
            frame_budget: Duration::from_millis(250),
            load_budget: DEFAULT_LOAD_BUDGET,
        }
    }

    fn recv_frames(
        rx: &Receiver<AppEvent>,
        count: usize,
        within: Duration,
    ) -> Vec<Frame> {
        let deadline = Instant::now() + within;
        let mut frames = Vec::new();
        while frames.len() < count && Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(AppEvent::FrameCaptured(frame)) => frames.push(frame),
                Ok(_) => {}
                Err(_) => {}
            }
        }
        frames
    }

    #[test]
    fn frames_arrive_in_capture_order() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let scheduler = spawn(test_config(), store, events_tx);

        scheduler
            .load(
                "red".into(),
                "fn draw(screen, etc) { screen.fill([255, 0, 0]); }".into(),
            )
            .unwrap();
        scheduler.send(SchedulerCommand::Start);

        let frames = recv_frames(&events_rx, 3, Duration::from_secs(5));
        assert_eq!(frames.len(), 3);
        for pair in frames.windows(2) {
            assert!(pair[1].seq > pair[0].seq);
        }
        assert!(frames[0].image.starts_with("data:image/jpeg;base64,"));

        scheduler.shutdown();
    }

    #[test]
    fn render_once_emits_one_frame_while_stopped() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let scheduler = spawn(test_config(), store, events_tx);

        scheduler
            .load("blank".into(), "fn draw(screen, etc) { }".into())
            .unwrap();
        scheduler.send(SchedulerCommand::RenderOnce);

        let frames = recv_frames(&events_rx, 1, Duration::from_secs(5));
        assert_eq!(frames.len(), 1);

        // Stopped clock: no further frames follow.
        let extra = recv_frames(&events_rx, 1, Duration::from_millis(300));
        assert!(extra.is_empty());

        scheduler.shutdown();
    }

    #[test]
    fn seq_continues_across_stop_start() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let scheduler = spawn(test_config(), store, events_tx);

        scheduler
            .load("blank".into(), "fn draw(screen, etc) { }".into())
            .unwrap();
        scheduler.send(SchedulerCommand::Start);
        let first = recv_frames(&events_rx, 2, Duration::from_secs(5));
        scheduler.send(SchedulerCommand::Stop);
        // Drain anything captured before the stop landed.
        let drained = recv_frames(&events_rx, 100, Duration::from_millis(300));

        scheduler.send(SchedulerCommand::Start);
        let resumed = recv_frames(&events_rx, 1, Duration::from_secs(5));

        let last_before = drained
            .last()
            .or(first.last())
            .map(|f| f.seq)
            .unwrap_or(0);
        assert!(resumed[0].seq > last_before);

        scheduler.shutdown();
    }

    #[test]
    fn repeated_draw_errors_stop_rendering() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let scheduler = spawn(test_config(), store, events_tx);

        scheduler
            .load("faulty".into(), "fn draw(screen, etc) { boom(); }".into())
            .unwrap();
        scheduler.send(SchedulerCommand::Start);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut stopped = false;
        let mut errors = 0;
        while Instant::now() < deadline {
            match events_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(AppEvent::SchedulerStatus {
                    severity: Severity::Error,
                    ..
                }) => errors += 1,
                Ok(AppEvent::SchedulerStopped { .. }) => {
                    stopped = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(stopped, "scheduler should stop itself");
        assert_eq!(errors, 10);

        scheduler.shutdown();
    }

    #[test]
    fn draw_failures_still_emit_frames() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let scheduler = spawn(test_config(), store, events_tx);

        scheduler
            .load("faulty".into(), "fn draw(screen, etc) { boom(); }".into())
            .unwrap();
        scheduler.send(SchedulerCommand::Start);

        // Even with every draw failing, frames (blank fallback) keep
        // flowing alongside the error statuses, in capture order.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut frames = Vec::new();
        let mut errors = 0;
        while frames.len() < 3 && Instant::now() < deadline {
            match events_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(AppEvent::FrameCaptured(frame)) => frames.push(frame),
                Ok(AppEvent::SchedulerStatus {
                    severity: Severity::Error,
                    ..
                }) => errors += 1,
                _ => {}
            }
        }
        assert!(frames.len() >= 3);
        assert!(errors >= 1);
        for pair in frames.windows(2) {
            assert!(pair[1].seq > pair[0].seq);
        }
        assert!(frames[0].image.starts_with("data:image/jpeg;base64,"));

        scheduler.shutdown();
    }

    #[test]
    fn overrunning_draw_warns_and_reuses_the_previous_frame() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let mut config = test_config();
        config.frame_budget = Duration::from_millis(50);
        let scheduler = spawn(config, store, events_tx);

        scheduler
            .load(
                "molasses".into(),
                "fn draw(screen, etc) {
                    let t = timestamp();
                    while t.elapsed < 0.3 {}
                }"
                .into(),
            )
            .unwrap();
        scheduler.send(SchedulerCommand::Start);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut warned = false;
        let mut frames_after_warning = 0;
        while Instant::now() < deadline {
            match events_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(AppEvent::SchedulerStatus {
                    severity: Severity::Warning,
                    message,
                }) => {
                    assert!(message.contains("slow"));
                    warned = true;
                }
                Ok(AppEvent::FrameCaptured(_)) if warned => {
                    frames_after_warning += 1;
                    if frames_after_warning >= 2 {
                        break;
                    }
                }
                _ => {}
            }
        }
        assert!(warned, "overrun should produce a slow-mode warning");
        assert!(frames_after_warning >= 2);

        scheduler.shutdown();
    }

    #[test]
    fn late_finishing_load_is_published_when_it_lands() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let mut config = test_config();
        config.load_budget = Duration::from_millis(50);
        let scheduler = spawn(config, store.clone(), events_tx);

        // Setup busy-waits well past the load budget, then succeeds.
        let err = scheduler
            .load(
                "tardy".into(),
                "fn setup(screen, etc) {
                    let t = timestamp();
                    while t.elapsed < 0.4 {}
                }
                fn draw(screen, etc) { }"
                .into(),
            )
            .unwrap_err();
        assert!(matches!(err, ModeLoadError::Busy));

        // Once the worker finishes, the switch is published: store catches
        // up and clients hear about the load after all.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut announced = false;
        while Instant::now() < deadline {
            match events_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(AppEvent::SchedulerStatus {
                    severity: Severity::Success,
                    message,
                }) => {
                    assert!(message.contains("tardy"));
                    announced = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(announced, "late load success should be broadcast");
        assert_eq!(store.snapshot().mode_name, "tardy");

        // The published mode really is the active one.
        scheduler.send(SchedulerCommand::RenderOnce);
        let frame_deadline = Instant::now() + Duration::from_secs(5);
        let mut rendered = false;
        while Instant::now() < frame_deadline {
            if let Ok(AppEvent::FrameCaptured(_)) =
                events_rx.recv_timeout(Duration::from_millis(200))
            {
                rendered = true;
                break;
            }
        }
        assert!(rendered);

        scheduler.shutdown();
    }

    #[test]
    fn failed_load_keeps_previous_mode_rendering() {
        let (events_tx, events_rx) = channel();
        let store = ControlStore::with_resolution(16, 16);
        let scheduler = spawn(test_config(), store.clone(), events_tx);

        scheduler
            .load(
                "good".into(),
                "fn draw(screen, etc) { screen.fill([0, 255, 0]); }".into(),
            )
            .unwrap();
        scheduler.send(SchedulerCommand::Start);
        recv_frames(&events_rx, 1, Duration::from_secs(5));

        let err = scheduler
            .load("bad".into(), "fn draw( nope".into())
            .unwrap_err();
        assert!(matches!(err, ModeLoadError::Compile(_)));

        // Frames keep flowing and the store still names the good mode.
        let frames = recv_frames(&events_rx, 2, Duration::from_secs(5));
        assert_eq!(frames.len(), 2);
        assert_eq!(store.snapshot().mode_name, "good");

        scheduler.shutdown();
    }
}
