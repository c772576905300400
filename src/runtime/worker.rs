//! The mode worker thread. Script hooks run here, never on the scheduler
//! thread, so a runaway `draw` can be timed out by the scheduler instead of
//! freezing the whole engine.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use crate::control::{ControlState, ModeWriteback};
use crate::core::logging::debug;
use crate::mode::script::RhaiHost;
use crate::mode::{ModeHost, ModeLoadError, ModeRuntimeError};

/// A successful frame: the encoded image plus the fields the script wrote.
#[derive(Clone, Debug)]
pub struct TickOutput {
    pub image: String,
    pub writeback: ModeWriteback,
}

#[derive(Debug)]
pub enum TickError {
    Draw(ModeRuntimeError),
    Encode(String),
}

pub type TickReply = Result<TickOutput, TickError>;
pub type LoadReply = Result<ModeWriteback, ModeLoadError>;

pub enum WorkerCommand {
    Load {
        name: String,
        source: String,
        state: ControlState,
        reply: Sender<LoadReply>,
    },
    Tick {
        state: ControlState,
        reply: Sender<TickReply>,
    },
    Shutdown,
}

pub struct WorkerHandle {
    tx: Sender<WorkerCommand>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request a load and return the receiver to wait on.
    pub fn request_load(
        &self,
        name: String,
        source: String,
        state: ControlState,
    ) -> Receiver<LoadReply> {
        let (reply, rx) = channel();
        let _ = self.tx.send(WorkerCommand::Load {
            name,
            source,
            state,
            reply,
        });
        rx
    }

    /// Request one frame and return the receiver to wait on. The caller
    /// decides how long to wait; a reply past the deadline is stale and
    /// simply dropped with the receiver.
    pub fn request_tick(&self, state: ControlState) -> Receiver<TickReply> {
        let (reply, rx) = channel();
        let _ = self.tx.send(WorkerCommand::Tick { state, reply });
        rx
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(WorkerCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn the worker. The script host lives entirely on the worker thread;
/// commands and replies are the only way in or out.
pub fn spawn(width: u32, height: u32, jpeg_quality: u8) -> WorkerHandle {
    let (tx, rx) = channel::<WorkerCommand>();

    let join = thread::spawn(move || {
        let mut host = ModeHost::new(RhaiHost::new(), width, height);

        while let Ok(command) = rx.recv() {
            match command {
                WorkerCommand::Load {
                    name,
                    source,
                    state,
                    reply,
                } => {
                    debug!("loading mode {name}");
                    let _ = reply.send(host.load(&name, &source, &state));
                }
                WorkerCommand::Tick { state, reply } => {
                    let result = host
                        .tick(&state)
                        .map_err(TickError::Draw)
                        .and_then(|writeback| {
                            host.with_surface(|surface| {
                                surface.encode_jpeg_data_uri(jpeg_quality)
                            })
                            .map(|image| TickOutput { image, writeback })
                            .map_err(|e| TickError::Encode(e.to_string()))
                        });
                    let _ = reply.send(result);
                }
                WorkerCommand::Shutdown => break,
            }
        }
    });

    WorkerHandle {
        tx,
        join: Some(join),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn load_then_tick_yields_a_frame() {
        let worker = spawn(32, 32, 85);
        let state = ControlState::default();

        let load = worker.request_load(
            "red".into(),
            "fn draw(screen, etc) { screen.fill([255, 0, 0]); }".into(),
            state.clone(),
        );
        load.recv_timeout(WAIT).unwrap().unwrap();

        let tick = worker.request_tick(state);
        let output = tick.recv_timeout(WAIT).unwrap().unwrap();
        assert!(output.image.starts_with("data:image/jpeg;base64,"));

        worker.shutdown();
    }

    #[test]
    fn tick_without_a_mode_reports_a_draw_error() {
        let worker = spawn(16, 16, 85);
        let tick = worker.request_tick(ControlState::default());
        let err = tick.recv_timeout(WAIT).unwrap().unwrap_err();
        assert!(matches!(err, TickError::Draw(_)));
        worker.shutdown();
    }

    #[test]
    fn failed_load_leaves_previous_mode_active() {
        let worker = spawn(16, 16, 85);
        let state = ControlState::default();

        worker
            .request_load(
                "ok".into(),
                "fn draw(screen, etc) { }".into(),
                state.clone(),
            )
            .recv_timeout(WAIT)
            .unwrap()
            .unwrap();

        let err = worker
            .request_load("bad".into(), "fn draw( {".into(), state.clone())
            .recv_timeout(WAIT)
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ModeLoadError::Compile(_)));

        // Previous mode still draws.
        let tick = worker.request_tick(state);
        assert!(tick.recv_timeout(WAIT).unwrap().is_ok());
        worker.shutdown();
    }

    #[test]
    fn stale_reply_is_dropped_with_its_receiver() {
        let worker = spawn(16, 16, 85);
        let state = ControlState::default();
        worker
            .request_load(
                "ok".into(),
                "fn draw(screen, etc) { }".into(),
                state.clone(),
            )
            .recv_timeout(WAIT)
            .unwrap()
            .unwrap();

        // Abandon the reply channel, then make sure the worker is still
        // responsive to a fresh request.
        drop(worker.request_tick(state.clone()));
        let tick = worker.request_tick(state);
        assert!(tick.recv_timeout(WAIT).unwrap().is_ok());
        worker.shutdown();
    }
}
