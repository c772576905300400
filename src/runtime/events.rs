//! Internal events feeding the engine's dispatch loop. Every input source
//! (client sessions, the scheduler) funnels into one channel so dispatch
//! stays single-threaded.

use crate::transport::protocol::{ClientEvent, Severity};
use crate::transport::server::ClientId;

/// One captured frame. `seq` is assigned in capture order and never resets
/// within an engine lifetime, stop/start included.
#[derive(Clone, Debug)]
pub struct Frame {
    pub seq: u64,
    pub image: String,
}

#[derive(Debug)]
pub enum AppEvent {
    Connected(ClientId),
    Disconnected(ClientId),
    Client(ClientId, ClientEvent),
    FrameCaptured(Frame),
    SchedulerStatus {
        message: String,
        severity: Severity,
    },
    /// The scheduler stopped itself, e.g. after repeated draw failures.
    SchedulerStopped {
        reason: String,
    },
    Shutdown,
}
