//! Engine runtime: frame pacing, the render worker, the scheduler that
//! coordinates them, and the dispatch loop tying transport to rendering.

pub mod engine;
pub mod events;
pub mod frame_clock;
pub mod scheduler;
pub mod worker;
