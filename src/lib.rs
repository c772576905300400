//! Scripted visual engine: modes are small scripts drawing onto a shared
//! raster surface at a fixed frame rate, streamed as JPEG frames to display
//! clients over a line-oriented TCP protocol, with a supervisor that runs
//! the engine as a managed child process.

pub mod control;
pub mod core;
pub mod mode;
pub mod runtime;
pub mod supervisor;
pub mod surface;
pub mod transport;
