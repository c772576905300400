//! Mode hosting: loading scripted visual modes, running their `setup` and
//! `draw` hooks against the shared surface, and keeping a failed load from
//! disturbing whatever was on screen before it.

pub mod library;
pub mod script;

use thiserror::Error;

use crate::control::{ControlState, ModeWriteback};
use crate::surface::{Rgba, Surface};
use script::{ScreenHandle, StateHandle};

#[derive(Debug, Error)]
pub enum ModeLoadError {
    #[error("mode has no entry point at {path}")]
    EntryPointMissing { path: String },

    #[error("reading mode source: {0}")]
    Io(#[from] std::io::Error),

    #[error("mode failed to compile: {0}")]
    Compile(String),

    #[error("mode does not define draw(screen, etc)")]
    MissingDraw,

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("mode host is busy with the previous mode")]
    Busy,
}

/// A hook raised an error at run time. The hosting loop decides whether to
/// keep the mode alive or stop rendering.
#[derive(Debug, Error)]
#[error("{hook} failed: {message}")]
pub struct ModeRuntimeError {
    pub hook: &'static str,
    pub message: String,
}

/// Compiles mode source into a runnable instance.
pub trait ScriptHost {
    fn load(
        &self,
        name: &str,
        source: &str,
    ) -> Result<Box<dyn ModeInstance>, ModeLoadError>;
}

/// One loaded mode. `setup` runs once after a successful load; `draw` runs
/// once per rendered frame.
pub trait ModeInstance {
    fn name(&self) -> &str;

    fn setup(
        &mut self,
        screen: &ScreenHandle,
        state: &StateHandle,
    ) -> Result<(), ModeRuntimeError>;

    fn draw(
        &mut self,
        screen: &ScreenHandle,
        state: &StateHandle,
    ) -> Result<(), ModeRuntimeError>;
}

/// Owns the drawing surface and the active mode. Single-threaded by design;
/// the render worker is the only caller.
pub struct ModeHost<H: ScriptHost> {
    host: H,
    screen: ScreenHandle,
    active: Option<Box<dyn ModeInstance>>,
}

impl<H: ScriptHost> ModeHost<H> {
    pub fn new(host: H, width: u32, height: u32) -> Self {
        Self {
            host,
            screen: ScreenHandle::new(Surface::new(width, height)),
            active: None,
        }
    }

    pub fn active_mode(&self) -> Option<&str> {
        self.active.as_deref().map(ModeInstance::name)
    }

    pub fn with_surface<R>(&self, f: impl FnOnce(&Surface) -> R) -> R {
        f(&self.screen.0.borrow())
    }

    /// Switch to a new mode. The previous mode is torn down first; if the
    /// replacement fails to compile or its `setup` raises, the previous
    /// mode and the previous pixels are restored and the error is returned.
    pub fn load(
        &mut self,
        name: &str,
        source: &str,
        state: &ControlState,
    ) -> Result<ModeWriteback, ModeLoadError> {
        let previous = self.active.take();
        let saved_pixels = self.screen.0.borrow().pixels_snapshot();

        match self.try_activate(name, source, state) {
            Ok(writeback) => Ok(writeback),
            Err(err) => {
                self.screen.0.borrow_mut().restore_pixels(saved_pixels);
                self.active = previous;
                Err(err)
            }
        }
    }

    fn try_activate(
        &mut self,
        name: &str,
        source: &str,
        state: &ControlState,
    ) -> Result<ModeWriteback, ModeLoadError> {
        let mut mode = self.host.load(name, source)?;

        let handle = StateHandle::new(state.clone());
        mode.setup(&self.screen, &handle)
            .map_err(|e| ModeLoadError::Setup(e.to_string()))?;

        self.active = Some(mode);
        Ok(handle.writeback())
    }

    /// Render one frame with the active mode: clear to the background color
    /// when auto-clear is on, then run `draw`. Returns the mode's writeback
    /// so the caller can publish any fields the script changed.
    pub fn tick(
        &mut self,
        state: &ControlState,
    ) -> Result<ModeWriteback, ModeRuntimeError> {
        let mode = self.active.as_mut().ok_or(ModeRuntimeError {
            hook: "draw",
            message: "no mode loaded".to_string(),
        })?;

        if state.auto_clear {
            self.screen
                .0
                .borrow_mut()
                .fill(Rgba::from(state.bg_color));
        }

        let handle = StateHandle::new(state.clone());
        mode.draw(&self.screen, &handle)?;
        Ok(handle.writeback())
    }
}
