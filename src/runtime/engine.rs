//! The engine: one dispatch thread that owns all mutable coordination
//! state and reacts to everything — client events, captured frames, and
//! scheduler notices — strictly in arrival order.

use std::io;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::control::{ControlStore, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::core::logging::{error, info};
use crate::mode::library::ModeLibrary;
use crate::transport::protocol::{
    ClientEvent, EngineEvent, ModeEntry, Severity,
};
use crate::transport::server::{ClientId, Hub, Server};

use super::events::AppEvent;
use super::frame_clock::DEFAULT_FPS;
use super::scheduler::{
    self, DEFAULT_FRAME_BUDGET, DEFAULT_LOAD_BUDGET, SchedulerCommand,
    SchedulerHandle,
};

pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub modes_dir: String,
    pub fps: f32,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub frame_budget: Duration,
}

impl EngineConfig {
    pub fn new(modes_dir: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            modes_dir: modes_dir.into(),
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            jpeg_quality: 85,
            frame_budget: DEFAULT_FRAME_BUDGET,
        }
    }
}

pub struct EngineHandle {
    port: u16,
    events: Sender<AppEvent>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Block until the dispatch loop exits.
    pub fn wait(mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn shutdown(mut self) {
        let _ = self.events.send(AppEvent::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct Engine;

impl Engine {
    /// Bind the transport, spawn the scheduler, and start dispatching.
    pub fn start(config: EngineConfig) -> io::Result<EngineHandle> {
        let (events_tx, events_rx) = channel();

        let server = Server::start(&config.host, config.port, events_tx.clone())?;
        let port = server.port();

        let store = ControlStore::with_resolution(config.width, config.height);
        let scheduler = scheduler::spawn(
            scheduler::SchedulerConfig {
                fps: config.fps,
                width: config.width,
                height: config.height,
                jpeg_quality: config.jpeg_quality,
                frame_budget: config.frame_budget,
                load_budget: DEFAULT_LOAD_BUDGET,
            },
            store.clone(),
            events_tx.clone(),
        );

        let library = ModeLibrary::new(&config.modes_dir);
        info!("engine up on port {port}, modes from {}", config.modes_dir);

        let join = thread::spawn(move || {
            let mut dispatch = Dispatch {
                hub: server.hub().clone(),
                store,
                library,
                scheduler,
                rendering: false,
            };
            dispatch.run(events_rx);
            dispatch.scheduler.shutdown();
            // Give session writers a moment to flush the shutdown notice
            // before the sockets close.
            thread::sleep(Duration::from_millis(100));
            server.shutdown();
        });

        Ok(EngineHandle {
            port,
            events: events_tx,
            join: Some(join),
        })
    }
}

struct Dispatch {
    hub: Hub,
    store: ControlStore,
    library: ModeLibrary,
    scheduler: SchedulerHandle,
    rendering: bool,
}

impl Dispatch {
    fn run(&mut self, events: Receiver<AppEvent>) {
        while let Ok(event) = events.recv() {
            match event {
                AppEvent::Connected(id) => self.on_connect(id),
                AppEvent::Disconnected(id) => self.hub.remove(id),
                AppEvent::Client(id, event) => {
                    if !self.on_client(id, event) {
                        break;
                    }
                }
                AppEvent::FrameCaptured(frame) => {
                    self.hub.broadcast(&EngineEvent::Frame {
                        image: frame.image,
                    });
                }
                AppEvent::SchedulerStatus { message, severity } => {
                    self.hub.broadcast(&EngineEvent::Status {
                        message,
                        severity,
                    });
                }
                AppEvent::SchedulerStopped { reason } => {
                    error!("rendering stopped: {reason}");
                    self.rendering = false;
                    self.hub.broadcast(&EngineEvent::RenderingState {
                        is_running: false,
                    });
                    self.hub.broadcast(&EngineEvent::Status {
                        message: format!("Rendering stopped: {reason}"),
                        severity: Severity::Error,
                    });
                }
                AppEvent::Shutdown => {
                    self.hub.broadcast(&EngineEvent::Status {
                        message: "Engine shutting down".to_string(),
                        severity: Severity::Info,
                    });
                    break;
                }
            }
        }
    }

    fn on_connect(&mut self, id: ClientId) {
        // A fresh client can render its UI without asking.
        self.hub.send_to(id, &self.modes_list());
        self.hub.send_to(
            id,
            &EngineEvent::RenderingState {
                is_running: self.rendering,
            },
        );
    }

    /// Returns false when dispatch should exit.
    fn on_client(&mut self, id: ClientId, event: ClientEvent) -> bool {
        match event {
            ClientEvent::GetModes => {
                self.hub.send_to(id, &self.modes_list());
            }
            ClientEvent::LoadMode { path } => self.load_mode(id, &path),
            ClientEvent::LoadModeContent { filename, content } => {
                match self.library.stage_inline(&filename, &content) {
                    Ok(staged) => {
                        self.load_mode(id, &staged.display().to_string())
                    }
                    Err(e) => self.status_to(
                        id,
                        format!("Upload failed: {e}"),
                        Severity::Error,
                    ),
                }
            }
            ClientEvent::KnobChange { knob, value } => {
                self.store.set_knob(knob, value);
            }
            ClientEvent::StartRendering => {
                if self.rendering {
                    self.status_to(
                        id,
                        "Already running".to_string(),
                        Severity::Info,
                    );
                    return true;
                }
                self.rendering = true;
                self.scheduler.send(SchedulerCommand::Start);
                self.hub.broadcast(&EngineEvent::RenderingState {
                    is_running: true,
                });
            }
            ClientEvent::StopRendering => {
                self.rendering = false;
                self.scheduler.send(SchedulerCommand::Stop);
                self.hub.broadcast(&EngineEvent::RenderingState {
                    is_running: false,
                });
            }
            ClientEvent::SetAudio {
                source,
                level,
                frequency,
            } => {
                self.store.configure_audio(source, level, frequency);
                self.status_to(
                    id,
                    format!("Audio source set to {source:?}"),
                    Severity::Info,
                );
            }
            ClientEvent::AudioData { samples } => {
                self.store.push_audio_data(&samples);
            }
            ClientEvent::HealthCheck => {
                self.hub.send_to(id, &EngineEvent::Health { ready: true });
            }
            ClientEvent::SetModesDir { dir } => {
                self.library.set_dir(&dir);
                self.hub.broadcast(&EngineEvent::Status {
                    message: format!("Modes directory set to {dir}"),
                    severity: Severity::Info,
                });
                self.hub.broadcast(&self.modes_list());
            }
            ClientEvent::Shutdown => {
                self.hub.broadcast(&EngineEvent::Status {
                    message: "Engine shutting down".to_string(),
                    severity: Severity::Info,
                });
                self.scheduler.send(SchedulerCommand::Stop);
                self.rendering = false;
                return false;
            }
        }
        true
    }

    fn load_mode(&mut self, id: ClientId, path: &str) {
        let (name, source) = match self.library.read_source(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.status_to(
                    id,
                    format!("Cannot load mode: {e}"),
                    Severity::Error,
                );
                return;
            }
        };

        match self.scheduler.load(name.clone(), source) {
            Ok(_) => {
                self.hub.broadcast(&EngineEvent::Status {
                    message: format!("Loaded mode {name}"),
                    severity: Severity::Success,
                });
                // Preview frame even while stopped.
                self.scheduler.send(SchedulerCommand::RenderOnce);
            }
            Err(e) => {
                self.status_to(
                    id,
                    format!("Mode {name} failed to load: {e}"),
                    Severity::Error,
                );
            }
        }
    }

    fn modes_list(&self) -> EngineEvent {
        EngineEvent::ModesList {
            modes: self
                .library
                .discover()
                .into_iter()
                .map(|m| ModeEntry {
                    name: m.name,
                    path: m.path.display().to_string(),
                })
                .collect(),
        }
    }

    fn status_to(&self, id: ClientId, message: String, severity: Severity) {
        self.hub.send_to(id, &EngineEvent::Status { message, severity });
    }
}
