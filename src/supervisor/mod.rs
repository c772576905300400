//! Process supervision: launch the engine as a child process, wait for it
//! to answer health probes, and take it down gracefully when asked.
//!
//! The supervisor has no private channel to the engine; health probes,
//! configuration, and shutdown all ride the regular transport protocol.

use std::io;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::core::logging::{info, warn};
use crate::transport::client::DisplayClient;
use crate::transport::protocol::{ClientEvent, EngineEvent};

/// How long a freshly launched engine gets to become ready.
pub const READY_TIMEOUT: Duration = Duration::from_secs(15);
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Grace period between asking the engine to exit and killing it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("engine did not become ready within {0:?}")]
    Startup(Duration),

    #[error("engine process exited unexpectedly ({0})")]
    Crashed(String),

    #[error("supervisor io: {0}")]
    Io(#[from] io::Error),
}

/// Reserve a free TCP port by binding to port 0 and reading back the
/// assignment. The listener is dropped immediately; the window between
/// release and the child binding it is accepted.
pub fn allocate_port(host: &str) -> io::Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Poll `probe` until it succeeds or `timeout` elapses. `liveness` runs
/// before each attempt and short-circuits the wait when the process is
/// already gone.
pub fn wait_until_ready(
    timeout: Duration,
    interval: Duration,
    mut liveness: impl FnMut() -> Result<(), SupervisorError>,
    mut probe: impl FnMut() -> bool,
) -> Result<(), SupervisorError> {
    let deadline = Instant::now() + timeout;
    loop {
        liveness()?;
        if probe() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(SupervisorError::Startup(timeout));
        }
        thread::sleep(interval);
    }
}

pub struct EngineProcess {
    child: Child,
    host: String,
    port: u16,
}

impl EngineProcess {
    /// Spawn an engine serving `modes_dir` on the given port. The child is
    /// this same executable in `serve` mode.
    pub fn launch(
        host: &str,
        port: u16,
        modes_dir: &str,
    ) -> Result<Self, SupervisorError> {
        let exe = std::env::current_exe()?;
        Self::launch_program(&exe, host, port, modes_dir)
    }

    /// Spawn a specific executable as the engine.
    pub fn launch_program(
        program: &std::path::Path,
        host: &str,
        port: u16,
        modes_dir: &str,
    ) -> Result<Self, SupervisorError> {
        info!("launching engine on {host}:{port}");

        let child = Command::new(program)
            .arg("serve")
            .args(["--host", host])
            .args(["--port", &port.to_string()])
            .args(["--modes-dir", modes_dir])
            .stdin(Stdio::null())
            .spawn()?;

        Ok(Self {
            child,
            host: host.to_string(),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// One health probe: connect, ask, and expect a ready answer.
    pub fn probe(&self) -> bool {
        probe_once(&self.host, self.port)
    }

    /// Block until the engine answers health probes.
    pub fn wait_ready(&mut self) -> Result<(), SupervisorError> {
        let host = self.host.clone();
        let port = self.port;
        let child = &mut self.child;

        wait_until_ready(
            READY_TIMEOUT,
            READY_POLL_INTERVAL,
            || match child.try_wait()? {
                Some(status) => {
                    Err(SupervisorError::Crashed(status.to_string()))
                }
                None => Ok(()),
            },
            || probe_once(&host, port),
        )
    }

    /// Fatal if the engine exited after having been ready.
    pub fn check_alive(&mut self) -> Result<(), SupervisorError> {
        match self.child.try_wait()? {
            Some(status) => Err(SupervisorError::Crashed(status.to_string())),
            None => Ok(()),
        }
    }

    /// Repoint the engine's mode library over the regular protocol.
    pub fn set_modes_dir(&self, dir: &str) -> Result<(), SupervisorError> {
        let mut client = DisplayClient::connect(&self.host, self.port)?;
        client
            .send(&ClientEvent::SetModesDir {
                dir: dir.to_string(),
            })
            .map_err(|e| {
                SupervisorError::Io(io::Error::other(e.to_string()))
            })
    }

    /// Ask the engine to exit, give it the grace period, then kill it.
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        if let Ok(mut client) = DisplayClient::connect(&self.host, self.port) {
            let _ = client.send(&ClientEvent::Shutdown);
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < deadline {
            if self.child.try_wait()?.is_some() {
                info!("engine exited cleanly");
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }

        warn!("engine ignored shutdown, killing it");
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

fn probe_once(host: &str, port: u16) -> bool {
    let Ok(mut client) = DisplayClient::connect(host, port) else {
        return false;
    };
    if client.set_read_timeout(Some(Duration::from_secs(1))).is_err() {
        return false;
    }
    if client.send(&ClientEvent::HealthCheck).is_err() {
        return false;
    }
    matches!(
        client.recv_matching(|e| matches!(e, EngineEvent::Health { .. })),
        Ok(EngineEvent::Health { ready: true })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_ports_are_bindable_and_distinct_enough() {
        let port = allocate_port("127.0.0.1").unwrap();
        assert!(port > 0);
        // The port is actually free right after allocation.
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn wait_until_ready_retries_until_success() {
        let mut attempts = 0;
        let result = wait_until_ready(
            Duration::from_secs(5),
            Duration::from_millis(1),
            || Ok(()),
            || {
                attempts += 1;
                attempts >= 3
            },
        );
        assert!(result.is_ok());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn wait_until_ready_times_out() {
        let result = wait_until_ready(
            Duration::from_millis(20),
            Duration::from_millis(5),
            || Ok(()),
            || false,
        );
        assert!(matches!(result, Err(SupervisorError::Startup(_))));
    }

    #[test]
    fn wait_until_ready_stops_on_dead_process() {
        let mut probes = 0;
        let result = wait_until_ready(
            Duration::from_secs(5),
            Duration::from_millis(1),
            || Err(SupervisorError::Crashed("exit code 1".to_string())),
            || {
                probes += 1;
                false
            },
        );
        assert!(matches!(result, Err(SupervisorError::Crashed(_))));
        assert_eq!(probes, 0);
    }
}
