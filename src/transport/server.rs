//! TCP transport: an acceptor thread plus a reader and writer thread per
//! client session. Outbound fan-out serializes each event once and shares
//! the line across sessions.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::logging::{debug, info, warn};
use crate::runtime::events::AppEvent;

use super::protocol::{self, EngineEvent, Severity};

pub type ClientId = u64;

struct Session {
    outbound: Sender<Arc<String>>,
    stream: TcpStream,
}

/// Registry of connected sessions. Cloned into reader threads so malformed
/// input can be answered directly without a round trip through dispatch.
#[derive(Clone, Default)]
pub struct Hub {
    sessions: Arc<Mutex<HashMap<ClientId, Session>>>,
}

impl Hub {
    fn register(&self, id: ClientId, session: Session) {
        self.sessions.lock().insert(id, session);
    }

    pub fn remove(&self, id: ClientId) {
        if let Some(session) = self.sessions.lock().remove(&id) {
            let _ = session.stream.shutdown(Shutdown::Both);
        }
    }

    pub fn client_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Send one event to every session. Serialization happens once.
    pub fn broadcast<T: Serialize>(&self, event: &T) {
        let Ok(line) = protocol::encode(event) else {
            return;
        };
        let line = Arc::new(line);
        for session in self.sessions.lock().values() {
            let _ = session.outbound.send(Arc::clone(&line));
        }
    }

    pub fn send_to<T: Serialize>(&self, id: ClientId, event: &T) {
        let Ok(line) = protocol::encode(event) else {
            return;
        };
        if let Some(session) = self.sessions.lock().get(&id) {
            let _ = session.outbound.send(Arc::new(line));
        }
    }

    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock();
        for session in sessions.values() {
            let _ = session.stream.shutdown(Shutdown::Both);
        }
        sessions.clear();
    }
}

pub struct Server {
    local_addr: std::net::SocketAddr,
    hub: Hub,
    shutting_down: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind and start accepting. Port 0 picks a free port; the actual one
    /// is available from [`Server::port`].
    pub fn start(
        host: &str,
        port: u16,
        events: Sender<AppEvent>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        let local_addr = listener.local_addr()?;
        info!("listening on {local_addr}");

        let hub = Hub::default();
        let shutting_down = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let hub = hub.clone();
            let shutting_down = Arc::clone(&shutting_down);
            thread::spawn(move || {
                accept_loop(listener, hub, events, shutting_down);
            })
        };

        Ok(Self {
            local_addr,
            hub,
            shutting_down,
            acceptor: Some(acceptor),
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept with a throwaway connection.
        let _ = TcpStream::connect(self.local_addr);
        if let Some(join) = self.acceptor.take() {
            let _ = join.join();
        }
        self.hub.close_all();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    hub: Hub,
    events: Sender<AppEvent>,
    shutting_down: Arc<AtomicBool>,
) {
    let next_id = AtomicU64::new(1);

    for stream in listener.incoming() {
        if shutting_down.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = start_session(id, stream, &hub, &events) {
            warn!("session {id} setup failed: {e}");
            continue;
        }
        let _ = events.send(AppEvent::Connected(id));
    }
}

fn start_session(
    id: ClientId,
    stream: TcpStream,
    hub: &Hub,
    events: &Sender<AppEvent>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let reader_stream = stream.try_clone()?;
    let writer_stream = stream.try_clone()?;

    let (outbound, outbound_rx) = channel::<Arc<String>>();
    hub.register(id, Session { outbound, stream });

    thread::spawn(move || write_loop(id, writer_stream, outbound_rx));

    {
        let hub = hub.clone();
        let events = events.clone();
        thread::spawn(move || read_loop(id, reader_stream, hub, events));
    }

    Ok(())
}

fn write_loop(
    id: ClientId,
    stream: TcpStream,
    outbound: Receiver<Arc<String>>,
) {
    let mut stream = stream;
    while let Ok(line) = outbound.recv() {
        if stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.write_all(b"\n"))
            .is_err()
        {
            break;
        }
    }
    debug!("writer for session {id} done");
}

fn read_loop(
    id: ClientId,
    stream: TcpStream,
    hub: Hub,
    events: Sender<AppEvent>,
) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        match protocol::decode_client(&line) {
            Ok(event) => {
                let _ = events.send(AppEvent::Client(id, event));
            }
            Err(e) => {
                // Malformed input costs that request only; the session
                // stays up.
                warn!("session {id} sent a malformed event: {e}");
                hub.send_to(
                    id,
                    &EngineEvent::Status {
                        message: "Malformed event ignored".to_string(),
                        severity: Severity::Warning,
                    },
                );
            }
        }
    }
    let _ = events.send(AppEvent::Disconnected(id));
}
