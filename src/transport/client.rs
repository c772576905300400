//! Display-client side of the transport: a blocking line-oriented session
//! plus the two pieces of client policy the stream depends on — the paint
//! gate that discards frames finishing decode out of order, and the knob
//! throttle that keeps a dragged control from flooding the wire.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use super::protocol::{self, ClientEvent, EngineEvent, ProtocolError};

pub struct DisplayClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl DisplayClient {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: stream,
        })
    }

    pub fn set_read_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        self.writer.set_read_timeout(timeout)
    }

    pub fn send(&mut self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let line = protocol::encode(event)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Block for the next engine event. `Closed` means the engine hung up.
    pub fn recv(&mut self) -> Result<EngineEvent, ProtocolError> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(ProtocolError::Closed);
            }
            if line.trim().is_empty() {
                continue;
            }
            return protocol::decode_engine(line.trim_end());
        }
    }

    /// Wait for an event matching `pred`, discarding others, up to the
    /// read timeout per line.
    pub fn recv_matching(
        &mut self,
        mut pred: impl FnMut(&EngineEvent) -> bool,
    ) -> Result<EngineEvent, ProtocolError> {
        loop {
            let event = self.recv()?;
            if pred(&event) {
                return Ok(event);
            }
        }
    }
}

/// Frames are numbered at arrival and decoded off-thread; decode times
/// vary, so completions can come back out of order. A frame only reaches
/// the canvas if nothing newer has been painted yet — stale completions
/// are dropped, never painted late.
#[derive(Debug, Default)]
pub struct PaintGate {
    next_receipt: u64,
    last_painted: u64,
}

impl PaintGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number a frame at arrival, before decode starts.
    pub fn admit(&mut self) -> u64 {
        self.next_receipt += 1;
        self.next_receipt
    }

    /// Decide at decode completion. True claims the canvas for this frame.
    pub fn should_paint(&mut self, receipt: u64) -> bool {
        if receipt > self.last_painted {
            self.last_painted = receipt;
            true
        } else {
            false
        }
    }
}

/// Rate limit per knob. A dragged slider emits far faster than frames
/// render; intermediate values are droppable because knob state is
/// last-write-wins on the engine side.
pub struct KnobThrottle {
    interval: Duration,
    last_sent: [Option<Instant>; 5],
}

impl KnobThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: [None; 5],
        }
    }

    /// ~60 Hz per knob.
    pub fn default_rate() -> Self {
        Self::new(Duration::from_millis(16))
    }

    pub fn admit(&mut self, knob: u8, now: Instant) -> bool {
        let Some(slot) = (knob as usize)
            .checked_sub(1)
            .and_then(|i| self.last_sent.get_mut(i))
        else {
            return false;
        };

        match slot {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                *slot = Some(now);
                true
            }
        }
    }
}
