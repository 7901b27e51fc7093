//! Outbound data path to the transport collaborator
//!
//! The signaling/session layer that establishes the peer channel lives
//! outside this crate. The engine only needs a way to push an opaque binary
//! payload that is silently dropped while no channel is open.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TransportError;

/// Fire-and-forget payload sink backed by whatever peer channel the
/// signaling layer has negotiated.
pub trait DataLink: Send + Sync {
    /// Send one opaque payload. Fails with `ChannelClosed` while no channel
    /// is open; callers log and drop, they do not retry.
    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Channel open/close notification from the signaling layer.
    fn set_open(&self, open: bool);
}

/// Length-prefixed frame writer on stdout. Stands in for the negotiated
/// peer channel when the node is driven over a local pipe.
pub struct StdoutLink {
    open: AtomicBool,
}

impl StdoutLink {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
        }
    }
}

impl Default for StdoutLink {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLink for StdoutLink {
    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }

        let mut out = std::io::stdout().lock();
        out.write_all(&(payload.len() as u32).to_be_bytes())
            .map_err(|e| TransportError::Io(e.to_string()))?;
        out.write_all(&payload)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        out.flush().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }

    fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

/// In-memory link that records every payload. Test double for the peer
/// channel.
#[cfg(test)]
pub struct MemoryLink {
    open: AtomicBool,
    pub sent: std::sync::Mutex<Vec<Vec<u8>>>,
}

#[cfg(test)]
impl MemoryLink {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl DataLink for MemoryLink {
    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}
