//! Error taxonomy for the device transport
//!
//! Three classes matter to callers: a timeout is recoverable (retry with a
//! fresh deadline), a closed transport is terminal for the session, and a
//! setup failure means no session was created at all.

use std::io;
use thiserror::Error;

/// Errors surfaced by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A readiness wait exceeded its deadline. The session is still
    /// usable; the caller may retry with a fresh timeout.
    #[error("i/o wait timed out")]
    IoTimeout,

    /// The device process is gone, the pipe reported broken, or the
    /// session was already closed. Terminal: every further read or write
    /// on the same session reproduces this error without attempting I/O.
    #[error("transport closed")]
    Closed,

    /// The device process could not be launched or its pipes could not be
    /// put into non-blocking mode. No partial session is left alive.
    #[error("session setup failed: {0}")]
    Setup(String),

    /// An OS error that is neither a timeout nor a closed pipe.
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True for errors a caller may retry after (currently only timeouts).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::IoTimeout)
    }

    /// True once the session must be discarded.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}
