//! Device session: bounded-time byte transport and teardown
//!
//! A [`Session`] exclusively owns one device process and its two pipe
//! endpoints. `read` and `write` are straight-line "wait for readiness,
//! attempt one non-blocking operation" sequences; the readiness wait is
//! the only place they block, always under the caller's deadline.
//!
//! Teardown is idempotent and never fails past its own boundary: it
//! commonly races a process that is already dying for exactly the reason
//! teardown is being invoked, so "process vanished" conditions are
//! swallowed. Dropping a session runs teardown too, so a leaked session
//! cannot leak its child.

use crate::error::TransportError;
use crate::launcher::LaunchPlan;
use crate::poller::{await_ready, Deadline};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, Pid};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Append-only capture of every chunk read from the device, flushed to a
/// file once at teardown. Enabled by [`TransportOptions::capture_diagnostics`].
///
/// [`TransportOptions::capture_diagnostics`]: crate::options::TransportOptions
#[derive(Debug, Default)]
pub struct DiagnosticsCapture {
    buffer: Vec<u8>,
    flush_path: Option<PathBuf>,
}

impl DiagnosticsCapture {
    pub fn new(flush_path: Option<PathBuf>) -> Self {
        Self {
            buffer: Vec::new(),
            flush_path,
        }
    }

    fn record(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn captured(&self) -> &[u8] {
        &self.buffer
    }

    /// One-shot flush at teardown. Runs inside `close`, so failures are
    /// logged and swallowed rather than raised.
    fn flush(&mut self) {
        if let Some(path) = &self.flush_path {
            if let Err(e) = fs::write(path, &self.buffer) {
                warn!(path = %path.display(), error = %e, "failed to flush diagnostics capture");
            }
        }
    }
}

/// One running device process plus its owned pipe endpoints.
///
/// The child handle is either a live process this session exclusively owns
/// or `None`; the pipe endpoints are `Some` exactly while the handle is.
/// Once closed, every transport operation fails with
/// [`TransportError::Closed`] without attempting I/O.
#[derive(Debug)]
pub struct Session {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    diagnostics: Option<DiagnosticsCapture>,
}

impl Session {
    /// Launch the device process described by `plan` and take ownership of
    /// it. On any setup failure no child is left running.
    pub fn launch(
        plan: &LaunchPlan,
        diagnostics: Option<DiagnosticsCapture>,
    ) -> Result<Self, TransportError> {
        let mut child = plan.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Setup("child stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Setup("child stdout was not piped".to_string()))?;

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(stdout),
            diagnostics,
        })
    }

    pub fn is_open(&self) -> bool {
        self.child.is_some()
    }

    /// Pid of the device process while the session is open.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Captured diagnostic bytes so far, if capture is enabled.
    pub fn diagnostics(&self) -> Option<&[u8]> {
        self.diagnostics.as_ref().map(|d| d.captured())
    }

    /// Read up to `n` bytes from the device.
    ///
    /// Returns whatever one non-blocking read yields once the pipe is
    /// ready — possibly fewer than `n` bytes; the caller owns any looping
    /// needed to accumulate more. A peer that closed its end (EOF or
    /// broken pipe) tears the session down and yields
    /// [`TransportError::Closed`].
    pub fn read(&mut self, n: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        if self.child.is_none() {
            return Err(TransportError::Closed);
        }
        if n == 0 {
            // A zero-length read is indistinguishable from EOF below.
            return Ok(Vec::new());
        }

        let deadline = Deadline::after(timeout);
        let mut buf = vec![0u8; n];
        loop {
            {
                let stdout = self.stdout.as_ref().ok_or(TransportError::Closed)?;
                await_ready(&[stdout.as_fd()], &[], &deadline)?;
            }

            let attempt = self
                .stdout
                .as_mut()
                .ok_or(TransportError::Closed)?
                .read(&mut buf);
            match attempt {
                Ok(0) => {
                    // Readiness was reported, so zero bytes is a real EOF,
                    // not a transient empty pipe.
                    self.close();
                    return Err(TransportError::Closed);
                }
                Ok(count) => {
                    buf.truncate(count);
                    trace!(bytes = count, "read from device");
                    if let Some(diag) = self.diagnostics.as_mut() {
                        diag.record(&buf);
                    }
                    return Ok(buf);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // Spurious wakeup; re-wait under the same deadline.
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    self.close();
                    return Err(TransportError::Closed);
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    /// Write all of `data` to the device before `timeout` elapses.
    ///
    /// One deadline bounds the whole call: every partial write needed to
    /// flush `data` shares it. On success the entire payload was handed
    /// off; on failure an unspecified prefix may have been delivered.
    pub fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.child.is_none() {
            return Err(TransportError::Closed);
        }

        let deadline = Deadline::after(timeout);
        let mut offset = 0;
        while offset < data.len() {
            {
                let stdin = self.stdin.as_ref().ok_or(TransportError::Closed)?;
                await_ready(&[], &[stdin.as_fd()], &deadline)?;
            }

            let attempt = self
                .stdin
                .as_mut()
                .ok_or(TransportError::Closed)?
                .write(&data[offset..]);
            match attempt {
                Ok(0) => {
                    self.close();
                    return Err(TransportError::Closed);
                }
                Ok(count) => {
                    trace!(bytes = count, remaining = data.len() - offset - count, "wrote to device");
                    offset += count;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    self.close();
                    return Err(TransportError::Closed);
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(())
    }

    /// Terminate the device process and its whole process group.
    ///
    /// Idempotent: the first call clears the child handle before touching
    /// the process, so any later observer sees a closed session; every
    /// call after the first is a no-op. Signalling errors are discarded —
    /// the process may well have exited on its own already.
    pub fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.stdin = None;
        self.stdout = None;
        if let Some(diag) = self.diagnostics.as_mut() {
            diag.flush();
        }

        let pid = Pid::from_raw(child.id() as i32);
        let pgid = getpgid(Some(pid)).unwrap_or(pid);
        debug!(pid = child.id(), "tearing down device process");

        let _ = kill(pid, Signal::SIGTERM);
        let _ = kill(pid, Signal::SIGKILL);
        let _ = child.wait();
        // The child led its own group, so this reaches any grandchildren
        // it spawned.
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
