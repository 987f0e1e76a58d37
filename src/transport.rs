//! Host-facing transport boundary
//!
//! The host controller drives a device through the [`Transport`] trait:
//! `open` launches the device process and returns timeout hints for the
//! session-start phases, `read`/`write` move opaque bytes, `close` tears
//! the session down. One transport manages at most one live session.

use crate::error::TransportError;
use crate::launcher::LaunchPlan;
use crate::options::TransportOptions;
use crate::session::{DiagnosticsCapture, Session};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host-visible timeout hints for the session-start phases.
///
/// This transport performs no separate handshake — readiness is
/// established synchronously by process launch — so every hint is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportTimeouts {
    pub session_start_retry_timeout_sec: u64,
    pub session_start_timeout_sec: u64,
    pub session_established_timeout_sec: u64,
}

impl TransportTimeouts {
    /// All phases immediate: no retry budget, no handshake window.
    pub fn immediate() -> Self {
        Self {
            session_start_retry_timeout_sec: 0,
            session_start_timeout_sec: 0,
            session_established_timeout_sec: 0,
        }
    }
}

/// The inbound contract the host controller drives, sequentially, with one
/// active session expected at a time.
pub trait Transport {
    /// Launch the device process. Reopening an already-open transport
    /// closes the previous session first.
    fn open(&mut self) -> Result<TransportTimeouts, TransportError>;

    /// Read up to `n` bytes; see [`Session::read`] for the contract.
    fn read(&mut self, n: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError>;

    /// Write all of `data` under one deadline; see [`Session::write`].
    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Tear down the session. Safe to call zero, one, or many times.
    fn close(&mut self);
}

/// [`Transport`] implementation that runs the device binary behind a
/// launch-helper script, speaking over the child's stdin/stdout pipes.
#[derive(Debug)]
pub struct DeviceTransport {
    options: TransportOptions,
    session: Option<Session>,
}

impl DeviceTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    /// Argument list handed to the launch helper: device binary, caller
    /// flags, then the configuration file as `-i<path>`.
    fn launch_plan(&self) -> LaunchPlan {
        let mut args = Vec::with_capacity(self.options.extra_args.len() + 2);
        args.push(self.options.device_binary.display().to_string());
        args.extend(self.options.extra_args.iter().cloned());
        args.push(format!("-i{}", self.options.config_file.display()));

        let mut plan = LaunchPlan::new(&self.options.launch_helper).with_args(args);
        if let Some(dir) = &self.options.working_dir {
            plan = plan.with_working_dir(dir);
        }
        plan
    }

    fn diagnostics_capture(&self) -> Option<DiagnosticsCapture> {
        self.options
            .capture_diagnostics
            .then(|| DiagnosticsCapture::new(self.options.diagnostics_path.clone()))
    }
}

impl Transport for DeviceTransport {
    fn open(&mut self) -> Result<TransportTimeouts, TransportError> {
        if let Some(mut previous) = self.session.take() {
            previous.close();
        }
        let session = Session::launch(&self.launch_plan(), self.diagnostics_capture())?;
        self.session = Some(session);
        Ok(TransportTimeouts::immediate())
    }

    fn read(&mut self, n: usize, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        self.session
            .as_mut()
            .ok_or(TransportError::Closed)?
            .read(n, timeout)
    }

    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        self.session
            .as_mut()
            .ok_or(TransportError::Closed)?
            .write(data, timeout)
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}
