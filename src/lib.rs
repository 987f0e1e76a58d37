//! simbridge — pipe transport and session management for simulated-hardware
//! device processes.
//!
//! A host controller uses this crate to launch an external device process
//! (a simulator binary behind a launch-helper script), exchange an opaque
//! byte stream with it over stdin/stdout pipes, bound every read and write
//! with an explicit timeout, and guarantee the process — and its entire
//! process group — is torn down on close, error, or drop.
//!
//! ```no_run
//! use simbridge::{DeviceTransport, Transport, TransportOptions};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), simbridge::TransportError> {
//! let options = TransportOptions::new("/opt/sim/run_helper.sh", "build/main");
//! let mut transport = DeviceTransport::new(options);
//!
//! transport.open()?;
//! transport.write(b"ping", Some(Duration::from_secs(5)))?;
//! let reply = transport.read(4, Some(Duration::from_secs(5)))?;
//! transport.close();
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod launcher;
pub mod options;
pub mod poller;
pub mod session;
pub mod transport;

pub use error::TransportError;
pub use launcher::LaunchPlan;
pub use options::TransportOptions;
pub use poller::{await_ready, Deadline};
pub use session::{DiagnosticsCapture, Session};
pub use transport::{DeviceTransport, Transport, TransportTimeouts};
