//! Transport configuration
//!
//! Declarative options the host supplies to `open`. Only the launch-helper
//! path is semantically required; everything else has a serde default so a
//! host can pass a minimal JSON object.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_config_file() -> PathBuf {
    PathBuf::from("device.ini")
}

/// Options for opening a device transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Path to the launch-helper script that wraps the simulator.
    pub launch_helper: PathBuf,

    /// Path to the device binary handed to the launch helper, relative to
    /// the working directory.
    pub device_binary: PathBuf,

    /// Extra flags appended to the device argument list verbatim.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Configuration file passed to the device via `-i<path>`.
    #[serde(default = "default_config_file")]
    pub config_file: PathBuf,

    /// Working directory for the device process. Inherited when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Append every chunk read from the device to an in-memory buffer.
    #[serde(default)]
    pub capture_diagnostics: bool,

    /// Where the capture buffer is flushed at teardown. Ignored unless
    /// `capture_diagnostics` is set.
    #[serde(default)]
    pub diagnostics_path: Option<PathBuf>,
}

impl TransportOptions {
    pub fn new(launch_helper: impl Into<PathBuf>, device_binary: impl Into<PathBuf>) -> Self {
        Self {
            launch_helper: launch_helper.into(),
            device_binary: device_binary.into(),
            extra_args: Vec::new(),
            config_file: default_config_file(),
            working_dir: None,
            capture_diagnostics: false,
            diagnostics_path: None,
        }
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_diagnostics(mut self, flush_path: Option<PathBuf>) -> Self {
        self.capture_diagnostics = true;
        self.diagnostics_path = flush_path;
        self
    }
}
