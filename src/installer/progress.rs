//! Progress reporting for installation sessions

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::content::ContentType;

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Session phases, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    /// List the archive and test the password
    Open,
    /// Detect content and look up what is installed
    Scan,
    /// Clear or clean up existing content
    Prepare,
    /// Stream files into place
    Copy,
    /// Tell the installed-content lookup what changed
    Refresh,
}

impl InstallPhase {
    pub fn name(&self) -> &'static str {
        match self {
            InstallPhase::Open => "open",
            InstallPhase::Scan => "scan",
            InstallPhase::Prepare => "prepare",
            InstallPhase::Copy => "copy",
            InstallPhase::Refresh => "refresh",
        }
    }
}

/// Installation progress information
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseStarted {
        phase: InstallPhase,
        message: String,
    },
    PhaseCompleted {
        phase: InstallPhase,
    },
    /// One file was written; `current` counts from 1
    Copying {
        key: String,
        current: usize,
        total: usize,
    },
    /// Existing content was moved to the recycle bin
    Recycled {
        paths: Vec<PathBuf>,
    },
    Installed {
        content_type: ContentType,
        id: String,
        destination: PathBuf,
    },
}
