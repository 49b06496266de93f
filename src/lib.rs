//! acm-install - content installer for racing simulator archives
//!
//! Reads cars, tracks, skins, fonts and other add-ons out of ZIP, RAR and
//! 7z archives through the 7-Zip binary, reconciles them with what is
//! already installed and copies them into the game folder.

pub mod archive;
pub mod config;
pub mod content;
pub mod error;
pub mod ini;
pub mod installed;
pub mod installer;
pub mod paths;

pub use config::{InstallConfig, ReaderConfig};
pub use content::{ContentEntry, ContentType};
pub use error::{ErrorKind, ErrorReport, InstallError, Result};
pub use installer::{InstallReport, InstallSession, ProgressCallback, ProgressEvent};
