//! Installation error taxonomy
//!
//! Every failure the engine can surface maps onto one of these kinds. Each
//! kind carries a short title and a longer comment for the installation
//! summary; the underlying cause only goes to the log.

use serde::Serialize;
use std::path::PathBuf;

use crate::config::ConfigError;

pub type Result<T, E = InstallError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Archive is protected with a password")]
    PasswordRequired,

    #[error("Password is incorrect")]
    WrongPassword,

    #[error("7-Zip executable not found")]
    ToolMissing,

    #[error("Archive is damaged or not supported: {0}")]
    CorruptArchive(String),

    #[error("Unexpected end of data in '{key}': read {read} of {expected} bytes")]
    TruncatedRead {
        key: String,
        read: u64,
        expected: u64,
        /// Zip with everything read so far, when it could be written
        dump: Option<PathBuf>,
    },

    #[error("Content directories are not set, game root might be missing")]
    DirectoriesUnavailable,

    #[error("Place is taken: {}", .0.display())]
    PlaceIsTaken(PathBuf),

    #[error("Can't remove existing content at {}", .0.display())]
    CannotClearExisting(PathBuf),

    #[error("Archive reader is busy with another batch")]
    ReaderBusy,

    #[error("Malformed content entry: {0}")]
    MalformedEntry(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification used by callers deciding whether to re-prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PasswordRequired,
    WrongPassword,
    ToolMissing,
    CorruptArchive,
    TruncatedRead,
    DirectoriesUnavailable,
    PlaceIsTaken,
    CannotClearExisting,
    ReaderBusy,
    MalformedEntry,
    Config,
    Io,
}

impl InstallError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        InstallError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::PasswordRequired => ErrorKind::PasswordRequired,
            InstallError::WrongPassword => ErrorKind::WrongPassword,
            InstallError::ToolMissing => ErrorKind::ToolMissing,
            InstallError::CorruptArchive(_) => ErrorKind::CorruptArchive,
            InstallError::TruncatedRead { .. } => ErrorKind::TruncatedRead,
            InstallError::DirectoriesUnavailable => ErrorKind::DirectoriesUnavailable,
            InstallError::PlaceIsTaken(_) => ErrorKind::PlaceIsTaken,
            InstallError::CannotClearExisting(_) => ErrorKind::CannotClearExisting,
            InstallError::ReaderBusy => ErrorKind::ReaderBusy,
            InstallError::MalformedEntry(_) => ErrorKind::MalformedEntry,
            InstallError::Config(_) => ErrorKind::Config,
            InstallError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Password problems and place conflicts can be fixed by asking the user again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PasswordRequired
                | ErrorKind::WrongPassword
                | ErrorKind::PlaceIsTaken
                | ErrorKind::CannotClearExisting
        )
    }

    /// Short user-facing title
    pub fn title(&self) -> &'static str {
        match self {
            InstallError::PasswordRequired => "Password required",
            InstallError::WrongPassword => "Wrong password",
            InstallError::ToolMissing => "7-Zip is missing",
            InstallError::CorruptArchive(_) => "Can't read archive",
            InstallError::TruncatedRead { .. } => "Unexpected end of archive",
            InstallError::DirectoriesUnavailable => "Content folders are not available",
            InstallError::PlaceIsTaken(_) => "Place is taken",
            InstallError::CannotClearExisting(_) => "Can't remove existing content",
            InstallError::ReaderBusy => "Archive is busy",
            InstallError::MalformedEntry(_) => "Can't install content",
            InstallError::Config(_) => "Invalid settings",
            InstallError::Io { .. } => "Can't install content",
        }
    }

    /// Longer explanation shown under the title
    pub fn comment(&self) -> String {
        match self {
            InstallError::PasswordRequired => {
                "Archive is encrypted. Enter its password to continue.".to_string()
            }
            InstallError::WrongPassword => {
                "Archive could not be decrypted with this password. Try another one.".to_string()
            }
            InstallError::ToolMissing => {
                "Install 7-Zip or point the installer to its executable in the settings.".to_string()
            }
            InstallError::CorruptArchive(_) => {
                "Archive is damaged or uses an unsupported format. Try downloading it again.".to_string()
            }
            InstallError::TruncatedRead { dump, .. } => match dump {
                Some(path) => format!(
                    "Archive ended before all files were read. Data read so far was saved to {}.",
                    path.display()
                ),
                None => "Archive ended before all files were read.".to_string(),
            },
            InstallError::DirectoriesUnavailable => {
                "Game root folder is not set or doesn't exist. Check the settings.".to_string()
            }
            InstallError::PlaceIsTaken(path) => format!(
                "Something else already occupies {}. Pick a different ID.",
                path.display()
            ),
            InstallError::CannotClearExisting(path) => format!(
                "Existing content at {} is still there, it might be in use by another program.",
                path.display()
            ),
            InstallError::ReaderBusy => {
                "Previous read from this archive hasn't finished yet.".to_string()
            }
            InstallError::MalformedEntry(message) => message.clone(),
            InstallError::Config(e) => e.to_string(),
            InstallError::Io { context, .. } => format!("{}.", context),
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            title: self.title().to_string(),
            comment: self.comment(),
        }
    }
}

/// What the installation summary shows for a failed item
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub title: String,
    pub comment: String,
}
