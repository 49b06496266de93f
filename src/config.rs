//! Reader and installation configuration
//!
//! Defaults match what the desktop manager ships with; a few knobs can be
//! overridden through the environment for troubleshooting.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::installed::ContentDirectories;

/// Path to a 7-Zip executable overriding the lookup in `archive::sevenzip`.
pub fn executable_override() -> Option<PathBuf> {
    static OVERRIDE: OnceLock<Option<PathBuf>> = OnceLock::new();
    OVERRIDE
        .get_or_init(|| {
            std::env::var_os("ACM_7Z_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .clone()
}

/// Number of empty reads tolerated before a streamed entry counts as truncated.
fn short_read_retries() -> u32 {
    static RETRIES: OnceLock<u32> = OnceLock::new();
    *RETRIES.get_or_init(|| {
        std::env::var("ACM_SHORT_READ_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(2)
    })
}

/// Configuration for one archive reader
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Explicit 7-Zip executable; looked up when not set
    pub executable: Option<PathBuf>,

    /// Empty reads tolerated per entry before giving up
    pub short_read_retries: u32,

    /// Base delay between empty reads, multiplied by the attempt number
    pub short_read_backoff: Duration,

    /// Where diagnostic dumps of truncated reads are written
    pub diagnostics_dir: PathBuf,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            executable: executable_override(),
            short_read_retries: short_read_retries(),
            short_read_backoff: Duration::from_millis(500),
            diagnostics_dir: std::env::temp_dir().join("acm-install"),
        }
    }
}

/// Configuration for installing content into a game folder
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Game root directory; content goes to `content/…` below it
    pub content_root: Option<PathBuf>,

    /// Directory for manager UI themes
    pub themes_dir: PathBuf,

    /// Initial value of "keep existing shared models" for tracks
    pub keep_existing_shared_models: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            content_root: None,
            themes_dir: default_themes_dir(),
            keep_existing_shared_models: true,
        }
    }
}

fn default_themes_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("acm-install")
        .join("Themes")
}

impl InstallConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Content directories, `None` while the game root is not set
    pub fn directories(&self) -> Option<ContentDirectories> {
        self.content_root
            .as_ref()
            .map(|root| ContentDirectories::new(root, &self.themes_dir))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.content_root {
            if !root.is_dir() {
                return Err(ConfigError::RootNotFound(root.clone()));
            }
        }

        if self.themes_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyThemesDir);
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Game root directory not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Themes directory is not set")]
    EmptyThemesDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.short_read_backoff, Duration::from_millis(500));

        let install = InstallConfig::default();
        assert!(install.content_root.is_none());
        assert!(install.keep_existing_shared_models);
    }

    #[test]
    fn test_validate_root() {
        let dir = tempdir().unwrap();
        assert!(InstallConfig::with_root(dir.path()).validate().is_ok());

        let missing = InstallConfig::with_root(dir.path().join("missing"));
        assert!(matches!(missing.validate(), Err(ConfigError::RootNotFound(_))));

        // Unset root is valid here, it fails later when a destination is needed
        assert!(InstallConfig::default().validate().is_ok());
        assert!(InstallConfig::default().directories().is_none());
        let directories = InstallConfig::with_root(dir.path()).directories().unwrap();
        assert_eq!(directories.root(), dir.path());
    }
}
