//! 7-Zip binary integration.
//!
//! All archive formats (ZIP, RAR, 7z) go through the 7z executable. Two
//! operations are needed:
//!
//! - List files: `7z l -slt -p<pw> -sccUTF-8 -scsUTF-8 -- archive.7z`
//!   - `-slt`: technical listing (key = value blocks)
//!   - `-p<pw>`: always passed, empty when there is no password, so 7z
//!     never stops to ask for one
//!   - archive properties come before the `----------` line, including
//!     `Solid = +` for solid archives
//!
//! - Stream files: `7z e -so -spd -bd -p<pw> ... -- archive.7z key1 key2 …`
//!   - `-so`: write file contents to stdout, concatenated in archive order
//!   - `-spd`: disable wildcard matching (keys are literal)
//!
//! 7z reports a bad password through an error line containing
//! "Wrong password"; that is the only way to tell it apart from a damaged
//! archive.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::config::ReaderConfig;
use crate::error::{InstallError, Result};

/// Command lines longer than this pass keys through a list file
const MAX_INLINE_KEYS_LENGTH: usize = 8000;

/// Information about a file in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path within the archive, exactly as the tool lists it
    pub key: String,
    /// Uncompressed size in bytes
    pub size: u64,
}

impl ArchiveEntry {
    /// Key with forward slashes, for matching against content paths
    pub fn path(&self) -> String {
        crate::paths::to_key(&self.key)
    }
}

/// Parsed archive listing
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<ArchiveEntry>,
    /// Solid archives can't extract an arbitrary entry without decompressing
    /// everything stored before it
    pub solid: bool,
}

impl Listing {
    pub fn get(&self, key: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Entry to try a password on: the smallest one unless the archive is
    /// solid, in which case the first one is the cheapest to reach.
    pub fn password_probe(&self) -> Option<&ArchiveEntry> {
        if self.solid {
            self.entries.first()
        } else {
            self.entries
                .iter()
                .reduce(|best, e| if e.size < best.size { e } else { best })
        }
    }
}

/// Captured output of a finished tool run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: Vec<String>,
}

/// Exit state of a streaming run
#[derive(Debug, Clone, Default)]
pub struct ToolStatus {
    pub success: bool,
    pub stderr: Vec<String>,
}

type Completion = Pin<Box<dyn Future<Output = Result<ToolStatus>> + Send>>;

/// Bytes of the requested entries, back to back, followed by the exit status.
pub struct ExtractStream {
    pub data: Box<dyn AsyncRead + Send + Unpin>,
    completion: Completion,
}

impl ExtractStream {
    pub fn new(data: Box<dyn AsyncRead + Send + Unpin>, completion: Completion) -> Self {
        Self { data, completion }
    }

    /// Close the data pipe and wait for the tool to exit
    pub async fn finish(self) -> Result<ToolStatus> {
        let ExtractStream { data, completion } = self;
        drop(data);
        completion.await
    }
}

/// External decompression tool.
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Run a technical listing of the archive
    async fn list(&self, archive: &Path, password: &str) -> Result<ToolOutput>;

    /// Start streaming the given entries
    async fn extract(&self, archive: &Path, password: &str, keys: &[String]) -> Result<ExtractStream>;
}

/// Turn tool error output into the matching error kind.
///
/// `password_set` decides between "password required" and "wrong password".
pub fn check_errors(success: bool, stderr: &[String], password_set: bool) -> Result<()> {
    let wrong_password = stderr
        .iter()
        .any(|line| line.to_lowercase().contains("wrong password"));
    if wrong_password {
        debug!("Password is invalid");
        return Err(if password_set {
            InstallError::WrongPassword
        } else {
            InstallError::PasswordRequired
        });
    }

    if !success {
        let message = stderr
            .iter()
            .find(|l| l.starts_with("ERROR:"))
            .or_else(|| stderr.iter().find(|l| !l.trim().is_empty()))
            .cloned()
            .unwrap_or_else(|| "7-Zip failed without a message".to_string());
        return Err(InstallError::CorruptArchive(message));
    }

    Ok(())
}

/// Parse 7z technical listing output.
///
/// Blocks before the `----------` separator describe the archive itself;
/// output without a separator (`-ba`) is all entries.
pub fn parse_listing(output: &str) -> Listing {
    let has_separator = output.lines().any(|l| l.trim() == "----------");
    let mut in_entries = !has_separator;
    let mut listing = Listing::default();
    let mut current: Vec<(String, String)> = Vec::new();

    let flush = |current: &mut Vec<(String, String)>, listing: &mut Listing| {
        if let Some(entry) = entry_from_block(current) {
            listing.entries.push(entry);
        }
        current.clear();
    };

    for line in output.lines() {
        let line = line.trim();

        if line == "----------" {
            in_entries = true;
            current.clear();
            continue;
        }

        if !in_entries {
            if line == "Solid = +" {
                listing.solid = true;
            }
            continue;
        }

        if line.is_empty() {
            flush(&mut current, &mut listing);
        } else if let Some((key, value)) = line.split_once(" = ") {
            current.push((key.to_string(), value.to_string()));
        } else if let Some(key) = line.strip_suffix(" =") {
            current.push((key.to_string(), String::new()));
        }
    }

    // Handle last entry if no trailing newline
    flush(&mut current, &mut listing);
    listing
}

fn entry_from_block(block: &[(String, String)]) -> Option<ArchiveEntry> {
    let get = |name: &str| block.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    let path = get("Path").filter(|p| !p.is_empty())?;
    let is_dir = get("Folder") == Some("+")
        || get("Attributes").is_some_and(|a| a.starts_with('D'));
    if is_dir {
        return None;
    }

    Some(ArchiveEntry {
        key: path.to_string(),
        size: get("Size").and_then(|s| s.parse::<u64>().ok()).unwrap_or(0),
    })
}

/// Get the path to the 7z binary.
///
/// Looks for the binary in the following locations:
/// 1. `ReaderConfig::executable` (or `ACM_7Z_PATH`)
/// 2. `bin/7z.exe`, `bin/7zz`, `7z.exe` next to the executable
/// 3. System PATH (`7zz`, `7z`, `7za`)
pub fn locate_executable(config: &ReaderConfig) -> Result<PathBuf> {
    if let Some(path) = &config.executable {
        return if path.is_file() {
            Ok(path.clone())
        } else {
            Err(InstallError::ToolMissing)
        };
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for candidate in ["bin/7z.exe", "bin/7zz", "7z.exe", "7zz"] {
                let path = exe_dir.join(candidate);
                if path.is_file() {
                    return Ok(path);
                }
            }
        }
    }

    ["7zz", "7z", "7za"]
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or(InstallError::ToolMissing)
}

/// The real thing: a 7z executable driven through `tokio::process`.
#[derive(Debug, Clone)]
pub struct SevenZipTool {
    executable: PathBuf,
}

impl SevenZipTool {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    pub fn locate(config: &ReaderConfig) -> Result<Self> {
        locate_executable(config).map(Self::new)
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// 7z gets the bare file name and runs in the archive's directory, which
    /// sidesteps charset trouble with unusual absolute paths.
    fn command(&self, archive: &Path, args: &[String]) -> Command {
        let directory = archive.parent().filter(|p| !p.as_os_str().is_empty());
        let file_name = archive.file_name().map(PathBuf::from).unwrap_or_else(|| archive.to_path_buf());

        debug!("{} {} -- {}", self.executable.display(), mask_password(args).join(" "), file_name.display());

        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .arg("--")
            .arg(file_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(directory) = directory {
            cmd.current_dir(directory);
        }

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd
    }
}

fn spawn_error(e: std::io::Error) -> InstallError {
    if e.kind() == std::io::ErrorKind::NotFound {
        InstallError::ToolMissing
    } else {
        InstallError::io("Failed to run 7-Zip", e)
    }
}

fn mask_password(args: &[String]) -> Vec<&str> {
    args.iter()
        .map(|a| if a.starts_with("-p") && a.len() > 2 { "-p***" } else { a.as_str() })
        .collect()
}

fn split_lines(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

#[async_trait]
impl ArchiveTool for SevenZipTool {
    async fn list(&self, archive: &Path, password: &str) -> Result<ToolOutput> {
        let args = vec![
            "l".to_string(),
            "-slt".to_string(),
            format!("-p{}", password),
            "-sccUTF-8".to_string(),
            "-scsUTF-8".to_string(),
        ];

        let output = self.command(archive, &args).output().await.map_err(spawn_error)?;
        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: split_lines(&output.stderr),
        })
    }

    async fn extract(&self, archive: &Path, password: &str, keys: &[String]) -> Result<ExtractStream> {
        let mut args = vec![
            "e".to_string(),
            "-so".to_string(),
            "-spd".to_string(),
            "-bd".to_string(),
            format!("-p{}", password),
            "-sccUTF-8".to_string(),
            "-scsUTF-8".to_string(),
        ];

        // Long key lists go through a list file; it has to outlive the process
        let inline_length: usize = keys.iter().map(|k| k.len() + 3).sum();
        let list_file = if inline_length > MAX_INLINE_KEYS_LENGTH {
            let mut file = tempfile::NamedTempFile::new()
                .map_err(|e| InstallError::io("Failed to create 7-Zip list file", e))?;
            std::io::Write::write_all(&mut file, keys.join("\n").as_bytes())
                .map_err(|e| InstallError::io("Failed to write 7-Zip list file", e))?;
            args.push(format!("-i@{}", file.path().display()));
            Some(file)
        } else {
            None
        };

        let mut cmd = self.command(archive, &args);
        if list_file.is_none() {
            cmd.args(keys);
        }

        let mut child = cmd.spawn().map_err(spawn_error)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InstallError::io("Failed to get 7-Zip stdout", std::io::Error::other("no pipe")))?;
        let mut stderr = child.stderr.take();

        // Drained concurrently so a chatty stderr can't block the data pipe
        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_end(&mut buffer).await;
            }
            buffer
        });

        let completion: Completion = Box::pin(async move {
            let _list_file = list_file;
            let status = child
                .wait()
                .await
                .map_err(|e| InstallError::io("Failed to wait for 7-Zip", e))?;
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(ToolStatus {
                success: status.success(),
                stderr: split_lines(&stderr),
            })
        });

        Ok(ExtractStream::new(Box::new(stdout), completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
7-Zip 23.01 (x64) : Copyright (c) 1999-2023 Igor Pavlov : 2023-06-20

Scanning the drive for archives:
1 file, 4182 bytes (5 KiB)

Listing archive: pack.7z

--
Path = pack.7z
Type = 7z
Physical Size = 4182
Solid = +
Blocks = 1

----------
Path = spa\\models.ini
Folder = -
Size = 120
Attributes = A

Path = spa\\spa.kn5
Size = 4000
Attributes = A

Path = spa
Size = 0
Attributes = D

Path = spa\\ui\\ui_track.json
Size = 62
Attributes = A";

    #[test]
    fn test_parse_listing() {
        let listing = parse_listing(SAMPLE);
        assert!(listing.solid);
        assert_eq!(listing.entries.len(), 3);
        assert_eq!(listing.entries[0].key, "spa\\models.ini");
        assert_eq!(listing.entries[0].size, 120);
        assert_eq!(listing.entries[2].path(), "spa/ui/ui_track.json");
        assert_eq!(listing.entries[2].size, 62);
    }

    #[test]
    fn test_parse_bare_listing() {
        let listing = parse_listing("Path = a.txt\nSize = 5\n\nPath = dir\nFolder = +\nSize = 0\n");
        assert!(!listing.solid);
        assert_eq!(listing.entries, vec![ArchiveEntry { key: "a.txt".to_string(), size: 5 }]);
    }

    #[test]
    fn test_password_probe() {
        let mut listing = parse_listing(SAMPLE);
        assert_eq!(listing.password_probe().unwrap().key, "spa\\models.ini");

        listing.solid = false;
        assert_eq!(listing.password_probe().unwrap().key, "spa\\ui\\ui_track.json");

        assert!(Listing::default().password_probe().is_none());
    }

    #[test]
    fn test_check_errors() {
        let wrong = vec!["ERROR: Wrong password : spa\\spa.kn5".to_string()];
        assert!(matches!(check_errors(false, &wrong, true), Err(InstallError::WrongPassword)));
        assert!(matches!(check_errors(false, &wrong, false), Err(InstallError::PasswordRequired)));

        let encrypted = vec!["ERROR: pack.7z : Can not open encrypted archive. Wrong password?".to_string()];
        assert!(matches!(check_errors(false, &encrypted, false), Err(InstallError::PasswordRequired)));

        let broken = vec!["ERROR: pack.7z".to_string(), "Can not open the file as archive".to_string()];
        match check_errors(false, &broken, false) {
            Err(InstallError::CorruptArchive(message)) => assert_eq!(message, "ERROR: pack.7z"),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(check_errors(true, &[], false).is_ok());
    }

    #[test]
    fn test_mask_password() {
        let args = vec!["l".to_string(), "-psecret".to_string(), "-p".to_string()];
        assert_eq!(mask_password(&args), vec!["l", "-p***", "-p"]);
    }

    #[test]
    fn test_locate_missing_override() {
        let config = ReaderConfig {
            executable: Some(PathBuf::from("/definitely/not/here/7z")),
            ..ReaderConfig::default()
        };
        assert!(matches!(locate_executable(&config), Err(InstallError::ToolMissing)));
    }

    #[tokio::test]
    async fn test_list_and_extract_zip() -> anyhow::Result<()> {
        // Skip if 7z not available
        let Ok(tool) = SevenZipTool::locate(&ReaderConfig::default()) else {
            return Ok(());
        };

        let dir = tempdir()?;
        let zip_path = dir.path().join("test.zip");
        {
            let file = std::fs::File::create(&zip_path)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();

            zip.start_file("car/data.acd", options)?;
            zip.write_all(b"hello")?;

            zip.start_file("car/ui/ui_car.json", options)?;
            zip.write_all(b"{\"name\":\"Car\"}")?;
            zip.finish()?;
        }

        let output = tool.list(&zip_path, "").await?;
        check_errors(output.success, &output.stderr, false)?;
        let listing = parse_listing(&output.stdout);
        assert_eq!(listing.entries.len(), 2);

        let keys: Vec<String> = listing.entries.iter().map(|e| e.key.clone()).collect();
        let mut stream = tool.extract(&zip_path, "", &keys).await?;
        let mut data = Vec::new();
        stream.data.read_to_end(&mut data).await?;
        let status = stream.finish().await?;
        check_errors(status.success, &status.stderr, false)?;
        assert_eq!(data, b"hello{\"name\":\"Car\"}");

        Ok(())
    }
}
