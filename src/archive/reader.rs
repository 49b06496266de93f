//! Stateful reader over one archive.
//!
//! The reader lists the archive once, tests the password against a single
//! entry, and batches small reads: callers ask for entries with
//! [`ArchiveReader::read_entry`], get `None` the first time, and the keys are
//! collected into a pending set. [`ArchiveReader::resolve_pending`] then
//! fetches the whole set in one streamed pass and the next lookup hits the
//! cache.
//!
//! Streaming is strictly sequential: each entry is read in full before the
//! next one, in archive order. If the stream ends early we wait briefly and
//! retry a couple of times before declaring the entry truncated.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dump::{write_dump, DumpContents};
use super::sevenzip::{check_errors, parse_listing, ArchiveEntry, ArchiveTool, ExtractStream, Listing, SevenZipTool};
use crate::config::ReaderConfig;
use crate::error::{InstallError, Result};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// How long to wait for the tool to exit after a truncated read
const FAILED_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keys waiting for the next [`ArchiveReader::resolve_pending`] pass.
///
/// Keeps first-request order; a key is only stored once.
#[derive(Debug, Default, Clone)]
pub struct PendingReadSet {
    keys: Vec<String>,
    seen: HashSet<String>,
}

impl PendingReadSet {
    /// Add a key, returns false if it was already pending
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.keys.push(key);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Progress of a [`ArchiveReader::copy_entries`] pass
#[derive(Debug, Clone)]
pub struct CopyProgress {
    pub key: String,
    pub index: usize,
    pub total: usize,
}

pub type CopyProgressFn = dyn Fn(&CopyProgress) + Send + Sync;

/// Result of a finished copy pass
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub written: Vec<PathBuf>,
    pub bytes: u64,
}

#[derive(Default)]
struct ReaderState {
    password: Option<String>,
    listing: Option<Arc<Listing>>,
    password_required: bool,
    password_correct: bool,
    pending: PendingReadSet,
    cache: HashMap<String, Arc<Vec<u8>>>,
}

/// Marks the reader as streaming; a second streaming call fails instead of
/// waiting.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| InstallError::ReaderBusy)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ArchiveReader<T: ArchiveTool = SevenZipTool> {
    path: PathBuf,
    tool: T,
    config: ReaderConfig,
    state: Mutex<ReaderState>,
    streaming: AtomicBool,
}

impl ArchiveReader<SevenZipTool> {
    /// Open an archive and make sure it can be read with `password`.
    ///
    /// Fails with `PasswordRequired` or `WrongPassword` if the password test
    /// doesn't pass; use [`ArchiveReader::new`] and
    /// [`ArchiveReader::try_set_password`] to keep asking instead.
    /// Returns `None` when cancelled.
    pub async fn open(
        path: impl Into<PathBuf>,
        password: Option<String>,
        config: ReaderConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<Self>> {
        let tool = SevenZipTool::locate(&config)?;
        let reader = Self::new(path, tool, config).with_password(password);

        match reader.test_password(cancel).await? {
            None => Ok(None),
            Some(true) => Ok(Some(reader)),
            Some(false) if reader.has_password() => Err(InstallError::WrongPassword),
            Some(false) => Err(InstallError::PasswordRequired),
        }
    }
}

impl<T: ArchiveTool> ArchiveReader<T> {
    pub fn new(path: impl Into<PathBuf>, tool: T, config: ReaderConfig) -> Self {
        Self {
            path: path.into(),
            tool,
            config,
            state: Mutex::new(ReaderState::default()),
            streaming: AtomicBool::new(false),
        }
    }

    pub fn with_password(self, password: Option<String>) -> Self {
        self.state().password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    fn state(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn password(&self) -> (String, bool) {
        let state = self.state();
        match &state.password {
            Some(p) => (p.clone(), true),
            None => (String::new(), false),
        }
    }

    pub fn has_password(&self) -> bool {
        self.state().password.is_some()
    }

    pub fn is_password_required(&self) -> bool {
        self.state().password_required
    }

    pub fn is_password_correct(&self) -> bool {
        self.state().password_correct
    }

    /// Listing of the archive, read once and cached.
    pub async fn list_entries(&self, cancel: &CancellationToken) -> Result<Option<Arc<Listing>>> {
        let cached = self.state().listing.clone();
        if let Some(listing) = cached {
            return Ok(Some(listing));
        }

        let (password, password_set) = self.password();
        let output = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            output = self.tool.list(&self.path, &password) => output?,
        };
        check_errors(output.success, &output.stderr, password_set)?;

        let listing = Arc::new(parse_listing(&output.stdout));
        debug!(
            "Listed {}: {} entries{}",
            self.path.display(),
            listing.entries.len(),
            if listing.solid { ", solid" } else { "" }
        );

        self.state().listing = Some(listing.clone());
        Ok(Some(listing))
    }

    /// Check the current password by listing the archive and decoding one
    /// entry: the smallest one, or the first one for solid archives.
    ///
    /// Returns `None` when cancelled.
    pub async fn test_password(&self, cancel: &CancellationToken) -> Result<Option<bool>> {
        let listing = match self.list_entries(cancel).await {
            Ok(Some(listing)) => listing,
            Ok(None) => return Ok(None),
            Err(InstallError::PasswordRequired | InstallError::WrongPassword) => {
                // Encrypted headers: the listing itself needs the password
                self.mark_password(false);
                return Ok(Some(false));
            }
            Err(e) => return Err(e),
        };

        let Some(probe) = listing.password_probe() else {
            self.mark_password(true);
            return Ok(Some(true));
        };

        debug!("Testing password on {} ({} bytes)", probe.key, probe.size);
        let _guard = BusyGuard::acquire(&self.streaming)?;
        let (password, password_set) = self.password();

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            stream = self.tool.extract(&self.path, &password, std::slice::from_ref(&probe.key)) => stream?,
        };
        let status = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            status = drain(stream) => status?,
        };

        match check_errors(status.success, &status.stderr, password_set) {
            Ok(()) => {
                self.mark_password(true);
                Ok(Some(true))
            }
            Err(InstallError::PasswordRequired | InstallError::WrongPassword) => {
                self.mark_password(false);
                Ok(Some(false))
            }
            Err(e) => Err(e),
        }
    }

    fn mark_password(&self, correct: bool) {
        let mut state = self.state();
        state.password_correct = correct;
        if !correct {
            state.password_required = true;
        }
    }

    /// Switch to another password and test it.
    ///
    /// A listing that already succeeded is reused; only the password test
    /// runs again. Returns `None` when cancelled.
    pub async fn try_set_password(
        &self,
        password: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Option<bool>> {
        {
            let mut state = self.state();
            state.password = password.filter(|p| !p.is_empty());
            state.password_correct = false;
        }
        self.test_password(cancel).await
    }

    /// Cached content of an entry, or `None` after adding it to the pending set.
    pub fn read_entry(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut state = self.state();
        if let Some(data) = state.cache.get(key) {
            return Some(data.clone());
        }
        state.pending.insert(key);
        None
    }

    /// Whether an entry is cached; schedules it otherwise
    pub fn is_available(&self, key: &str) -> bool {
        self.read_entry(key).is_some()
    }

    /// Cached content of an entry, without scheduling anything
    pub fn cached(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.state().cache.get(key).cloned()
    }

    /// Schedule entries for the next resolve pass
    pub fn request_entries<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        for key in keys {
            let key = key.into();
            if !state.cache.contains_key(&key) {
                state.pending.insert(key);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.state().pending.is_empty()
    }

    /// Fetch all pending entries in one streamed pass.
    ///
    /// The pending set is taken at the start; keys requested while the pass
    /// runs wait for the next one. Keys the archive doesn't contain are
    /// dropped. Returns the number of entries loaded, or `None` when
    /// cancelled (entries read so far are cached, unread keys go back to
    /// the pending set).
    pub async fn resolve_pending(&self, cancel: &CancellationToken) -> Result<Option<usize>> {
        let _guard = BusyGuard::acquire(&self.streaming)?;

        let pending = std::mem::take(&mut self.state().pending);
        if pending.is_empty() {
            return Ok(Some(0));
        }

        let listing = match self.list_entries(cancel).await {
            Ok(Some(listing)) => listing,
            Ok(None) => {
                self.request_entries(pending.keys);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let targets: Vec<&ArchiveEntry> = {
            let state = self.state();
            listing
                .entries
                .iter()
                .filter(|e| pending.contains(&e.key) && !state.cache.contains_key(&e.key))
                .collect()
        };

        let missing = pending.len() - targets.len();
        if missing > 0 {
            debug!("{} requested entries are not in the archive", missing);
        }
        if targets.is_empty() {
            return Ok(Some(0));
        }

        info!("Reading {} entries from {}", targets.len(), self.path.display());
        let keys: Vec<String> = targets.iter().map(|e| e.key.clone()).collect();
        let (password, password_set) = self.password();

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => {
                self.request_entries(keys);
                return Ok(None);
            }
            stream = self.tool.extract(&self.path, &password, &keys) => stream?,
        };

        let mut loaded: Vec<(String, Vec<u8>)> = Vec::with_capacity(targets.len());
        for entry in &targets {
            if cancel.is_cancelled() {
                let count = loaded.len();
                debug!("Reading cancelled after {} of {} entries", count, targets.len());
                self.store(loaded);
                self.request_entries(keys.into_iter().skip(count));
                return Ok(None);
            }

            // Listed sizes can't be trusted; grow as bytes arrive
            let mut buffer = Vec::with_capacity(entry.size.min(COPY_BUFFER_SIZE as u64) as usize);
            let read = self
                .copy_patiently(&mut stream.data, &mut buffer, entry.size)
                .await
                .map_err(|e| InstallError::io("Failed to read from 7-Zip", e))?;
            if read < entry.size {
                let contents = DumpContents {
                    archive: self.path.clone(),
                    complete: loaded,
                    partial: Some((entry.key.clone(), buffer)),
                    expected: entry.size,
                    written: Vec::new(),
                };
                return Err(self.truncated(stream, entry, read, contents, password_set).await);
            }
            loaded.push((entry.key.clone(), buffer));
        }

        let status = stream.finish().await?;
        check_errors(status.success, &status.stderr, password_set)?;

        let count = loaded.len();
        self.store(loaded);
        Ok(Some(count))
    }

    fn store(&self, loaded: Vec<(String, Vec<u8>)>) {
        let mut state = self.state();
        for (key, data) in loaded {
            state.cache.insert(key, Arc::new(data));
        }
    }

    /// Stream entries straight to disk.
    ///
    /// `resolver` picks a destination for each entry, `None` skips it. Every
    /// file goes through a temporary sibling and is only moved into place
    /// once its last byte arrived. Cancellation is checked between entries;
    /// files written before it stay. Returns `None` when cancelled.
    pub async fn copy_entries<F>(
        &self,
        resolver: F,
        progress: Option<&CopyProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<Option<CopyReport>>
    where
        F: Fn(&ArchiveEntry) -> Option<PathBuf> + Send + Sync,
    {
        let _guard = BusyGuard::acquire(&self.streaming)?;

        let Some(listing) = self.list_entries(cancel).await? else {
            return Ok(None);
        };

        let targets: Vec<(&ArchiveEntry, PathBuf)> = listing
            .entries
            .iter()
            .filter_map(|e| resolver(e).map(|destination| (e, destination)))
            .collect();

        if targets.is_empty() {
            debug!("Nothing to copy from {}", self.path.display());
            return Ok(Some(CopyReport::default()));
        }

        info!("Copying {} entries from {}", targets.len(), self.path.display());
        let keys: Vec<String> = targets.iter().map(|(e, _)| e.key.clone()).collect();
        let (password, password_set) = self.password();

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            stream = self.tool.extract(&self.path, &password, &keys) => stream?,
        };

        let total = targets.len();
        let mut report = CopyReport::default();
        let mut written: Vec<(String, u64)> = Vec::new();
        for (index, (entry, destination)) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Copying cancelled after {} of {} entries", index, total);
                return Ok(None);
            }

            if let Some(progress) = progress {
                progress(&CopyProgress {
                    key: entry.key.clone(),
                    index,
                    total,
                });
            }

            debug!("{} -> {}", entry.key, destination.display());
            let parent = destination
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InstallError::io(format!("Failed to create {}", parent.display()), e))?;

            let temp = tempfile::Builder::new()
                .prefix(".acm-")
                .suffix(".part")
                .tempfile_in(parent)
                .map_err(|e| InstallError::io(format!("Failed to create a file in {}", parent.display()), e))?;
            let (file, temp_path) = temp.into_parts();
            let mut file = tokio::fs::File::from_std(file);

            let copied = self
                .copy_patiently(&mut stream.data, &mut file, entry.size)
                .await
                .map_err(|e| InstallError::io(format!("Failed to write {}", destination.display()), e))?;
            file.flush()
                .await
                .map_err(|e| InstallError::io(format!("Failed to write {}", destination.display()), e))?;
            drop(file);

            if copied < entry.size {
                let partial = tokio::fs::read(&temp_path).await.unwrap_or_default();
                drop(temp_path);
                let contents = DumpContents {
                    archive: self.path.clone(),
                    complete: Vec::new(),
                    partial: Some((entry.key.clone(), partial)),
                    expected: entry.size,
                    written,
                };
                return Err(self.truncated(stream, entry, copied, contents, password_set).await);
            }

            temp_path
                .persist(destination)
                .map_err(|e| InstallError::io(format!("Failed to move {} into place", destination.display()), e.error))?;
            report.written.push(destination.clone());
            report.bytes += copied;
            written.push((entry.key.clone(), copied));
        }

        let status = stream.finish().await?;
        check_errors(status.success, &status.stderr, password_set)?;

        info!("Copied {} files ({} bytes)", report.written.len(), report.bytes);
        Ok(Some(report))
    }

    /// Copy up to `size` bytes, tolerating a few empty reads.
    async fn copy_patiently<R, W>(&self, reader: &mut R, writer: &mut W, size: u64) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE.min(size.max(1) as usize)];
        let mut copied = 0u64;
        let mut attempt = 0u32;
        while copied < size {
            let want = buffer.len().min((size - copied) as usize);
            let n = reader.read(&mut buffer[..want]).await?;
            if n > 0 {
                writer.write_all(&buffer[..n]).await?;
                copied += n as u64;
                continue;
            }

            if attempt >= self.config.short_read_retries {
                break;
            }
            attempt += 1;
            debug!("Stream stalled at {} of {} bytes, retry {}", copied, size, attempt);
            tokio::time::sleep(self.config.short_read_backoff * attempt).await;
        }
        Ok(copied)
    }

    /// Build the error for an entry that ended early.
    ///
    /// A password failure reported by the tool wins over the short read;
    /// otherwise a diagnostic dump is written.
    async fn truncated(
        &self,
        stream: ExtractStream,
        entry: &ArchiveEntry,
        read: u64,
        contents: DumpContents,
        password_set: bool,
    ) -> InstallError {
        match tokio::time::timeout(FAILED_EXIT_TIMEOUT, stream.finish()).await {
            Ok(Ok(status)) => {
                if let Err(e @ (InstallError::PasswordRequired | InstallError::WrongPassword)) =
                    check_errors(status.success, &status.stderr, password_set)
                {
                    self.mark_password(false);
                    return e;
                }
            }
            Ok(Err(e)) => debug!("7-Zip failed after a truncated read: {}", e),
            Err(_) => debug!("7-Zip didn't exit after a truncated read"),
        }

        let dir = self.config.diagnostics_dir.clone();
        let dump = match tokio::task::spawn_blocking(move || write_dump(&dir, &contents)).await {
            Ok(Ok(path)) => Some(path),
            Ok(Err(e)) => {
                warn!("Failed to write diagnostic dump: {}", e);
                None
            }
            Err(e) => {
                warn!("Diagnostic dump task failed: {}", e);
                None
            }
        };

        warn!(
            "Unexpected end of data in {}: {} of {} bytes",
            entry.key, read, entry.size
        );
        InstallError::TruncatedRead {
            key: entry.key.clone(),
            read,
            expected: entry.size,
            dump,
        }
    }
}

/// Read a stream to the end, discarding the data
async fn drain(mut stream: ExtractStream) -> Result<super::sevenzip::ToolStatus> {
    tokio::io::copy(&mut stream.data, &mut tokio::io::sink())
        .await
        .map_err(|e| InstallError::io("Failed to read from 7-Zip", e))?;
    stream.finish().await
}
