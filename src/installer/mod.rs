//! Installation orchestrator
//!
//! One [`InstallSession`] per archive, run through its phases in order:
//! 1. Open: list the archive, test the password
//! 2. Scan: detect content, reconcile it with what is installed
//! 3. Prepare: resolve destinations, recycle what the options ask to remove
//! 4. Copy: one streamed pass writing every active entry
//! 5. Refresh: notify the installed-content lookup
//!
//! Between scan and install the caller edits the entries: switches them
//! on or off, picks update options, renames them or disables layouts.

pub mod progress;

pub use progress::{InstallPhase, ProgressCallback, ProgressEvent};

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveEntry, ArchiveReader, ArchiveTool, CopyProgress, CopyProgressFn, SevenZipTool};
use crate::config::{InstallConfig, ReaderConfig};
use crate::content::detect::detect_content;
use crate::content::filter::CopyPlan;
use crate::content::{ContentEntry, ContentType};
use crate::error::{InstallError, Result};
use crate::installed::{ContentDirectories, DirectoryContent, InstalledContent, Recycler, TrashRecycler};

/// One installed content item
#[derive(Debug, Clone, Serialize)]
pub struct InstalledItem {
    pub content_type: ContentType,
    pub id: String,
    pub destination: PathBuf,
}

/// Installation statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct InstallReport {
    pub installed: Vec<InstalledItem>,
    pub files_written: usize,
    pub bytes_written: u64,
}

/// Prepared entry: where it goes and which keys it takes
/// Where an entry goes and what has to be cleared first
struct Target<'a> {
    entry: &'a ContentEntry,
    location: PathBuf,
    remove_existing: bool,
    clean_up: Vec<PathBuf>,
    plan: CopyPlan,
}

pub struct InstallSession<T: ArchiveTool = SevenZipTool> {
    reader: ArchiveReader<T>,
    installed: Arc<dyn InstalledContent>,
    recycler: Arc<dyn Recycler>,
    keep_existing_shared_models: bool,
    entries: Vec<ContentEntry>,
    progress_callback: Option<ProgressCallback>,
}

impl InstallSession<SevenZipTool> {
    /// Session over an archive on disk, installing into the game folder from
    /// `config` and recycling through the system trash.
    pub fn open(
        path: impl Into<PathBuf>,
        password: Option<String>,
        reader_config: ReaderConfig,
        config: &InstallConfig,
    ) -> Result<Self> {
        config.validate()?;
        let directories = config.directories().ok_or(InstallError::DirectoriesUnavailable)?;
        let tool = SevenZipTool::locate(&reader_config)?;
        let reader = ArchiveReader::new(path, tool, reader_config).with_password(password);

        Ok(Self::new(reader, Arc::new(DirectoryContent::new(directories)), Arc::new(TrashRecycler))
            .with_config(config))
    }
}

impl<T: ArchiveTool> InstallSession<T> {
    pub fn new(reader: ArchiveReader<T>, installed: Arc<dyn InstalledContent>, recycler: Arc<dyn Recycler>) -> Self {
        Self {
            reader,
            installed,
            recycler,
            keep_existing_shared_models: true,
            entries: Vec::new(),
            progress_callback: None,
        }
    }

    pub fn with_config(mut self, config: &InstallConfig) -> Self {
        self.keep_existing_shared_models = config.keep_existing_shared_models;
        self
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress_callback = Some(callback);
    }

    /// Report a progress event to the callback if one is set
    fn report_progress(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress_callback {
            callback(event);
        }
    }

    fn phase_started(&self, phase: InstallPhase, message: String) {
        info!("Phase {}: {}", phase.name(), message);
        self.report_progress(ProgressEvent::PhaseStarted { phase, message });
    }

    fn phase_completed(&self, phase: InstallPhase) {
        self.report_progress(ProgressEvent::PhaseCompleted { phase });
    }

    pub fn reader(&self) -> &ArchiveReader<T> {
        &self.reader
    }

    pub fn entries(&self) -> &[ContentEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [ContentEntry] {
        &mut self.entries
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut ContentEntry> {
        self.entries.iter_mut().find(|e| e.id.eq_ignore_ascii_case(id))
    }

    /// Test the current password. Returns `None` when cancelled.
    pub async fn check_password(&self, cancel: &CancellationToken) -> Result<Option<bool>> {
        self.phase_started(InstallPhase::Open, format!("Opening {}", self.reader.path().display()));
        let result = self.reader.test_password(cancel).await?;
        if result.is_some() {
            self.phase_completed(InstallPhase::Open);
        }
        Ok(result)
    }

    /// Switch to another password and test it. Returns `None` when cancelled.
    pub async fn try_password(&self, password: Option<String>, cancel: &CancellationToken) -> Result<Option<bool>> {
        self.reader.try_set_password(password, cancel).await
    }

    /// Find content in the archive and reconcile it with what is installed.
    ///
    /// Fails with `PasswordRequired`/`WrongPassword` when the password test
    /// doesn't pass; the session stays usable for [`Self::try_password`].
    /// Returns the number of entries found, `None` when cancelled.
    pub async fn scan(&mut self, cancel: &CancellationToken) -> Result<Option<usize>> {
        if !self.reader.is_password_correct() {
            match self.check_password(cancel).await? {
                None => return Ok(None),
                Some(true) => {}
                Some(false) if self.reader.has_password() => return Err(InstallError::WrongPassword),
                Some(false) => return Err(InstallError::PasswordRequired),
            }
        }

        self.phase_started(InstallPhase::Scan, format!("Scanning {}", self.reader.path().display()));
        let Some(mut entries) = detect_content(&self.reader, cancel).await? else {
            return Ok(None);
        };

        for entry in &mut entries {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            entry.set_keep_existing_shared_models(self.keep_existing_shared_models);
            entry.check_existing(self.installed.as_ref()).await?;
        }

        let count = entries.len();
        self.entries = entries;
        self.phase_completed(InstallPhase::Scan);
        Ok(Some(count))
    }

    /// Reconcile one entry again, after a rename for example
    pub async fn recheck(&mut self, index: usize) -> Result<bool> {
        let installed = self.installed.clone();
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.check_existing(installed.as_ref()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Install every active entry.
    ///
    /// Every entry is checked before anything on disk changes. Existing
    /// content is then recycled where the selected option asks for it, and
    /// all entries are copied in one pass over the archive. Returns `None`
    /// when cancelled; a cancel seen before clearing leaves the disk as it was.
    pub async fn install(&self, cancel: &CancellationToken) -> Result<Option<InstallReport>> {
        let started = Instant::now();
        let active: Vec<&ContentEntry> = self.entries.iter().filter(|e| e.active).collect();
        if active.is_empty() {
            info!("Nothing to install from {}", self.reader.path().display());
            return Ok(Some(InstallReport::default()));
        }

        let directories = self.installed.directories();

        self.phase_started(InstallPhase::Prepare, format!("Preparing {} items", active.len()));
        let targets = active
            .into_iter()
            .map(|entry| self.plan(entry, directories))
            .collect::<Result<Vec<_>>>()?;
        if cancel.is_cancelled() {
            info!("Installation cancelled before clearing existing content");
            return Ok(None);
        }
        for target in &targets {
            self.clear(target).await?;
        }
        self.phase_completed(InstallPhase::Prepare);

        self.phase_started(InstallPhase::Copy, format!("Copying files from {}", self.reader.path().display()));
        let plans: Vec<&CopyPlan> = targets.iter().map(|t| &t.plan).collect();
        let resolver = |entry: &ArchiveEntry| plans.iter().find_map(|plan| plan.resolve(&entry.key));

        let copy_progress: Option<Box<CopyProgressFn>> = self.progress_callback.clone().map(|callback| {
            Box::new(move |p: &CopyProgress| {
                callback(ProgressEvent::Copying {
                    key: p.key.clone(),
                    current: p.index + 1,
                    total: p.total,
                })
            }) as Box<CopyProgressFn>
        });

        let Some(copied) = self
            .reader
            .copy_entries(resolver, copy_progress.as_deref(), cancel)
            .await?
        else {
            info!("Installation cancelled while copying");
            return Ok(None);
        };
        self.phase_completed(InstallPhase::Copy);

        self.phase_started(InstallPhase::Refresh, format!("Refreshing {} items", targets.len()));
        let mut report = InstallReport {
            installed: Vec::with_capacity(targets.len()),
            files_written: copied.written.len(),
            bytes_written: copied.bytes,
        };
        for target in targets {
            let entry = target.entry;
            self.installed
                .refresh(entry.content_type, &entry.id, &target.location)
                .await?;
            self.report_progress(ProgressEvent::Installed {
                content_type: entry.content_type,
                id: entry.id.clone(),
                destination: target.location.clone(),
            });
            report.installed.push(InstalledItem {
                content_type: entry.content_type,
                id: entry.id.clone(),
                destination: target.location,
            });
        }
        self.phase_completed(InstallPhase::Refresh);

        info!(
            "Installed {} items from {}: {} files, {} bytes in {:.1}s",
            report.installed.len(),
            self.reader.path().display(),
            report.files_written,
            report.bytes_written,
            started.elapsed().as_secs_f64()
        );
        Ok(Some(report))
    }

    /// Resolve where an entry goes without touching the disk
    fn plan<'a>(&self, entry: &'a ContentEntry, directories: Option<&ContentDirectories>) -> Result<Target<'a>> {
        let destination = entry.destination(directories)?;
        let location = entry.removal_target(directories)?;
        let option = entry.selected_option();
        debug!(
            "{} {} -> {} ({})",
            entry.content_type,
            entry.id,
            destination.display(),
            option.map_or("no option", |o| o.display_name.as_str())
        );

        let remove_existing = option.is_some_and(|o| o.remove_existing);
        if !remove_existing && entry.is_new() && location.exists() {
            return Err(InstallError::PlaceIsTaken(location));
        }

        let clean_up = option.map(|o| o.clean_up_paths(&destination)).unwrap_or_default();
        let plan = entry.copy_plan(destination, directories);
        Ok(Target {
            entry,
            location,
            remove_existing,
            clean_up,
            plan,
        })
    }

    /// Recycle what a planned entry replaces
    async fn clear(&self, target: &Target<'_>) -> Result<()> {
        let location = &target.location;
        if target.remove_existing && location.exists() {
            if let Err(e) = self.recycler.recycle(std::slice::from_ref(location)).await {
                warn!("Failed to recycle {}: {}", location.display(), e);
            }
            if location.exists() {
                return Err(InstallError::CannotClearExisting(location.clone()));
            }
            self.report_progress(ProgressEvent::Recycled {
                paths: vec![location.clone()],
            });
        }

        self.clean_up(&target.clean_up).await;
        Ok(())
    }

    /// Recycle extra paths an option asks to remove; failures only get logged
    async fn clean_up(&self, paths: &[PathBuf]) {
        let existing: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
        if existing.is_empty() {
            return;
        }

        match self.recycler.recycle(&existing).await {
            Ok(()) => self.report_progress(ProgressEvent::Recycled { paths: existing }),
            Err(e) => warn!("Failed to clean up {}: {}", describe(&existing), e),
        }
    }
}

fn describe(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryTool;
    use crate::content::options::{JUST_INSTALL, REMOVE_EXISTING_FIRST};
    use crate::installed::ContentDirectories;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Deletes for real and remembers what it was asked to delete
    #[derive(Default)]
    struct DeletingRecycler {
        calls: Mutex<Vec<PathBuf>>,
        refuse: bool,
    }

    #[async_trait]
    impl Recycler for DeletingRecycler {
        async fn recycle(&self, paths: &[PathBuf]) -> Result<()> {
            self.calls.lock().unwrap().extend(paths.iter().cloned());
            if self.refuse {
                return Err(InstallError::io("Recycle bin is full", std::io::Error::other("full")));
            }
            for path in paths {
                if path.is_dir() {
                    fs::remove_dir_all(path).unwrap();
                } else if path.exists() {
                    fs::remove_file(path).unwrap();
                }
            }
            Ok(())
        }
    }

    struct Fixture {
        root: TempDir,
        recycler: Arc<DeletingRecycler>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_recycler(DeletingRecycler::default())
        }

        fn with_recycler(recycler: DeletingRecycler) -> Self {
            Self {
                root: tempdir().unwrap(),
                recycler: Arc::new(recycler),
            }
        }

        fn content(&self, relative: &str) -> PathBuf {
            self.root.path().join("content").join(relative)
        }

        fn session(&self, archive: &str, tool: MemoryTool) -> InstallSession<MemoryTool> {
            let directories = ContentDirectories::new(self.root.path(), self.root.path().join("Themes"));
            let reader = ArchiveReader::new(format!("/downloads/{}", archive), tool, ReaderConfig::default());
            InstallSession::new(reader, Arc::new(DirectoryContent::new(directories)), self.recycler.clone())
        }
    }

    fn car_archive() -> MemoryTool {
        MemoryTool::new()
            .with_file("abc_gt/data.acd", b"acd")
            .with_file("abc_gt/ui/ui_car.json", br#"{"name": "ABC GT", "version": "1.1"}"#)
            .with_file("abc_gt/skins/red/livery.png", b"png-bytes")
            .with_file("readme.txt", b"read me")
    }

    #[tokio::test]
    async fn test_install_new_car() {
        let fixture = Fixture::new();
        let mut session = fixture.session("abc_gt.zip", car_archive());
        let cancel = CancellationToken::new();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.set_progress_callback(Arc::new(move |e| sink.lock().unwrap().push(e)));

        assert_eq!(session.scan(&cancel).await.unwrap(), Some(1));
        assert!(session.entries()[0].is_new());

        let report = session.install(&cancel).await.unwrap().unwrap();
        assert_eq!(report.installed.len(), 1);
        assert_eq!(report.files_written, 3);
        assert_eq!(report.installed[0].destination, fixture.content("cars/abc_gt"));
        assert_eq!(fs::read(fixture.content("cars/abc_gt/data.acd")).unwrap(), b"acd");
        assert!(fixture.content("cars/abc_gt/skins/red/livery.png").exists());
        assert!(!fixture.root.path().join("readme.txt").exists());

        let events = events.lock().unwrap();
        let copying = events.iter().filter(|e| matches!(e, ProgressEvent::Copying { .. })).count();
        assert_eq!(copying, 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Installed { id, .. } if id == "abc_gt")));
    }

    #[tokio::test]
    async fn test_place_is_taken() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.content("cars/xyz")).unwrap();

        let mut session = fixture.session("abc_gt.zip", car_archive());
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();
        session.entries_mut()[0].rename("xyz").unwrap();
        assert!(session.entries()[0].is_new());

        let result = session.install(&cancel).await;
        assert!(matches!(result, Err(InstallError::PlaceIsTaken(path)) if path == fixture.content("cars/xyz")));
        assert!(!fixture.content("cars/xyz/data.acd").exists());
        assert!(!fixture.content("cars/abc_gt").exists());
    }

    #[tokio::test]
    async fn test_remove_existing_first() {
        let fixture = Fixture::new();
        let car = fixture.content("cars/abc_gt");
        fs::create_dir_all(car.join("ui")).unwrap();
        fs::write(car.join("data.acd"), b"old").unwrap();
        fs::write(car.join("stale.kn5"), b"old").unwrap();
        fs::write(car.join("ui/ui_car.json"), br#"{"name": "ABC GT", "version": "1.0"}"#).unwrap();

        let mut session = fixture.session("abc_gt.zip", car_archive());
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();

        let entry = &mut session.entries_mut()[0];
        assert!(!entry.is_new());
        assert!(entry.is_newer_version());
        assert!(entry.select_option_by_name(REMOVE_EXISTING_FIRST));

        session.install(&cancel).await.unwrap().unwrap();
        assert_eq!(fixture.recycler.calls.lock().unwrap().as_slice(), &[car.clone()]);
        assert_eq!(fs::read(car.join("data.acd")).unwrap(), b"acd");
        assert!(!car.join("stale.kn5").exists());
    }

    #[tokio::test]
    async fn test_failed_entry_recycles_nothing() {
        let fixture = Fixture::new();
        let aaa = fixture.content("cars/aaa");
        fs::create_dir_all(&aaa).unwrap();
        fs::write(aaa.join("data.acd"), b"old").unwrap();
        fs::create_dir_all(fixture.content("cars/xyz")).unwrap();

        let tool = MemoryTool::new()
            .with_file("cars/aaa/data.acd", b"aaa")
            .with_file("cars/bbb/data.acd", b"bbb");
        let mut session = fixture.session("pack.zip", tool);
        let cancel = CancellationToken::new();
        assert_eq!(session.scan(&cancel).await.unwrap(), Some(2));

        assert!(session.entry_mut("aaa").unwrap().select_option_by_name(REMOVE_EXISTING_FIRST));
        session.entry_mut("bbb").unwrap().rename("xyz").unwrap();

        let result = session.install(&cancel).await;
        assert!(matches!(result, Err(InstallError::PlaceIsTaken(path)) if path == fixture.content("cars/xyz")));
        assert!(fixture.recycler.calls.lock().unwrap().is_empty());
        assert_eq!(fs::read(aaa.join("data.acd")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_rename_to_category_root_rejected() {
        let fixture = Fixture::new();
        let other = fixture.content("cars/other");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("data.acd"), b"other").unwrap();

        let mut session = fixture.session("abc_gt.zip", car_archive());
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();

        let entry = &mut session.entries_mut()[0];
        assert!(matches!(entry.rename(".."), Err(InstallError::MalformedEntry(_))));
        assert_eq!(entry.id, "abc_gt");

        entry.id = "..".into();
        assert!(session.recheck(0).await.unwrap());
        assert!(session.entries()[0].is_new());

        let result = session.install(&cancel).await;
        assert!(matches!(result, Err(InstallError::MalformedEntry(_))));
        assert!(fixture.recycler.calls.lock().unwrap().is_empty());
        assert!(other.join("data.acd").exists());
    }

    #[tokio::test]
    async fn test_cannot_clear_existing() {
        let fixture = Fixture::with_recycler(DeletingRecycler {
            refuse: true,
            ..Default::default()
        });
        let car = fixture.content("cars/abc_gt");
        fs::create_dir_all(&car).unwrap();
        fs::write(car.join("data.acd"), b"old").unwrap();

        let mut session = fixture.session("abc_gt.zip", car_archive());
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();
        assert!(session.entries_mut()[0].select_option_by_name(REMOVE_EXISTING_FIRST));

        let result = session.install(&cancel).await;
        assert!(matches!(result, Err(InstallError::CannotClearExisting(path)) if path == car));
        assert_eq!(fs::read(car.join("data.acd")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_inactive_entries_are_skipped() {
        let fixture = Fixture::new();
        let tool = car_archive().with_file("xyz/data.acd", b"xyz");
        let mut session = fixture.session("pack.zip", tool);
        let cancel = CancellationToken::new();
        assert_eq!(session.scan(&cancel).await.unwrap(), Some(2));

        session.entry_mut("xyz").unwrap().active = false;
        let report = session.install(&cancel).await.unwrap().unwrap();
        assert_eq!(report.installed.len(), 1);
        assert!(fixture.content("cars/abc_gt/data.acd").exists());
        assert!(!fixture.content("cars/xyz").exists());
    }

    #[tokio::test]
    async fn test_rename_avoids_place_taken() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.content("cars/abc_gt")).unwrap();

        let mut session = fixture.session("abc_gt.zip", car_archive());
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();
        session.entries_mut()[0].rename("abc_gt_v2").unwrap();
        assert!(session.recheck(0).await.unwrap());

        let report = session.install(&cancel).await.unwrap().unwrap();
        assert_eq!(report.installed[0].destination, fixture.content("cars/abc_gt_v2"));
        assert!(fixture.content("cars/abc_gt_v2/data.acd").exists());
    }

    #[tokio::test]
    async fn test_track_new_layout_keeps_existing() {
        let fixture = Fixture::new();
        let track = fixture.content("tracks/spa");
        fs::create_dir_all(track.join("ui/gp")).unwrap();
        fs::write(track.join("ui/gp/ui_track.json"), br#"{"name": "Spa GP"}"#).unwrap();
        fs::write(track.join("models_gp.ini"), "[MODEL_0]\nFILE=spa.kn5\n").unwrap();
        fs::write(track.join("spa.kn5"), b"old").unwrap();

        let tool = MemoryTool::new()
            .with_file("spa/ui/short/ui_track.json", br#"{"name": "Spa Short"}"#)
            .with_file("spa/models_short.ini", b"[MODEL_0]\nFILE=spa.kn5\n\n[MODEL_1]\nFILE=short.kn5\n")
            .with_file("spa/spa.kn5", b"new")
            .with_file("spa/short.kn5", b"short");
        let mut session = fixture.session("spa.zip", tool);
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();

        let entry = &session.entries()[0];
        assert!(entry.no_conflict());
        assert_eq!(entry.selected_option().unwrap().display_name, JUST_INSTALL);
        assert!(entry.shared_models_overlap());

        session.install(&cancel).await.unwrap().unwrap();
        assert_eq!(fs::read(track.join("spa.kn5")).unwrap(), b"old");
        assert_eq!(fs::read(track.join("short.kn5")).unwrap(), b"short");
        assert!(track.join("ui/short/ui_track.json").exists());
        assert!(track.join("ui/gp/ui_track.json").exists());
    }

    #[tokio::test]
    async fn test_disabled_layout_not_copied() {
        let fixture = Fixture::new();
        let tool = MemoryTool::new()
            .with_file("spa/ui/gp/ui_track.json", br#"{"name": "Spa GP"}"#)
            .with_file("spa/ui/short/ui_track.json", br#"{"name": "Spa Short"}"#)
            .with_file("spa/models_gp.ini", b"[MODEL_0]\nFILE=spa.kn5\n")
            .with_file("spa/models_short.ini", b"[MODEL_0]\nFILE=short.kn5\n")
            .with_file("spa/spa.kn5", b"gp")
            .with_file("spa/short.kn5", b"short");
        let mut session = fixture.session("spa.zip", tool);
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();
        assert!(session.entries_mut()[0].set_layout_active("short", false));

        session.install(&cancel).await.unwrap().unwrap();
        let track = fixture.content("tracks/spa");
        assert!(track.join("spa.kn5").exists());
        assert!(track.join("ui/gp/ui_track.json").exists());
        assert!(!track.join("short.kn5").exists());
        assert!(!track.join("ui/short").exists());
        assert!(!track.join("models_short.ini").exists());
    }

    #[tokio::test]
    async fn test_truncated_read_leaves_no_file() {
        let fixture = Fixture::new();
        let tool = car_archive().truncate_after("abc_gt/skins/red/livery.png", 1);
        let mut session = fixture.session("abc_gt.zip", tool);
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();

        let result = session.install(&cancel).await;
        assert!(matches!(result, Err(InstallError::TruncatedRead { .. })));
        assert!(!fixture.content("cars/abc_gt/skins/red/livery.png").exists());
    }

    #[tokio::test]
    async fn test_password_required_before_scan() {
        let fixture = Fixture::new();
        let mut session = fixture.session("abc_gt.7z", car_archive().with_password("secret"));
        let cancel = CancellationToken::new();

        assert!(matches!(session.scan(&cancel).await, Err(InstallError::PasswordRequired)));
        assert_eq!(session.try_password(Some("nope".into()), &cancel).await.unwrap(), Some(false));
        assert!(matches!(session.scan(&cancel).await, Err(InstallError::WrongPassword)));
        assert_eq!(session.try_password(Some("secret".into()), &cancel).await.unwrap(), Some(true));
        assert_eq!(session.scan(&cancel).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_cancelled_install_writes_nothing() {
        let fixture = Fixture::new();
        let mut session = fixture.session("abc_gt.zip", car_archive());
        let cancel = CancellationToken::new();
        session.scan(&cancel).await.unwrap();

        cancel.cancel();
        assert!(session.install(&cancel).await.unwrap().is_none());
        assert!(!fixture.content("cars/abc_gt").exists());
        assert!(session.scan(&cancel).await.unwrap().is_none());
    }
}
