//! What is already installed.
//!
//! The engine never owns the installed-content database; it reads snapshots
//! through [`InstalledContent`] and asks it to refresh once files are on
//! disk. [`DirectoryContent`] is the filesystem-backed implementation used
//! by the binary and the integration tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::content::detect::{parse_theme, parse_ui_json, UiInfo};
use crate::content::ContentType;
use crate::error::{InstallError, Result};
use crate::ini::{self, IniFile};
use crate::paths;

/// Where each content type lives below the game root.
#[derive(Debug, Clone)]
pub struct ContentDirectories {
    root: PathBuf,
    themes_dir: PathBuf,
}

impl ContentDirectories {
    pub fn new(root: impl Into<PathBuf>, themes_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            themes_dir: themes_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn themes_dir(&self) -> &Path {
        &self.themes_dir
    }

    /// Location of an object, `None` for car skins (see [`Self::skin_location`])
    /// and for ids that are not a single folder or file name
    pub fn location(&self, content_type: ContentType, id: &str) -> Option<PathBuf> {
        if !paths::is_appropriate_id(id) {
            return None;
        }

        let content = self.root.join("content");
        let location = match content_type {
            ContentType::Car => paths::join_key(&content.join("cars"), id),
            ContentType::CarSkin => return None,
            ContentType::Track => paths::join_key(&content.join("tracks"), id),
            ContentType::Showroom => paths::join_key(&content.join("showroom"), id),
            ContentType::Font => paths::join_key(&content.join("fonts"), &format!("{}.txt", id)),
            ContentType::TrueTypeFont => paths::join_key(&content.join("fonts"), id),
            ContentType::Weather => paths::join_key(&content.join("weather"), id),
            ContentType::PythonApp => paths::join_key(&self.root.join("apps").join("python"), id),
            ContentType::PpFilter => paths::join_key(&self.root.join("system").join("cfg").join("ppfilters"), id),
            ContentType::DriverModel => paths::join_key(&content.join("driver"), &format!("{}.kn5", id)),
            ContentType::CmTheme => paths::join_key(&self.themes_dir, id),
        };
        Some(location)
    }

    pub fn skin_location(&self, car_location: &Path, skin_id: &str) -> Option<PathBuf> {
        paths::is_appropriate_id(skin_id).then(|| paths::join_key(&car_location.join("skins"), skin_id))
    }

    /// App icons shown in the game's sidebar
    pub fn gui_icons_dir(&self) -> PathBuf {
        self.root.join("content").join("gui").join("icons")
    }
}

/// Snapshot of an installed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledObject {
    pub id: String,
    pub display_name: String,
    pub version: Option<String>,
    pub location: PathBuf,
    pub track: Option<InstalledTrack>,
}

impl InstalledObject {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            version: None,
            location: location.into(),
            track: None,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_track(mut self, track: InstalledTrack) -> Self {
        self.track = Some(track);
        self
    }
}

/// Layouts of an installed track; a single-layout track has one layout
/// without an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledTrack {
    pub layouts: Vec<InstalledLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledLayout {
    /// `None` for the base layout
    pub layout_id: Option<String>,
    pub name: String,
    /// Every KN5 file referenced by the layout's models ini
    pub models: Vec<String>,
}

impl InstalledLayout {
    pub fn base(name: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            layout_id: None,
            name: name.into(),
            models,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            layout_id: Some(id.into()),
            name: name.into(),
            models,
        }
    }
}

impl InstalledTrack {
    pub fn is_multi_layout(&self) -> bool {
        !(self.layouts.len() == 1 && self.layouts[0].layout_id.is_none())
    }

    pub fn base(&self) -> Option<&InstalledLayout> {
        self.layouts.iter().find(|l| l.layout_id.is_none())
    }

    /// Named layout with this id; the empty id never matches.
    pub fn layout_by_id(&self, id: &str) -> Option<&InstalledLayout> {
        if id.is_empty() {
            return None;
        }
        self.layouts
            .iter()
            .find(|l| l.layout_id.as_deref() == Some(id))
    }

    /// Models of all layouts, duplicates kept
    pub fn all_models(&self) -> impl Iterator<Item = &str> {
        self.layouts.iter().flat_map(|l| l.models.iter().map(String::as_str))
    }
}

/// Installed-content lookup.
#[async_trait]
pub trait InstalledContent: Send + Sync {
    /// Where content goes, `None` if the game root is not known
    fn directories(&self) -> Option<&ContentDirectories>;

    fn get_by_id(&self, content_type: ContentType, id: &str) -> Option<InstalledObject>;

    fn get_skin(&self, car_id: &str, skin_id: &str) -> Option<InstalledObject>;

    async fn get_by_id_async(&self, content_type: ContentType, id: &str) -> Result<Option<InstalledObject>> {
        Ok(self.get_by_id(content_type, id))
    }

    async fn get_skin_async(&self, car_id: &str, skin_id: &str) -> Result<Option<InstalledObject>> {
        Ok(self.get_skin(car_id, skin_id))
    }

    /// Called after an object was written to `location`
    async fn refresh(&self, content_type: ContentType, id: &str, location: &Path) -> Result<()>;
}

/// Recoverable delete.
#[async_trait]
pub trait Recycler: Send + Sync {
    async fn recycle(&self, paths: &[PathBuf]) -> Result<()>;
}

/// Moves files to the system recycle bin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrashRecycler;

#[async_trait]
impl Recycler for TrashRecycler {
    async fn recycle(&self, paths: &[PathBuf]) -> Result<()> {
        let existing: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
        if existing.is_empty() {
            return Ok(());
        }

        debug!("Moving {} paths to the recycle bin", existing.len());
        tokio::task::spawn_blocking(move || trash::delete_all(&existing))
            .await
            .map_err(|e| InstallError::io("Recycle task failed", std::io::Error::other(e)))?
            .map_err(|e| InstallError::io("Failed to move files to the recycle bin", std::io::Error::other(e)))
    }
}

/// Reads installed content straight from the game folder.
///
/// Snapshots are cached until [`InstalledContent::refresh`] is called for
/// the object.
pub struct DirectoryContent {
    directories: ContentDirectories,
    cache: Mutex<HashMap<(ContentType, String), Option<InstalledObject>>>,
}

impl DirectoryContent {
    pub fn new(directories: ContentDirectories) -> Self {
        Self {
            directories,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached<F>(&self, key: (ContentType, String), load: F) -> Option<InstalledObject>
    where
        F: FnOnce() -> Option<InstalledObject>,
    {
        if let Some(hit) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return hit.clone();
        }

        let loaded = load();
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, loaded.clone());
        loaded
    }

    fn load(&self, content_type: ContentType, id: &str) -> Option<InstalledObject> {
        let location = self.directories.location(content_type, id)?;

        match content_type {
            ContentType::Car => load_directory(id, &location, Some("ui/ui_car.json")),
            ContentType::Showroom => load_directory(id, &location, Some("ui/ui_showroom.json")),
            ContentType::PythonApp => load_directory(id, &location, Some("ui/ui_app.json")),
            ContentType::Weather => load_weather(id, &location),
            ContentType::Track => load_track(id, &location),
            ContentType::CarSkin => None,
            ContentType::CmTheme => {
                let data = std::fs::read_to_string(&location).ok()?;
                let version = parse_theme(&data).and_then(|t| t.version);
                Some(InstalledObject::new(id, theme_name(id), location).with_version(version))
            }
            ContentType::Font | ContentType::TrueTypeFont | ContentType::PpFilter | ContentType::DriverModel => {
                location
                    .is_file()
                    .then(|| InstalledObject::new(id, id, location))
            }
        }
    }
}

pub(crate) fn theme_name(id: &str) -> String {
    let stem = paths::without_extension(id);
    let mut name = String::with_capacity(stem.len());
    for (i, word) in stem.split(['_', '-', ' ']).filter(|w| !w.is_empty()).enumerate() {
        if i > 0 {
            name.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name
}

fn read_ui(path: &Path) -> Option<UiInfo> {
    let data = std::fs::read(path).ok()?;
    let info = parse_ui_json(&data);
    if info.is_none() {
        warn!("Can't parse {}", path.display());
    }
    info
}

fn load_directory(id: &str, location: &Path, ui_file: Option<&str>) -> Option<InstalledObject> {
    if !location.is_dir() {
        return None;
    }

    let ui = ui_file.and_then(|f| read_ui(&paths::join_key(location, f)));
    let name = ui.as_ref().and_then(|u| u.name.clone()).unwrap_or_else(|| id.to_string());
    let version = ui.and_then(|u| u.version);
    Some(InstalledObject::new(id, name, location).with_version(version))
}

fn load_weather(id: &str, location: &Path) -> Option<InstalledObject> {
    if !location.is_dir() {
        return None;
    }

    let name = IniFile::load(&location.join("weather.ini"))
        .ok()
        .and_then(|ini| ini.section("LAUNCHER").and_then(|s| s.get_non_empty("NAME")).map(str::to_string))
        .unwrap_or_else(|| id.to_string());
    Some(InstalledObject::new(id, name, location))
}

fn models_of(location: &Path, ini_name: &str) -> Vec<String> {
    IniFile::load(&location.join(ini_name))
        .map(|ini| ini::all_models(&ini))
        .unwrap_or_default()
}

fn load_track(id: &str, location: &Path) -> Option<InstalledObject> {
    if !location.is_dir() {
        return None;
    }

    let ui_dir = location.join("ui");
    let base_ui = read_ui(&ui_dir.join("ui_track.json"));

    let mut layouts = Vec::new();
    for entry in WalkDir::new(&ui_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let layout_id = entry.file_name().to_string_lossy().to_string();
        let Some(ui) = read_ui(&entry.path().join("ui_track.json")) else {
            continue;
        };
        layouts.push(InstalledLayout::named(
            layout_id.clone(),
            ui.name.unwrap_or_else(|| layout_id.clone()),
            models_of(location, &format!("models_{}.ini", layout_id)),
        ));
    }

    let has_base = base_ui.is_some() || location.join("models.ini").is_file() || layouts.is_empty();
    let base_name = base_ui.as_ref().and_then(|u| u.name.clone());
    if has_base {
        layouts.insert(
            0,
            InstalledLayout::base(base_name.clone().unwrap_or_else(|| id.to_string()), models_of(location, "models.ini")),
        );
    }

    let display_name = base_name
        .or_else(|| common_name(layouts.iter().map(|l| l.name.as_str())))
        .unwrap_or_else(|| id.to_string());
    let version = base_ui.and_then(|u| u.version);

    Some(
        InstalledObject::new(id, display_name, location)
            .with_version(version)
            .with_track(InstalledTrack { layouts }),
    )
}

/// Shared leading words of layout names, `Spa - GP` and `Spa - Club` give `Spa`
pub fn common_name<'a>(names: impl Iterator<Item = &'a str>) -> Option<String> {
    let names: Vec<&str> = names.collect();
    let first = names.first()?;
    if names.len() < 2 {
        return None;
    }

    let mut words: Vec<&str> = first.split_whitespace().collect();
    for name in &names[1..] {
        let other: Vec<&str> = name.split_whitespace().collect();
        let common = words.iter().zip(other.iter()).take_while(|(a, b)| a == b).count();
        words.truncate(common);
    }

    let joined = words.join(" ");
    let trimmed = joined.trim_end_matches(|c: char| c == '-' || c == ':' || c == '(' || c.is_whitespace());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl InstalledContent for DirectoryContent {
    fn directories(&self) -> Option<&ContentDirectories> {
        Some(&self.directories)
    }

    fn get_by_id(&self, content_type: ContentType, id: &str) -> Option<InstalledObject> {
        self.cached((content_type, id.to_string()), || self.load(content_type, id))
    }

    fn get_skin(&self, car_id: &str, skin_id: &str) -> Option<InstalledObject> {
        let car = self.get_by_id(ContentType::Car, car_id)?;
        let key = (ContentType::CarSkin, format!("{}/{}", car_id, skin_id));
        self.cached(key, || {
            let location = self.directories.skin_location(&car.location, skin_id)?;
            if !location.is_dir() {
                return None;
            }
            let ui = read_ui(&location.join("ui_skin.json"));
            let name = ui
                .and_then(|u| u.skin_name.or(u.name))
                .unwrap_or_else(|| skin_id.to_string());
            Some(InstalledObject::new(skin_id, name, location))
        })
    }

    async fn refresh(&self, content_type: ContentType, id: &str, location: &Path) -> Result<()> {
        debug!("Refreshing {:?} {} at {}", content_type, id, location.display());
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.remove(&(content_type, id.to_string()));
        if content_type == ContentType::CarSkin {
            cache.retain(|(t, key), _| !(*t == ContentType::CarSkin && key.ends_with(&format!("/{}", id))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_locations() {
        let dirs = ContentDirectories::new("/ac", "/data/Themes");
        assert_eq!(dirs.location(ContentType::Car, "abc"), Some(PathBuf::from("/ac/content/cars/abc")));
        assert_eq!(dirs.location(ContentType::Font, "digital"), Some(PathBuf::from("/ac/content/fonts/digital.txt")));
        assert_eq!(
            dirs.location(ContentType::PpFilter, "natural.ini"),
            Some(PathBuf::from("/ac/system/cfg/ppfilters/natural.ini"))
        );
        assert_eq!(dirs.location(ContentType::CmTheme, "Carbon.xaml"), Some(PathBuf::from("/data/Themes/Carbon.xaml")));
        assert_eq!(dirs.location(ContentType::CarSkin, "red"), None);
        assert_eq!(dirs.location(ContentType::Car, ".."), None);
        assert_eq!(dirs.location(ContentType::Car, ""), None);
        assert_eq!(dirs.location(ContentType::Track, "a/.."), None);
        assert_eq!(
            dirs.skin_location(Path::new("/ac/content/cars/abc"), "red"),
            Some(PathBuf::from("/ac/content/cars/abc/skins/red"))
        );
        assert_eq!(dirs.skin_location(Path::new("/ac/content/cars/abc"), ".."), None);
        assert_eq!(dirs.gui_icons_dir(), PathBuf::from("/ac/content/gui/icons"));
    }

    #[test]
    fn test_layout_lookup() {
        let track = InstalledTrack {
            layouts: vec![
                InstalledLayout::base("Spa", vec!["spa.kn5".into()]),
                InstalledLayout::named("club", "Spa Club", vec!["club.kn5".into()]),
            ],
        };
        assert!(track.is_multi_layout());
        assert_eq!(track.base().unwrap().name, "Spa");
        assert_eq!(track.layout_by_id("club").unwrap().name, "Spa Club");
        assert!(track.layout_by_id("").is_none());
        assert_eq!(track.all_models().collect::<Vec<_>>(), vec!["spa.kn5", "club.kn5"]);

        let single = InstalledTrack {
            layouts: vec![InstalledLayout::base("Spa", vec![])],
        };
        assert!(!single.is_multi_layout());
    }

    #[test]
    fn test_common_name() {
        assert_eq!(common_name(["Spa - GP", "Spa - Club"].into_iter()), Some("Spa".to_string()));
        assert_eq!(common_name(["Monza", "Imola"].into_iter()), None);
        assert_eq!(common_name(["Only"].into_iter()), None);
    }

    #[test]
    fn test_directory_content_track() {
        let dir = tempdir().unwrap();
        let track = dir.path().join("content/tracks/spa");
        write(&track.join("ui/gp/ui_track.json"), r#"{"name": "Spa GP", "version": "1.2"}"#);
        write(&track.join("ui/club/ui_track.json"), r#"{"name": "Spa Club"}"#);
        write(&track.join("models_gp.ini"), "[MODEL_0]\nFILE=spa.kn5\n[DYNAMIC_OBJECT_0]\nFILE=crowd.kn5\n");
        write(&track.join("models_club.ini"), "[MODEL_0]\nFILE=club.kn5\n");

        let content = DirectoryContent::new(ContentDirectories::new(dir.path(), dir.path().join("themes")));
        let object = content.get_by_id(ContentType::Track, "spa").unwrap();
        assert_eq!(object.display_name, "Spa");

        let track = object.track.unwrap();
        assert!(track.base().is_none());
        assert_eq!(track.layouts.len(), 2);
        assert_eq!(track.layout_by_id("gp").unwrap().models, vec!["spa.kn5", "crowd.kn5"]);
        assert_eq!(track.layout_by_id("club").unwrap().name, "Spa Club");

        assert!(content.get_by_id(ContentType::Track, "monza").is_none());
    }

    #[test]
    fn test_directory_content_single_track() {
        let dir = tempdir().unwrap();
        let track = dir.path().join("content/tracks/imola");
        write(&track.join("ui/ui_track.json"), r#"{"name": "Imola", "version": "2.0"}"#);
        write(&track.join("models.ini"), "[MODEL_0]\nFILE=imola.kn5\n");

        let content = DirectoryContent::new(ContentDirectories::new(dir.path(), dir.path().join("themes")));
        let object = content.get_by_id(ContentType::Track, "imola").unwrap();
        assert_eq!(object.version.as_deref(), Some("2.0"));
        let track = object.track.unwrap();
        assert!(!track.is_multi_layout());
        assert_eq!(track.layouts[0].models, vec!["imola.kn5"]);
    }

    #[tokio::test]
    async fn test_refresh_drops_cache() {
        let dir = tempdir().unwrap();
        let content = DirectoryContent::new(ContentDirectories::new(dir.path(), dir.path().join("themes")));
        assert!(content.get_by_id(ContentType::Car, "abc").is_none());

        let car = dir.path().join("content/cars/abc");
        write(&car.join("ui/ui_car.json"), r#"{"name": "ABC GT", "version": "0.9"}"#);
        assert!(content.get_by_id(ContentType::Car, "abc").is_none());

        content.refresh(ContentType::Car, "abc", &car).await.unwrap();
        let object = content.get_by_id_async(ContentType::Car, "abc").await.unwrap().unwrap();
        assert_eq!(object.display_name, "ABC GT");
        assert_eq!(object.version.as_deref(), Some("0.9"));
    }

    #[test]
    fn test_skin_lookup() {
        let dir = tempdir().unwrap();
        let car = dir.path().join("content/cars/abc");
        write(&car.join("data.acd"), "");
        write(&car.join("skins/red/ui_skin.json"), r#"{"skinname": "Red"}"#);

        let content = DirectoryContent::new(ContentDirectories::new(dir.path(), dir.path().join("themes")));
        assert_eq!(content.get_skin("abc", "red").unwrap().display_name, "Red");
        assert!(content.get_skin("abc", "blue").is_none());
        assert!(content.get_skin("missing", "red").is_none());
    }

    #[tokio::test]
    async fn test_trash_recycler_ignores_missing() {
        let dir = tempdir().unwrap();
        TrashRecycler
            .recycle(&[dir.path().join("not-there")])
            .await
            .unwrap();
    }

    #[test]
    fn test_theme_name() {
        assert_eq!(theme_name("dark_carbon.xaml"), "Dark Carbon");
    }
}
