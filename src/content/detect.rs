//! Content detection over an archive listing.
//!
//! Folders are classified by the files the game expects in them: a car has
//! `data.acd`, a track has `ui/ui_track.json`, and so on. Once a folder is
//! recognized, nothing below it is looked at again. Loose files (fonts, PP
//! filters, driver models, themes) are matched in the remaining folders.
//!
//! Detection reads the archive in two phases: candidates request their
//! metadata files, a single [`ArchiveReader::resolve_pending`] pass fetches
//! them, and entries are built from the cache.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::track::{TrackDetails, TrackLayoutEntry};
use super::{ContentEntry, ContentType};
use crate::archive::{ArchiveReader, ArchiveTool};
use crate::error::Result;
use crate::ini::{self, IniFile};
use crate::installed::theme_name;
use crate::paths;

const FONT_BITMAP_EXTENSIONS: [&str; 3] = ["png", "bmp", "dds"];

/// Fields of a `ui_*.json` file the installer cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub skin_name: Option<String>,
}

/// Parse `ui_car.json`, `ui_track.json` and friends.
///
/// Authors often ship these hand-edited, with trailing commas or raw line
/// breaks inside strings; if strict parsing fails the known fields are
/// picked out with a pattern instead.
pub fn parse_ui_json(data: &[u8]) -> Option<UiInfo> {
    let text = String::from_utf8_lossy(data);
    let text = text.trim_start_matches('\u{feff}');

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(object)) => {
            let field = |name: &str| {
                object
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .and_then(|(_, v)| match v {
                        serde_json::Value::String(s) => Some(s.trim().to_string()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
            };
            Some(UiInfo {
                name: field("name"),
                version: field("version"),
                skin_name: field("skinname"),
            })
        }
        Ok(_) => None,
        Err(e) => {
            debug!("Strict ui json parsing failed: {}", e);
            parse_ui_json_lenient(text)
        }
    }
}

fn parse_ui_json_lenient(text: &str) -> Option<UiInfo> {
    static FIELD: OnceLock<Option<Regex>> = OnceLock::new();
    let field = FIELD
        .get_or_init(|| Regex::new(r#"(?i)"(name|version|skinname)"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok())
        .as_ref()?;

    let mut info = UiInfo::default();
    let mut found = false;
    for caps in field.captures_iter(text) {
        let value = caps[2].replace("\\\"", "\"").trim().to_string();
        if value.is_empty() {
            continue;
        }
        let slot = match caps[1].to_lowercase().as_str() {
            "name" => &mut info.name,
            "version" => &mut info.version,
            _ => &mut info.skin_name,
        };
        if slot.is_none() {
            *slot = Some(value);
            found = true;
        }
    }
    found.then_some(info)
}

/// Content Manager theme metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThemeInfo {
    pub version: Option<String>,
}

/// Check that `data` is a XAML resource dictionary and read its
/// `<sys:String x:Key="Version">` value.
pub fn parse_theme(data: &str) -> Option<ThemeInfo> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut root_checked = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if !root_checked => {
                if e.local_name().as_ref() != b"ResourceDictionary" {
                    return None;
                }
                root_checked = true;
            }
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"String" => {
                let is_version = e
                    .attributes()
                    .flatten()
                    .any(|a| a.key.local_name().as_ref() == b"Key" && a.value.as_ref() == b"Version");
                if is_version {
                    let version = reader.read_text(e.name()).ok()?.trim().to_string();
                    return Some(ThemeInfo {
                        version: (!version.is_empty()).then_some(version),
                    });
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Not a theme: {}", e);
                return None;
            }
        }
        buf.clear();
    }

    root_checked.then(ThemeInfo::default)
}

/// Normalized view of the archive's files
struct Tree {
    /// Lowercase key → key as listed
    files: BTreeMap<String, String>,
    /// Lowercase folder → folder with its listed case, root included
    dirs: BTreeMap<String, String>,
}

impl Tree {
    fn new<'a>(keys: impl Iterator<Item = &'a str>) -> Self {
        let mut files = BTreeMap::new();
        let mut dirs = BTreeMap::new();
        dirs.insert(String::new(), String::new());

        for raw in keys {
            let key = paths::to_key(raw);
            let lower = paths::normalize_for_lookup(&key);
            let mut parent = paths::parent_path(&key);
            while let Some(dir) = parent {
                dirs.entry(dir.to_lowercase()).or_insert_with(|| dir.to_string());
                parent = paths::parent_path(dir);
            }
            files.entry(lower).or_insert_with(|| raw.to_string());
        }

        Self { files, dirs }
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.files.get(&paths::normalize_for_lookup(key)).map(String::as_str)
    }

    fn has(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    /// Lowercase keys of files directly in `dir`
    fn files_in<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.files
            .keys()
            .filter(move |k| paths::parent_path(k).unwrap_or("") == dir)
            .map(String::as_str)
    }

    /// Folders, shallow ones first
    fn dirs_by_depth(&self) -> Vec<(&str, &str)> {
        let mut dirs: Vec<(&str, &str)> = self.dirs.iter().map(|(l, c)| (l.as_str(), c.as_str())).collect();
        dirs.sort_by_key(|(l, _)| (if l.is_empty() { 0 } else { l.matches('/').count() + 1 }, *l));
        dirs
    }

    /// Cased name of a listed folder
    fn cased<'a>(&'a self, dir: &'a str) -> &'a str {
        self.dirs.get(dir).map(String::as_str).unwrap_or(dir)
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}


#[derive(Debug)]
enum Candidate {
    Folder { content_type: ContentType, dir: String, id: String },
    CarSkin { dir: String, car_id: String, id: String },
    Track { dir: String, id: String, layouts: Vec<String> },
    PythonApp { dir: String, id: String, icons: Vec<String> },
    File { content_type: ContentType, key: String, id: String },
}

impl Candidate {
    /// Metadata files to fetch before the entry can be built
    fn requests(&self) -> Vec<String> {
        match self {
            Candidate::Folder { content_type, dir, .. } => match content_type {
                ContentType::Car => vec![join(dir, "ui/ui_car.json"), join(dir, "ui/badge.png")],
                ContentType::Showroom => vec![join(dir, "ui/ui_showroom.json")],
                ContentType::Weather => vec![join(dir, "weather.ini")],
                _ => Vec::new(),
            },
            Candidate::CarSkin { dir, .. } => vec![join(dir, "ui_skin.json"), join(dir, "livery.png")],
            Candidate::Track { dir, layouts, .. } => {
                let mut keys = vec![
                    join(dir, "ui/ui_track.json"),
                    join(dir, "ui/outline.png"),
                    join(dir, "models.ini"),
                ];
                for layout in layouts {
                    keys.push(join(dir, &format!("ui/{}/ui_track.json", layout)));
                    keys.push(join(dir, &format!("ui/{}/outline.png", layout)));
                    keys.push(join(dir, &format!("models_{}.ini", layout)));
                }
                keys
            }
            Candidate::PythonApp { dir, .. } => vec![join(dir, "ui/ui_app.json")],
            Candidate::File { content_type, key, .. } => match content_type {
                ContentType::CmTheme => vec![key.clone()],
                _ => Vec::new(),
            },
        }
    }
}

fn classify(tree: &Tree, root_id: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut claimed: Vec<String> = Vec::new();

    for (dir, cased) in tree.dirs_by_depth() {
        if claimed.iter().any(|c| paths::is_affected(c, dir)) {
            continue;
        }

        let id = if dir.is_empty() {
            root_id.to_string()
        } else {
            paths::file_name(cased).to_string()
        };
        let has = |name: &str| tree.has(&join(dir, name));

        let candidate = if has("data.acd") || has("data/car.ini") {
            Some(Candidate::Folder {
                content_type: ContentType::Car,
                dir: dir.to_string(),
                id: id.clone(),
            })
        } else if has("ui/ui_track.json") || !track_layouts(tree, dir).is_empty() {
            Some(Candidate::Track {
                dir: dir.to_string(),
                id: id.clone(),
                layouts: track_layouts(tree, dir),
            })
        } else if has("ui/ui_showroom.json") {
            Some(Candidate::Folder {
                content_type: ContentType::Showroom,
                dir: dir.to_string(),
                id: id.clone(),
            })
        } else if has("weather.ini") {
            Some(Candidate::Folder {
                content_type: ContentType::Weather,
                dir: dir.to_string(),
                id: id.clone(),
            })
        } else if has(&format!("{}.py", id.to_lowercase())) {
            Some(Candidate::PythonApp {
                dir: dir.to_string(),
                id: id.clone(),
                icons: app_icons(tree, &id),
            })
        } else if has("ui_skin.json") {
            skin_candidate(tree, dir, &id)
        } else {
            None
        };

        match candidate {
            Some(candidate) if paths::is_appropriate_id(&id) => {
                debug!("Found {:?}", candidate);
                claimed.push(dir.to_string());
                candidates.push(candidate);
            }
            Some(_) => debug!("Skipping content with invalid id in “{}”", cased),
            None => candidates.extend(loose_files(tree, dir)),
        }
    }

    candidates
}

/// Layout ids: folders in `ui/` with their own `ui_track.json`
fn track_layouts(tree: &Tree, dir: &str) -> Vec<String> {
    let ui = join(dir, "ui");
    tree.files
        .iter()
        .filter_map(|(lower, raw)| {
            let rest = lower.strip_prefix(&ui)?.strip_prefix('/')?;
            let (layout, file) = rest.split_once('/')?;
            (file == "ui_track.json").then(|| {
                // Keep the id as listed
                let raw = paths::to_key(raw);
                let start = ui.len() + 1;
                raw.get(start..start + layout.len()).unwrap_or(layout).to_string()
            })
        })
        .filter(|id| paths::is_appropriate_id(id))
        .collect()
}

fn skin_candidate(tree: &Tree, dir: &str, id: &str) -> Option<Candidate> {
    let parent = paths::parent_path(dir)?;
    if paths::file_name(parent) != "skins" {
        return None;
    }
    let car_dir = paths::parent_path(parent)?;
    let car_id = paths::file_name(tree.cased(car_dir)).to_string();
    paths::is_appropriate_id(&car_id).then(|| Candidate::CarSkin {
        dir: dir.to_string(),
        car_id,
        id: id.to_string(),
    })
}

/// Sidebar icons of an app: `…/gui/icons/<id>*` anywhere in the archive
fn app_icons(tree: &Tree, id: &str) -> Vec<String> {
    let prefix = id.to_lowercase();
    tree.files
        .iter()
        .filter(|(lower, _)| {
            paths::parent_path(lower).is_some_and(|p| p == "gui/icons" || p.ends_with("/gui/icons"))
                && paths::file_name(lower).starts_with(&prefix)
        })
        .map(|(_, raw)| raw.clone())
        .collect()
}

fn loose_files(tree: &Tree, dir: &str) -> Vec<Candidate> {
    let folder = paths::file_name(dir);
    let mut found = Vec::new();

    for lower in tree.files_in(dir) {
        let Some(raw) = tree.raw(lower) else {
            continue;
        };
        let key = paths::to_key(raw);
        let name = paths::file_name(&key);
        let candidate = match paths::extension(lower) {
            Some("txt") if folder == "fonts" => font_bitmap(tree, lower).map(|bitmap| Candidate::File {
                content_type: ContentType::Font,
                key: bitmap,
                id: paths::without_extension(name).to_string(),
            }),
            Some("ttf") => Some(Candidate::File {
                content_type: ContentType::TrueTypeFont,
                key: key.clone(),
                id: name.to_string(),
            }),
            Some("ini") if folder == "ppfilters" => Some(Candidate::File {
                content_type: ContentType::PpFilter,
                key: key.clone(),
                id: name.to_string(),
            }),
            Some("kn5") if folder == "driver" => Some(Candidate::File {
                content_type: ContentType::DriverModel,
                key: key.clone(),
                id: paths::without_extension(name).to_string(),
            }),
            Some("xaml") => Some(Candidate::File {
                content_type: ContentType::CmTheme,
                key: key.clone(),
                id: name.to_string(),
            }),
            _ => None,
        };

        if let Some(candidate) = candidate.filter(|c| match c {
            Candidate::File { id, .. } => paths::is_appropriate_id(id),
            _ => true,
        }) {
            debug!("Found {:?}", candidate);
            found.push(candidate);
        }
    }

    found
}

fn font_bitmap(tree: &Tree, txt: &str) -> Option<String> {
    let stem = paths::without_extension(txt);
    FONT_BITMAP_EXTENSIONS
        .iter()
        .find_map(|ext| tree.raw(&format!("{}.{}", stem, ext)))
        .map(paths::to_key)
}

/// Reads cached metadata during the build phase
struct Metadata<'a, T: ArchiveTool> {
    tree: &'a Tree,
    reader: &'a ArchiveReader<T>,
}

impl<T: ArchiveTool> Metadata<'_, T> {
    fn bytes(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.reader.cached(self.tree.raw(key)?)
    }

    fn ui(&self, key: &str) -> Option<UiInfo> {
        let data = self.bytes(key)?;
        let info = parse_ui_json(&data);
        if info.is_none() {
            warn!("Can't parse {}", key);
        }
        info
    }

    fn icon(&self, key: &str) -> Option<Vec<u8>> {
        self.bytes(key).map(|d| d.as_ref().clone())
    }

    fn ini(&self, key: &str) -> Option<IniFile> {
        self.bytes(key).map(|d| IniFile::from_bytes(&d))
    }

    /// KN5 files of a models ini: shipped ones and ones expected to be installed
    fn models(&self, dir: &str, ini_name: &str) -> Option<(Vec<String>, Vec<String>)> {
        let ini = self.ini(&join(dir, ini_name))?;
        let (present, missing) = ini::all_models(&ini)
            .into_iter()
            .partition(|model| self.tree.has(&join(dir, model)));
        Some((present, missing))
    }

    /// KN5 files directly in a track folder
    fn root_models(&self, dir: &str) -> Vec<String> {
        self.tree
            .files_in(dir)
            .filter(|f| paths::extension(f) == Some("kn5"))
            .filter_map(|f| self.tree.raw(f))
            .map(|raw| paths::file_name(&paths::to_key(raw)).to_string())
            .collect()
    }

    fn build(&self, candidate: Candidate) -> Result<Option<ContentEntry>> {
        let entry = match candidate {
            Candidate::Folder { content_type, dir, id } => {
                let entry_path = self.tree.cased(&dir).to_string();
                match content_type {
                    ContentType::Weather => {
                        let name = self.ini(&join(&dir, "weather.ini")).and_then(|ini| {
                            ini.section("LAUNCHER")
                                .and_then(|s| s.get_non_empty("NAME"))
                                .map(str::to_string)
                        });
                        ContentEntry::new(content_type, &entry_path, id, name)
                    }
                    _ => {
                        let ui_file = match content_type {
                            ContentType::Car => "ui/ui_car.json",
                            _ => "ui/ui_showroom.json",
                        };
                        let ui = self.ui(&join(&dir, ui_file)).unwrap_or_default();
                        ContentEntry::new(content_type, &entry_path, id, ui.name)
                            .with_version(ui.version)
                            .with_icon(self.icon(&join(&dir, "ui/badge.png")))
                    }
                }
            }
            Candidate::CarSkin { dir, car_id, id } => {
                let ui = self.ui(&join(&dir, "ui_skin.json")).unwrap_or_default();
                ContentEntry::car_skin(self.tree.cased(&dir), car_id, id, ui.skin_name.or(ui.name))
                    .with_icon(self.icon(&join(&dir, "livery.png")))
            }
            Candidate::PythonApp { dir, id, icons } => {
                let ui = self.ui(&join(&dir, "ui/ui_app.json")).unwrap_or_default();
                ContentEntry::python_app(self.tree.cased(&dir), id, ui.name, icons).with_version(ui.version)
            }
            Candidate::Track { dir, id, layouts } => self.build_track(&dir, id, layouts)?,
            Candidate::File { content_type, key, id } => match content_type {
                ContentType::CmTheme => {
                    let data = self.bytes(&key);
                    let Some(theme) = data.and_then(|d| parse_theme(&String::from_utf8_lossy(&d))) else {
                        debug!("{} is not a theme", key);
                        return Ok(None);
                    };
                    let name = theme_name(&id);
                    ContentEntry::new(content_type, &key, id, Some(name)).with_version(theme.version)
                }
                _ => ContentEntry::new(content_type, &key, id, None),
            },
        };
        Ok(Some(entry))
    }

    fn build_track(&self, dir: &str, id: String, layout_ids: Vec<String>) -> Result<ContentEntry> {
        let entry_path = self.tree.cased(dir).to_string();
        let base_ui = self.ui(&join(dir, "ui/ui_track.json"));

        if layout_ids.is_empty() {
            let ui = base_ui.unwrap_or_default();
            let details = match self.models(dir, "models.ini") {
                Some((present, required)) => TrackDetails::single(Some(present), Some(required)),
                None => TrackDetails::single(Some(self.root_models(dir)), None),
            };
            return Ok(ContentEntry::track(&entry_path, id, ui.name, details)
                .with_version(ui.version)
                .with_icon(self.icon(&join(dir, "ui/outline.png"))));
        }

        let mut layouts = Vec::new();
        let mut add_layout = |layout_id: &str, ui: Option<UiInfo>, ini_name: String, ui_dir: String| {
            let (present, required) = self.models(dir, &ini_name).unwrap_or_default();
            let ui = ui.unwrap_or_default();
            let mut layout = TrackLayoutEntry::new(layout_id, present, required)
                .with_name(ui.name.or_else(|| Some(layout_id.to_string())));
            layout.version = ui.version;
            layout.icon_data = self.icon(&join(&ui_dir, "outline.png")).map(Arc::new);
            layouts.push(layout);
        };

        if base_ui.is_some() {
            add_layout("", base_ui, "models.ini".to_string(), join(dir, "ui"));
        }
        for layout_id in &layout_ids {
            let ui_dir = join(dir, &format!("ui/{}", layout_id));
            let ui = self.ui(&join(&ui_dir, "ui_track.json"));
            add_layout(layout_id, ui, format!("models_{}.ini", layout_id), ui_dir);
        }

        ContentEntry::track_with_layouts(&entry_path, id, layouts)
    }
}

/// Find installable content in an archive.
///
/// Content at the archive root is named after the archive file. Returns
/// `None` when cancelled.
pub async fn detect_content<T: ArchiveTool>(
    reader: &ArchiveReader<T>,
    cancel: &CancellationToken,
) -> Result<Option<Vec<ContentEntry>>> {
    let Some(listing) = reader.list_entries(cancel).await? else {
        return Ok(None);
    };

    let tree = Tree::new(listing.entries.iter().map(|e| e.key.as_str()));
    let root_id = reader
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .filter(|id| paths::is_appropriate_id(id))
        .unwrap_or_default();

    let candidates = classify(&tree, &root_id);
    debug!("{} candidates in {}", candidates.len(), reader.path().display());

    let requests: Vec<String> = candidates
        .iter()
        .flat_map(Candidate::requests)
        .filter_map(|key| tree.raw(&key).map(str::to_string))
        .collect();
    reader.request_entries(requests);
    if reader.has_pending() && reader.resolve_pending(cancel).await?.is_none() {
        return Ok(None);
    }

    let metadata = Metadata { tree: &tree, reader };
    let mut entries = Vec::new();
    for candidate in candidates {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if let Some(entry) = metadata.build(candidate)? {
            entries.push(entry);
        }
    }

    if entries.len() == 1 {
        entries[0].single_entry = true;
    }

    info!("Found {} content entries in {}", entries.len(), reader.path().display());
    Ok(Some(entries))
}
