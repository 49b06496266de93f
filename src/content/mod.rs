//! Installable content found in an archive.
//!
//! A [`ContentEntry`] is one car, track, skin, font… plus everything the
//! user can decide about it: whether to install it, which update option to
//! use and, for tracks, which layouts to keep. Per-type behaviour comes
//! from the strategy table in [`options`].

pub mod detect;
pub mod filter;
pub mod options;
pub mod track;
pub mod version;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{InstallError, Result};
use crate::installed::{ContentDirectories, InstalledContent, InstalledObject};
use crate::paths;
use filter::{CopyFilter, CopyPlan};
use options::{strategy, OptionContext, PlanKind, UpdateOption};
use track::{reconcile_track, TrackDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Car,
    CarSkin,
    Track,
    Showroom,
    Font,
    TrueTypeFont,
    Weather,
    PythonApp,
    PpFilter,
    DriverModel,
    CmTheme,
}

impl ContentType {
    pub fn name(&self) -> &'static str {
        match self {
            ContentType::Car => "car",
            ContentType::CarSkin => "car skin",
            ContentType::Track => "track",
            ContentType::Showroom => "showroom",
            ContentType::Font => "font",
            ContentType::TrueTypeFont => "TrueType font",
            ContentType::Weather => "weather",
            ContentType::PythonApp => "Python app",
            ContentType::PpFilter => "PP-filter",
            ContentType::DriverModel => "driver model",
            ContentType::CmTheme => "CM theme",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Type-specific data of an entry
#[derive(Debug, Clone)]
pub enum EntryDetails {
    Plain,
    CarSkin {
        car_id: String,
        /// Filled in by `check_existing`
        car_name: Option<String>,
        car_location: Option<PathBuf>,
    },
    PythonApp {
        /// Archive keys of sidebar icons
        icons: Vec<String>,
    },
    Track(TrackDetails),
}

#[derive(Debug, Clone)]
pub struct ContentEntry {
    pub content_type: ContentType,
    pub id: String,
    /// Location inside the archive, empty for content at the root
    pub entry_path: String,
    pub name: String,
    pub version: Option<String>,
    pub icon_data: Option<Arc<Vec<u8>>>,
    /// Whether to install this entry at all
    pub active: bool,
    /// The only entry of its archive
    pub single_entry: bool,
    pub details: EntryDetails,
    existing: Option<InstalledObject>,
    existing_label: Option<String>,
    no_conflict: bool,
    options: Vec<UpdateOption>,
    selected_option: usize,
}

impl ContentEntry {
    pub fn new(content_type: ContentType, entry_path: &str, id: impl Into<String>, name: Option<String>) -> Self {
        let id = id.into();
        let mut entry = Self {
            content_type,
            name: name.filter(|n| !n.is_empty()).unwrap_or_else(|| id.clone()),
            id,
            entry_path: paths::to_key(entry_path),
            version: None,
            icon_data: None,
            active: true,
            single_entry: false,
            details: EntryDetails::Plain,
            existing: None,
            existing_label: None,
            no_conflict: false,
            options: Vec::new(),
            selected_option: 0,
        };
        entry.reset_options();
        entry
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn with_icon(mut self, icon_data: Option<Vec<u8>>) -> Self {
        self.icon_data = icon_data.map(Arc::new);
        self
    }

    pub fn car_skin(entry_path: &str, car_id: impl Into<String>, id: impl Into<String>, name: Option<String>) -> Self {
        let mut entry = Self::new(ContentType::CarSkin, entry_path, id, name);
        entry.details = EntryDetails::CarSkin {
            car_id: car_id.into(),
            car_name: None,
            car_location: None,
        };
        entry
    }

    pub fn python_app(entry_path: &str, id: impl Into<String>, name: Option<String>, icons: Vec<String>) -> Self {
        let mut entry = Self::new(ContentType::PythonApp, entry_path, id, name);
        entry.details = EntryDetails::PythonApp { icons };
        entry
    }

    /// Track without explicit layouts
    pub fn track(entry_path: &str, id: impl Into<String>, name: Option<String>, details: TrackDetails) -> Self {
        let mut entry = Self::new(ContentType::Track, entry_path, id, name);
        entry.details = EntryDetails::Track(details);
        entry
    }

    /// Track with a layout set; named after what the layouts share, version
    /// taken from the first one.
    pub fn track_with_layouts(entry_path: &str, id: impl Into<String>, layouts: Vec<track::TrackLayoutEntry>) -> Result<Self> {
        let names: Vec<&str> = layouts.iter().filter_map(|l| l.name.as_deref()).collect();
        let name = crate::installed::common_name(names.iter().copied())
            .or_else(|| layouts.first().and_then(|l| l.name.clone()));
        let version = layouts.first().and_then(|l| l.version.clone());
        let details = TrackDetails::with_layouts(layouts)?;
        Ok(Self::track(entry_path, id, name, details).with_version(version))
    }

    pub fn display_id(&self) -> &str {
        if self.id.is_empty() {
            "N/A"
        } else {
            &self.id
        }
    }

    pub fn display_path(&self) -> String {
        if self.entry_path.is_empty() {
            "N/A".to_string()
        } else {
            format!("{}{}", std::path::MAIN_SEPARATOR, self.entry_path.replace('/', std::path::MAIN_SEPARATOR_STR))
        }
    }

    /// Label describing what installing this entry does
    pub fn display_name(&self) -> String {
        let strategy = strategy(self.content_type);
        let car = match &self.details {
            EntryDetails::CarSkin { car_id, car_name, .. } => car_name.as_deref().unwrap_or(car_id),
            _ => "",
        };

        match (&self.existing, &self.existing_label) {
            (None, _) => strategy.new_format.replace("{name}", &self.name).replace("{car}", car),
            (Some(_), Some(label)) => label.clone(),
            (Some(existing), None) => strategy
                .existing_format
                .replace("{name}", &existing.display_name)
                .replace("{car}", car),
        }
    }

    pub fn existing(&self) -> Option<&InstalledObject> {
        self.existing.as_ref()
    }

    pub fn is_new(&self) -> bool {
        self.existing.is_none()
    }

    pub fn existing_name(&self) -> Option<&str> {
        self.existing.as_ref().map(|e| e.display_name.as_str())
    }

    pub fn existing_version(&self) -> Option<&str> {
        self.existing.as_ref().and_then(|e| e.version.as_deref())
    }

    pub fn is_newer_version(&self) -> bool {
        version::is_newer(self.version.as_deref(), self.existing_version())
    }

    pub fn is_older_version(&self) -> bool {
        version::is_older(self.version.as_deref(), self.existing_version())
    }

    /// Nothing installed would be overwritten
    pub fn no_conflict(&self) -> bool {
        self.no_conflict
    }

    pub fn track_details(&self) -> Option<&TrackDetails> {
        match &self.details {
            EntryDetails::Track(details) => Some(details),
            _ => None,
        }
    }

    pub fn options(&self) -> &[UpdateOption] {
        &self.options
    }

    pub fn selected_option(&self) -> Option<&UpdateOption> {
        self.options.get(self.selected_option)
    }

    pub fn selected_index(&self) -> usize {
        self.selected_option
    }

    /// Pick an update option, returns false if there is no such option
    pub fn select_option(&mut self, index: usize) -> bool {
        if index >= self.options.len() {
            return false;
        }
        self.selected_option = index;
        self.update_overlap();
        true
    }

    /// Select an option by its display name (case-insensitive)
    pub fn select_option_by_name(&mut self, name: &str) -> bool {
        match self.options.iter().position(|o| o.display_name.eq_ignore_ascii_case(name)) {
            Some(index) => self.select_option(index),
            None => false,
        }
    }

    fn reset_options(&mut self) {
        let strategy = strategy(self.content_type);
        self.options = strategy.options(&OptionContext {
            no_conflict: self.no_conflict,
        });
        self.selected_option = strategy.default_index(&self.options);
        self.update_overlap();
    }

    fn update_overlap(&mut self) {
        if let EntryDetails::Track(details) = &mut self.details {
            details.update_overlap(self.existing.as_ref());
        }
    }

    /// Look up what is already installed under this id.
    ///
    /// Tracks are reconciled against the installed track; the option list is
    /// rebuilt afterwards since it depends on the result.
    pub async fn check_existing(&mut self, installed: &dyn InstalledContent) -> Result<()> {
        let existing = match &mut self.details {
            EntryDetails::CarSkin {
                car_id,
                car_name,
                car_location,
            } => {
                let car = installed
                    .get_by_id_async(ContentType::Car, car_id)
                    .await?
                    .ok_or_else(|| InstallError::MalformedEntry(format!("Car “{}” for a skin not found", car_id)))?;
                *car_name = Some(car.display_name.clone());
                *car_location = Some(car.location.clone());
                installed.get_skin_async(car_id, &self.id).await?
            }
            _ => installed.get_by_id_async(self.content_type, &self.id).await?,
        };

        debug!(
            "{} {}: {}",
            self.content_type,
            self.id,
            existing.as_ref().map_or("not installed", |e| e.display_name.as_str())
        );

        self.existing = existing;
        self.existing_label = None;
        self.no_conflict = false;

        if let EntryDetails::Track(details) = &mut self.details {
            let reconciliation = reconcile_track(self.existing.as_ref(), &self.name, details)?;
            details.apply(&reconciliation);
            self.existing_label = reconciliation.label;
            self.no_conflict = reconciliation.no_conflict;
        }

        self.reset_options();
        Ok(())
    }

    /// Install under a different id; call `check_existing` again afterwards
    pub fn rename(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if !paths::is_appropriate_id(&id) {
            return Err(InstallError::MalformedEntry(format!("“{}” can't be used as an id", id)));
        }

        self.id = id;
        self.existing = None;
        self.existing_label = None;
        self.no_conflict = false;
        self.reset_options();
        Ok(())
    }

    /// Switch a track layout on or off
    pub fn set_layout_active(&mut self, layout_id: &str, active: bool) -> bool {
        let EntryDetails::Track(details) = &mut self.details else {
            return false;
        };
        let changed = details.set_layout_active(layout_id, active);
        self.update_overlap();
        changed
    }

    pub fn shared_models_overlap(&self) -> bool {
        self.track_details().is_some_and(TrackDetails::shared_models_overlap)
    }

    pub fn set_keep_existing_shared_models(&mut self, keep: bool) {
        if let EntryDetails::Track(details) = &mut self.details {
            details.keep_existing_shared_models = keep;
        }
    }

    /// Effective filter over paths relative to the entry
    pub fn copy_filter(&self) -> CopyFilter {
        let option_filter = self
            .selected_option()
            .map(|o| o.filter.clone())
            .unwrap_or_default();

        match &self.details {
            EntryDetails::Track(details) => details.copy_filter(&option_filter, self.no_conflict),
            _ => option_filter,
        }
    }

    /// Where this entry would be installed.
    ///
    /// The existing copy's location when there is one, otherwise derived
    /// from the content directories. Skins go below their car.
    pub fn destination(&self, directories: Option<&ContentDirectories>) -> Result<PathBuf> {
        if !paths::is_appropriate_id(&self.id) {
            return Err(InstallError::MalformedEntry(format!("“{}” can't be used as an id", self.id)));
        }

        if self.content_type == ContentType::CmTheme {
            return directories
                .map(|d| d.themes_dir().to_path_buf())
                .ok_or(InstallError::DirectoriesUnavailable);
        }

        if let Some(existing) = &self.existing {
            return Ok(existing.location.clone());
        }

        let directories = directories.ok_or(InstallError::DirectoriesUnavailable)?;
        match &self.details {
            EntryDetails::CarSkin { car_id, car_location, .. } => {
                let car_location = car_location.clone().ok_or_else(|| {
                    InstallError::MalformedEntry(format!("Car “{}” for a skin not found", car_id))
                })?;
                directories
                    .skin_location(&car_location, &self.id)
                    .ok_or(InstallError::DirectoriesUnavailable)
            }
            _ => directories
                .location(self.content_type, &self.id)
                .ok_or(InstallError::DirectoriesUnavailable),
        }
    }

    /// Location an option with `remove_existing` clears before copying
    pub fn removal_target(&self, directories: Option<&ContentDirectories>) -> Result<PathBuf> {
        let destination = self.destination(directories)?;
        match self.content_type {
            ContentType::CmTheme => directories
                .and_then(|d| d.location(ContentType::CmTheme, &self.id))
                .ok_or(InstallError::DirectoriesUnavailable),
            _ => Ok(destination),
        }
    }

    /// Mapping of archive keys for this entry onto `destination`
    pub fn copy_plan(&self, destination: PathBuf, directories: Option<&ContentDirectories>) -> CopyPlan {
        let plan = match strategy(self.content_type).plan {
            PlanKind::Directory => CopyPlan::directory(&self.entry_path, destination, self.copy_filter()),
            PlanKind::Font => CopyPlan::font(&self.entry_path, destination),
            PlanKind::Theme => CopyPlan::theme(&self.entry_path, destination),
        };

        match (&self.details, directories) {
            (EntryDetails::PythonApp { icons }, Some(directories)) if !icons.is_empty() => {
                plan.with_icons(icons.clone(), directories.gui_icons_dir())
            }
            _ => plan,
        }
    }
}
