//! Update options: named ways to install content over an existing copy.
//!
//! Every content type has a [`Strategy`] in a lookup table: label formats,
//! which option is selected by default, how to build its option list and how
//! archive keys map onto the destination.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::filter::CopyFilter;
use super::ContentType;
use crate::paths;

pub const UPDATE_EVERYTHING: &str = "Update Everything";
pub const REMOVE_EXISTING_FIRST: &str = "Remove Existing First";
pub const KEEP_UI_INFORMATION: &str = "Keep UI Information";
pub const JUST_INSTALL: &str = "Just Install";

pub type CleanUpFn = dyn Fn(&Path) -> Vec<PathBuf> + Send + Sync;

#[derive(Clone)]
pub struct UpdateOption {
    pub display_name: String,
    pub remove_existing: bool,
    pub filter: CopyFilter,
    /// Paths to recycle below the destination before copying
    pub clean_up: Option<Arc<CleanUpFn>>,
}

impl UpdateOption {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            remove_existing: false,
            filter: CopyFilter::accept_all(),
            clean_up: None,
        }
    }

    pub fn removing_existing(mut self) -> Self {
        self.remove_existing = true;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter = CopyFilter::new(filter);
        self
    }

    pub fn with_clean_up<F>(mut self, clean_up: F) -> Self
    where
        F: Fn(&Path) -> Vec<PathBuf> + Send + Sync + 'static,
    {
        self.clean_up = Some(Arc::new(clean_up));
        self
    }

    pub fn clean_up_paths(&self, destination: &Path) -> Vec<PathBuf> {
        self.clean_up
            .as_ref()
            .map(|clean_up| clean_up(destination))
            .unwrap_or_default()
    }
}

impl fmt::Debug for UpdateOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOption")
            .field("display_name", &self.display_name)
            .field("remove_existing", &self.remove_existing)
            .field("filter", &self.filter)
            .field("clean_up", &self.clean_up.is_some())
            .finish()
    }
}

/// Inputs an option list may depend on
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionContext {
    /// Track layouts being added next to existing ones, nothing to overwrite
    pub no_conflict: bool,
}

/// How archive keys of an entry map onto its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Directory,
    Font,
    Theme,
}

pub struct Strategy {
    /// `{name}` is replaced with the item name, `{car}` with the car name
    pub new_format: &'static str,
    pub existing_format: &'static str,
    pub default_option: usize,
    pub build_options: fn(&OptionContext) -> Vec<UpdateOption>,
    pub plan: PlanKind,
}

impl Strategy {
    pub fn options(&self, context: &OptionContext) -> Vec<UpdateOption> {
        (self.build_options)(context)
    }

    /// Index of the default option, first one if the preferred index is missing
    pub fn default_index(&self, options: &[UpdateOption]) -> usize {
        if self.default_option < options.len() {
            self.default_option
        } else {
            0
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("new_format", &self.new_format)
            .field("default_option", &self.default_option)
            .field("plan", &self.plan)
            .finish()
    }
}

pub fn strategy(content_type: ContentType) -> &'static Strategy {
    match content_type {
        ContentType::Car => &CAR,
        ContentType::CarSkin => &CAR_SKIN,
        ContentType::Track => &TRACK,
        ContentType::Showroom => &SHOWROOM,
        ContentType::Font => &FONT,
        ContentType::TrueTypeFont => &TRUE_TYPE_FONT,
        ContentType::Weather => &WEATHER,
        ContentType::PythonApp => &PYTHON_APP,
        ContentType::PpFilter => &PP_FILTER,
        ContentType::DriverModel => &DRIVER_MODEL,
        ContentType::CmTheme => &CM_THEME,
    }
}

static CAR: Strategy = Strategy {
    new_format: "New car {name}",
    existing_format: "Update for a car {name}",
    default_option: 0,
    build_options: car_options,
    plan: PlanKind::Directory,
};

static CAR_SKIN: Strategy = Strategy {
    new_format: "New skin {name} for {car}",
    existing_format: "Update for a skin {name} for {car}",
    default_option: 0,
    build_options: car_skin_options,
    plan: PlanKind::Directory,
};

static TRACK: Strategy = Strategy {
    new_format: "New track {name}",
    existing_format: "Update for a track {name}",
    default_option: 0,
    build_options: track_options,
    plan: PlanKind::Directory,
};

static SHOWROOM: Strategy = Strategy {
    new_format: "New showroom {name}",
    existing_format: "Update for a showroom {name}",
    default_option: 0,
    build_options: showroom_options,
    plan: PlanKind::Directory,
};

static FONT: Strategy = Strategy {
    new_format: "New font {name}",
    existing_format: "Update for a font {name}",
    default_option: 0,
    build_options: update_everything_only,
    plan: PlanKind::Font,
};

static TRUE_TYPE_FONT: Strategy = Strategy {
    new_format: "New TrueType font {name}",
    existing_format: "Update for a TrueType font {name}",
    default_option: 0,
    build_options: update_everything_only,
    plan: PlanKind::Directory,
};

static WEATHER: Strategy = Strategy {
    new_format: "New weather {name}",
    existing_format: "Update for a weather {name}",
    default_option: 2,
    build_options: weather_options,
    plan: PlanKind::Directory,
};

static PYTHON_APP: Strategy = Strategy {
    new_format: "New app {name}",
    existing_format: "Update for an app {name}",
    default_option: 0,
    build_options: base_options,
    plan: PlanKind::Directory,
};

static PP_FILTER: Strategy = Strategy {
    new_format: "New PP-filter {name}",
    existing_format: "Update for a PP-filter {name}",
    default_option: 0,
    build_options: update_everything_only,
    plan: PlanKind::Directory,
};

static DRIVER_MODEL: Strategy = Strategy {
    new_format: "New driver model {name}",
    existing_format: "Update for a driver model {name}",
    default_option: 0,
    build_options: update_everything_only,
    plan: PlanKind::Directory,
};

static CM_THEME: Strategy = Strategy {
    new_format: "New CM theme {name}",
    existing_format: "Update for a CM theme {name}",
    default_option: 0,
    build_options: theme_options,
    plan: PlanKind::Theme,
};

/// "Update Everything" and "Remove Existing First"
pub fn base_options(_: &OptionContext) -> Vec<UpdateOption> {
    vec![
        UpdateOption::new(UPDATE_EVERYTHING),
        UpdateOption::new(REMOVE_EXISTING_FIRST).removing_existing(),
    ]
}

fn update_everything_only(_: &OptionContext) -> Vec<UpdateOption> {
    vec![UpdateOption::new(UPDATE_EVERYTHING)]
}

fn theme_options(_: &OptionContext) -> Vec<UpdateOption> {
    vec![UpdateOption::new("Install")]
}

fn is_skin_file(path: &str, name: &str) -> bool {
    let key = paths::normalize_for_lookup(path);
    key.starts_with("skins/") && key.ends_with(&format!("/{}", name))
}

fn car_ui_filter(path: &str) -> bool {
    !paths::paths_equal(path, "ui/ui_car.json")
        && !paths::paths_equal(path, "ui/brand.png")
        && !paths::paths_equal(path, "logo.png")
        && !is_skin_file(path, "ui_skin.json")
}

fn car_previews_filter(path: &str) -> bool {
    !is_skin_file(path, "preview.jpg")
}

fn car_options(context: &OptionContext) -> Vec<UpdateOption> {
    let mut options = base_options(context);
    options.extend([
        UpdateOption::new(KEEP_UI_INFORMATION).with_filter(car_ui_filter),
        UpdateOption::new("Keep Skins Previews").with_filter(car_previews_filter),
        UpdateOption::new("Keep UI Information & Skins Previews")
            .with_filter(|p| car_ui_filter(p) && car_previews_filter(p)),
    ]);
    options
}

fn track_ui_filter(path: &str) -> bool {
    if !paths::is_affected("ui", path) {
        return true;
    }

    let name = paths::file_name(path).to_lowercase();
    name != "ui_track.json" && name != "preview.png" && name != "outline.png"
}

fn track_options(context: &OptionContext) -> Vec<UpdateOption> {
    if context.no_conflict {
        return vec![UpdateOption::new(JUST_INSTALL)];
    }

    let mut options = base_options(context);
    options.push(UpdateOption::new(KEEP_UI_INFORMATION).with_filter(track_ui_filter));
    options
}

fn showroom_options(context: &OptionContext) -> Vec<UpdateOption> {
    fn ui(path: &str) -> bool {
        !paths::paths_equal(path, "ui/ui_showroom.json")
    }
    fn preview(path: &str) -> bool {
        !paths::paths_equal(path, "preview.jpg")
    }

    let mut options = base_options(context);
    options.extend([
        UpdateOption::new(KEEP_UI_INFORMATION).with_filter(ui),
        UpdateOption::new("Keep Preview").with_filter(preview),
        UpdateOption::new("Keep UI Information & Preview").with_filter(|p| ui(p) && preview(p)),
    ]);
    options
}

fn car_skin_options(context: &OptionContext) -> Vec<UpdateOption> {
    fn ui(path: &str) -> bool {
        !paths::paths_equal(path, "ui_skin.json")
    }
    fn preview(path: &str) -> bool {
        !paths::paths_equal(path, "preview.jpg")
    }

    let mut options = base_options(context);
    options.extend([
        UpdateOption::new(KEEP_UI_INFORMATION).with_filter(ui),
        UpdateOption::new("Keep Preview").with_filter(preview),
        UpdateOption::new("Keep UI Information & Preview").with_filter(|p| ui(p) && preview(p)),
    ]);
    options
}

fn remove_clouds(location: &Path) -> Vec<PathBuf> {
    vec![location.join("clouds")]
}

fn weather_options(_: &OptionContext) -> Vec<UpdateOption> {
    fn preview(path: &str) -> bool {
        !paths::paths_equal(path, "preview.jpg")
    }

    vec![
        UpdateOption::new(UPDATE_EVERYTHING),
        UpdateOption::new(REMOVE_EXISTING_FIRST).removing_existing(),
        UpdateOption::new("Update Everything, Remove Existing Clouds If Any").with_clean_up(remove_clouds),
        UpdateOption::new("Keep Preview").with_filter(preview),
        UpdateOption::new("Update Everything, Remove Existing Clouds If Any & Keep Preview")
            .with_filter(preview)
            .with_clean_up(remove_clouds),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(options: &[UpdateOption]) -> Vec<&str> {
        options.iter().map(|o| o.display_name.as_str()).collect()
    }

    #[test]
    fn test_car_catalog() {
        let options = strategy(ContentType::Car).options(&OptionContext::default());
        assert_eq!(
            names(&options),
            vec![
                UPDATE_EVERYTHING,
                REMOVE_EXISTING_FIRST,
                KEEP_UI_INFORMATION,
                "Keep Skins Previews",
                "Keep UI Information & Skins Previews"
            ]
        );
        assert!(options[1].remove_existing);

        let keep_ui = &options[2].filter;
        assert!(!keep_ui.accepts("ui/ui_car.json"));
        assert!(!keep_ui.accepts("UI\\Brand.png"));
        assert!(!keep_ui.accepts("skins/red/ui_skin.json"));
        assert!(keep_ui.accepts("skins/red/preview.jpg"));
        assert!(keep_ui.accepts("data.acd"));

        let both = &options[4].filter;
        assert!(!both.accepts("skins/red/preview.jpg"));
        assert!(!both.accepts("logo.png"));
        assert!(both.accepts("skins/red/livery.png"));
    }

    #[test]
    fn test_track_catalog() {
        let options = strategy(ContentType::Track).options(&OptionContext { no_conflict: true });
        assert_eq!(names(&options), vec![JUST_INSTALL]);

        let options = strategy(ContentType::Track).options(&OptionContext::default());
        assert_eq!(names(&options), vec![UPDATE_EVERYTHING, REMOVE_EXISTING_FIRST, KEEP_UI_INFORMATION]);

        let keep_ui = &options[2].filter;
        assert!(!keep_ui.accepts("ui/ui_track.json"));
        assert!(!keep_ui.accepts("ui/gp/outline.png"));
        assert!(keep_ui.accepts("ui/gp/map.png"));
        assert!(keep_ui.accepts("preview.png"));
    }

    #[test]
    fn test_weather_defaults_to_clouds_clean_up() {
        let weather = strategy(ContentType::Weather);
        let options = weather.options(&OptionContext::default());
        assert_eq!(options.len(), 5);

        let default = &options[weather.default_index(&options)];
        assert_eq!(default.display_name, "Update Everything, Remove Existing Clouds If Any");
        assert_eq!(
            default.clean_up_paths(Path::new("/ac/content/weather/rain")),
            vec![PathBuf::from("/ac/content/weather/rain/clouds")]
        );
        assert!(options[0].clean_up_paths(Path::new("/x")).is_empty());
        assert!(!options[4].filter.accepts("preview.jpg"));
    }

    #[test]
    fn test_single_option_types() {
        for content_type in [
            ContentType::Font,
            ContentType::TrueTypeFont,
            ContentType::PpFilter,
            ContentType::DriverModel,
        ] {
            let s = strategy(content_type);
            let options = s.options(&OptionContext::default());
            assert_eq!(names(&options), vec![UPDATE_EVERYTHING]);
            assert_eq!(s.default_index(&options), 0);
        }

        let theme = strategy(ContentType::CmTheme).options(&OptionContext::default());
        assert_eq!(names(&theme), vec!["Install"]);
        assert!(!theme[0].remove_existing);
    }

    #[test]
    fn test_skin_and_showroom_catalogs() {
        let skin = strategy(ContentType::CarSkin).options(&OptionContext::default());
        assert!(!skin[2].filter.accepts("ui_skin.json"));
        assert!(skin[2].filter.accepts("preview.jpg"));
        assert!(!skin[4].filter.accepts("preview.jpg"));

        let showroom = strategy(ContentType::Showroom).options(&OptionContext::default());
        assert!(!showroom[2].filter.accepts("ui\\ui_showroom.json"));
        assert!(!showroom[3].filter.accepts("preview.jpg"));
    }
}
