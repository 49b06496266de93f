//! Copy filters and archive-to-destination mapping.
//!
//! A [`CopyFilter`] is a predicate over paths relative to a content item's
//! root (`ui/ui_car.json`, `skins/red/preview.jpg`). No filter means
//! everything passes; filters combine with [`CopyFilter::and`].
//!
//! A [`CopyPlan`] turns an archive key into a destination path for one
//! content item, applying its filter on the way.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::paths;

type Predicate = dyn Fn(&str) -> bool + Send + Sync;

#[derive(Clone, Default)]
pub struct CopyFilter(Option<Arc<Predicate>>);

impl CopyFilter {
    /// Accepts every path
    pub fn accept_all() -> Self {
        Self(None)
    }

    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self(Some(Arc::new(predicate)))
    }

    /// Accepts nothing
    pub fn reject_all() -> Self {
        Self::new(|_| false)
    }

    /// Filter accepting only paths both filters accept
    pub fn and(&self, other: &CopyFilter) -> CopyFilter {
        match (&self.0, &other.0) {
            (None, None) => CopyFilter(None),
            (Some(f), None) | (None, Some(f)) => CopyFilter(Some(f.clone())),
            (Some(a), Some(b)) => {
                let (a, b) = (a.clone(), b.clone());
                CopyFilter::new(move |path| a(path) && b(path))
            }
        }
    }

    pub fn accepts(&self, relative_path: &str) -> bool {
        match &self.0 {
            Some(predicate) => predicate(relative_path),
            None => true,
        }
    }

    pub fn is_accept_all(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for CopyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("CopyFilter(accept all)"),
            Some(_) => f.write_str("CopyFilter(..)"),
        }
    }
}

/// Where the files of one content item go.
#[derive(Debug, Clone)]
pub struct CopyPlan {
    entry_path: String,
    destination: PathBuf,
    filter: CopyFilter,
    mapping: Mapping,
    /// Extra keys copied by file name into a separate folder
    extras: Option<(Vec<String>, PathBuf)>,
}

#[derive(Debug, Clone)]
enum Mapping {
    /// Everything below `entry_path` goes below `destination`
    Directory,
    /// `entry_path` is the bitmap, the `.txt` next to it is the main file
    Font { main: String, bitmap_extension: String },
    /// `entry_path` is the `.xaml`, its resources live in a same-named folder
    Theme { resources: String },
    Nothing,
}

impl CopyPlan {
    /// Generic mapping: keys below `entry_path` land below `destination`,
    /// the key equal to `entry_path` lands on `destination` itself.
    pub fn directory(entry_path: &str, destination: impl Into<PathBuf>, filter: CopyFilter) -> Self {
        Self {
            entry_path: paths::to_key(entry_path),
            destination: destination.into(),
            filter,
            mapping: Mapping::Directory,
            extras: None,
        }
    }

    /// Bitmap font: `destination` is the `.txt` file, the bitmap goes next
    /// to it with its own extension.
    pub fn font(bitmap_key: &str, destination: impl Into<PathBuf>) -> Self {
        let bitmap_key = paths::to_key(bitmap_key);
        let bitmap_extension = paths::extension(&bitmap_key).unwrap_or_default().to_string();
        let main = format!("{}.txt", paths::without_extension(&bitmap_key));
        Self {
            entry_path: bitmap_key,
            destination: destination.into(),
            filter: CopyFilter::accept_all(),
            mapping: Mapping::Font { main, bitmap_extension },
            extras: None,
        }
    }

    /// UI theme: the `.xaml` goes into `themes_dir`, so does the content of
    /// the same-named resource folder.
    pub fn theme(xaml_key: &str, themes_dir: impl Into<PathBuf>) -> Self {
        let xaml_key = paths::to_key(xaml_key);
        let mapping = if xaml_key.trim().is_empty() {
            Mapping::Nothing
        } else {
            Mapping::Theme {
                resources: strip_suffix_ignore_case(&xaml_key, ".xaml").to_string(),
            }
        };
        Self {
            entry_path: xaml_key,
            destination: themes_dir.into(),
            filter: CopyFilter::accept_all(),
            mapping,
            extras: None,
        }
    }

    /// Also copy `keys` into `directory`, by file name, when the main
    /// mapping skips them
    pub fn with_icons(mut self, keys: Vec<String>, directory: impl Into<PathBuf>) -> Self {
        self.extras = Some((keys, directory.into()));
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    /// Destination for an archive key, `None` to skip it
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        self.resolve_main(key).or_else(|| {
            let (keys, directory) = self.extras.as_ref()?;
            keys.iter()
                .any(|k| paths::paths_equal(k, key))
                .then(|| paths::join_key(directory, paths::file_name(key)))
        })
    }

    fn resolve_main(&self, key: &str) -> Option<PathBuf> {
        match &self.mapping {
            Mapping::Nothing => None,
            Mapping::Directory => {
                if !paths::is_affected(&self.entry_path, key) {
                    return None;
                }
                let relative = paths::relative_to(key, &self.entry_path);
                self.filter
                    .accepts(&relative)
                    .then(|| paths::join_key(&self.destination, &relative))
            }
            Mapping::Font { main, bitmap_extension } => {
                if paths::paths_equal(key, main) {
                    Some(self.destination.clone())
                } else if paths::paths_equal(key, &self.entry_path) {
                    let destination = self.destination.to_string_lossy();
                    let stem = strip_suffix_ignore_case(&destination, ".txt");
                    Some(PathBuf::from(format!("{}.{}", stem, bitmap_extension)))
                } else {
                    None
                }
            }
            Mapping::Theme { resources } => {
                if paths::paths_equal(key, &self.entry_path) {
                    Some(self.destination.join(paths::file_name(&self.entry_path)))
                } else if paths::is_affected(resources, key) {
                    Some(paths::join_key(&self.destination, &paths::relative_to(key, resources)))
                } else {
                    None
                }
            }
        }
    }
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> &'a str {
    let split = value.len().saturating_sub(suffix.len());
    match value.get(split..) {
        Some(tail) if tail.eq_ignore_ascii_case(suffix) => &value[..split],
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_composition() {
        let not_ui = CopyFilter::new(|p| !paths::is_affected("ui", p));
        let not_preview = CopyFilter::new(|p| !p.to_lowercase().ends_with("preview.jpg"));
        let both = not_ui.and(&not_preview);

        assert!(both.accepts("data.acd"));
        assert!(!both.accepts("ui/ui_car.json"));
        assert!(!both.accepts("skins/red/preview.jpg"));
        assert!(!both.accepts("ui/preview.jpg"));
    }

    #[test]
    fn test_accept_all_is_neutral() {
        let all = CopyFilter::accept_all();
        assert!(all.is_accept_all());
        assert!(all.accepts("anything"));
        assert!(all.and(&CopyFilter::accept_all()).is_accept_all());

        let reject = CopyFilter::reject_all();
        assert!(!all.and(&reject).accepts("anything"));
        assert!(!reject.and(&all).accepts("anything"));
    }

    #[test]
    fn test_directory_plan() {
        let plan = CopyPlan::directory(
            "pack\\cars\\abc",
            "/ac/content/cars/abc",
            CopyFilter::new(|p| !paths::paths_equal(p, "ui/ui_car.json")),
        );

        assert_eq!(
            plan.resolve("pack/cars/abc/data.acd"),
            Some(PathBuf::from("/ac/content/cars/abc/data.acd"))
        );
        assert_eq!(
            plan.resolve("pack\\cars\\abc\\skins\\red\\livery.png"),
            Some(PathBuf::from("/ac/content/cars/abc/skins/red/livery.png"))
        );
        assert_eq!(plan.resolve("pack/cars/abc/UI/UI_CAR.json"), None);
        assert_eq!(plan.resolve("pack/cars/abcd/data.acd"), None);
        assert_eq!(plan.resolve("readme.txt"), None);
    }

    #[test]
    fn test_root_plan() {
        let plan = CopyPlan::directory("", "/ac/content/tracks/spa", CopyFilter::accept_all());
        assert_eq!(
            plan.resolve("ui/ui_track.json"),
            Some(PathBuf::from("/ac/content/tracks/spa/ui/ui_track.json"))
        );
    }

    #[test]
    fn test_single_file_plan() {
        let plan = CopyPlan::directory("driver/driver_80.kn5", "/ac/content/driver/driver_80.kn5", CopyFilter::accept_all());
        assert_eq!(
            plan.resolve("driver\\driver_80.kn5"),
            Some(PathBuf::from("/ac/content/driver/driver_80.kn5"))
        );
    }

    #[test]
    fn test_font_plan() {
        let plan = CopyPlan::font("content/fonts/digital.png", "/ac/content/fonts/digital.txt");
        assert_eq!(
            plan.resolve("content/fonts/digital.txt"),
            Some(PathBuf::from("/ac/content/fonts/digital.txt"))
        );
        assert_eq!(
            plan.resolve("content\\fonts\\DIGITAL.png"),
            Some(PathBuf::from("/ac/content/fonts/digital.png"))
        );
        assert_eq!(plan.resolve("content/fonts/other.txt"), None);
    }

    #[test]
    fn test_theme_plan() {
        let plan = CopyPlan::theme("Themes/Carbon.xaml", "/data/Themes");
        assert_eq!(plan.resolve("Themes/Carbon.xaml"), Some(PathBuf::from("/data/Themes/Carbon.xaml")));
        assert_eq!(
            plan.resolve("Themes/Carbon/background.jpg"),
            Some(PathBuf::from("/data/Themes/background.jpg"))
        );
        assert_eq!(plan.resolve("Themes/Other.xaml"), None);

        assert_eq!(CopyPlan::theme(" ", "/data/Themes").resolve(" "), None);
    }

    #[test]
    fn test_icons_go_to_gui_folder() {
        let plan = CopyPlan::directory("apps/python/helper", "/ac/apps/python/helper", CopyFilter::accept_all())
            .with_icons(vec!["content/gui/icons/helper_ON.png".into()], "/ac/content/gui/icons");
        assert_eq!(
            plan.resolve("content/gui/icons/helper_ON.png"),
            Some(PathBuf::from("/ac/content/gui/icons/helper_ON.png"))
        );
        assert_eq!(
            plan.resolve("apps/python/helper/helper.py"),
            Some(PathBuf::from("/ac/apps/python/helper/helper.py"))
        );
        assert_eq!(plan.resolve("content/gui/icons/other.png"), None);
    }

    #[test]
    fn test_theme_without_xaml_copies_nothing() {
        let plan = CopyPlan::theme("", "/data/Themes");
        assert_eq!(plan.resolve("Carbon.xaml"), None);
        assert_eq!(plan.resolve("Carbon/background.png"), None);
    }
}
