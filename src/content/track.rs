//! Tracks and their layouts.
//!
//! A track folder may hold several layouts sharing KN5 models. Installing
//! one over an existing track has to decide, layout by layout, what is an
//! update and what is an addition. [`reconcile_track`] works that out from
//! a snapshot of the installed track without touching the entry; the result
//! is then applied with [`TrackDetails::apply`].

use std::collections::HashSet;
use tracing::debug;

use super::filter::CopyFilter;
use crate::error::{InstallError, Result};
use crate::installed::{InstalledLayout, InstalledObject};
use crate::paths;

/// Installed layout an incoming one would replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingLayoutRef {
    /// `None` for the base layout
    pub layout_id: Option<String>,
    pub name: String,
}

impl From<&InstalledLayout> for ExistingLayoutRef {
    fn from(layout: &InstalledLayout) -> Self {
        Self {
            layout_id: layout.layout_id.clone(),
            name: layout.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackLayoutEntry {
    /// Empty for the base layout
    pub id: String,
    /// KN5 files referenced by the layout's models ini and shipped with it
    pub kn5_files: Vec<String>,
    /// KN5 files referenced but not shipped
    pub required_kn5_files: Vec<String>,
    pub missing_kn5_files: Vec<String>,
    pub active: bool,
    pub name: Option<String>,
    pub version: Option<String>,
    pub icon_data: Option<std::sync::Arc<Vec<u8>>>,
    pub existing_layout: Option<ExistingLayoutRef>,
}

impl TrackLayoutEntry {
    pub fn new(id: impl Into<String>, kn5_files: Vec<String>, required_kn5_files: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kn5_files,
            required_kn5_files,
            missing_kn5_files: Vec::new(),
            active: true,
            name: None,
            version: None,
            icon_data: None,
            existing_layout: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn display_id(&self) -> &str {
        if self.id.is_empty() {
            "N/A"
        } else {
            &self.id
        }
    }

    pub fn display_name(&self) -> String {
        let name = self.name.as_deref().unwrap_or(&self.id);
        match &self.existing_layout {
            None => format!("{} (new layout)", name),
            Some(existing) if existing.name == name => format!("{} (update for layout)", name),
            Some(existing) => format!("{} (update for {})", name, existing.name),
        }
    }
}

/// Track-specific part of a content entry
#[derive(Debug, Clone)]
pub struct TrackDetails {
    /// Without layouts: KN5 files referenced by `models.ini` and shipped
    pub kn5_files: Option<Vec<String>>,
    pub required_kn5_files: Option<Vec<String>>,
    pub missing_kn5_files: Vec<String>,
    pub layouts: Option<Vec<TrackLayoutEntry>>,
    /// Set when a layout-less track updates an existing base layout
    pub no_layouts_existing_layout: Option<ExistingLayoutRef>,
    pub has_new_extra_layouts: bool,
    pub keep_existing_shared_models: bool,
    overlapped_models: Vec<String>,
}

impl TrackDetails {
    pub fn single(kn5_files: Option<Vec<String>>, required_kn5_files: Option<Vec<String>>) -> Self {
        Self {
            kn5_files,
            required_kn5_files,
            missing_kn5_files: Vec::new(),
            layouts: None,
            no_layouts_existing_layout: None,
            has_new_extra_layouts: false,
            keep_existing_shared_models: true,
            overlapped_models: Vec::new(),
        }
    }

    /// Layout set; fails on an empty set or repeated ids
    pub fn with_layouts(layouts: Vec<TrackLayoutEntry>) -> Result<Self> {
        validate_layouts(&layouts)?;
        Ok(Self {
            layouts: Some(layouts),
            ..Self::single(None, None)
        })
    }

    pub fn layout(&self, id: &str) -> Option<&TrackLayoutEntry> {
        self.layouts.as_ref()?.iter().find(|l| l.id == id)
    }

    pub fn has_base_layout(&self) -> bool {
        self.layout("").is_some()
    }

    /// Models the installed track already has and the new content ships too
    pub fn overlapped_models(&self) -> &[String] {
        &self.overlapped_models
    }

    pub fn shared_models_overlap(&self) -> bool {
        !self.overlapped_models.is_empty()
    }

    /// Switch a layout on or off, returns false if there is no such layout
    pub fn set_layout_active(&mut self, id: &str, active: bool) -> bool {
        match self.layouts.as_mut().and_then(|l| l.iter_mut().find(|l| l.id == id)) {
            Some(layout) => {
                layout.active = active;
                true
            }
            None => false,
        }
    }

    /// Store a reconciliation result on the entry
    pub fn apply(&mut self, reconciliation: &Reconciliation) {
        self.missing_kn5_files = reconciliation.missing_kn5_files.clone();
        self.no_layouts_existing_layout = reconciliation.no_layouts_existing_layout.clone();
        self.has_new_extra_layouts = reconciliation.has_new_extra_layouts;

        if let Some(layouts) = &mut self.layouts {
            for (i, layout) in layouts.iter_mut().enumerate() {
                layout.existing_layout = reconciliation.layout_matches.get(i).cloned().flatten();
                layout.missing_kn5_files = reconciliation
                    .layout_missing_kn5_files
                    .get(i)
                    .cloned()
                    .unwrap_or_default();
            }
        }
    }

    /// Recompute the overlap after the existing match, active layouts or
    /// selected option changed.
    pub fn update_overlap(&mut self, existing: Option<&InstalledObject>) {
        self.overlapped_models = shared_models_overlap(existing, self);
        if !self.overlapped_models.is_empty() {
            debug!("Shared models: {}", self.overlapped_models.join(", "));
        }
    }

    /// Final copy filter for the track.
    ///
    /// Starts from the selected option's filter (ignored in no-conflict
    /// mode), keeps overlapping models if asked to, and drops the files of
    /// disabled layouts.
    pub fn copy_filter(&self, option_filter: &CopyFilter, no_conflict: bool) -> CopyFilter {
        let mut filter = if no_conflict {
            CopyFilter::accept_all()
        } else {
            option_filter.clone()
        };

        if self.keep_existing_shared_models && !self.overlapped_models.is_empty() {
            let shared = self.overlapped_models.clone();
            filter = filter.and(&CopyFilter::new(move |path| {
                !shared.iter().any(|x| paths::paths_equal(x, path))
            }));
        }

        match &self.layouts {
            Some(layouts) => filter.and(&disabled_layouts_filter(layouts)),
            None => filter,
        }
    }
}

fn validate_layouts(layouts: &[TrackLayoutEntry]) -> Result<()> {
    if layouts.is_empty() {
        return Err(InstallError::MalformedEntry("Track has an empty list of layouts".to_string()));
    }

    let mut seen = HashSet::new();
    for layout in layouts {
        if !seen.insert(layout.id.as_str()) {
            return Err(InstallError::MalformedEntry(format!(
                "Layout “{}” is listed twice",
                layout.display_id()
            )));
        }
    }
    Ok(())
}

/// Shape of the installed track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingTrackShape {
    Absent,
    SingleLayout,
    MultiLayoutWithBase,
    MultiLayoutNoBase,
}

impl ExistingTrackShape {
    pub fn of(existing: Option<&InstalledObject>) -> Self {
        let Some(existing) = existing else {
            return ExistingTrackShape::Absent;
        };

        match &existing.track {
            None => ExistingTrackShape::SingleLayout,
            Some(track) if !track.is_multi_layout() => ExistingTrackShape::SingleLayout,
            Some(track) if track.base().is_some() => ExistingTrackShape::MultiLayoutWithBase,
            Some(_) => ExistingTrackShape::MultiLayoutNoBase,
        }
    }
}

/// What installing the incoming track amounts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Nothing installed yet
    Install,
    /// Replaces existing layouts only
    Update,
    /// Adds layouts, nothing to overwrite
    NewLayouts,
    /// Replaces some layouts and adds others
    UpdateWithExtraLayouts,
    /// Layout-less track added as a layout next to the existing ones
    NewLayout,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub outcome: TrackOutcome,
    pub no_conflict: bool,
    /// Entry label, `None` when the track is not installed
    pub label: Option<String>,
    /// Per incoming layout, in order
    pub layout_matches: Vec<Option<ExistingLayoutRef>>,
    pub no_layouts_existing_layout: Option<ExistingLayoutRef>,
    pub has_new_extra_layouts: bool,
    pub missing_kn5_files: Vec<String>,
    pub layout_missing_kn5_files: Vec<Vec<String>>,
}

/// Replace `{layout}` with "layout" or "layouts"
pub fn pluralize(count: usize, template: &str) -> String {
    template.replace("{layout}", if count == 1 { "layout" } else { "layouts" })
}

/// Decide how an incoming track relates to the installed one.
///
/// `name` is the incoming entry's name. Pure: the entry is only changed by
/// [`TrackDetails::apply`].
pub fn reconcile_track(existing: Option<&InstalledObject>, name: &str, incoming: &TrackDetails) -> Result<Reconciliation> {
    if let Some(layouts) = &incoming.layouts {
        validate_layouts(layouts)?;
    }

    let layout_count = incoming.layouts.as_ref().map_or(0, Vec::len);
    let mut result = Reconciliation {
        outcome: TrackOutcome::Install,
        no_conflict: false,
        label: None,
        layout_matches: vec![None; layout_count],
        no_layouts_existing_layout: None,
        has_new_extra_layouts: false,
        missing_kn5_files: Vec::new(),
        layout_missing_kn5_files: vec![Vec::new(); layout_count],
    };

    let shape = ExistingTrackShape::of(existing);
    let Some(existing) = existing else {
        return Ok(result);
    };

    let existing_name = existing.display_name.as_str();
    let existing_models: Vec<String> = existing
        .track
        .iter()
        .flat_map(|t| t.all_models())
        .map(paths::normalize_for_lookup)
        .collect();
    let missing = |required: Option<&Vec<String>>| -> Vec<String> {
        required
            .map(|r| {
                r.iter()
                    .filter(|x| !existing_models.contains(&paths::normalize_for_lookup(x)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    };

    result.missing_kn5_files = missing(incoming.required_kn5_files.as_ref());
    if let Some(layouts) = &incoming.layouts {
        result.layout_missing_kn5_files = layouts.iter().map(|l| missing(Some(&l.required_kn5_files))).collect();
    }

    let base = existing.track.as_ref().and_then(|t| t.base());
    // A snapshot without layout data is a plain single-layout track
    let base_ref = base.map(ExistingLayoutRef::from).unwrap_or_else(|| ExistingLayoutRef {
        layout_id: None,
        name: existing_name.to_string(),
    });

    match (&incoming.layouts, shape) {
        (_, ExistingTrackShape::Absent) => {}

        (None, ExistingTrackShape::SingleLayout | ExistingTrackShape::MultiLayoutWithBase) => {
            result.outcome = TrackOutcome::Update;
            result.label = Some(format!("Update for a track {}", existing_name));
            result.no_layouts_existing_layout = Some(base_ref);
        }

        (None, ExistingTrackShape::MultiLayoutNoBase) => {
            result.outcome = TrackOutcome::NewLayout;
            result.label = Some(if name == existing_name {
                format!("New layout for a track {}", existing_name)
            } else {
                format!("New layout {} for a track {}", name, existing_name)
            });
            result.no_conflict = true;
        }

        (Some(layouts), ExistingTrackShape::SingleLayout) => {
            match layouts.iter().position(|l| l.id.is_empty()) {
                None => {
                    result.outcome = TrackOutcome::NewLayouts;
                    result.label = Some(pluralize(
                        layouts.len(),
                        &format!("New {{layout}} for a track {}", existing_name),
                    ));
                    result.no_conflict = true;
                }
                Some(base_index) => {
                    result.outcome = TrackOutcome::UpdateWithExtraLayouts;
                    result.label = Some(pluralize(
                        layouts.len(),
                        &format!("Update for a track {}, plus additional {{layout}}", existing_name),
                    ));
                    result.layout_matches[base_index] = Some(base_ref);
                    result.has_new_extra_layouts = true;
                }
            }
        }

        (Some(layouts), ExistingTrackShape::MultiLayoutWithBase | ExistingTrackShape::MultiLayoutNoBase) => {
            let track = existing.track.as_ref();
            let lookup = |id: &str| track.and_then(|t| t.layout_by_id(id));
            let existing_basic = shape == ExistingTrackShape::MultiLayoutWithBase;
            let new_basic = layouts.iter().any(|l| l.id.is_empty());
            let new_layouts = layouts.iter().filter(|l| lookup(&l.id).is_none()).count();

            if !(existing_basic && new_basic) && new_layouts == layouts.len() {
                result.outcome = TrackOutcome::NewLayouts;
                result.label = Some(pluralize(
                    layouts.len(),
                    &format!("New {{layout}} for a track {}", existing_name),
                ));
                result.no_conflict = true;
            } else {
                let template = if new_layouts > 0 {
                    format!("Update for a track {}, plus additional {{layout}}", existing_name)
                } else {
                    format!("Update for a track {}", existing_name)
                };
                result.outcome = if new_layouts > 0 {
                    TrackOutcome::UpdateWithExtraLayouts
                } else {
                    TrackOutcome::Update
                };
                result.label = Some(pluralize(layouts.len(), &template));
                result.has_new_extra_layouts = new_layouts > 0;

                for (i, layout) in layouts.iter().enumerate() {
                    result.layout_matches[i] = lookup(&layout.id).map(ExistingLayoutRef::from);
                    if layout.id.is_empty() && existing_basic {
                        result.layout_matches[i] = Some(base_ref.clone());
                    }
                }
            }
        }
    }

    debug!("Track reconciliation: {:?} ({:?})", result.outcome, result.label);
    Ok(result)
}

/// Models already installed that the new content would overwrite.
///
/// Empty when nothing is installed or every layout is disabled. Models of
/// installed layouts replaced by active incoming layouts don't count.
pub fn shared_models_overlap(existing: Option<&InstalledObject>, incoming: &TrackDetails) -> Vec<String> {
    let Some(existing) = existing else {
        return Vec::new();
    };

    let active: Option<Vec<&TrackLayoutEntry>> = incoming
        .layouts
        .as_ref()
        .map(|layouts| layouts.iter().filter(|l| l.active).collect());
    if active.as_ref().is_some_and(|a| a.is_empty()) {
        return Vec::new();
    }

    let base = InstalledLayout::base(existing.display_name.clone(), Vec::new());
    let existing_layouts: Vec<&InstalledLayout> = match &existing.track {
        Some(track) => track.layouts.iter().collect(),
        None => vec![&base],
    };

    let mut existing_models: Vec<String> = Vec::new();
    for layout in existing_layouts {
        let replaced: Option<&Vec<String>> = match &active {
            None => layout.layout_id.is_none().then_some(incoming.kn5_files.as_ref()).flatten(),
            Some(active) => {
                let id = layout.layout_id.as_deref().unwrap_or("");
                active.iter().find(|l| l.id == id).map(|l| &l.kn5_files)
            }
        };

        for model in &layout.models {
            let key = paths::normalize_for_lookup(model);
            let is_replaced = replaced.is_some_and(|r| r.iter().any(|x| paths::normalize_for_lookup(x) == key));
            if !is_replaced && !existing_models.contains(&key) {
                existing_models.push(key);
            }
        }
    }

    if existing_models.is_empty() {
        return Vec::new();
    }

    let candidates: Vec<&String> = match &active {
        Some(active) => active.iter().flat_map(|l| l.kn5_files.iter()).collect(),
        // An update of the existing base layout has no previous shared models
        None if incoming.no_layouts_existing_layout.is_some() => return Vec::new(),
        None => incoming.kn5_files.iter().flatten().collect(),
    };

    let mut overlap: Vec<String> = Vec::new();
    for model in candidates {
        let key = paths::normalize_for_lookup(model);
        if existing_models.contains(&key) && !overlap.iter().any(|o| paths::paths_equal(o, model)) {
            overlap.push(model.clone());
        }
    }
    overlap
}

/// Filter dropping files of disabled layouts.
///
/// With every layout disabled nothing passes. Otherwise root files pass if
/// they are models or models ini of an active layout, `ui/` files depend on
/// the layout folder they are in, other folders named after a disabled
/// layout are dropped.
pub fn disabled_layouts_filter(layouts: &[TrackLayoutEntry]) -> CopyFilter {
    let mut disabled: Vec<String> = layouts.iter().filter(|l| !l.active).map(|l| l.id.clone()).collect();
    if disabled.is_empty() {
        return CopyFilter::accept_all();
    }

    debug!("Disabled layouts: {}", disabled.join(", "));
    if disabled.len() == layouts.len() {
        debug!("Every layout is disabled");
        return CopyFilter::reject_all();
    }

    let active = layouts.iter().filter(|l| l.active);
    let mut inis_to_copy: Vec<String> = active
        .clone()
        .map(|l| {
            if l.id.is_empty() {
                "models.ini".to_string()
            } else {
                format!("models_{}.ini", l.id)
            }
        })
        .map(|p| paths::normalize_for_lookup(&p))
        .collect();
    inis_to_copy.dedup();
    let mut models_to_copy: Vec<String> = active
        .flat_map(|l| l.kn5_files.iter())
        .map(|p| paths::normalize_for_lookup(p))
        .collect();
    models_to_copy.sort();
    models_to_copy.dedup();

    let main_disabled = disabled.iter().any(|id| id.is_empty());
    disabled.retain(|id| !id.is_empty());

    CopyFilter::new(move |path| {
        let key = paths::normalize_for_lookup(path);
        match paths::parent_path(&key) {
            // File in the track's root folder
            None => models_to_copy.contains(&key) || inis_to_copy.contains(&key),
            Some(parent) if paths::is_affected("ui", &key) => {
                if parent == "ui" {
                    !main_disabled
                } else {
                    !disabled.iter().any(|id| paths::is_affected(&format!("ui/{}", id), &key))
                }
            }
            Some(_) => !disabled.iter().any(|id| paths::is_affected(id, &key)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installed::InstalledTrack;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn layout(id: &str, kn5: &[&str]) -> TrackLayoutEntry {
        TrackLayoutEntry::new(id, strings(kn5), Vec::new()).with_name(Some(format!("Spa {}", id)))
    }

    fn installed(layouts: Vec<InstalledLayout>) -> InstalledObject {
        InstalledObject::new("spa", "Spa", "/ac/content/tracks/spa").with_track(InstalledTrack { layouts })
    }

    #[test]
    fn test_shapes() {
        assert_eq!(ExistingTrackShape::of(None), ExistingTrackShape::Absent);
        let single = installed(vec![InstalledLayout::base("Spa", vec![])]);
        assert_eq!(ExistingTrackShape::of(Some(&single)), ExistingTrackShape::SingleLayout);
        let with_base = installed(vec![
            InstalledLayout::base("Spa", vec![]),
            InstalledLayout::named("club", "Spa Club", vec![]),
        ]);
        assert_eq!(ExistingTrackShape::of(Some(&with_base)), ExistingTrackShape::MultiLayoutWithBase);
        let no_base = installed(vec![InstalledLayout::named("gp", "Spa GP", vec![])]);
        assert_eq!(ExistingTrackShape::of(Some(&no_base)), ExistingTrackShape::MultiLayoutNoBase);
    }

    #[test]
    fn test_absent_is_plain_install() {
        let incoming = TrackDetails::single(Some(strings(&["spa.kn5"])), None);
        let result = reconcile_track(None, "Spa", &incoming).unwrap();
        assert_eq!(result.outcome, TrackOutcome::Install);
        assert!(result.label.is_none());
        assert!(!result.no_conflict);
    }

    #[test]
    fn test_single_over_single() {
        let existing = installed(vec![InstalledLayout::base("Spa", strings(&["spa.kn5"]))]);
        let incoming = TrackDetails::single(Some(strings(&["spa.kn5"])), Some(strings(&["SPA.kn5", "pits.kn5"])));
        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();

        assert_eq!(result.outcome, TrackOutcome::Update);
        assert_eq!(result.label.as_deref(), Some("Update for a track Spa"));
        assert!(!result.no_conflict);
        assert_eq!(result.no_layouts_existing_layout.unwrap().layout_id, None);
        assert_eq!(result.missing_kn5_files, vec!["pits.kn5"]);
    }

    #[test]
    fn test_layouts_over_single() {
        let existing = installed(vec![InstalledLayout::base("Spa", vec![])]);

        let additive = TrackDetails::with_layouts(vec![layout("gp", &[])]).unwrap();
        let result = reconcile_track(Some(&existing), "Spa", &additive).unwrap();
        assert_eq!(result.outcome, TrackOutcome::NewLayouts);
        assert_eq!(result.label.as_deref(), Some("New layout for a track Spa"));
        assert!(result.no_conflict);

        let with_base = TrackDetails::with_layouts(vec![layout("", &[]), layout("gp", &[]), layout("club", &[])]).unwrap();
        let result = reconcile_track(Some(&existing), "Spa", &with_base).unwrap();
        assert_eq!(result.outcome, TrackOutcome::UpdateWithExtraLayouts);
        assert_eq!(result.label.as_deref(), Some("Update for a track Spa, plus additional layouts"));
        assert!(!result.no_conflict);
        assert!(result.has_new_extra_layouts);
        assert_eq!(result.layout_matches[0].as_ref().unwrap().name, "Spa");
        assert!(result.layout_matches[1].is_none());
    }

    #[test]
    fn test_single_over_multi() {
        let with_base = installed(vec![
            InstalledLayout::base("Spa", vec![]),
            InstalledLayout::named("club", "Spa Club", vec![]),
        ]);
        let incoming = TrackDetails::single(None, None);
        let result = reconcile_track(Some(&with_base), "Spa", &incoming).unwrap();
        assert_eq!(result.outcome, TrackOutcome::Update);
        assert_eq!(result.label.as_deref(), Some("Update for a track Spa"));
        assert!(result.no_layouts_existing_layout.is_some());

        let no_base = installed(vec![InstalledLayout::named("gp", "Spa GP", vec![])]);
        let result = reconcile_track(Some(&no_base), "Spa", &incoming).unwrap();
        assert_eq!(result.outcome, TrackOutcome::NewLayout);
        assert_eq!(result.label.as_deref(), Some("New layout for a track Spa"));
        assert!(result.no_conflict);

        let result = reconcile_track(Some(&no_base), "Spa Classic", &incoming).unwrap();
        assert_eq!(result.label.as_deref(), Some("New layout Spa Classic for a track Spa"));
    }

    #[test]
    fn test_layouts_over_layouts_conflict() {
        let existing = installed(vec![
            InstalledLayout::base("Spa", vec![]),
            InstalledLayout::named("club", "Spa Club", vec![]),
        ]);
        let incoming = TrackDetails::with_layouts(vec![layout("club", &[]), layout("national", &[])]).unwrap();
        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();

        assert_eq!(result.outcome, TrackOutcome::UpdateWithExtraLayouts);
        assert!(!result.no_conflict);
        assert!(result.label.unwrap().contains("plus additional layout"));
        assert_eq!(result.layout_matches[0].as_ref().unwrap().layout_id.as_deref(), Some("club"));
        assert!(result.layout_matches[1].is_none());
        assert!(result.has_new_extra_layouts);
    }

    #[test]
    fn test_layouts_over_layouts_no_conflict() {
        let existing = installed(vec![
            InstalledLayout::base("Spa", vec![]),
            InstalledLayout::named("club", "Spa Club", vec![]),
        ]);
        let incoming = TrackDetails::with_layouts(vec![layout("gp", &[]), layout("national", &[])]).unwrap();
        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();
        assert_eq!(result.outcome, TrackOutcome::NewLayouts);
        assert_eq!(result.label.as_deref(), Some("New layouts for a track Spa"));
        assert!(result.no_conflict);

        // Both sides have a base: update, even though the ids never match
        let incoming = TrackDetails::with_layouts(vec![layout("", &[]), layout("gp", &[])]).unwrap();
        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();
        assert!(!result.no_conflict);
        assert_eq!(result.layout_matches[0].as_ref().unwrap().layout_id, None);
        assert!(result.layout_matches[1].is_none());
    }

    #[test]
    fn test_all_layouts_replaced() {
        let existing = installed(vec![
            InstalledLayout::named("gp", "Spa GP", vec![]),
            InstalledLayout::named("club", "Spa Club", vec![]),
        ]);
        let incoming = TrackDetails::with_layouts(vec![layout("gp", &[]), layout("club", &[])]).unwrap();
        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();
        assert_eq!(result.outcome, TrackOutcome::Update);
        assert_eq!(result.label.as_deref(), Some("Update for a track Spa"));
        assert!(!result.has_new_extra_layouts);
    }

    #[test]
    fn test_malformed_layouts() {
        assert!(matches!(TrackDetails::with_layouts(Vec::new()), Err(InstallError::MalformedEntry(_))));
        assert!(matches!(
            TrackDetails::with_layouts(vec![layout("gp", &[]), layout("gp", &[])]),
            Err(InstallError::MalformedEntry(_))
        ));

        let mut broken = TrackDetails::single(None, None);
        broken.layouts = Some(Vec::new());
        assert!(reconcile_track(None, "Spa", &broken).is_err());
    }

    #[test]
    fn test_missing_kn5_per_layout() {
        let existing = installed(vec![
            InstalledLayout::named("gp", "Spa GP", strings(&["spa.kn5", "Trees.kn5"])),
        ]);
        let mut club = layout("club", &["club.kn5"]);
        club.required_kn5_files = strings(&["trees.KN5", "grandstand.kn5"]);
        let incoming = TrackDetails::with_layouts(vec![club]).unwrap();

        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();
        assert_eq!(result.layout_missing_kn5_files, vec![strings(&["grandstand.kn5"])]);
    }

    #[test]
    fn test_apply() {
        let existing = installed(vec![
            InstalledLayout::base("Spa", vec![]),
            InstalledLayout::named("club", "Spa club", vec![]),
        ]);
        let mut incoming = TrackDetails::with_layouts(vec![layout("club", &[]), layout("national", &[])]).unwrap();
        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();
        incoming.apply(&result);

        let layouts = incoming.layouts.as_ref().unwrap();
        assert_eq!(layouts[0].display_name(), "Spa club (update for layout)");
        assert_eq!(layouts[1].display_name(), "Spa national (new layout)");
        assert!(incoming.has_new_extra_layouts);
    }

    #[test]
    fn test_overlap_and_keep_shared_models() {
        let existing = installed(vec![
            InstalledLayout::named("gp", "Spa GP", strings(&["A.kn5"])),
            InstalledLayout::named("club", "Spa Club", strings(&["B.kn5"])),
        ]);
        let mut incoming = TrackDetails::with_layouts(vec![layout("", &["A.kn5", "C.kn5"])]).unwrap();
        incoming.update_overlap(Some(&existing));
        assert_eq!(incoming.overlapped_models(), &["A.kn5".to_string()]);
        assert!(incoming.shared_models_overlap());

        let filter = incoming.copy_filter(&CopyFilter::accept_all(), false);
        assert!(!filter.accepts("A.kn5"));
        assert!(!filter.accepts("a.KN5"));
        assert!(filter.accepts("C.kn5"));
        assert!(filter.accepts("models.ini"));

        incoming.keep_existing_shared_models = false;
        let filter = incoming.copy_filter(&CopyFilter::accept_all(), false);
        assert!(filter.accepts("A.kn5"));
    }

    #[test]
    fn test_overlap_excludes_replaced_layout() {
        let existing = installed(vec![
            InstalledLayout::named("gp", "Spa GP", strings(&["A.kn5", "gp.kn5"])),
            InstalledLayout::named("club", "Spa Club", strings(&["B.kn5"])),
        ]);
        // gp replaces itself, its own models are not shared with anything else
        let mut incoming = TrackDetails::with_layouts(vec![layout("gp", &["A.kn5", "gp.kn5"])]).unwrap();
        incoming.update_overlap(Some(&existing));
        assert!(incoming.overlapped_models().is_empty());

        // Disabling the only layout removes any overlap
        let mut incoming = TrackDetails::with_layouts(vec![layout("club", &["B.kn5"]), layout("x", &["A.kn5"])]).unwrap();
        incoming.update_overlap(Some(&existing));
        assert_eq!(incoming.overlapped_models(), &["A.kn5".to_string()]);
        incoming.set_layout_active("x", false);
        incoming.set_layout_active("club", false);
        incoming.update_overlap(Some(&existing));
        assert!(incoming.overlapped_models().is_empty());
    }

    #[test]
    fn test_overlap_single_layout_update_is_none() {
        // Layout-less update of an existing base: overlap is skipped even
        // when a sibling layout shares a model
        let existing = installed(vec![
            InstalledLayout::base("Spa", strings(&["spa.kn5"])),
            InstalledLayout::named("club", "Spa Club", strings(&["shared.kn5"])),
        ]);
        let mut incoming = TrackDetails::single(Some(strings(&["spa.kn5", "shared.kn5"])), None);
        let result = reconcile_track(Some(&existing), "Spa", &incoming).unwrap();
        incoming.apply(&result);
        incoming.update_overlap(Some(&existing));
        assert!(incoming.overlapped_models().is_empty());

        // Added as a new layout next to layouts without a base: overlap counts
        let no_base = installed(vec![InstalledLayout::named("club", "Spa Club", strings(&["shared.kn5"]))]);
        let mut incoming = TrackDetails::single(Some(strings(&["spa.kn5", "shared.kn5"])), None);
        let result = reconcile_track(Some(&no_base), "Spa", &incoming).unwrap();
        incoming.apply(&result);
        incoming.update_overlap(Some(&no_base));
        assert_eq!(incoming.overlapped_models(), &["shared.kn5".to_string()]);
    }

    #[test]
    fn test_all_layouts_disabled_rejects_everything() {
        let mut incoming = TrackDetails::with_layouts(vec![layout("gp", &["gp.kn5"]), layout("club", &["club.kn5"])]).unwrap();
        incoming.set_layout_active("gp", false);
        incoming.set_layout_active("club", false);

        let filter = incoming.copy_filter(&CopyFilter::accept_all(), true);
        for path in ["gp.kn5", "models_club.ini", "ui/gp/ui_track.json", "ui/ui_track.json", "skins/x.png"] {
            assert!(!filter.accepts(path), "{} should be rejected", path);
        }
    }

    #[test]
    fn test_disabled_layout_filter() {
        let mut incoming = TrackDetails::with_layouts(vec![
            layout("", &["spa.kn5"]),
            layout("gp", &["gp.kn5", "shared.kn5"]),
            layout("club", &["club.kn5", "shared.kn5"]),
        ])
        .unwrap();
        incoming.set_layout_active("club", false);
        let filter = incoming.copy_filter(&CopyFilter::accept_all(), true);

        assert!(filter.accepts("spa.kn5"));
        assert!(filter.accepts("GP.kn5"));
        assert!(filter.accepts("shared.kn5"));
        assert!(!filter.accepts("club.kn5"));
        assert!(filter.accepts("models.ini"));
        assert!(filter.accepts("models_gp.ini"));
        assert!(!filter.accepts("models_club.ini"));
        assert!(!filter.accepts("readme.txt"));

        assert!(filter.accepts("ui/ui_track.json"));
        assert!(filter.accepts("ui/gp/preview.png"));
        assert!(!filter.accepts("ui/club/preview.png"));
        assert!(filter.accepts("data/surfaces.ini"));
        assert!(!filter.accepts("club/data/surfaces.ini"));

        incoming.set_layout_active("club", true);
        incoming.set_layout_active("", false);
        let filter = incoming.copy_filter(&CopyFilter::accept_all(), true);
        assert!(!filter.accepts("ui/ui_track.json"));
        assert!(!filter.accepts("models.ini"));
        assert!(!filter.accepts("spa.kn5"));
        assert!(filter.accepts("ui/club/ui_track.json"));
    }

    #[test]
    fn test_no_conflict_ignores_option_filter() {
        let incoming = TrackDetails::with_layouts(vec![layout("gp", &[])]).unwrap();
        let keep_ui = CopyFilter::new(|p| !paths::is_affected("ui", p));
        assert!(incoming.copy_filter(&keep_ui, true).accepts("ui/gp/ui_track.json"));
        assert!(!incoming.copy_filter(&keep_ui, false).accepts("ui/gp/ui_track.json"));
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize(1, "New {layout}"), "New layout");
        assert_eq!(pluralize(3, "New {layout}"), "New layouts");
    }
}
