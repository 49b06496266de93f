//! Case-insensitive handling of archive-relative paths
//!
//! Content archives are authored on Windows: keys may use `\` or `/`, and
//! the game treats `UI\ui_car.json` and `ui/UI_CAR.json` as the same file.
//! Everything inside the engine works on "keys": forward-slash separated,
//! case-preserved, no leading or trailing separator.

use std::path::{Component, Path, PathBuf};

/// Convert Windows path separators to forward slashes and trim separators
/// `UI\layout\ui_track.json` -> `UI/layout/ui_track.json`
pub fn to_key(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// Normalize a path for lookups and comparisons (lowercase, forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    path.to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Check if two paths are equal (case-insensitive)
pub fn paths_equal(a: &str, b: &str) -> bool {
    normalize_for_lookup(a) == normalize_for_lookup(b)
}

/// Returns true if `path` is `dir` itself or lies somewhere below it.
///
/// An empty `dir` stands for the archive root and affects everything.
pub fn is_affected(dir: &str, path: &str) -> bool {
    let dir = normalize_for_lookup(dir);
    if dir.is_empty() {
        return true;
    }

    let path = normalize_for_lookup(path);
    path == dir || (path.starts_with(&dir) && path.as_bytes().get(dir.len()) == Some(&b'/'))
}

/// Path of `path` relative to `base`, as a key.
///
/// Returns an empty string when both point at the same file; callers only
/// pass paths for which `is_affected(base, path)` holds.
pub fn relative_to(path: &str, base: &str) -> String {
    let path = to_key(path);
    let base = to_key(base);
    if base.is_empty() {
        return path;
    }

    path.get(base.len()..)
        .map(|rest| rest.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

/// Get the parent directory of a path (handles both / and \)
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(['\\', '/']).map(|idx| &path[..idx])
}

/// Get the filename from a path (handles both / and \)
pub fn file_name(path: &str) -> &str {
    path.rfind(['\\', '/'])
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// Get file extension (as written, without the dot)
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    name.rfind('.').map(|idx| &name[idx + 1..])
}

/// Strip the extension from the last path component
/// `fonts/digital.png` -> `fonts/digital`
pub fn without_extension(path: &str) -> &str {
    match (extension(path), path.rfind('.')) {
        (Some(_), Some(idx)) => &path[..idx],
        _ => path,
    }
}

/// Join a base path with an archive key.
///
/// Empty, `.` and `..` components are dropped so an entry can never land
/// outside `base`, whatever the archive claims.
pub fn join_key(base: &Path, key: &str) -> PathBuf {
    let mut result = base.to_path_buf();
    for component in key.split(['\\', '/']) {
        match component {
            "" | "." | ".." => continue,
            part => result.push(part),
        }
    }
    result
}

/// Returns true if the key would escape its root when joined naively
pub fn is_suspicious_key(key: &str) -> bool {
    Path::new(&key.replace('\\', "/"))
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Returns true if `id` can name a single content folder or file.
///
/// Rejects blank ids, `.` and anything that is not one path component or
/// would not be a valid Windows file name.
pub fn is_appropriate_id(id: &str) -> bool {
    !id.trim().is_empty()
        && id != "."
        && !is_suspicious_key(id)
        && !id
            .chars()
            .any(|c| c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
}
