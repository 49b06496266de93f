//! Version strings as content authors write them: `1.2`, `v1.10b`, `2.0.1`.

use std::cmp::Ordering;

/// Compare dotted versions part by part; numeric prefixes compare as
/// numbers, whatever follows them as text. Missing parts count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = split(a);
    let b = split(b);
    let len = a.len().max(b.len());

    for i in 0..len {
        let left = a.get(i).copied().unwrap_or((0, ""));
        let right = b.get(i).copied().unwrap_or((0, ""));
        let order = left
            .0
            .cmp(&right.0)
            .then_with(|| left.1.to_lowercase().cmp(&right.1.to_lowercase()));
        if order != Ordering::Equal {
            return order;
        }
    }
    Ordering::Equal
}

fn split(version: &str) -> Vec<(u64, &str)> {
    let version = version.trim();
    let version = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);

    version
        .split(['.', ','])
        .map(|part| {
            let digits = part.bytes().take_while(u8::is_ascii_digit).count();
            (part[..digits].parse().unwrap_or(0), &part[digits..])
        })
        .collect()
}

/// True if both versions are known and `version` is newer than `than`
pub fn is_newer(version: Option<&str>, than: Option<&str>) -> bool {
    matches!((version, than), (Some(a), Some(b)) if compare_versions(a, b) == Ordering::Greater)
}

/// True if both versions are known and `version` is older than `than`
pub fn is_older(version: Option<&str>, than: Option<&str>) -> bool {
    matches!((version, than), (Some(a), Some(b)) if compare_versions(a, b) == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare() {
        assert_eq!(compare_versions("1.2", "1.10"), Ordering::Less);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("v2.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0b", "1.0a"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0a"), Ordering::Less);
    }

    #[test]
    fn test_newer_older() {
        assert!(is_newer(Some("1.1"), Some("1.0")));
        assert!(!is_newer(Some("1.0"), Some("1.0")));
        assert!(!is_newer(Some("1.1"), None));
        assert!(is_older(Some("0.9"), Some("1.0")));
        assert!(!is_older(None, Some("1.0")));
    }
}
