//! Reader for the game's ini-style data files.
//!
//! Only what content installation needs: ordered sections, case-insensitive
//! keys, `;` and `//` comments. Numbered section families like `MODEL_0`,
//! `MODEL_1` are reachable through [`IniFile::sections`].

use std::path::Path;

/// One `[NAME]` block
#[derive(Debug, Clone, Default)]
pub struct IniSection {
    pub name: String,
    values: Vec<(String, String)>,
}

impl IniSection {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Like `get`, but treats blank values as missing
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IniFile {
    sections: Vec<IniSection>,
}

impl IniFile {
    pub fn parse(data: &str) -> Self {
        let mut sections: Vec<IniSection> = Vec::new();
        let mut current: Option<usize> = None;

        for line in data.lines() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                // Repeated headers continue the earlier section
                current = Some(match sections.iter().position(|s| s.name == name) {
                    Some(idx) => idx,
                    None => {
                        sections.push(IniSection {
                            name,
                            values: Vec::new(),
                        });
                        sections.len() - 1
                    }
                });
                continue;
            }

            if let (Some(idx), Some((key, value))) = (current, line.split_once('=')) {
                sections[idx]
                    .values
                    .push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        Self { sections }
    }

    /// Parse from raw bytes, tolerating a BOM and invalid UTF-8
    pub fn from_bytes(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        Self::parse(text.trim_start_matches('\u{feff}'))
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_bytes(&std::fs::read(path)?))
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// `NAME`, `NAME_0`, `NAME_1`, … in file order
    pub fn sections<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a IniSection> + 'a {
        self.sections.iter().filter(move |s| is_family_member(&s.name, family))
    }
}

fn is_family_member(name: &str, family: &str) -> bool {
    if name.eq_ignore_ascii_case(family) {
        return true;
    }

    match name.get(..family.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(family) => name[family.len()..]
            .strip_prefix('_')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
        _ => false,
    }
}

fn strip_comment(line: &str) -> &str {
    let end = [line.find(';'), line.find("//")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(line.len());
    &line[..end]
}

/// Every KN5 file a track references, dynamic objects included.
pub fn all_models(ini: &IniFile) -> Vec<String> {
    ini.sections("MODEL")
        .chain(ini.sections("DYNAMIC_OBJECT"))
        .filter_map(|s| s.get_non_empty("FILE"))
        .map(str::to_string)
        .collect()
}
