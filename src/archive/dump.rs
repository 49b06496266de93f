//! Diagnostic dumps for truncated reads.
//!
//! When 7-Zip stops producing data in the middle of an entry, everything
//! read up to that point is packed into `unexpected-end-<timestamp>.zip` so
//! the failure can be reproduced without the original archive.

use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

/// What to put into a dump
#[derive(Debug, Default)]
pub struct DumpContents {
    /// Archive that failed
    pub archive: PathBuf,
    /// Entries read in full before the failure
    pub complete: Vec<(String, Vec<u8>)>,
    /// Entry that was cut short, with the bytes that did arrive
    pub partial: Option<(String, Vec<u8>)>,
    /// Size the partial entry was supposed to have
    pub expected: u64,
    /// Entries already moved into place on disk; only listed, with their sizes
    pub written: Vec<(String, u64)>,
}

/// Write a dump zip into `dir` and return its path.
pub fn write_dump(dir: &Path, contents: &DumpContents) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    let path = dir.join(format!("unexpected-end-{}.zip", stamp));

    let file = std::fs::File::create(&path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    let mut manifest = format!("archive: {}\n", contents.archive.display());
    for (index, (key, data)) in contents.complete.iter().enumerate() {
        manifest.push_str(&format!("complete: {} ({} bytes)\n", key, data.len()));
        zip.start_file(dump_name("complete", index, key), options)
            .map_err(std::io::Error::other)?;
        zip.write_all(data)?;
    }

    for (key, size) in &contents.written {
        manifest.push_str(&format!("written: {} ({} bytes)\n", key, size));
    }

    if let Some((key, data)) = &contents.partial {
        manifest.push_str(&format!(
            "partial: {} ({} of {} bytes)\n",
            key,
            data.len(),
            contents.expected
        ));
        zip.start_file(dump_name("partial", 0, key), options)
            .map_err(std::io::Error::other)?;
        zip.write_all(data)?;
    }

    zip.start_file("manifest.txt", options)
        .map_err(std::io::Error::other)?;
    zip.write_all(manifest.as_bytes())?;
    zip.finish().map_err(std::io::Error::other)?;

    Ok(path)
}

/// Numbered so repeated keys can't collide inside the zip
fn dump_name(group: &str, index: usize, key: &str) -> String {
    format!("{}/{:03}-{}", group, index, crate::paths::to_key(key).replace('/', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_write_dump() {
        let dir = tempdir().unwrap();
        let contents = DumpContents {
            archive: PathBuf::from("pack.7z"),
            complete: vec![("spa\\models.ini".to_string(), b"[MODEL_0]".to_vec())],
            partial: Some(("spa\\spa.kn5".to_string(), vec![7; 400])),
            expected: 1000,
            written: vec![("spa\\ui\\ui_track.json".to_string(), 14)],
        };

        let path = write_dump(dir.path(), &contents).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("unexpected-end-"));
        assert!(name.ends_with(".zip"));

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(zip.len(), 3);

        let mut partial = Vec::new();
        zip.by_name("partial/000-spa_spa.kn5")
            .unwrap()
            .read_to_end(&mut partial)
            .unwrap();
        assert_eq!(partial.len(), 400);

        let mut manifest = String::new();
        zip.by_name("manifest.txt")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        assert!(manifest.contains("partial: spa\\spa.kn5 (400 of 1000 bytes)"));
        assert!(manifest.contains("written: spa\\ui\\ui_track.json (14 bytes)"));
    }
}
