use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{CleoError, Result};
use crate::store::backup::BackupRing;

fn file_error(path: &Path, reason: impl std::fmt::Display) -> CleoError {
    CleoError::FileError {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Serialize `value` as pretty two-space-indented JSON with a trailing
/// newline. Serialization happens before any file is touched, so a
/// failing value leaves the target untouched.
pub fn render_json<T: Serialize>(value: &T) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(value)?;
    rendered.push('\n');
    Ok(rendered)
}

/// Atomically replace `path` with the serialized payload:
/// temp file in the target directory, write, fsync, rename into place.
/// A failed rename removes the temp file; the target is never left
/// half-written under any termination.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_json_atomic_with_backup(path, value, None)
}

/// As `write_json_atomic`, but first rotates the current target into
/// the backup ring. Ring failures are swallowed: a clean write matters
/// more than a backup of the clean write.
pub fn write_json_atomic_with_backup<T: Serialize>(
    path: &Path,
    value: &T,
    ring: Option<&BackupRing>,
) -> Result<()> {
    let rendered = render_json(value)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| file_error(path, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| file_error(path, e))?;
    temp.write_all(rendered.as_bytes())
        .map_err(|e| file_error(path, e))?;
    temp.as_file().sync_all().map_err(|e| file_error(path, e))?;

    if let Some(ring) = ring {
        let _ = ring.rotate(path);
    }

    // NamedTempFile removes the temp on drop if persist fails.
    temp.persist(path).map_err(|e| file_error(path, e.error))?;
    Ok(())
}

/// Read and parse a JSON document. Missing files surface as io errors;
/// callers that tolerate absence check existence first.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| file_error(path, e))?;
    serde_json::from_str(&data).map_err(|e| file_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_trailing_newline_and_two_space_indent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!({"a": {"b": 1}})).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        assert!(content.contains("  \"a\""));
        assert!(content.contains("    \"b\""));
    }

    #[test]
    fn overwrite_replaces_content_completely() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!({"first": true, "padding": "xxxxxxxxxxxx"})).unwrap();
        write_json_atomic(&path, &json!({"second": true})).unwrap();

        let parsed: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(parsed, json!({"second": true}));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        for i in 0..5 {
            write_json_atomic(&path, &json!({"i": i})).unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["doc.json"]);
    }

    #[test]
    fn creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("doc.json");
        write_json_atomic(&path, &json!({"ok": true})).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn read_json_reports_file_error_on_corrupt_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ truncated").unwrap();
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert_eq!(err.code(), 7);
        assert_eq!(err.name(), "FILE_ERROR");
    }

    #[test]
    fn backup_ring_receives_prior_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let ring = BackupRing::new(dir.path().join(".backups"), 3);

        // First-ever write creates no backup.
        write_json_atomic_with_backup(&path, &json!({"rev": 1}), Some(&ring)).unwrap();
        assert!(ring.entries("doc.json").unwrap().is_empty());

        write_json_atomic_with_backup(&path, &json!({"rev": 2}), Some(&ring)).unwrap();
        let entries = ring.entries("doc.json").unwrap();
        assert_eq!(entries.len(), 1);
        let backed: serde_json::Value = read_json(&entries[0].1).unwrap();
        assert_eq!(backed, json!({"rev": 1}));
    }
}
