use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{CleoError, Result};

pub const DEFAULT_RING_CAPACITY: usize = 10;

/// Numbered per-write backup ring. `<name>.1` is the newest entry;
/// rotation shifts every entry up and evicts anything past capacity.
#[derive(Debug, Clone)]
pub struct BackupRing {
    dir: PathBuf,
    capacity: usize,
}

impl BackupRing {
    pub fn new(dir: PathBuf, capacity: usize) -> Self {
        Self { dir, capacity }
    }

    pub fn for_cleo_dir(cleo_dir: &Path) -> Self {
        Self::new(cleo_dir.join(".backups"), DEFAULT_RING_CAPACITY)
    }

    fn slot(&self, name: &str, n: usize) -> PathBuf {
        self.dir.join(format!("{name}.{n}"))
    }

    /// Copy the current contents of `source` into slot 1, shifting
    /// existing entries. A missing source (first-ever write) is a no-op.
    pub fn rotate(&self, source: &Path) -> Result<()> {
        if !source.exists() {
            return Ok(());
        }
        let name = source
            .file_name()
            .ok_or_else(|| CleoError::InvalidInput("backup source has no file name".into()))?
            .to_string_lossy()
            .to_string();

        fs::create_dir_all(&self.dir)?;

        // Evict the oldest, then shift N -> N+1 from the top down.
        let evict = self.slot(&name, self.capacity);
        if evict.exists() {
            fs::remove_file(&evict)?;
        }
        for n in (1..self.capacity).rev() {
            let from = self.slot(&name, n);
            if from.exists() {
                fs::rename(&from, self.slot(&name, n + 1))?;
            }
        }
        fs::copy(source, self.slot(&name, 1))?;
        Ok(())
    }

    /// Ring entries for one file, newest first.
    pub fn entries(&self, name: &str) -> Result<Vec<(usize, PathBuf)>> {
        let mut out = Vec::new();
        for n in 1..=self.capacity {
            let path = self.slot(name, n);
            if path.exists() {
                out.push((n, path));
            }
        }
        Ok(out)
    }

    /// Copy ring entry N back over the live file.
    pub fn restore(&self, name: &str, n: usize, target: &Path) -> Result<()> {
        let slot = self.slot(name, n);
        if !slot.exists() {
            return Err(CleoError::FileError {
                path: slot.display().to_string(),
                reason: format!("no backup entry {n} for {name}"),
            });
        }
        fs::copy(&slot, target)?;
        Ok(())
    }
}

/// Timestamped full-directory snapshot of the top-level state files,
/// written under `backups/operational/<stamp>/`.
pub fn snapshot(cleo_dir: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let dest = cleo_dir.join("backups").join("operational").join(&stamp);
    fs::create_dir_all(&dest)?;

    for entry in fs::read_dir(cleo_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".json") {
            fs::copy(&path, dest.join(&name))?;
        }
    }
    Ok(dest)
}

/// Snapshots available for restore, newest first.
pub fn list_snapshots(cleo_dir: &Path) -> Result<Vec<PathBuf>> {
    let root = cleo_dir.join("backups").join("operational");
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(&root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs.reverse();
    Ok(dirs)
}

/// Copy every JSON file in a snapshot back over the live directory.
pub fn restore_snapshot(cleo_dir: &Path, snapshot_dir: &Path) -> Result<usize> {
    if !snapshot_dir.is_dir() {
        return Err(CleoError::FileError {
            path: snapshot_dir.display().to_string(),
            reason: "snapshot directory not found".into(),
        });
    }
    let mut restored = 0;
    for entry in fs::read_dir(snapshot_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            fs::copy(&path, cleo_dir.join(entry.file_name()))?;
            restored += 1;
        }
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn rotate_keeps_newest_first() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("todo.json");
        let ring = BackupRing::new(dir.path().join(".backups"), 10);

        for rev in 1..=3 {
            write(&source, &format!("rev-{rev}"));
            ring.rotate(&source).unwrap();
        }

        let entries = ring.entries("todo.json").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(fs::read_to_string(&entries[0].1).unwrap(), "rev-3");
        assert_eq!(fs::read_to_string(&entries[2].1).unwrap(), "rev-1");
    }

    #[test]
    fn ring_is_bounded_by_capacity() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("todo.json");
        let ring = BackupRing::new(dir.path().join(".backups"), 3);

        for rev in 1..=8 {
            write(&source, &format!("rev-{rev}"));
            ring.rotate(&source).unwrap();
        }

        let entries = ring.entries("todo.json").unwrap();
        assert_eq!(entries.len(), 3);
        // Newest three survive; older entries were evicted.
        assert_eq!(fs::read_to_string(&entries[0].1).unwrap(), "rev-8");
        assert_eq!(fs::read_to_string(&entries[2].1).unwrap(), "rev-6");
    }

    #[test]
    fn rotate_missing_source_is_noop() {
        let dir = tempdir().unwrap();
        let ring = BackupRing::new(dir.path().join(".backups"), 3);
        ring.rotate(&dir.path().join("absent.json")).unwrap();
        assert!(ring.entries("absent.json").unwrap().is_empty());
    }

    #[test]
    fn restore_brings_back_ring_entry() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("todo.json");
        let ring = BackupRing::new(dir.path().join(".backups"), 3);

        write(&source, "old");
        ring.rotate(&source).unwrap();
        write(&source, "new");

        ring.restore("todo.json", 1, &source).unwrap();
        assert_eq!(fs::read_to_string(&source).unwrap(), "old");

        assert!(ring.restore("todo.json", 2, &source).is_err());
    }

    #[test]
    fn snapshot_copies_json_files_and_restores() {
        let dir = tempdir().unwrap();
        write(&dir.path().join("todo.json"), "t");
        write(&dir.path().join("sessions.json"), "s");
        write(&dir.path().join("notes.txt"), "skip");

        let snap = snapshot(dir.path()).unwrap();
        assert!(snap.join("todo.json").exists());
        assert!(snap.join("sessions.json").exists());
        assert!(!snap.join("notes.txt").exists());

        write(&dir.path().join("todo.json"), "mutated");
        let restored = restore_snapshot(dir.path(), &snap).unwrap();
        assert!(restored >= 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("todo.json")).unwrap(),
            "t"
        );

        let listed = list_snapshots(dir.path()).unwrap();
        assert_eq!(listed[0], snap);
    }
}
