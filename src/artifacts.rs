//! Tracks on-disk generated images (processed crops and portrait splices), persists a
//! crash-safe manifest of them, and purges files the device is unlikely to still be fetching.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::CoreError;

/// What produced a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Processed,
    Spliced,
}

#[derive(Debug, Clone)]
pub struct TempArtifact {
    pub generated_path: PathBuf,
    pub kind: ArtifactKind,
}

/// Owns the manifest file handle for the lifetime of one run of the Playlist Server.
///
/// `record` appends to the in-memory queue and immediately rewrites the manifest
/// (truncate + rewrite + flush) so a crash between the two steps never leaves a generated
/// file unaccounted for: either the artifact and its manifest line both exist, or neither does.
pub struct ArtifactRegistry {
    queue: VecDeque<TempArtifact>,
    temp_dir: PathBuf,
    manifest_file: File,
}

impl ArtifactRegistry {
    /// Open (creating if necessary) the manifest file at `<temp_dir>/pycastblaster_temp_files.txt`.
    pub fn open(temp_dir: &Path, manifest_path: &Path) -> Result<Self, CoreError> {
        fs::create_dir_all(temp_dir)?;
        let manifest_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(manifest_path)?;
        Ok(Self {
            queue: VecDeque::new(),
            temp_dir: temp_dir.to_path_buf(),
            manifest_file,
        })
    }

    /// Record a newly generated artifact and rewrite the manifest to match the in-memory queue.
    pub fn record(&mut self, generated_path: PathBuf, kind: ArtifactKind) -> Result<(), CoreError> {
        self.queue.push_back(TempArtifact {
            generated_path,
            kind,
        });
        self.flush_manifest()
    }

    /// Delete the oldest artifacts beyond `keep_last`, tolerating already-missing files (the
    /// device may have already consumed and the OS cache evicted them, or a previous purge
    /// already removed them).
    pub fn purge_oldest(&mut self, keep_last: usize) -> Result<(), CoreError> {
        while self.queue.len() > keep_last {
            if let Some(artifact) = self.queue.pop_front() {
                if artifact.generated_path.exists() {
                    if let Err(err) = fs::remove_file(&artifact.generated_path) {
                        warn!(
                            path = %artifact.generated_path.display(),
                            error = %err,
                            "failed to purge temp artifact"
                        );
                    }
                }
            }
        }
        self.flush_manifest()
    }

    fn flush_manifest(&mut self) -> Result<(), CoreError> {
        self.manifest_file.seek(SeekFrom::Start(0))?;
        self.manifest_file.set_len(0)?;
        for artifact in &self.queue {
            writeln!(self.manifest_file, "{}", artifact.generated_path.display())?;
        }
        self.manifest_file.flush()?;
        Ok(())
    }

    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Delete every file listed in a manifest left over from a previous run, then truncate the
/// manifest to empty. Called once at startup, before the current run's [`ArtifactRegistry`] is
/// opened. Each line's basename is joined onto `temp_dir`, so a manifest entry can never cause a
/// delete outside the temp directory even if it were corrupted to contain a path traversal.
pub fn purge_all_from_manifest(manifest_path: &Path, temp_dir: &Path) -> Result<(), CoreError> {
    if !manifest_path.exists() {
        return Ok(());
    }
    let contents = fs::read_to_string(manifest_path)?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let basename = match Path::new(line).file_name() {
            Some(name) => name,
            None => continue,
        };
        let candidate = temp_dir.join(basename);
        if candidate.exists() {
            if let Err(err) = fs::remove_file(&candidate) {
                warn!(path = %candidate.display(), error = %err, "failed to purge stale temp artifact");
            }
        }
    }
    fs::write(manifest_path, b"")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_keeps_manifest_in_sync_with_queue() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("manifest.txt");
        let mut registry = ArtifactRegistry::open(dir.path(), &manifest).unwrap();

        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        registry.record(a.clone(), ArtifactKind::Processed).unwrap();
        registry.record(b.clone(), ArtifactKind::Spliced).unwrap();

        let contents = fs::read_to_string(&manifest).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![a.display().to_string(), b.display().to_string()]);
    }

    #[test]
    fn purge_oldest_keeps_last_two() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("manifest.txt");
        let mut registry = ArtifactRegistry::open(dir.path(), &manifest).unwrap();

        let paths: Vec<PathBuf> = (0..4)
            .map(|i| {
                let p = dir.path().join(format!("{i}.jpg"));
                fs::write(&p, b"x").unwrap();
                p
            })
            .collect();

        for p in &paths {
            registry.record(p.clone(), ArtifactKind::Processed).unwrap();
        }
        registry.purge_oldest(2).unwrap();

        assert!(!paths[0].exists());
        assert!(!paths[1].exists());
        assert!(paths[2].exists());
        assert!(paths[3].exists());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn purge_all_from_manifest_tolerates_missing_files() {
        let dir = tempdir().unwrap();
        let temp_dir = dir.path().join("temp");
        fs::create_dir_all(&temp_dir).unwrap();
        let manifest = temp_dir.join("pycastblaster_temp_files.txt");

        let x = temp_dir.join("x.jpg");
        let y = temp_dir.join("y.jpg");
        fs::write(&x, b"x").unwrap();
        // y.jpg deliberately absent to exercise the "tolerates missing files" contract.
        fs::write(&manifest, format!("{}\n{}\n", x.display(), y.display())).unwrap();

        purge_all_from_manifest(&manifest, &temp_dir).unwrap();

        assert!(!x.exists());
        assert_eq!(fs::read_to_string(&manifest).unwrap(), "");
    }

    #[test]
    fn purge_all_from_manifest_only_deletes_inside_temp_dir() {
        let dir = tempdir().unwrap();
        let temp_dir = dir.path().join("temp");
        fs::create_dir_all(&temp_dir).unwrap();
        let manifest = temp_dir.join("pycastblaster_temp_files.txt");

        let outside = dir.path().join("outside.jpg");
        fs::write(&outside, b"x").unwrap();
        fs::write(&manifest, "../outside.jpg\n").unwrap();

        purge_all_from_manifest(&manifest, &temp_dir).unwrap();

        // The manifest line's basename ("outside.jpg") is joined onto temp_dir, so the file
        // outside the temp directory is left untouched.
        assert!(outside.exists());
    }
}
