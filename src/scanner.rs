//! Periodically walks the configured images directory and hands newly discovered files to the
//! Playlist Server through a capacity-1 inbox, following the teacher's `scan.rs` walk plus
//! `tasks/manager.rs`'s `tokio::select!`-driven pacing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::playlist::ImageReference;

const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const SCAN_INTERRUPT_INTERVAL: Duration = Duration::from_secs(10);
const SLEEP_TICK: Duration = Duration::from_secs(5);

/// Owns the set of source paths already handed off, so repeated scans only report newcomers.
pub struct Scanner {
    images_path: PathBuf,
    temp_path: PathBuf,
    scanning_frequency: Duration,
    known: HashSet<PathBuf>,
}

impl Scanner {
    #[must_use]
    pub fn new(images_path: PathBuf, temp_path: PathBuf, scanning_frequency: Duration) -> Self {
        Self {
            images_path,
            temp_path,
            scanning_frequency,
            known: HashSet::new(),
        }
    }

    /// Run until `cancel` fires: walk, flush newcomers to `outbox`, sleep, repeat.
    pub async fn run(&mut self, outbox: Sender<Vec<ImageReference>>, cancel: CancellationToken) {
        loop {
            self.scan_once(&outbox, &cancel).await;

            let mut remaining = self.scanning_frequency;
            while !remaining.is_zero() {
                let tick = remaining.min(SLEEP_TICK);
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(tick) => {}
                }
                remaining -= tick;
            }
        }
    }

    /// One walk of `images_path`, flushing buffered newcomers every
    /// [`SCAN_INTERRUPT_INTERVAL`] while the known set is still empty (so playback can start
    /// before a large initial scan finishes), and flushing any remainder at the end.
    async fn scan_once(&mut self, outbox: &Sender<Vec<ImageReference>>, cancel: &CancellationToken) {
        let initial_scan = self.known.is_empty();
        let mut buffer = Vec::new();
        let mut last_flush = Instant::now();

        for entry in WalkDir::new(&self.images_path)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
        {
            if cancel.is_cancelled() {
                return;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !is_candidate_image(path, &self.temp_path) {
                continue;
            }
            if !self.known.insert(path.to_path_buf()) {
                continue;
            }
            buffer.push(ImageReference::new(path.to_path_buf()));

            if initial_scan && last_flush.elapsed() >= SCAN_INTERRUPT_INTERVAL && !buffer.is_empty() {
                self.flush(&mut buffer, outbox).await;
                last_flush = Instant::now();
            }
        }

        if !buffer.is_empty() {
            self.flush(&mut buffer, outbox).await;
        }
    }

    async fn flush(&self, buffer: &mut Vec<ImageReference>, outbox: &Sender<Vec<ImageReference>>) {
        let batch = std::mem::take(buffer);
        let count = batch.len();
        if outbox.send(batch).await.is_err() {
            debug!("playlist server inbox closed, dropping scan batch");
            return;
        }
        info!(count, "handed off newly discovered images");
    }
}

fn is_candidate_image(path: &Path, temp_path: &Path) -> bool {
    if path.starts_with(temp_path) {
        return false;
    }
    let basename_is_dotfile = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("._"));
    if basename_is_dotfile {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn discovers_supported_images_and_skips_temp_and_dotfiles() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let temp = images.join("temp");
        std::fs::create_dir_all(&temp).unwrap();
        std::fs::write(images.join("a.jpg"), b"x").unwrap();
        std::fs::write(images.join("b.PNG"), b"x").unwrap();
        std::fs::write(images.join("._c.jpg"), b"x").unwrap();
        std::fs::write(images.join("readme.txt"), b"x").unwrap();
        std::fs::write(temp.join("generated.jpg"), b"x").unwrap();

        let mut scanner = Scanner::new(images.clone(), temp, Duration::from_secs(600));
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        scanner.scan_once(&tx, &cancel).await;
        drop(tx);

        let mut found = Vec::new();
        while let Some(batch) = rx.recv().await {
            found.extend(batch);
        }
        let names: HashSet<_> = found
            .iter()
            .map(|r| r.source_path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains("a.jpg"));
        assert!(names.contains("b.PNG"));
    }

    #[tokio::test]
    async fn second_scan_only_reports_new_files() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("a.jpg"), b"x").unwrap();

        let mut scanner = Scanner::new(images.clone(), dir.path().join("temp"), Duration::from_secs(600));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        scanner.scan_once(&tx, &cancel).await;
        std::fs::write(images.join("b.jpg"), b"x").unwrap();
        scanner.scan_once(&tx, &cancel).await;
        drop(tx);

        let mut batches = Vec::new();
        while let Some(batch) = rx.recv().await {
            batches.push(batch);
        }
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0].source_path, images.join("b.jpg"));
    }
}
