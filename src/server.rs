//! The Playlist Server: the state machine that prepares artifacts, hands them to the Device
//! Session Supervisor to cast, and waits out the configured slideshow duration between slides.
//!
//! Implemented as a single `tokio::spawn`ed task driven by a `loop` around explicit state
//! transitions, following the shape of the teacher's `tasks/manager.rs::run` (select over a
//! cancellation token, an inbox receive, and a paced sleep) generalised to the full
//! Idle/Merging/Preparing/Playing/Waiting/Advancing machine this spec describes.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactKind, ArtifactRegistry};
use crate::device::supervisor::Supervisor;
use crate::playlist::{ImageReference, Layout, Playlist};
use crate::processing::Processor;
use crate::signals::Signals;

const PURGE_KEEP_LAST: usize = 2;
const LOG_LINES_CAPACITY: usize = 20;

/// Snapshot published after every state transition for `GET /state` to read without touching
/// the engine's own locks.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub chromecast_name: String,
    pub is_paused: bool,
    pub slideshow_duration_seconds: f64,
    pub image_path: Option<PathBuf>,
    pub images: Vec<PathBuf>,
    pub images_min_index: usize,
    pub current_image_index: usize,
    pub image_count: usize,
    pub log_lines: Vec<String>,
}

enum PrepareOutcome {
    Slide { url: String },
    NothingToPlay,
    EndOfList,
    Exit,
}

enum WaitOutcome {
    Completed,
    /// The Supervisor cleared the enable latch (device play failure or mid-wait disconnect):
    /// the server must stop serving and let the idle-watcher re-arbitrate.
    Disabled,
    /// New images arrived in the inbox: the latch stays set, so the outer loop falls straight
    /// back into Merging without going through the idle-watcher at all.
    Merge,
    Exit,
}

pub struct PlaylistServer {
    playlist: Playlist,
    registry: ArtifactRegistry,
    processor: Processor,
    supervisor: Arc<Supervisor>,
    signals: Signals,
    inbox: Receiver<Vec<ImageReference>>,
    pending: Option<Vec<ImageReference>>,
    images_path: PathBuf,
    base_url: String,
    chromecast_name: String,
    state_tx: watch::Sender<StateSnapshot>,
    log_lines: VecDeque<String>,
}

impl PlaylistServer {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        playlist: Playlist,
        registry: ArtifactRegistry,
        processor: Processor,
        supervisor: Arc<Supervisor>,
        signals: Signals,
        inbox: Receiver<Vec<ImageReference>>,
        images_path: PathBuf,
        base_url: String,
        chromecast_name: String,
    ) -> (Self, watch::Receiver<StateSnapshot>) {
        let initial = StateSnapshot {
            chromecast_name: chromecast_name.clone(),
            is_paused: signals.is_paused(),
            slideshow_duration_seconds: signals.duration(),
            image_path: None,
            images: Vec::new(),
            images_min_index: 0,
            current_image_index: 0,
            image_count: 0,
            log_lines: Vec::new(),
        };
        let (state_tx, state_rx) = watch::channel(initial);
        (
            Self {
                playlist,
                registry,
                processor,
                supervisor,
                signals,
                inbox,
                pending: None,
                images_path,
                base_url,
                chromecast_name,
                state_tx,
                log_lines: VecDeque::new(),
            },
            state_rx,
        )
    }

    /// Run until the exit signal fires.
    pub async fn run(mut self) {
        loop {
            if !self.wait_for_enabled().await {
                return;
            }
            self.signals.set_not_serving(false);

            self.drain_inbox();

            match self.prepare_next().await {
                PrepareOutcome::Exit => {
                    self.signals.set_not_serving(true);
                    return;
                }
                PrepareOutcome::NothingToPlay | PrepareOutcome::EndOfList => {
                    continue;
                }
                PrepareOutcome::Slide { url } => {
                    let played = self.supervisor.try_to_play_media(&url).await;
                    self.publish_state();
                    if !played {
                        self.log(format!("play failed for {url}"));
                        self.signals.set_enabled(false);
                        continue;
                    }

                    match self.wait_step().await {
                        WaitOutcome::Exit => {
                            self.signals.set_not_serving(true);
                            return;
                        }
                        WaitOutcome::Disabled => {
                            self.signals.set_enabled(false);
                        }
                        WaitOutcome::Merge => {
                            // Latch stays set: fall straight back to Merging, no idle-watcher
                            // re-arbitration.
                        }
                        WaitOutcome::Completed => {
                            if self.playlist.at_last_index() {
                                self.playlist.reshuffle_all();
                                self.log("completed a full pass, reshuffling".to_string());
                            } else {
                                self.playlist.advance();
                            }
                        }
                    }
                }
            }

            self.publish_state();
        }
    }

    /// Block until the enable latch is set, reporting not-serving meanwhile.
    async fn wait_for_enabled(&mut self) -> bool {
        let mut enabled_rx = self.signals.subscribe_enabled();
        loop {
            if *enabled_rx.borrow() {
                return true;
            }
            self.signals.set_not_serving(true);
            tokio::select! {
                () = self.signals.wait_for_exit() => return false,
                res = enabled_rx.changed() => {
                    if res.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn drain_inbox(&mut self) {
        let mut merged = 0;
        if let Some(batch) = self.pending.take() {
            merged += batch.len();
            self.playlist.merge(batch);
        }
        while let Ok(batch) = self.inbox.try_recv() {
            merged += batch.len();
            self.playlist.merge(batch);
        }
        if merged > 0 {
            self.log(format!("merged {merged} newly discovered image(s)"));
        }
    }

    /// Preparation algorithm per slide, including the skip-set consumption and forward
    /// portrait-splice search. Loops internally over skipped/failed indices without returning
    /// to the caller, since those never reach Playing/Waiting.
    async fn prepare_next(&mut self) -> PrepareOutcome {
        loop {
            if self.signals.exit_requested() {
                return PrepareOutcome::Exit;
            }
            if self.playlist.is_empty() {
                return PrepareOutcome::NothingToPlay;
            }

            let index = self.playlist.cursor();
            let source_path = self.playlist.get(index).unwrap().source_path.clone();

            if self.playlist.take_skip(&source_path) {
                if self.advance_or_end() {
                    return PrepareOutcome::EndOfList;
                }
                continue;
            }

            if self.playlist.get(index).unwrap().layout == Layout::Unknown {
                match self.determine_layout(&source_path).await {
                    Ok(layout) => self.playlist.memoise_layout(index, layout),
                    Err(err) => {
                        warn!(path = %source_path.display(), error = %err, "failed to inspect image, skipping");
                        if self.advance_or_end() {
                            return PrepareOutcome::EndOfList;
                        }
                        continue;
                    }
                }
            }

            let layout = self.playlist.get(index).unwrap().layout;

            let generated = if layout == Layout::Portrait {
                match self.find_splice_partner(index).await {
                    Some((partner_index, partner_path)) => {
                        self.playlist.add_skip(partner_path.clone());
                        self.generate_splice(&source_path, &partner_path).await
                    }
                    None => self.generate_processed(&source_path).await,
                }
            } else {
                self.generate_processed(&source_path).await
            };

            match generated {
                Ok(actual_path) => {
                    if let Err(err) = self.registry.purge_oldest(PURGE_KEEP_LAST) {
                        warn!(error = %err, "failed to purge old temp artifacts");
                    }
                    let url = self.url_for(&actual_path);
                    self.playlist.set_url(index, url.clone());
                    return PrepareOutcome::Slide { url };
                }
                Err(err) => {
                    warn!(path = %source_path.display(), error = %err, "failed to process image, skipping");
                    if self.advance_or_end() {
                        return PrepareOutcome::EndOfList;
                    }
                }
            }
        }
    }

    /// Advance the cursor, reshuffling if that completed a pass. Returns whether a pass
    /// completed (in which case the caller should stop looping and return to Idle/Merging).
    fn advance_or_end(&mut self) -> bool {
        if self.playlist.at_last_index() {
            self.playlist.reshuffle_all();
            true
        } else {
            self.playlist.advance();
            false
        }
    }

    async fn determine_layout(&self, path: &Path) -> Result<Layout, anyhow::Error> {
        let processor = self.processor;
        let path = path.to_path_buf();
        let portrait = tokio::task::spawn_blocking(move || processor.is_portrait(&path)).await??;
        Ok(if portrait { Layout::Portrait } else { Layout::Landscape })
    }

    /// Linear forward search from `index + 1` for another un-skipped Portrait, memoising
    /// layouts discovered along the way.
    async fn find_splice_partner(&mut self, index: usize) -> Option<(usize, PathBuf)> {
        let mut search = index + 1;
        while search < self.playlist.len() {
            let candidate_path = self.playlist.get(search)?.source_path.clone();
            if self.playlist.get(search)?.layout == Layout::Unknown {
                match self.determine_layout(&candidate_path).await {
                    Ok(layout) => self.playlist.memoise_layout(search, layout),
                    Err(err) => {
                        warn!(path = %candidate_path.display(), error = %err, "failed to inspect candidate splice partner");
                        search += 1;
                        continue;
                    }
                }
            }
            let layout = self.playlist.get(search)?.layout;
            if layout == Layout::Portrait && !self.playlist.is_skipped(&candidate_path) {
                return Some((search, candidate_path));
            }
            search += 1;
        }
        None
    }

    async fn generate_processed(&mut self, source: &Path) -> Result<PathBuf, anyhow::Error> {
        let output = self.registry.temp_dir().join(format!("{}.jpg", Uuid::new_v4()));
        let processor = self.processor;
        let source = source.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || processor.process_file(&source, &output))
            .await??;
        self.registry.record(actual.clone(), ArtifactKind::Processed)?;
        Ok(actual)
    }

    async fn generate_splice(
        &mut self,
        first: &Path,
        second: &Path,
    ) -> Result<PathBuf, anyhow::Error> {
        let output = self.registry.temp_dir().join(format!("{}.jpg", Uuid::new_v4()));
        let processor = self.processor;
        let first = first.to_path_buf();
        let second = second.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || processor.splice(&first, &second, &output))
            .await??;
        self.registry.record(actual.clone(), ArtifactKind::Spliced)?;
        Ok(actual)
    }

    /// Sleep out the configured duration in 1s ticks, checking (in order) exit, the enable
    /// latch, pending newcomers, pause, and duration changes, per §4.E's wait step.
    async fn wait_step(&mut self) -> WaitOutcome {
        let mut remaining = self.signals.duration();
        let mut last_known_duration = remaining;

        loop {
            if self.signals.exit_requested() {
                return WaitOutcome::Exit;
            }
            if !self.signals.is_enabled() {
                return WaitOutcome::Disabled;
            }
            if remaining <= 0.0 {
                return WaitOutcome::Completed;
            }

            let paused = self.signals.is_paused();
            let tick = remaining.min(1.0);
            tokio::select! {
                () = self.signals.wait_for_exit() => return WaitOutcome::Exit,
                () = tokio::time::sleep(Duration::from_secs_f64(tick)) => {}
            }
            if !paused {
                remaining -= tick;
            }

            let current_duration = self.signals.duration();
            if (current_duration - last_known_duration).abs() > f64::EPSILON {
                remaining = (remaining + (current_duration - last_known_duration)).max(0.0);
                last_known_duration = current_duration;
            }

            // Only checked after the tick has actually elapsed, so a newcomer batch that was
            // already queued when this wait began never cuts short the just-prepared slide's
            // first tick of display.
            if self.pending.is_none() {
                if let Ok(batch) = self.inbox.try_recv() {
                    self.pending = Some(batch);
                }
            }
            if self.pending.is_some() {
                return WaitOutcome::Merge;
            }
        }
    }

    fn url_for(&self, path: &Path) -> String {
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        format!("{}/{}", self.base_url.trim_end_matches('/'), filename)
    }

    fn log(&mut self, message: String) {
        info!("{message}");
        if self.log_lines.len() >= LOG_LINES_CAPACITY {
            self.log_lines.pop_front();
        }
        self.log_lines.push_back(message);
    }

    fn publish_state(&mut self) {
        let (images, images_min_index) = self.playlist.snapshot_window();
        let images: Vec<PathBuf> = images
            .iter()
            .map(|p| p.strip_prefix(&self.images_path).unwrap_or(p).to_path_buf())
            .collect();
        let current = self
            .playlist
            .get(self.playlist.cursor())
            .map(|item| item.source_path.clone());

        let snapshot = StateSnapshot {
            chromecast_name: self.chromecast_name.clone(),
            is_paused: self.signals.is_paused(),
            slideshow_duration_seconds: self.signals.duration(),
            image_path: current,
            images,
            images_min_index,
            current_image_index: self.playlist.cursor(),
            image_count: self.playlist.len(),
            log_lines: self.log_lines.iter().cloned().collect(),
        };
        let _ = self.state_tx.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    use crate::device::fake::{FakeDeviceConnector, FakeDeviceState};
    use crate::device::{DiscoveryEvent, MEDIA_RECEIVER_APP_ID};

    fn write_solid(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30])).save(path).unwrap();
    }

    async fn connected_supervisor() -> Arc<Supervisor> {
        let state = FakeDeviceState::new();
        state.set_app_id(Some(MEDIA_RECEIVER_APP_ID)).await;
        let signals = Signals::new(5.0);
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(FakeDeviceConnector::new(state)),
            "Family Room TV".to_string(),
            signals,
            Duration::from_millis(10),
        ));
        supervisor
            .handle_discovery_event(DiscoveryEvent::Added {
                friendly_name: "Family Room TV".to_string(),
            })
            .await;
        supervisor
    }

    fn new_server(
        images_path: PathBuf,
        temp_path: PathBuf,
        supervisor: Arc<Supervisor>,
    ) -> (PlaylistServer, mpsc::Sender<Vec<ImageReference>>) {
        let manifest = temp_path.join("manifest.txt");
        let registry = ArtifactRegistry::open(&temp_path, &manifest).unwrap();
        let processor = Processor::new(100);
        let signals = Signals::new(1.0);
        let (tx, rx) = mpsc::channel(1);
        let (server, _state_rx) = PlaylistServer::new(
            Playlist::with_rng(StdRng::seed_from_u64(1)),
            registry,
            processor,
            supervisor,
            signals,
            rx,
            images_path,
            "http://example.local:8000".to_string(),
            "Family Room TV".to_string(),
        );
        (server, tx)
    }

    #[tokio::test]
    async fn cold_start_single_landscape_generates_one_processed_artifact() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let temp = dir.path().join("temp");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::create_dir_all(&temp).unwrap();
        let a = images.join("a.jpg");
        write_solid(&a, 400, 100);

        let supervisor = connected_supervisor().await;
        let (mut server, _tx) = new_server(images, temp, supervisor.clone());
        server.playlist.merge(vec![ImageReference::new(a.clone())]);

        let outcome = server.prepare_next().await;
        let url = match outcome {
            PrepareOutcome::Slide { url } => url,
            _ => panic!("expected a slide to be prepared"),
        };
        assert!(url.starts_with("http://example.local:8000/"));
        assert_eq!(server.registry.len(), 1);
        assert!(supervisor.try_to_play_media(&url).await);
    }

    #[tokio::test]
    async fn two_portraits_produce_exactly_one_splice_and_skip_the_second() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let temp = dir.path().join("temp");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::create_dir_all(&temp).unwrap();
        let p1 = images.join("p1.jpg");
        let p2 = images.join("p2.jpg");
        write_solid(&p1, 100, 300);
        write_solid(&p2, 120, 320);

        let supervisor = connected_supervisor().await;
        let (mut server, _tx) = new_server(images, temp, supervisor);
        server
            .playlist
            .merge(vec![ImageReference::new(p1.clone()), ImageReference::new(p2.clone())]);

        let outcome = server.prepare_next().await;
        assert!(matches!(outcome, PrepareOutcome::Slide { .. }));
        assert_eq!(server.registry.len(), 1, "exactly one spliced artifact, not two plays");
        assert!(server.playlist.is_skipped(&p2), "second portrait is parked in the skip-set");

        // Advance to index 1 (p2) and confirm it is consumed without being played again.
        server.playlist.advance();
        let outcome = server.prepare_next().await;
        assert!(matches!(outcome, PrepareOutcome::EndOfList));
        assert!(!server.playlist.is_skipped(&p2), "skip is consumed, not left dangling");
        assert_eq!(server.registry.len(), 1, "no second artifact generated for the skipped half");
    }

    #[tokio::test]
    async fn mid_pass_merge_preserves_played_prefix_and_pins_current_item() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let temp = dir.path().join("temp");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::create_dir_all(&temp).unwrap();

        let supervisor = connected_supervisor().await;
        let (mut server, _tx) = new_server(images.clone(), temp, supervisor);

        let refs = |names: &[&str]| -> Vec<ImageReference> {
            names.iter().map(|n| ImageReference::new(images.join(n))).collect()
        };
        server.playlist.merge(refs(&["a", "b", "c", "d"]));
        server.playlist.advance(); // cursor 0 -> 1, as if "b" just played

        server.drain_inbox();
        // Simulate the scanner handing off newcomers through the inbox.
        let batch = refs(&["e", "f"]);
        server.playlist.merge(batch);

        assert_eq!(server.playlist.cursor(), 1);
        assert_eq!(server.playlist.get(0).unwrap().source_path, images.join("a"));
        assert_eq!(server.playlist.get(1).unwrap().source_path, images.join("b"));
    }

    #[tokio::test]
    async fn exit_requested_short_circuits_prepare_next() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let temp = dir.path().join("temp");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::create_dir_all(&temp).unwrap();
        let a = images.join("a.jpg");
        write_solid(&a, 400, 100);

        let supervisor = connected_supervisor().await;
        let (mut server, _tx) = new_server(images, temp, supervisor);
        server.playlist.merge(vec![ImageReference::new(a)]);
        server.signals.request_exit();

        assert!(matches!(server.prepare_next().await, PrepareOutcome::Exit));
        assert_eq!(server.registry.len(), 0, "no artifact generated once exit is requested");
    }

    #[tokio::test]
    async fn empty_playlist_reports_nothing_to_play() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let temp = dir.path().join("temp");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::create_dir_all(&temp).unwrap();

        let supervisor = connected_supervisor().await;
        let (mut server, _tx) = new_server(images, temp, supervisor);

        assert!(matches!(server.prepare_next().await, PrepareOutcome::NothingToPlay));
    }
}
