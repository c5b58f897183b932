//! The ordered sequence of image references the Playlist Server walks through, plus the
//! cursor and skip-set that make merges and portrait splices safe across a running pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

/// Orientation of an image, memoised the first time the Playlist Server processes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Layout {
    Unknown,
    Landscape,
    Portrait,
}

/// A single playlist entry. `url_path` is empty until an artifact has been generated for it.
#[derive(Debug, Clone)]
pub struct ImageReference {
    pub source_path: PathBuf,
    pub url_path: String,
    pub layout: Layout,
}

impl ImageReference {
    #[must_use]
    pub fn new(source_path: PathBuf) -> Self {
        Self {
            source_path,
            url_path: String::new(),
            layout: Layout::Unknown,
        }
    }
}

/// Ordered sequence of [`ImageReference`]s with a playback cursor and a splice skip-set.
///
/// Owned exclusively by the Playlist Server; all other readers take a snapshot.
pub struct Playlist {
    items: Vec<ImageReference>,
    cursor: usize,
    skip_set: HashSet<PathBuf>,
    known: HashSet<PathBuf>,
    rng: StdRng,
}

impl Playlist {
    /// Build an empty playlist with a non-reproducible seed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Build an empty playlist with an injectable RNG, for deterministic tests.
    #[must_use]
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
            skip_set: HashSet::new(),
            known: HashSet::new(),
            rng,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ImageReference> {
        self.items.get(index)
    }

    /// True once `cursor` addresses the last item of the list (the next `advance()` would run
    /// off the end and a full pass has completed).
    #[must_use]
    pub fn at_last_index(&self) -> bool {
        !self.items.is_empty() && self.cursor + 1 == self.items.len()
    }

    /// Set the layout for an `Unknown` entry. No-op if already memoised (layout is immutable
    /// thereafter) or the index is out of range.
    pub fn memoise_layout(&mut self, index: usize, layout: Layout) {
        if let Some(item) = self.items.get_mut(index) {
            if item.layout == Layout::Unknown {
                item.layout = layout;
            }
        }
    }

    /// Record that a freshly generated artifact replaces the served contents of `index`
    /// (without touching the entry's own memoised layout/source path — only the URL).
    pub fn set_url(&mut self, index: usize, url_path: String) {
        if let Some(item) = self.items.get_mut(index) {
            item.url_path = url_path;
        }
    }

    pub fn add_skip(&mut self, path: PathBuf) {
        self.skip_set.insert(path);
    }

    /// Remove `path` from the skip-set, reporting whether it was present.
    pub fn take_skip(&mut self, path: &Path) -> bool {
        self.skip_set.remove(path)
    }

    #[must_use]
    pub fn is_skipped(&self, path: &Path) -> bool {
        self.skip_set.contains(path)
    }

    pub fn clear_skips(&mut self) {
        self.skip_set.clear();
    }

    /// Advance the cursor to the next item. Callers must check [`Playlist::at_last_index`]
    /// first; advancing past the end is a logic error in the Playlist Server's loop, not
    /// something this type silently clamps, since "end of pass" triggers a reshuffle instead.
    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Shuffle the entire list, reset the cursor to 0, and clear the skip-set. Called when a
    /// full pass completes without interruption.
    pub fn reshuffle_all(&mut self) {
        self.items.shuffle(&mut self.rng);
        self.cursor = 0;
        self.skip_set.clear();
    }

    /// Merge newly discovered references into the list without disturbing playback history.
    ///
    /// Items at indices `< cursor` are untouched. The currently-playing item (index `cursor`)
    /// is pinned in place too, unless `cursor == 0` (nothing has played yet, so there is no
    /// "currently playing" item to protect from being reshuffled). Everything else — the
    /// remaining future items plus the newcomers — is shuffled together. The cursor value
    /// itself never changes.
    pub fn merge(&mut self, new_refs: Vec<ImageReference>) {
        let fresh: Vec<ImageReference> = new_refs
            .into_iter()
            .filter(|r| self.known.insert(r.source_path.clone()))
            .collect();

        if self.items.is_empty() {
            let mut future = fresh;
            future.shuffle(&mut self.rng);
            self.items = future;
            self.cursor = 0;
            return;
        }

        let boundary = if self.cursor == 0 {
            0
        } else {
            (self.cursor + 1).min(self.items.len())
        };

        let mut items = std::mem::take(&mut self.items);
        let mut future = items.split_off(boundary);
        future.extend(fresh);
        future.shuffle(&mut self.rng);
        items.extend(future);
        self.items = items;
    }

    /// Source paths for the HTTP state endpoint: the window `[cursor-4, cursor+10)`, clamped
    /// to the list bounds. Returns `(paths, window_start_index)`.
    #[must_use]
    pub fn snapshot_window(&self) -> (Vec<PathBuf>, usize) {
        if self.items.is_empty() {
            return (Vec::new(), 0);
        }
        let start = self.cursor.saturating_sub(4);
        let end = (self.cursor + 10).min(self.items.len());
        let paths = self.items[start..end]
            .iter()
            .map(|item| item.source_path.clone())
            .collect();
        (paths, start)
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}
