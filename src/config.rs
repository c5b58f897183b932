//! Configuration types and loading/atomic-rewrite helpers for the slideshow server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;

fn default_images_path() -> PathBuf {
    PathBuf::from("images/")
}

fn default_temp_path() -> PathBuf {
    PathBuf::from("temp/")
}

const fn default_http_port() -> u16 {
    8000
}

fn default_chromecast_name() -> String {
    "Family Room TV".to_string()
}

const fn default_slideshow_duration() -> f64 {
    5.0
}

const fn default_max_image_height() -> u32 {
    720
}

const fn default_interruption_idle_seconds() -> u64 {
    20
}

const fn default_scanning_frequency_minutes() -> u64 {
    10
}

/// Top-level configuration, loaded from (and selectively rewritten back to) `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub images_path: PathBuf,
    pub temp_path: PathBuf,
    pub http_server_port: u16,
    pub chromecast_name: String,
    pub slideshow_duration_seconds: f64,
    pub max_image_height_pixels: u32,
    pub interruption_idle_seconds: u64,
    pub image_scanning_frequency_minutes: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            images_path: default_images_path(),
            temp_path: default_temp_path(),
            http_server_port: default_http_port(),
            chromecast_name: default_chromecast_name(),
            slideshow_duration_seconds: default_slideshow_duration(),
            max_image_height_pixels: default_max_image_height(),
            interruption_idle_seconds: default_interruption_idle_seconds(),
            image_scanning_frequency_minutes: default_scanning_frequency_minutes(),
        }
    }
}

impl Configuration {
    /// Validate that required paths make sense. Missing directories are tolerated here
    /// (the scanner simply finds nothing) but a config that points `temp_path` at `images_path`
    /// would make every generated artifact indistinguishable from a source image.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.slideshow_duration_seconds <= 0.0 {
            return Err(CoreError::InvalidDuration(
                self.slideshow_duration_seconds.to_string(),
            ));
        }
        Ok(())
    }

    /// Seconds form of `image_scanning_frequency_minutes`.
    #[must_use]
    pub const fn scanning_frequency_seconds(&self) -> u64 {
        self.image_scanning_frequency_minutes * 60
    }

    /// Path to the crash-safe temp-artifact manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.temp_path.join("pycastblaster_temp_files.txt")
    }
}

/// Parse YAML text into a [`Configuration`]. Missing keys fall back to defaults.
pub fn from_yaml_str(s: &str) -> Result<Configuration, CoreError> {
    let cfg: Configuration = serde_yaml::from_str(s)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration from `path`. A missing file is non-fatal: defaults are used and a log
/// line records the fact, matching the source tool's `load_config` behaviour.
pub fn load(path: &Path) -> Result<Configuration, CoreError> {
    if !path.exists() {
        info!(path = %path.display(), "no config file found, using default values");
        return Ok(Configuration::default());
    }
    let text = std::fs::read_to_string(path)?;
    from_yaml_str(&text)
}

/// Atomically rewrite `slideshow_duration_seconds` in the config file on disk.
///
/// Writes the new document to `<path>.new`, renames the existing file to `<path>.old`,
/// renames `.new` into place, then removes `.old`. If any step after the `.new` write fails,
/// the `.old`/`.new` file is left on disk for inspection and the in-memory value still applies;
/// this is never treated as fatal.
pub fn rewrite_slideshow_duration(path: &Path, cfg: &Configuration) -> Result<(), CoreError> {
    let new_path = path.with_extension("yaml.new");
    let old_path = path.with_extension("yaml.old");

    let rendered = serde_yaml::to_string(cfg)?;
    if let Err(err) = std::fs::write(&new_path, rendered) {
        warn!(error = %err, path = %new_path.display(), "failed to write updated config");
        return Err(err.into());
    }

    if path.exists() {
        if let Err(err) = std::fs::rename(path, &old_path) {
            warn!(error = %err, "failed to stage previous config for replacement");
            return Err(err.into());
        }
    }

    if let Err(err) = std::fs::rename(&new_path, path) {
        warn!(error = %err, "failed to install updated config");
        return Err(err.into());
    }

    if old_path.exists() {
        if let Err(err) = std::fs::remove_file(&old_path) {
            warn!(error = %err, path = %old_path.display(), "failed to remove stale config backup");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_spec() {
        let cfg = Configuration::default();
        assert_eq!(cfg.images_path, PathBuf::from("images/"));
        assert_eq!(cfg.temp_path, PathBuf::from("temp/"));
        assert_eq!(cfg.http_server_port, 8000);
        assert_eq!(cfg.chromecast_name, "Family Room TV");
        assert!((cfg.slideshow_duration_seconds - 5.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_image_height_pixels, 720);
        assert_eq!(cfg.interruption_idle_seconds, 20);
        assert_eq!(cfg.scanning_frequency_seconds(), 600);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = from_yaml_str("chromecast_name: \"Living Room\"\n").unwrap();
        assert_eq!(cfg.chromecast_name, "Living Room");
        assert_eq!(cfg.http_server_port, 8000);
    }

    #[test]
    fn rewrite_is_atomic_and_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "chromecast_name: \"Den TV\"\nslideshow_duration_seconds: 5\n")
            .unwrap();

        let mut cfg = load(&path).unwrap();
        cfg.slideshow_duration_seconds = 20.0;
        rewrite_slideshow_duration(&path, &cfg).unwrap();

        let reloaded = load(&path).unwrap();
        assert!((reloaded.slideshow_duration_seconds - 20.0).abs() < f64::EPSILON);
        assert_eq!(reloaded.chromecast_name, "Den TV");
        assert!(!path.with_extension("yaml.old").exists());
        assert!(!path.with_extension("yaml.new").exists());
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let err = from_yaml_str("slideshow_duration_seconds: 0\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidDuration(_)));
    }
}
