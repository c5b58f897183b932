#![deny(unsafe_code)]

//! pycastblaster library surface.
//!
//! Streams a shuffled, continually-refreshed sequence of images from a local directory tree to
//! a Chromecast-compatible media receiver, reframing/splicing portraits on demand and merging
//! newly discovered source images into the running playlist without re-showing history.
//!
//! All fallible operations return [`error::CoreError`]. Library code never panics outside of
//! bugs; device-library and I/O failures are reported, not propagated as panics.

/// On-disk manifest of generated artifacts, with crash-safe purge/rewrite.
pub mod artifacts;
/// Configuration types and loading/atomic-rewrite helpers.
pub mod config;
/// Device session abstraction (trait, fake, and the supervisor that arbitrates casting).
pub mod device;
/// Library error type used across modules.
pub mod error;
/// The ordered, mergeable sequence of image references driving playback.
pub mod playlist;
/// Image re-framing, blurring, and portrait-splicing facade.
pub mod processing;
/// Periodic directory walk that feeds newly discovered images to the Playlist Server.
pub mod scanner;
/// The Playlist Server engine: the core state machine.
pub mod server;
/// Shared shutdown/reload/pause/duration signal set.
pub mod signals;
/// HTTP surface: state, image serving, and command handling.
pub mod web;
