//! Core library for the Hum Search query-by-humming client.
//!
//! Each module owns one concern: microphone capture, the bar visualizer, the
//! recording session state machine, the backend client, preview and full
//! track playback, the bundled song library, and plain-text views. The
//! matching itself happens on the backend.

pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod library;
pub mod matches;
pub mod playback;
pub mod player;
pub mod preview;
pub mod session;
pub mod view;
pub mod visualizer;

pub use capture::{AudioClip, CaptureDevice, CaptureStream, Microphone};
pub use client::{CatalogSong, Health, IdentifyClient, Identifier, TrackSource};
pub use config::{AppConfig, BackendConfig, PresentationMode, SessionConfig, VisualizerConfig};
pub use error::{ErrorClass, HumSearchError, Result};
pub use library::{Library, Song};
pub use matches::MatchResult;
pub use playback::{DeviceSink, PlaybackSink, Track};
pub use player::TrackPlayer;
pub use preview::{PreviewAction, PreviewPlayer};
pub use session::{IdentifyTicket, SessionController, SessionEpoch, SessionOptions, Status};
pub use visualizer::Visualizer;
