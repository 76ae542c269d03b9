pub mod buffer;
pub mod convert;
pub mod loader;
pub mod source;

use std::path::Path;

use crate::error::{EngineError, FileReadError, PlayerError};
use crate::models::{FrameChunk, SourceSpec, TrackDescriptor};

// Re-export buffer management types
pub use buffer::{AppendOutcome, Generation, SampleBuffer, SharedBufferSlot};

// Re-export the converter and loader
pub use convert::FormatConverter;
pub use loader::{StreamLoader, FRAME_READ_INCREMENT, START_READ_FRAMES};

// Re-export the symphonia-backed source
pub use source::{FileSourceOpener, FileTrackSource};

/// Core trait for the low-level sample-accurate playback engine.
///
/// The engine owns actual audio output; the player core only drives it. Loop
/// points and the sample counter are expressed in frames of the loaded track.
pub trait PlaybackEngine: Send {
    /// Hand the engine the format and total frame count of a freshly
    /// allocated track buffer. Playback of the buffered prefix may begin
    /// before ingestion finishes.
    fn load_audio(&mut self, spec: &SourceSpec, total_samples: usize) -> Result<(), EngineError>;

    fn play(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    fn set_loop_points(&mut self, start: i64, end: i64) -> Result<(), EngineError>;

    fn set_volume_multiplier(&mut self, volume: f64) -> Result<(), EngineError>;

    /// Index of the currently playing sample.
    fn sample_counter(&self) -> i64;

    fn set_sample_counter(&mut self, counter: i64) -> Result<(), EngineError>;

    fn loop_start(&self) -> i64;

    fn loop_end(&self) -> i64;

    /// Total number of samples in the loaded track.
    fn num_samples(&self) -> usize;

    fn set_loop_playback(&mut self, enabled: bool) -> Result<(), EngineError>;

    fn loop_playback(&self) -> bool;
}

/// Persistent store of track metadata (loop points, volume adjustments).
pub trait TrackStore: Send {
    /// Load (or create) the descriptor for a track file.
    fn load_track(&mut self, path: &Path) -> Result<TrackDescriptor, PlayerError>;

    /// Save the descriptor's volume multiplier.
    fn update_volume_multiplier(&mut self, track: &TrackDescriptor) -> Result<(), PlayerError>;

    /// Save the descriptor's loop points.
    fn update_loop_points(&mut self, track: &TrackDescriptor) -> Result<(), PlayerError>;
}

/// Enumerates the media library's active selection.
pub trait MediaPool: Send {
    fn tracks_in_active_selection(&self) -> Vec<std::path::PathBuf>;
}

/// Core trait for chunked sample ingestion from a track file.
///
/// A source is opened once per load and consumed front to back; `read_frames`
/// yields `None` at end of file.
pub trait TrackSource: Send {
    /// Total frame count of the track.
    fn total_frames(&self) -> usize;

    /// The native format of the frames this source yields.
    fn spec(&self) -> SourceSpec;

    /// Read up to `max_frames` frames, or `None` at end of file.
    fn read_frames(&mut self, max_frames: usize) -> Result<Option<FrameChunk>, FileReadError>;
}

/// Opens a `TrackSource` for a track file. Seam for swapping the real
/// symphonia-backed reader out in tests.
pub trait SourceOpener: Send {
    fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>, FileReadError>;
}
