use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persistent description of a music track: where it lives, its loop points
/// and its per-track volume adjustment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackDescriptor {
    pub path: PathBuf,
    /// Loop start in seconds.
    pub loop_start: f64,
    /// Loop end in seconds. `0.0` means "unset"; the player substitutes the
    /// full track duration on load.
    pub loop_end: f64,
    pub volume_multiplier: f64,
}

impl TrackDescriptor {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            loop_start: 0.0,
            loop_end: 0.0,
            volume_multiplier: 1.0,
        }
    }

    /// Sentinel descriptor representing "no track loaded".
    pub fn blank() -> Self {
        Self::new(PathBuf::new())
    }

    pub fn is_blank(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Get the display name for this track (file stem or "Unknown")
    pub fn display_name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    }
}

impl Default for TrackDescriptor {
    fn default() -> Self {
        Self::blank()
    }
}

/// Native sample representations the streaming pipeline accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Int32,
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int32 | SampleFormat::Float32 => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::Int16 => "16-bit integer",
            SampleFormat::Int32 => "32-bit integer",
            SampleFormat::Float32 => "32-bit float",
        }
    }
}

/// How channel samples are laid out in a source chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Channel samples for each frame stored contiguously (LRLR...).
    Interleaved,
    /// Each channel stored in its own contiguous run.
    Planar,
}

/// Format description for a track source, fixed for the lifetime of a load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SourceSpec {
    pub channels: u32,
    pub sample_rate: f64,
    pub format: SampleFormat,
    pub layout: ChannelLayout,
}

impl SourceSpec {
    /// Bytes occupied by one frame across all channels in the canonical
    /// interleaved layout.
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Get a human-readable format description
    pub fn format_description(&self) -> String {
        format!(
            "{} - {} Hz - {} channel{}",
            self.format.name(),
            self.sample_rate,
            self.channels,
            if self.channels == 1 { "" } else { "s" }
        )
    }
}

/// A block of newly-read frames in the source's native representation.
///
/// `planes` holds exactly one buffer for interleaved sources, or one buffer
/// per channel for planar sources.
#[derive(Debug, Clone)]
pub struct FrameChunk {
    pub frames: usize,
    pub spec: SourceSpec,
    pub planes: Vec<Vec<u8>>,
}

impl FrameChunk {
    /// Total converted size of this chunk in bytes.
    pub fn byte_len(&self) -> usize {
        self.frames * self.spec.bytes_per_frame()
    }
}

/// Notifications emitted by the playback controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    TrackChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_track_descriptor() {
        let blank = TrackDescriptor::blank();
        assert!(blank.is_blank());
        assert_eq!(blank.loop_start, 0.0);
        assert_eq!(blank.loop_end, 0.0);
        assert_eq!(blank.volume_multiplier, 1.0);

        let track = TrackDescriptor::new(PathBuf::from("/music/song.flac"));
        assert!(!track.is_blank());
        assert_eq!(track.display_name(), "song");
    }

    #[test]
    fn test_sample_format_sizes() {
        assert_eq!(SampleFormat::Int16.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::Int32.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::Float32.bytes_per_sample(), 4);
    }

    #[test]
    fn test_source_spec_bytes_per_frame() {
        let spec = SourceSpec {
            channels: 2,
            sample_rate: 44100.0,
            format: SampleFormat::Int16,
            layout: ChannelLayout::Planar,
        };
        assert_eq!(spec.bytes_per_frame(), 4);

        let mono = SourceSpec {
            channels: 1,
            sample_rate: 48000.0,
            format: SampleFormat::Float32,
            layout: ChannelLayout::Interleaved,
        };
        assert_eq!(mono.bytes_per_frame(), 4);
        assert!(mono.format_description().contains("1 channel"));
    }

    #[test]
    fn test_frame_chunk_byte_len() {
        let spec = SourceSpec {
            channels: 2,
            sample_rate: 44100.0,
            format: SampleFormat::Int32,
            layout: ChannelLayout::Planar,
        };
        let chunk = FrameChunk {
            frames: 100,
            spec,
            planes: vec![vec![0; 400], vec![0; 400]],
        };
        assert_eq!(chunk.byte_len(), 800);
    }

    #[test]
    fn test_track_descriptor_serialization() {
        let track = TrackDescriptor {
            path: PathBuf::from("/music/song.flac"),
            loop_start: 1.5,
            loop_end: 120.25,
            volume_multiplier: 0.8,
        };
        let serialized = serde_json::to_string(&track).expect("Failed to serialize");
        let deserialized: TrackDescriptor =
            serde_json::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(track, deserialized);
    }
}
