use log::warn;

use crate::error::ConversionError;
use crate::models::{ChannelLayout, FrameChunk, SourceSpec};

/// Normalizes newly-read frame chunks into the single canonical interleaved
/// layout the playback engine expects.
///
/// One converter is created per track load and lives for the duration of the
/// ingestion chain; its scratch buffer is allocated per chunk and freed when
/// the chunk's conversion returns, on success or failure.
pub struct FormatConverter {
    spec: SourceSpec,
    warned_direct_copy: bool,
}

impl FormatConverter {
    /// Create a converter for a source format. Fails if the format cannot be
    /// interleaved (a fatal error for the track load).
    pub fn new(spec: &SourceSpec) -> Result<Self, ConversionError> {
        if spec.channels == 0 {
            return Err(ConversionError::CreateFailed(
                "source reports zero channels".to_string(),
            ));
        }
        if spec.sample_rate <= 0.0 {
            return Err(ConversionError::CreateFailed(format!(
                "invalid sample rate {}",
                spec.sample_rate
            )));
        }
        Ok(Self {
            spec: *spec,
            warned_direct_copy: false,
        })
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    /// Produce the chunk's bytes in canonical interleaved order.
    pub fn convert(&mut self, chunk: &FrameChunk) -> Result<Vec<u8>, ConversionError> {
        match chunk.spec.layout {
            ChannelLayout::Interleaved => self.copy_interleaved(chunk),
            ChannelLayout::Planar => self.interleave(chunk),
        }
    }

    /// Already-interleaved input degenerates to a direct copy.
    fn copy_interleaved(&mut self, chunk: &FrameChunk) -> Result<Vec<u8>, ConversionError> {
        if chunk.planes.len() != 1 {
            return Err(ConversionError::MismatchedPlanes {
                expected: 1,
                actual: chunk.planes.len(),
            });
        }
        let plane = &chunk.planes[0];
        if plane.len() != chunk.byte_len() {
            return Err(ConversionError::ConvertFailed(format!(
                "interleaved plane holds {} bytes, expected {}",
                plane.len(),
                chunk.byte_len()
            )));
        }
        if !self.warned_direct_copy {
            warn!("Interleaved source audio is untested; copying frames directly");
            self.warned_direct_copy = true;
        }
        Ok(plane.clone())
    }

    /// Interleave one plane per channel into frame order.
    fn interleave(&mut self, chunk: &FrameChunk) -> Result<Vec<u8>, ConversionError> {
        let channels = self.spec.channels as usize;
        if chunk.planes.len() != channels {
            return Err(ConversionError::MismatchedPlanes {
                expected: channels,
                actual: chunk.planes.len(),
            });
        }
        let bytes_per_sample = self.spec.format.bytes_per_sample();
        let plane_len = chunk.frames * bytes_per_sample;
        for (ch, plane) in chunk.planes.iter().enumerate() {
            if plane.len() < plane_len {
                return Err(ConversionError::ConvertFailed(format!(
                    "channel {} holds {} bytes, expected {}",
                    ch,
                    plane.len(),
                    plane_len
                )));
            }
        }

        // Per-chunk scratch buffer; dropped on every exit path.
        let mut scratch = vec![0u8; chunk.frames * channels * bytes_per_sample];
        for ch in 0..channels {
            let plane = &chunk.planes[ch];
            for frame in 0..chunk.frames {
                let src = frame * bytes_per_sample;
                let dst = (frame * channels + ch) * bytes_per_sample;
                scratch[dst..dst + bytes_per_sample]
                    .copy_from_slice(&plane[src..src + bytes_per_sample]);
            }
        }
        Ok(scratch)
    }
}
