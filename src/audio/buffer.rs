use std::sync::{Arc, Mutex};

use crate::error::{ConversionError, PlayerError};
use crate::models::{SampleFormat, SourceSpec};
use crate::player::finder::AudioData;

/// Opaque token distinguishing the current track load from stale,
/// superseded ones. Bumped every time the buffer slot is invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Raw converted audio for one track.
///
/// The backing storage is allocated once, sized for the entire track, and
/// filled incrementally left-to-right; it is never resized. The memory is
/// released when the owning slot replaces it or is dropped.
#[derive(Debug)]
pub struct SampleBuffer {
    data: Vec<u8>,
    filled: usize,
    channels: u32,
    sample_rate: f64,
    format: SampleFormat,
}

impl SampleBuffer {
    /// Allocate a buffer sized for `total_frames` frames of the given format.
    pub fn allocate(spec: &SourceSpec, total_frames: usize) -> Self {
        Self {
            data: vec![0; total_frames * spec.bytes_per_frame()],
            filled: 0,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            format: spec.format,
        }
    }

    /// Total capacity in bytes, fixed at allocation time.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written so far.
    pub fn filled_bytes(&self) -> usize {
        self.filled
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Total frame capacity of the buffer.
    pub fn total_frames(&self) -> usize {
        let bytes_per_frame = self.format.bytes_per_sample() * self.channels as usize;
        if bytes_per_frame > 0 {
            self.data.len() / bytes_per_frame
        } else {
            0
        }
    }

    /// Copy `bytes` into the buffer at `offset`. The region is fixed-size,
    /// so writes past the end are rejected rather than growing it.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ConversionError> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(ConversionError::DestinationOverflow {
                offset,
                len: bytes.len(),
                capacity: self.data.len(),
            })?;
        self.data[offset..end].copy_from_slice(bytes);
        self.filled = self.filled.max(end);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Result of a token-checked append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The generation matched and the bytes were written.
    Written,
    /// The track changed since the chunk was read; nothing was written.
    Stale,
}

struct BufferSlot {
    buffer: Option<SampleBuffer>,
    generation: Generation,
}

/// Lock-guarded owner of the track's sample buffer and generation token.
///
/// This is the only state shared between the foreground controller and the
/// background ingestion task. Conversion work happens outside the lock; only
/// the token check and the append happen inside it.
#[derive(Clone)]
pub struct SharedBufferSlot {
    inner: Arc<Mutex<BufferSlot>>,
}

impl SharedBufferSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferSlot {
                buffer: None,
                generation: Generation(0),
            })),
        }
    }

    /// Free the previous track's buffer and stamp a new generation token.
    /// Any in-flight ingestion step for the old generation will observe the
    /// mismatch and abort without mutating the slot.
    pub fn invalidate(&self) -> Generation {
        let mut slot = self.inner.lock().expect("buffer lock poisoned");
        slot.buffer = None;
        slot.generation = Generation(slot.generation.0 + 1);
        slot.generation
    }

    /// Install a freshly allocated buffer for `generation`. Returns false if
    /// the slot has already moved on to a newer generation.
    pub fn install(&self, buffer: SampleBuffer, generation: Generation) -> bool {
        let mut slot = self.inner.lock().expect("buffer lock poisoned");
        if slot.generation != generation {
            return false;
        }
        slot.buffer = Some(buffer);
        true
    }

    /// Append converted bytes at `offset` if `generation` is still current.
    pub fn append(
        &self,
        generation: Generation,
        offset: usize,
        bytes: &[u8],
    ) -> Result<AppendOutcome, PlayerError> {
        let mut slot = self.inner.lock().expect("buffer lock poisoned");
        if slot.generation != generation {
            return Ok(AppendOutcome::Stale);
        }
        let buffer = slot
            .buffer
            .as_mut()
            .ok_or(PlayerError::PlaybackBufferEmpty)?;
        buffer.write_at(offset, bytes)?;
        Ok(AppendOutcome::Written)
    }

    /// The current generation token.
    pub fn generation(&self) -> Generation {
        self.inner.lock().expect("buffer lock poisoned").generation
    }

    pub fn is_loaded(&self) -> bool {
        self.inner
            .lock()
            .expect("buffer lock poisoned")
            .buffer
            .is_some()
    }

    /// Owned copy of the loaded audio, taken under the lock, for handing to
    /// the loop detector without blocking ingestion for the whole analysis.
    pub fn snapshot(&self) -> Option<AudioData> {
        let slot = self.inner.lock().expect("buffer lock poisoned");
        slot.buffer.as_ref().map(|buffer| AudioData {
            samples: buffer.as_bytes().to_vec(),
            format: buffer.format(),
            channels: buffer.channels(),
            sample_rate: buffer.sample_rate(),
            num_samples: buffer.total_frames(),
        })
    }

    /// Run `f` against the loaded buffer, if any, under the lock.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&SampleBuffer) -> R) -> Option<R> {
        let slot = self.inner.lock().expect("buffer lock poisoned");
        slot.buffer.as_ref().map(f)
    }
}

impl Default for SharedBufferSlot {
    fn default() -> Self {
        Self::new()
    }
}
