use log::{debug, error};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::audio::buffer::{AppendOutcome, Generation, SampleBuffer, SharedBufferSlot};
use crate::audio::convert::FormatConverter;
use crate::audio::TrackSource;
use crate::error::{FileReadError, PlayerError};
use crate::models::SourceSpec;

/// Frames read synchronously before playback can start.
pub const START_READ_FRAMES: usize = 1_000_000;

/// Frames read per background ingestion step.
pub const FRAME_READ_INCREMENT: usize = 100_000;

/// Result of starting a track load: the source format, the full track length,
/// and the background task finishing the ingestion (absent when the prefix
/// read already consumed the whole file).
pub struct BeginLoad {
    pub spec: SourceSpec,
    pub total_frames: usize,
    pub background: Option<JoinHandle<()>>,
}

/// Streams track samples into the shared buffer slot: a synchronous prefix
/// large enough to start playback, then one blocking task that reads the rest
/// in fixed increments.
///
/// Every append is stamped with the load's generation token; once a newer
/// load invalidates the slot, the background task observes the stale token
/// and stops without touching the new track's buffer.
pub struct StreamLoader {
    slot: SharedBufferSlot,
    handle: Handle,
}

impl StreamLoader {
    pub fn new(slot: SharedBufferSlot, handle: Handle) -> Self {
        Self { slot, handle }
    }

    /// Allocate the track's buffer, fill the initial prefix, and hand the
    /// remainder of the file to a background task.
    ///
    /// Errors during the prefix read abort the load and propagate to the
    /// caller. Errors in the background task are logged and end that task;
    /// the already-buffered samples stay playable.
    pub fn begin_load(
        &self,
        mut source: Box<dyn TrackSource>,
        generation: Generation,
    ) -> Result<BeginLoad, PlayerError> {
        let spec = source.spec();
        let total_frames = source.total_frames();
        let mut converter = FormatConverter::new(&spec)?;

        let buffer = SampleBuffer::allocate(&spec, total_frames);
        if !self.slot.install(buffer, generation) {
            return Err(FileReadError::ReadFailed(
                "track load was superseded before buffering started".to_string(),
            )
            .into());
        }

        let mut offset = 0usize;
        let mut eof = false;
        while offset < START_READ_FRAMES * spec.bytes_per_frame() {
            let remaining = START_READ_FRAMES - offset / spec.bytes_per_frame();
            let chunk = match source.read_frames(remaining.min(FRAME_READ_INCREMENT))? {
                Some(chunk) => chunk,
                None => {
                    eof = true;
                    break;
                }
            };
            let bytes = converter.convert(&chunk)?;
            match self.slot.append(generation, offset, &bytes)? {
                AppendOutcome::Written => offset += bytes.len(),
                AppendOutcome::Stale => {
                    return Err(FileReadError::ReadFailed(
                        "track load was superseded while buffering".to_string(),
                    )
                    .into());
                }
            }
        }

        let background = if eof {
            None
        } else {
            Some(self.spawn_background_read(source, converter, generation, offset))
        };

        Ok(BeginLoad {
            spec,
            total_frames,
            background,
        })
    }

    /// Finish ingesting `source` on the blocking pool, one increment per
    /// iteration. Each iteration re-checks the generation token before doing
    /// any work so a superseded load stops within one increment.
    fn spawn_background_read(
        &self,
        mut source: Box<dyn TrackSource>,
        mut converter: FormatConverter,
        generation: Generation,
        start_offset: usize,
    ) -> JoinHandle<()> {
        let slot = self.slot.clone();
        self.handle.spawn_blocking(move || {
            let mut offset = start_offset;
            loop {
                if slot.generation() != generation {
                    debug!("Track changed; abandoning background read");
                    break;
                }
                let chunk = match source.read_frames(FRAME_READ_INCREMENT) {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => {
                        debug!("Finished buffering track ({} bytes)", offset);
                        break;
                    }
                    Err(err) => {
                        error!("Background read failed at byte {}: {}", offset, err);
                        break;
                    }
                };
                // Conversion happens outside the slot lock.
                let bytes = match converter.convert(&chunk) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        error!("Background conversion failed at byte {}: {}", offset, err);
                        break;
                    }
                };
                match slot.append(generation, offset, &bytes) {
                    Ok(AppendOutcome::Written) => offset += bytes.len(),
                    Ok(AppendOutcome::Stale) => {
                        debug!("Track changed; discarding buffered increment");
                        break;
                    }
                    Err(err) => {
                        error!("Background append failed at byte {}: {}", offset, err);
                        break;
                    }
                }
            }
        })
    }
}
