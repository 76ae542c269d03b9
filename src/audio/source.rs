use std::fs::File;
use std::path::Path;

use symphonia::core::audio::AudioBufferRef;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio::{SourceOpener, TrackSource};
use crate::error::FileReadError;
use crate::models::{ChannelLayout, FrameChunk, SampleFormat, SourceSpec};

/// Chunked reader over a track file, backed by symphonia.
///
/// Packets rarely line up with the caller's requested frame counts, so
/// decoded samples accumulate in per-channel byte planes and `read_frames`
/// drains whole frames off the front.
pub struct FileTrackSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: SourceSpec,
    total_frames: usize,
    pending: Vec<Vec<u8>>,
    pending_frames: usize,
    format_pinned: bool,
    eof: bool,
}

impl FileTrackSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FileReadError> {
        let file = File::open(&path).map_err(|e| FileReadError::Open {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let media_source = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.as_ref().extension() {
            if let Some(ext_str) = extension.to_str() {
                hint.with_extension(ext_str);
            }
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                media_source,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| FileReadError::UnsupportedFormat {
                format: format!("probe failed: {}", e),
            })?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| FileReadError::UnsupportedFormat {
                format: "no decodable audio track found".to_string(),
            })?;

        let track_id = track.id;

        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u32)
            .ok_or_else(|| FileReadError::UnsupportedFormat {
                format: "channel layout not reported".to_string(),
            })?;

        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            FileReadError::UnsupportedFormat {
                format: "sample rate not reported".to_string(),
            }
        })? as f64;

        // The playback buffer is sized up front, so the track length has to
        // be known before decoding starts.
        let total_frames = track.codec_params.n_frames.ok_or_else(|| {
            FileReadError::UnsupportedFormat {
                format: "track length not reported".to_string(),
            }
        })? as usize;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| FileReadError::UnsupportedFormat {
                format: format!("failed to create decoder: {}", e),
            })?;

        let mut source = Self {
            format_reader,
            decoder,
            track_id,
            spec: SourceSpec {
                channels,
                sample_rate,
                format: SampleFormat::Int16,
                layout: ChannelLayout::Planar,
            },
            total_frames,
            pending: vec![Vec::new(); channels as usize],
            pending_frames: 0,
            format_pinned: false,
            eof: false,
        };

        // The concrete sample format is only known once a packet decodes, so
        // pull the first one now and keep its samples pending.
        source.fill_pending()?;
        Ok(source)
    }

    /// Decode one packet into the pending planes. Sets `eof` at end of
    /// stream; corrupt packets are skipped per symphonia's decode contract.
    fn fill_pending(&mut self) -> Result<(), FileReadError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return Ok(());
                }
                Err(err) => {
                    return Err(FileReadError::ReadFailed(format!(
                        "failed to read packet: {}",
                        err
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let frames = match self.decoder.decode(&packet) {
                Ok(audio_buf) => Self::append_planes(
                    &audio_buf,
                    &mut self.pending,
                    &mut self.spec,
                    &mut self.format_pinned,
                )?,
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(err) => {
                    return Err(FileReadError::ReadFailed(format!(
                        "failed to decode packet: {}",
                        err
                    )));
                }
            };
            if frames > 0 {
                self.pending_frames += frames;
                return Ok(());
            }
        }
    }

    /// Append a decoded buffer's samples to the per-channel planes in the
    /// source's fixed sample format. The first decoded buffer pins that
    /// format; later packets must match it.
    fn append_planes(
        audio_buf: &AudioBufferRef,
        pending: &mut [Vec<u8>],
        spec: &mut SourceSpec,
        format_pinned: &mut bool,
    ) -> Result<usize, FileReadError> {
        let frames = audio_buf.frames();
        if frames == 0 {
            return Ok(0);
        }

        let channels = pending.len();
        let decoded_channels = audio_buf.spec().channels.count();
        if decoded_channels != channels {
            return Err(FileReadError::ReadFailed(format!(
                "channel count changed mid-track ({} to {})",
                channels, decoded_channels
            )));
        }

        let format = Self::native_format(audio_buf)?;
        if !*format_pinned {
            spec.format = format;
            *format_pinned = true;
        } else if format != spec.format {
            return Err(FileReadError::ReadFailed(format!(
                "sample format changed mid-track ({} to {})",
                spec.format.name(),
                format.name()
            )));
        }

        match audio_buf {
            AudioBufferRef::S16(buf) => {
                for (ch, plane) in buf.planes().planes().iter().enumerate() {
                    for &sample in plane.iter() {
                        pending[ch].extend_from_slice(&sample.to_le_bytes());
                    }
                }
            }
            AudioBufferRef::S24(buf) => {
                // 24-bit samples widen into the top bytes of an i32.
                for (ch, plane) in buf.planes().planes().iter().enumerate() {
                    for &sample in plane.iter() {
                        let widened = sample.inner() << 8;
                        pending[ch].extend_from_slice(&widened.to_le_bytes());
                    }
                }
            }
            AudioBufferRef::S32(buf) => {
                for (ch, plane) in buf.planes().planes().iter().enumerate() {
                    for &sample in plane.iter() {
                        pending[ch].extend_from_slice(&sample.to_le_bytes());
                    }
                }
            }
            AudioBufferRef::F32(buf) => {
                for (ch, plane) in buf.planes().planes().iter().enumerate() {
                    for &sample in plane.iter() {
                        pending[ch].extend_from_slice(&sample.to_le_bytes());
                    }
                }
            }
            AudioBufferRef::F64(buf) => {
                for (ch, plane) in buf.planes().planes().iter().enumerate() {
                    for &sample in plane.iter() {
                        pending[ch].extend_from_slice(&(sample as f32).to_le_bytes());
                    }
                }
            }
            _ => {
                return Err(FileReadError::UnsupportedFormat {
                    format: "unhandled decoded sample layout".to_string(),
                });
            }
        }

        Ok(frames)
    }

    /// Map symphonia's decoded representation to the formats the pipeline
    /// carries end to end.
    fn native_format(audio_buf: &AudioBufferRef) -> Result<SampleFormat, FileReadError> {
        match audio_buf {
            AudioBufferRef::S16(_) => Ok(SampleFormat::Int16),
            AudioBufferRef::S24(_) | AudioBufferRef::S32(_) => Ok(SampleFormat::Int32),
            AudioBufferRef::F32(_) | AudioBufferRef::F64(_) => Ok(SampleFormat::Float32),
            _ => Err(FileReadError::UnsupportedFormat {
                format: "unsupported decoded sample format".to_string(),
            }),
        }
    }

    /// Drain up to `frames` whole frames off the front of the pending planes.
    fn take_pending(&mut self, frames: usize) -> FrameChunk {
        let frames = frames.min(self.pending_frames);
        let bytes_per_sample = self.spec.format.bytes_per_sample();
        let take = frames * bytes_per_sample;

        let planes = self
            .pending
            .iter_mut()
            .map(|plane| plane.drain(..take).collect())
            .collect();
        self.pending_frames -= frames;

        FrameChunk {
            frames,
            spec: self.spec,
            planes,
        }
    }
}

impl TrackSource for FileTrackSource {
    fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn read_frames(&mut self, max_frames: usize) -> Result<Option<FrameChunk>, FileReadError> {
        while self.pending_frames < max_frames && !self.eof {
            self.fill_pending()?;
        }
        if self.pending_frames == 0 {
            return Ok(None);
        }
        Ok(Some(self.take_pending(max_frames)))
    }
}

/// Opens the real file-backed source. Tests substitute their own openers.
pub struct FileSourceOpener;

impl SourceOpener for FileSourceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>, FileReadError> {
        Ok(Box::new(FileTrackSource::open(path)?))
    }
}
