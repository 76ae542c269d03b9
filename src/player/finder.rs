use log::debug;

use crate::config::SettingsProvider;
use crate::models::SampleFormat;

/// Owned snapshot of a loaded track's samples, handed to the detection
/// algorithm so analysis never holds the playback buffer lock.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Vec<u8>,
    pub format: SampleFormat,
    pub channels: u32,
    pub sample_rate: f64,
    pub num_samples: usize,
}

/// Raw detection output: parallel arrays ordered by the algorithm's own
/// ranking. `start_frames[i]` / `end_frames[i]` list the endpoint pairs for
/// duration candidate `i`.
#[derive(Debug, Clone, Default)]
pub struct DetectionOutput {
    pub durations: Vec<usize>,
    pub confidences: Vec<f64>,
    pub start_frames: Vec<Vec<usize>>,
    pub end_frames: Vec<Vec<usize>>,
}

/// Tunable detection knobs, sourced from the settings provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Shortest loop worth proposing, in seconds.
    pub min_loop_duration: f64,
    /// Candidates below this confidence are dropped.
    pub min_confidence: f64,
    /// Analyze a mono mixdown instead of every channel.
    pub mono_analysis: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_loop_duration: 5.0,
            min_confidence: 0.0,
            mono_analysis: true,
        }
    }
}

/// Loop detection algorithm. Implementations hold their own scratch
/// resources, released once through `release_resources`.
pub trait LoopDetector: Send {
    /// Adopt `config`, reporting whether any knob differed from the current
    /// values.
    fn apply_config(&mut self, config: &DetectorConfig) -> bool;

    /// Push the start/end initial estimates (seconds) for the next `detect`.
    /// `None` means no estimate.
    fn set_estimates(&mut self, start_seconds: Option<f64>, end_seconds: Option<f64>);

    /// Analyze the full track and propose loop candidates.
    fn detect(&mut self, audio: &AudioData) -> DetectionOutput;

    /// Free scratch resources. No `detect` calls may follow.
    fn release_resources(&mut self);
}

/// One start/end pair within a duration candidate, rank 1 = best.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopEndpoints {
    pub rank: usize,
    pub start: usize,
    pub end: usize,
}

/// One proposed loop duration with its ranked endpoint pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDuration {
    pub rank: usize,
    pub confidence: f64,
    pub duration: usize,
    pub endpoints: Vec<LoopEndpoints>,
}

/// Memoizing wrapper around a `LoopDetector`.
///
/// Detection over a full track is expensive, so results are reused as long
/// as the initial estimates and the detector settings are unchanged since
/// the last run. Any mismatch forces a fresh detection.
pub struct LoopCandidateCache {
    detector: Box<dyn LoopDetector>,
    use_start_estimate: bool,
    use_end_estimate: bool,
    start_estimate: Option<f64>,
    end_estimate: Option<f64>,
    cached: Option<Vec<LoopDuration>>,
    cached_estimates: Option<(Option<f64>, Option<f64>)>,
    released: bool,
}

impl LoopCandidateCache {
    pub fn new(detector: Box<dyn LoopDetector>) -> Self {
        Self {
            detector,
            use_start_estimate: false,
            use_end_estimate: false,
            start_estimate: None,
            end_estimate: None,
            cached: None,
            cached_estimates: None,
            released: false,
        }
    }

    /// Initial loop-start estimate in seconds, only honored while the use
    /// flag is set.
    pub fn set_start_estimate(&mut self, seconds: Option<f64>) {
        self.start_estimate = seconds;
    }

    pub fn set_end_estimate(&mut self, seconds: Option<f64>) {
        self.end_estimate = seconds;
    }

    pub fn set_use_estimates(&mut self, use_start: bool, use_end: bool) {
        self.use_start_estimate = use_start;
        self.use_end_estimate = use_end;
    }

    /// Drop the memoized result, for when the underlying audio changes.
    pub fn invalidate(&mut self) {
        self.cached = None;
        self.cached_estimates = None;
    }

    /// Ranked loop candidates for `audio`, recomputed only when the
    /// effective estimates or the detector settings changed.
    pub fn find_loop_points(
        &mut self,
        settings: &dyn SettingsProvider,
        audio: &AudioData,
    ) -> Vec<LoopDuration> {
        debug_assert!(!self.released, "cache used after destroy");

        let settings_changed = settings.customize_detector(self.detector.as_mut());

        let start = if self.use_start_estimate {
            self.start_estimate
        } else {
            None
        };
        let end = if self.use_end_estimate {
            self.end_estimate
        } else {
            None
        };

        if !settings_changed && self.cached_estimates == Some((start, end)) {
            if let Some(cached) = &self.cached {
                debug!("Reusing cached loop candidates");
                return cached.clone();
            }
        }

        self.detector.set_estimates(start, end);
        let output = self.detector.detect(audio);
        let candidates = Self::decode(&output);

        self.cached = Some(candidates.clone());
        self.cached_estimates = Some((start, end));
        candidates
    }

    /// Turn the detector's parallel arrays into ranked candidate structs.
    fn decode(output: &DetectionOutput) -> Vec<LoopDuration> {
        output
            .durations
            .iter()
            .enumerate()
            .map(|(i, &duration)| {
                let starts = output.start_frames.get(i).map(Vec::as_slice).unwrap_or(&[]);
                let ends = output.end_frames.get(i).map(Vec::as_slice).unwrap_or(&[]);
                let endpoints = starts
                    .iter()
                    .zip(ends.iter())
                    .enumerate()
                    .map(|(j, (&start, &end))| LoopEndpoints {
                        rank: j + 1,
                        start,
                        end,
                    })
                    .collect();
                LoopDuration {
                    rank: i + 1,
                    confidence: output.confidences.get(i).copied().unwrap_or(0.0),
                    duration,
                    endpoints,
                }
            })
            .collect()
    }

    /// Release the detector's scratch resources. Must be called exactly once
    /// when the cache is retired.
    pub fn destroy(&mut self) {
        if self.released {
            debug_assert!(false, "destroy called twice");
            return;
        }
        self.detector.release_resources();
        self.cached = None;
        self.cached_estimates = None;
        self.released = true;
    }
}
