pub mod finder;
pub mod history;
pub mod shuffle;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::error;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::audio::{
    MediaPool, PlaybackEngine, SharedBufferSlot, SourceOpener, StreamLoader, TrackStore,
};
use crate::config::SettingsProvider;
use crate::error::{PlayerError, SelectionError};
use crate::logging::OperationTimer;
use crate::models::{PlayerEvent, TrackDescriptor};
use finder::AudioData;
use history::TrackHistory;
use shuffle::{SchedulerState, ShuffleEvent, ShuffleScheduler};

pub use finder::{DetectionOutput, DetectorConfig, LoopCandidateCache, LoopDetector, LoopDuration, LoopEndpoints};

/// Rewinding within this many seconds of the track start goes to the
/// previous track instead of restarting the current one.
pub const REWIND_THRESHOLD_SECONDS: f64 = 3.0;

/// Drives the playback engine: track loading, looping, history navigation,
/// and automatic shuffling.
///
/// All control methods run on one foreground context; the only work off that
/// context is buffer ingestion, which synchronizes through the shared buffer
/// slot's generation token.
pub struct PlaybackController {
    engine: Box<dyn PlaybackEngine>,
    store: Box<dyn TrackStore>,
    pool: Box<dyn MediaPool>,
    opener: Box<dyn SourceOpener>,
    settings: Arc<dyn SettingsProvider + Send + Sync>,
    slot: SharedBufferSlot,
    loader: StreamLoader,
    history: TrackHistory,
    scheduler: ShuffleScheduler,
    shuffle_events: mpsc::UnboundedReceiver<ShuffleEvent>,
    events: broadcast::Sender<PlayerEvent>,
    pending_chains: Vec<JoinHandle<()>>,
    current_track: TrackDescriptor,
    sample_rate: f64,
    playing: bool,
    paused: bool,
    interrupted: bool,
}

impl PlaybackController {
    pub fn new(
        engine: Box<dyn PlaybackEngine>,
        store: Box<dyn TrackStore>,
        pool: Box<dyn MediaPool>,
        opener: Box<dyn SourceOpener>,
        settings: Arc<dyn SettingsProvider + Send + Sync>,
        handle: Handle,
    ) -> Self {
        let slot = SharedBufferSlot::new();
        let loader = StreamLoader::new(slot.clone(), handle.clone());
        let (scheduler, shuffle_events) = ShuffleScheduler::new(handle);
        let (events, _) = broadcast::channel(16);

        Self {
            engine,
            store,
            pool,
            opener,
            settings,
            slot,
            loader,
            history: TrackHistory::new(),
            scheduler,
            shuffle_events,
            events,
            pending_chains: Vec::new(),
            current_track: TrackDescriptor::blank(),
            sample_rate: 44100.0,
            playing: false,
            paused: false,
            interrupted: false,
        }
    }

    /// Stop the current track, stream in `path`, apply its stored loop
    /// points, and start playing.
    ///
    /// A failure anywhere in the synchronous part leaves the player stopped
    /// with its previous track descriptor intact.
    pub fn load_track(&mut self, path: &Path, update_history: bool) -> Result<(), PlayerError> {
        self.load_track_with(path, update_history, true)
    }

    fn load_track_with(
        &mut self,
        path: &Path,
        update_history: bool,
        start_playing: bool,
    ) -> Result<(), PlayerError> {
        let timer = OperationTimer::new(format!("load {}", path.display()));

        self.stop()?;
        let generation = self.slot.invalidate();

        let mut track = self.store.load_track(path)?;
        let source = self.opener.open(path)?;
        let begin = self.loader.begin_load(source, generation)?;

        if let Err(err) = self.engine.load_audio(&begin.spec, begin.total_frames) {
            // The background chain must not keep filling a buffer the engine
            // never accepted.
            self.slot.invalidate();
            return Err(err.into());
        }
        if let Some(chain) = begin.background {
            self.pending_chains.retain(|c| !c.is_finished());
            self.pending_chains.push(chain);
        }

        self.sample_rate = begin.spec.sample_rate;

        if update_history {
            self.history
                .remember(path, self.settings.shuffle_history_length());
        }

        // A stored loop end of exactly zero means "unset": loop the whole track.
        if track.loop_end == 0.0 {
            track.loop_end = begin.total_frames as f64 / begin.spec.sample_rate;
        }
        self.current_track = track;
        self.apply_loop_points()?;
        self.engine.set_loop_playback(true)?;

        if start_playing {
            self.play()?;
        }

        let _ = self.events.send(PlayerEvent::TrackChanged);
        timer.finish_with_threshold(Duration::from_millis(500));
        Ok(())
    }

    pub fn play(&mut self) -> Result<(), PlayerError> {
        if self.playing {
            return Ok(());
        }
        self.engine.play()?;
        self.playing = true;
        self.paused = false;
        self.interrupted = false;
        self.scheduler.reset_fade();
        self.update_volume()?;
        self.scheduler.start(
            self.settings.calculate_shuffle_time(&self.current_track),
            true,
        );
        Ok(())
    }

    /// Pause playback, remembering whether the pause came from an external
    /// interruption rather than the user.
    pub fn pause(&mut self, interrupted: bool) -> Result<(), PlayerError> {
        if !self.playing {
            return Ok(());
        }
        self.engine.pause()?;
        self.playing = false;
        self.paused = true;
        self.interrupted = interrupted;
        // The fade level survives a pause; resuming resets it to full.
        self.scheduler.pause(false);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), PlayerError> {
        let was_playing = self.playing;
        if self.playing || self.paused {
            self.engine.stop()?;
        }
        self.playing = false;
        self.paused = false;
        self.interrupted = false;
        self.scheduler.stop(was_playing);
        Ok(())
    }

    /// Go to the previous track when near the start of the current one,
    /// otherwise jump back to the loop start without changing play state.
    pub fn rewind(&mut self) -> Result<(), PlayerError> {
        let position = self.samples_to_seconds(self.engine.sample_counter());
        if position < REWIND_THRESHOLD_SECONDS && self.history.has_previous() {
            return self.load_previous_track();
        }
        let start = self.seconds_to_samples(self.current_track.loop_start);
        self.engine.set_sample_counter(start)?;
        Ok(())
    }

    /// Step forward through history, or pick a random track past its end.
    /// The prior play/pause state carries over to the new track.
    pub fn load_next_track(&mut self) -> Result<(), PlayerError> {
        let was_playing = self.playing;
        match self.history.advance().cloned() {
            Some(path) => self.load_track_with(&path, false, was_playing),
            None => {
                let path = self.choose_random_track()?;
                self.load_track_with(&path, true, was_playing)
            }
        }
    }

    /// Step backward through history. Fails without touching any state when
    /// already at the oldest remembered track.
    pub fn load_previous_track(&mut self) -> Result<(), PlayerError> {
        let was_playing = self.playing;
        let path = self.history.retreat()?.clone();
        self.load_track_with(&path, false, was_playing)
    }

    /// Reload every track in the active pool in order, leaving history
    /// untouched. Used after store migrations; the last track ends up
    /// loaded and playing, like any other load.
    pub fn reload_all_tracks(&mut self) -> Result<(), PlayerError> {
        for path in self.pool.tracks_in_active_selection() {
            self.load_track(&path, false)?;
        }
        Ok(())
    }

    /// Load a randomly chosen track from the pool and play it.
    pub fn randomize_track(&mut self) -> Result<(), PlayerError> {
        let path = self.choose_random_track()?;
        self.load_track_with(&path, true, true)
    }

    /// Uniform pick preferring tracks not yet in history; when everything
    /// has been played, fall back to the full pool, avoiding an immediate
    /// repeat if any alternative exists.
    fn choose_random_track(&self) -> Result<PathBuf, SelectionError> {
        let pool = self.pool.tracks_in_active_selection();
        if pool.is_empty() {
            return Err(SelectionError::NoEligibleTracks);
        }

        let fresh: Vec<PathBuf> = pool
            .iter()
            .filter(|p| !self.history.contains(p))
            .cloned()
            .collect();

        let candidates = if !fresh.is_empty() {
            fresh
        } else if pool.len() > 1 {
            let repeat_free: Vec<PathBuf> = pool
                .iter()
                .filter(|p| **p != self.current_track.path)
                .cloned()
                .collect();
            if repeat_free.is_empty() {
                pool
            } else {
                repeat_free
            }
        } else {
            pool
        };

        let index = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[index].clone())
    }

    /// Apply one timer notification. Runs on the foreground path, so any
    /// track change it triggers follows the same serialized route as a user
    /// action.
    pub fn handle_shuffle_event(&mut self, event: ShuffleEvent) {
        match event {
            ShuffleEvent::DelayElapsed => match self.settings.fade_duration() {
                Some(duration) if duration > 0.0 => self.scheduler.begin_fade(duration),
                _ => self.advance_track(),
            },
            ShuffleEvent::FadeTick => {
                if self.scheduler.state() != SchedulerState::Fading {
                    return;
                }
                let multiplier = self.scheduler.apply_fade_tick();
                if let Err(err) = self.update_volume() {
                    error!("Volume update during fade failed: {}", err.user_message());
                }
                if multiplier <= 0.0 {
                    self.advance_track();
                }
            }
        }
    }

    /// Handle all timer notifications queued since the last call.
    pub fn pump_shuffle_events(&mut self) {
        while let Ok(event) = self.shuffle_events.try_recv() {
            self.handle_shuffle_event(event);
        }
    }

    /// Timer-driven track changes never propagate errors; playback stays in
    /// its last valid state.
    fn advance_track(&mut self) {
        if let Err(err) = self.load_next_track() {
            error!("Automatic track change failed: {}", err.user_message());
        }
    }

    /// Seconds at the current sample rate.
    pub fn samples_to_seconds(&self, samples: i64) -> f64 {
        samples as f64 / self.sample_rate
    }

    /// Nearest whole sample at the current sample rate.
    pub fn seconds_to_samples(&self, seconds: f64) -> i64 {
        (seconds * self.sample_rate).round() as i64
    }

    pub fn loop_start_samples(&self) -> i64 {
        self.engine.loop_start()
    }

    pub fn loop_end_samples(&self) -> i64 {
        self.engine.loop_end()
    }

    pub fn loop_start_seconds(&self) -> f64 {
        self.samples_to_seconds(self.engine.loop_start())
    }

    pub fn loop_end_seconds(&self) -> f64 {
        self.samples_to_seconds(self.engine.loop_end())
    }

    pub fn set_loop_start_seconds(&mut self, seconds: f64) -> Result<(), PlayerError> {
        self.current_track.loop_start = seconds;
        let end = self.engine.loop_end();
        self.engine
            .set_loop_points(self.seconds_to_samples(seconds), end)?;
        Ok(())
    }

    pub fn set_loop_end_seconds(&mut self, seconds: f64) -> Result<(), PlayerError> {
        self.current_track.loop_end = seconds;
        let start = self.engine.loop_start();
        self.engine
            .set_loop_points(start, self.seconds_to_samples(seconds))?;
        Ok(())
    }

    pub fn set_loop_start_samples(&mut self, samples: i64) -> Result<(), PlayerError> {
        self.current_track.loop_start = self.samples_to_seconds(samples);
        let end = self.engine.loop_end();
        self.engine.set_loop_points(samples, end)?;
        Ok(())
    }

    pub fn set_loop_end_samples(&mut self, samples: i64) -> Result<(), PlayerError> {
        self.current_track.loop_end = self.samples_to_seconds(samples);
        let start = self.engine.loop_start();
        self.engine.set_loop_points(start, samples)?;
        Ok(())
    }

    /// Push the descriptor's loop points into the engine, in samples.
    fn apply_loop_points(&mut self) -> Result<(), PlayerError> {
        self.engine.set_loop_points(
            self.seconds_to_samples(self.current_track.loop_start),
            self.seconds_to_samples(self.current_track.loop_end),
        )?;
        Ok(())
    }

    /// Whether the engine wraps playback at the loop points.
    pub fn loop_playback(&self) -> bool {
        self.engine.loop_playback()
    }

    pub fn set_loop_playback(&mut self, enabled: bool) -> Result<(), PlayerError> {
        self.engine.set_loop_playback(enabled)?;
        Ok(())
    }

    /// Write the descriptor's loop points back to the persistent store.
    pub fn save_loop_points(&mut self) -> Result<(), PlayerError> {
        self.store.update_loop_points(&self.current_track)
    }

    pub fn volume_multiplier(&self) -> f64 {
        self.current_track.volume_multiplier
    }

    pub fn set_volume_multiplier(&mut self, volume: f64) -> Result<(), PlayerError> {
        self.current_track.volume_multiplier = volume;
        self.update_volume()
    }

    pub fn save_volume_multiplier(&mut self) -> Result<(), PlayerError> {
        self.store.update_volume_multiplier(&self.current_track)
    }

    /// Effective engine volume: per-track multiplier scaled by the global
    /// volume and the fade multiplier.
    fn update_volume(&mut self) -> Result<(), PlayerError> {
        let volume = self.current_track.volume_multiplier
            * self.settings.master_volume()
            * self.scheduler.fade_multiplier();
        self.engine.set_volume_multiplier(volume)?;
        Ok(())
    }

    pub fn playback_position_seconds(&self) -> f64 {
        self.samples_to_seconds(self.engine.sample_counter())
    }

    pub fn set_playback_position_seconds(&mut self, seconds: f64) -> Result<(), PlayerError> {
        let samples = self.seconds_to_samples(seconds);
        self.engine.set_sample_counter(samples)?;
        Ok(())
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples_to_seconds(self.engine.num_samples() as i64)
    }

    pub fn current_track(&self) -> &TrackDescriptor {
        &self.current_track
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn history(&self) -> &TrackHistory {
        &self.history
    }

    /// Re-prune history against the current configured maximum.
    pub fn prune_track_history(&mut self) {
        self.history.prune(self.settings.shuffle_history_length());
    }

    /// Owned copy of the loaded track's samples for loop analysis.
    pub fn audio_data(&self) -> Result<AudioData, PlayerError> {
        self.slot.snapshot().ok_or(PlayerError::PlaybackBufferEmpty)
    }

    /// Notifications of track changes.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Wait for any in-flight ingestion chains to settle.
    pub async fn wait_for_ingest(&mut self) {
        for chain in self.pending_chains.drain(..) {
            let _ = chain.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TrackSource;
    use crate::error::{EngineError, FileReadError};
    use crate::models::{ChannelLayout, FrameChunk, SampleFormat, SourceSpec};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const RATE: f64 = 44100.0;

    #[derive(Default)]
    struct EngineState {
        playing: bool,
        loaded_samples: usize,
        loop_start: i64,
        loop_end: i64,
        counter: i64,
        volume: f64,
        loop_playback: bool,
        fail_load: bool,
        plays: usize,
    }

    #[derive(Clone)]
    struct MockEngine {
        state: Arc<Mutex<EngineState>>,
    }

    impl MockEngine {
        fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(EngineState {
                    volume: 1.0,
                    ..Default::default()
                })),
            }
        }
    }

    impl PlaybackEngine for MockEngine {
        fn load_audio(
            &mut self,
            _spec: &SourceSpec,
            total_samples: usize,
        ) -> Result<(), EngineError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_load {
                return Err(EngineError::Status {
                    operation: "load audio",
                    status: -1,
                });
            }
            state.loaded_samples = total_samples;
            Ok(())
        }

        fn play(&mut self) -> Result<(), EngineError> {
            let mut state = self.state.lock().unwrap();
            state.playing = true;
            state.plays += 1;
            Ok(())
        }

        fn pause(&mut self) -> Result<(), EngineError> {
            self.state.lock().unwrap().playing = false;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), EngineError> {
            let mut state = self.state.lock().unwrap();
            state.playing = false;
            state.counter = 0;
            Ok(())
        }

        fn set_loop_points(&mut self, start: i64, end: i64) -> Result<(), EngineError> {
            let mut state = self.state.lock().unwrap();
            state.loop_start = start;
            state.loop_end = end;
            Ok(())
        }

        fn set_volume_multiplier(&mut self, volume: f64) -> Result<(), EngineError> {
            self.state.lock().unwrap().volume = volume;
            Ok(())
        }

        fn sample_counter(&self) -> i64 {
            self.state.lock().unwrap().counter
        }

        fn set_sample_counter(&mut self, counter: i64) -> Result<(), EngineError> {
            self.state.lock().unwrap().counter = counter;
            Ok(())
        }

        fn loop_start(&self) -> i64 {
            self.state.lock().unwrap().loop_start
        }

        fn loop_end(&self) -> i64 {
            self.state.lock().unwrap().loop_end
        }

        fn num_samples(&self) -> usize {
            self.state.lock().unwrap().loaded_samples
        }

        fn set_loop_playback(&mut self, enabled: bool) -> Result<(), EngineError> {
            self.state.lock().unwrap().loop_playback = enabled;
            Ok(())
        }

        fn loop_playback(&self) -> bool {
            self.state.lock().unwrap().loop_playback
        }
    }

    #[derive(Default)]
    struct StoreState {
        descriptors: HashMap<PathBuf, TrackDescriptor>,
        saved_loops: Vec<TrackDescriptor>,
        saved_volumes: Vec<TrackDescriptor>,
    }

    #[derive(Clone)]
    struct MockStore {
        state: Arc<Mutex<StoreState>>,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(StoreState::default())),
            }
        }

        fn insert(&self, descriptor: TrackDescriptor) {
            self.state
                .lock()
                .unwrap()
                .descriptors
                .insert(descriptor.path.clone(), descriptor);
        }
    }

    impl TrackStore for MockStore {
        fn load_track(&mut self, path: &Path) -> Result<TrackDescriptor, PlayerError> {
            let state = self.state.lock().unwrap();
            Ok(state
                .descriptors
                .get(path)
                .cloned()
                .unwrap_or_else(|| TrackDescriptor {
                    path: path.to_path_buf(),
                    loop_start: 0.0,
                    loop_end: 0.0,
                    volume_multiplier: 1.0,
                }))
        }

        fn update_volume_multiplier(
            &mut self,
            track: &TrackDescriptor,
        ) -> Result<(), PlayerError> {
            self.state.lock().unwrap().saved_volumes.push(track.clone());
            Ok(())
        }

        fn update_loop_points(&mut self, track: &TrackDescriptor) -> Result<(), PlayerError> {
            self.state.lock().unwrap().saved_loops.push(track.clone());
            Ok(())
        }
    }

    struct MockPool {
        tracks: Vec<PathBuf>,
    }

    impl MediaPool for MockPool {
        fn tracks_in_active_selection(&self) -> Vec<PathBuf> {
            self.tracks.clone()
        }
    }

    struct StubSettings {
        master_volume: f64,
        history_length: Option<usize>,
        fade_duration: Option<f64>,
        shuffle_time: Option<f64>,
    }

    impl Default for StubSettings {
        fn default() -> Self {
            Self {
                master_volume: 1.0,
                history_length: Some(10),
                fade_duration: None,
                shuffle_time: None,
            }
        }
    }

    impl SettingsProvider for StubSettings {
        fn customize_detector(&self, _detector: &mut dyn LoopDetector) -> bool {
            false
        }

        fn shuffle_history_length(&self) -> Option<usize> {
            self.history_length
        }

        fn fade_duration(&self) -> Option<f64> {
            self.fade_duration
        }

        fn calculate_shuffle_time(&self, _track: &TrackDescriptor) -> Option<f64> {
            self.shuffle_time
        }

        fn master_volume(&self) -> f64 {
            self.master_volume
        }
    }

    /// Synthesizes mono 16-bit tracks of a fixed frame count per path.
    struct MemoryOpener {
        frames_by_path: HashMap<PathBuf, usize>,
        opens: Arc<AtomicUsize>,
    }

    impl MemoryOpener {
        fn new(tracks: &[(&str, usize)]) -> Self {
            Self {
                frames_by_path: tracks
                    .iter()
                    .map(|(name, frames)| (PathBuf::from(name), *frames))
                    .collect(),
                opens: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SourceOpener for MemoryOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>, FileReadError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let total_frames =
                *self
                    .frames_by_path
                    .get(path)
                    .ok_or_else(|| FileReadError::Open {
                        path: path.display().to_string(),
                        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such track"),
                    })?;
            Ok(Box::new(MemorySource {
                total_frames,
                position: 0,
            }))
        }
    }

    struct MemorySource {
        total_frames: usize,
        position: usize,
    }

    impl MemorySource {
        fn spec() -> SourceSpec {
            SourceSpec {
                channels: 1,
                sample_rate: RATE,
                format: SampleFormat::Int16,
                layout: ChannelLayout::Planar,
            }
        }
    }

    impl TrackSource for MemorySource {
        fn total_frames(&self) -> usize {
            self.total_frames
        }

        fn spec(&self) -> SourceSpec {
            Self::spec()
        }

        fn read_frames(&mut self, max_frames: usize) -> Result<Option<FrameChunk>, FileReadError> {
            if self.position >= self.total_frames {
                return Ok(None);
            }
            let frames = max_frames.min(self.total_frames - self.position);
            self.position += frames;
            Ok(Some(FrameChunk {
                frames,
                spec: Self::spec(),
                planes: vec![vec![0u8; frames * 2]],
            }))
        }
    }

    struct Fixture {
        controller: PlaybackController,
        engine: MockEngine,
        store: MockStore,
    }

    fn fixture(tracks: &[(&str, usize)], settings: StubSettings) -> Fixture {
        let engine = MockEngine::new();
        let store = MockStore::new();
        let pool = MockPool {
            tracks: tracks.iter().map(|(name, _)| PathBuf::from(name)).collect(),
        };
        let controller = PlaybackController::new(
            Box::new(engine.clone()),
            Box::new(store.clone()),
            Box::new(pool),
            Box::new(MemoryOpener::new(tracks)),
            Arc::new(settings),
            Handle::current(),
        );
        Fixture {
            controller,
            engine,
            store,
        }
    }

    fn ten_seconds() -> usize {
        (10.0 * RATE) as usize
    }

    #[tokio::test]
    async fn test_load_track_defaults_loop_end_to_duration() {
        let mut fx = fixture(&[("a", ten_seconds())], StubSettings::default());

        fx.controller
            .load_track(Path::new("a"), true)
            .unwrap();

        // A stored loop end of 0 means the loop spans the whole 10s track.
        assert_eq!(fx.controller.current_track().loop_end, 10.0);
        assert_eq!(fx.controller.loop_end_samples(), 441000);
        assert_eq!(fx.controller.loop_end_seconds(), 10.0);
        assert!(fx.controller.is_playing());
    }

    #[tokio::test]
    async fn test_load_track_keeps_stored_loop_points() {
        let fx = fixture(&[("a", ten_seconds())], StubSettings::default());
        fx.store.insert(TrackDescriptor {
            path: PathBuf::from("a"),
            loop_start: 2.0,
            loop_end: 8.0,
            volume_multiplier: 0.5,
        });
        let mut controller = fx.controller;

        controller.load_track(Path::new("a"), true).unwrap();

        assert_eq!(controller.loop_start_samples(), 88200);
        assert_eq!(controller.loop_end_samples(), 352800);
        assert_eq!(fx.engine.state.lock().unwrap().volume, 0.5);
    }

    #[tokio::test]
    async fn test_load_track_records_history() {
        let mut fx = fixture(
            &[("a", 1000), ("b", 1000)],
            StubSettings::default(),
        );

        fx.controller.load_track(Path::new("a"), true).unwrap();
        fx.controller.load_track(Path::new("b"), true).unwrap();

        assert_eq!(fx.controller.history().len(), 2);
        assert_eq!(fx.controller.history().index(), 1);

        // Suppressed history updates leave the list alone.
        fx.controller.load_track(Path::new("a"), false).unwrap();
        assert_eq!(fx.controller.history().len(), 2);
    }

    #[tokio::test]
    async fn test_history_caps_at_configured_length() {
        let settings = StubSettings {
            history_length: Some(3),
            ..Default::default()
        };
        let mut fx = fixture(
            &[("a", 1000), ("b", 1000), ("c", 1000), ("d", 1000)],
            settings,
        );

        for name in ["a", "b", "c", "d"] {
            fx.controller.load_track(Path::new(name), true).unwrap();
        }

        let history = fx.controller.history();
        assert_eq!(history.len(), 3);
        assert!(!history.contains(Path::new("a")));
        assert!(history.contains(Path::new("b")));
        assert_eq!(history.last(), Some(&PathBuf::from("d")));
        assert_eq!(history.index(), 2);
    }

    #[tokio::test]
    async fn test_previous_track_fails_at_oldest_without_mutation() {
        let mut fx = fixture(&[("a", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();

        let result = fx.controller.load_previous_track();
        assert!(matches!(
            result,
            Err(PlayerError::Selection(SelectionError::NoPreviousTrack))
        ));
        assert_eq!(fx.controller.history().len(), 1);
        assert_eq!(fx.controller.history().index(), 0);
        assert_eq!(fx.controller.current_track().path, PathBuf::from("a"));
    }

    #[tokio::test]
    async fn test_previous_and_next_walk_history() {
        let mut fx = fixture(
            &[("a", 1000), ("b", 1000), ("c", 1000)],
            StubSettings::default(),
        );
        for name in ["a", "b", "c"] {
            fx.controller.load_track(Path::new(name), true).unwrap();
        }

        fx.controller.load_previous_track().unwrap();
        assert_eq!(fx.controller.current_track().path, PathBuf::from("b"));
        // No duplicate entry was appended.
        assert_eq!(fx.controller.history().len(), 3);

        fx.controller.load_next_track().unwrap();
        assert_eq!(fx.controller.current_track().path, PathBuf::from("c"));
        assert_eq!(fx.controller.history().len(), 3);
    }

    #[tokio::test]
    async fn test_next_at_history_end_randomizes() {
        let mut fx = fixture(&[("a", 1000), ("b", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();

        fx.controller.load_next_track().unwrap();

        // "a" is in history, so the random pick must be "b".
        assert_eq!(fx.controller.current_track().path, PathBuf::from("b"));
        assert_eq!(fx.controller.history().len(), 2);
    }

    #[tokio::test]
    async fn test_next_while_paused_stays_stopped_through_random_fallback() {
        let mut fx = fixture(&[("a", 1000), ("b", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();
        fx.controller.pause(false).unwrap();

        fx.controller.load_next_track().unwrap();

        assert_eq!(fx.controller.current_track().path, PathBuf::from("b"));
        assert!(!fx.controller.is_playing());
        assert!(!fx.engine.state.lock().unwrap().playing);
    }

    #[tokio::test]
    async fn test_randomize_avoids_immediate_repeat_when_all_played() {
        let settings = StubSettings {
            history_length: Some(1),
            ..Default::default()
        };
        let mut fx = fixture(&[("a", 1000), ("b", 1000)], settings);
        fx.controller.load_track(Path::new("a"), true).unwrap();

        // History holds only "a"; both tracks cycle through the repeat
        // filter, never picking the current track twice in a row.
        for _ in 0..5 {
            let before = fx.controller.current_track().path.clone();
            fx.controller.randomize_track().unwrap();
            assert_ne!(fx.controller.current_track().path, before);
        }
    }

    #[tokio::test]
    async fn test_randomize_fails_on_empty_pool() {
        let mut fx = fixture(&[], StubSettings::default());
        let result = fx.controller.randomize_track();
        assert!(matches!(
            result,
            Err(PlayerError::Selection(SelectionError::NoEligibleTracks))
        ));
    }

    #[tokio::test]
    async fn test_failed_load_preserves_previous_track() {
        let mut fx = fixture(&[("a", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();

        let result = fx.controller.load_track(Path::new("missing"), true);
        assert!(matches!(result, Err(PlayerError::FileRead(_))));
        assert_eq!(fx.controller.current_track().path, PathBuf::from("a"));
        // The failed load stopped playback and never restarted it.
        assert!(!fx.controller.is_playing());
    }

    #[tokio::test]
    async fn test_engine_load_failure_cancels_ingestion() {
        let fx = fixture(&[("a", 1000)], StubSettings::default());
        fx.engine.state.lock().unwrap().fail_load = true;
        let mut controller = fx.controller;

        let result = controller.load_track(Path::new("a"), true);
        assert!(matches!(result, Err(PlayerError::Engine(_))));
        // The buffer slot was invalidated, so no stale audio lingers.
        assert!(controller.audio_data().is_err());
    }

    #[tokio::test]
    async fn test_samples_seconds_round_trip() {
        let fx = fixture(&[], StubSettings::default());
        for samples in [0i64, 1, 44100, 441000, 1234567] {
            let seconds = fx.controller.samples_to_seconds(samples);
            let round_tripped = fx.controller.seconds_to_samples(seconds);
            assert!((round_tripped - samples).abs() <= 1);
        }
        assert_eq!(fx.controller.seconds_to_samples(10.0), 441000);
    }

    #[tokio::test]
    async fn test_rewind_restarts_from_loop_start() {
        let fx = fixture(&[("a", ten_seconds())], StubSettings::default());
        fx.store.insert(TrackDescriptor {
            path: PathBuf::from("a"),
            loop_start: 1.0,
            loop_end: 9.0,
            volume_multiplier: 1.0,
        });
        let mut controller = fx.controller;
        controller.load_track(Path::new("a"), true).unwrap();

        // Far enough in that rewind stays on this track.
        controller.set_playback_position_seconds(5.0).unwrap();
        controller.rewind().unwrap();

        assert_eq!(fx.engine.state.lock().unwrap().counter, 44100);
        assert!(controller.is_playing());
    }

    #[tokio::test]
    async fn test_rewind_near_start_goes_to_previous_track() {
        let mut fx = fixture(&[("a", 1000), ("b", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();
        fx.controller.load_track(Path::new("b"), true).unwrap();

        // Fresh loads sit at position 0, inside the rewind threshold.
        fx.controller.rewind().unwrap();
        assert_eq!(fx.controller.current_track().path, PathBuf::from("a"));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let mut fx = fixture(&[("a", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();

        fx.controller.pause(true).unwrap();
        assert!(!fx.controller.is_playing());
        assert!(fx.controller.is_paused());
        assert!(fx.controller.was_interrupted());
        assert!(!fx.engine.state.lock().unwrap().playing);

        fx.controller.play().unwrap();
        assert!(fx.controller.is_playing());
        assert!(!fx.controller.was_interrupted());
    }

    #[tokio::test]
    async fn test_redundant_play_is_a_no_op() {
        let mut fx = fixture(&[("a", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();
        assert_eq!(fx.engine.state.lock().unwrap().plays, 1);

        // Playing again while already playing must not touch the engine or
        // restart the shuffle countdown.
        fx.controller.play().unwrap();
        assert_eq!(fx.engine.state.lock().unwrap().plays, 1);
        assert!(fx.controller.is_playing());
    }

    #[tokio::test]
    async fn test_pause_keeps_fade_level_until_resume() {
        let settings = StubSettings {
            fade_duration: Some(2.0),
            ..Default::default()
        };
        let mut fx = fixture(&[("a", 1000)], settings);
        fx.controller.load_track(Path::new("a"), true).unwrap();

        fx.controller.handle_shuffle_event(ShuffleEvent::DelayElapsed);
        fx.controller.handle_shuffle_event(ShuffleEvent::FadeTick);
        assert!(fx.engine.state.lock().unwrap().volume < 1.0);

        fx.controller.pause(false).unwrap();
        // The paused fade level still scales volume updates.
        fx.controller.set_volume_multiplier(1.0).unwrap();
        assert!(fx.engine.state.lock().unwrap().volume < 1.0);

        // Resuming snaps back to full volume.
        fx.controller.play().unwrap();
        assert!((fx.engine.state.lock().unwrap().volume - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_volume_combines_track_master_and_fade() {
        let settings = StubSettings {
            master_volume: 0.5,
            ..Default::default()
        };
        let fx = fixture(&[("a", 1000)], settings);
        fx.store.insert(TrackDescriptor {
            path: PathBuf::from("a"),
            loop_start: 0.0,
            loop_end: 0.0,
            volume_multiplier: 0.8,
        });
        let mut controller = fx.controller;

        controller.load_track(Path::new("a"), true).unwrap();
        assert!((fx.engine.state.lock().unwrap().volume - 0.4).abs() < 1e-9);

        controller.set_volume_multiplier(0.5).unwrap();
        assert!((fx.engine.state.lock().unwrap().volume - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_save_loop_points_and_volume() {
        let mut fx = fixture(&[("a", ten_seconds())], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();

        fx.controller.set_loop_start_seconds(1.5).unwrap();
        fx.controller.set_loop_end_seconds(8.5).unwrap();
        fx.controller.save_loop_points().unwrap();
        fx.controller.set_volume_multiplier(0.7).unwrap();
        fx.controller.save_volume_multiplier().unwrap();

        let state = fx.store.state.lock().unwrap();
        assert_eq!(state.saved_loops.len(), 1);
        assert_eq!(state.saved_loops[0].loop_start, 1.5);
        assert_eq!(state.saved_loops[0].loop_end, 8.5);
        assert_eq!(state.saved_volumes.len(), 1);
        assert_eq!(state.saved_volumes[0].volume_multiplier, 0.7);
    }

    #[tokio::test]
    async fn test_fade_advances_exactly_once() {
        let settings = StubSettings {
            fade_duration: Some(2.0),
            shuffle_time: Some(60.0),
            ..Default::default()
        };
        let mut fx = fixture(&[("a", 1000), ("b", 1000)], settings);
        fx.controller.load_track(Path::new("a"), true).unwrap();
        let mut track_changes = fx.controller.subscribe();
        // Consume nothing yet; count changes after the fade.

        fx.controller.handle_shuffle_event(ShuffleEvent::DelayElapsed);

        // 2.0s fade at 0.1s ticks: silence on the 20th tick triggers the
        // change; extra queued ticks are ignored after the new track starts.
        for _ in 0..25 {
            fx.controller.handle_shuffle_event(ShuffleEvent::FadeTick);
        }

        assert_eq!(fx.controller.current_track().path, PathBuf::from("b"));
        let mut changes = 0;
        while track_changes.try_recv().is_ok() {
            changes += 1;
        }
        assert_eq!(changes, 1);
        // The new track plays at full volume.
        assert_eq!(fx.engine.state.lock().unwrap().volume, 1.0);
    }

    #[tokio::test]
    async fn test_delay_without_fade_advances_immediately() {
        let settings = StubSettings {
            fade_duration: None,
            shuffle_time: Some(60.0),
            ..Default::default()
        };
        let mut fx = fixture(&[("a", 1000), ("b", 1000)], settings);
        fx.controller.load_track(Path::new("a"), true).unwrap();

        fx.controller.handle_shuffle_event(ShuffleEvent::DelayElapsed);
        assert_eq!(fx.controller.current_track().path, PathBuf::from("b"));
    }

    #[tokio::test]
    async fn test_failed_automatic_advance_keeps_playing() {
        let settings = StubSettings {
            shuffle_time: Some(60.0),
            ..Default::default()
        };
        // The pool is empty, so the timer-driven advance has nothing to pick
        // and playback must carry on undisturbed.
        let engine = MockEngine::new();
        let mut controller = PlaybackController::new(
            Box::new(engine.clone()),
            Box::new(MockStore::new()),
            Box::new(MockPool { tracks: Vec::new() }),
            Box::new(MemoryOpener::new(&[("a", 1000)])),
            Arc::new(settings),
            Handle::current(),
        );
        controller.load_track(Path::new("a"), true).unwrap();

        controller.handle_shuffle_event(ShuffleEvent::DelayElapsed);

        assert_eq!(controller.current_track().path, PathBuf::from("a"));
        assert!(controller.is_playing());
        assert!(engine.state.lock().unwrap().playing);
    }

    #[tokio::test]
    async fn test_audio_data_requires_loaded_track() {
        let fx = fixture(&[("a", 1000)], StubSettings::default());
        assert!(matches!(
            fx.controller.audio_data(),
            Err(PlayerError::PlaybackBufferEmpty)
        ));

        let mut controller = fx.controller;
        controller.load_track(Path::new("a"), true).unwrap();
        controller.wait_for_ingest().await;

        let data = controller.audio_data().unwrap();
        assert_eq!(data.num_samples, 1000);
        assert_eq!(data.sample_rate, RATE);
    }

    #[tokio::test]
    async fn test_loads_prune_history_as_they_go() {
        let settings = StubSettings {
            history_length: Some(2),
            ..Default::default()
        };
        let mut fx = fixture(
            &[("a", 1000), ("b", 1000), ("c", 1000)],
            settings,
        );
        for name in ["a", "b", "c"] {
            fx.controller.load_track(Path::new(name), true).unwrap();
        }
        assert_eq!(fx.controller.history().len(), 2);
        assert_eq!(fx.controller.history().index(), 1);

        // Re-pruning against the same limit changes nothing.
        fx.controller.prune_track_history();
        assert_eq!(fx.controller.history().len(), 2);
        assert_eq!(fx.controller.history().index(), 1);
    }

    #[tokio::test]
    async fn test_reload_all_tracks_leaves_history_untouched() {
        let mut fx = fixture(
            &[("a", 1000), ("b", 1000), ("c", 1000)],
            StubSettings::default(),
        );
        fx.controller.load_track(Path::new("a"), true).unwrap();

        fx.controller.reload_all_tracks().unwrap();

        assert_eq!(fx.controller.history().len(), 1);
        assert_eq!(fx.controller.history().last(), Some(&PathBuf::from("a")));
        // The pool is reloaded in order, so its last entry ends up playing.
        assert_eq!(fx.controller.current_track().path, PathBuf::from("c"));
        assert!(fx.controller.is_playing());
    }

    #[tokio::test]
    async fn test_loop_playback_passthrough() {
        let mut fx = fixture(&[("a", 1000)], StubSettings::default());
        fx.controller.load_track(Path::new("a"), true).unwrap();

        // Loading always enables loop playback.
        assert!(fx.controller.loop_playback());

        fx.controller.set_loop_playback(false).unwrap();
        assert!(!fx.controller.loop_playback());
        assert!(!fx.engine.state.lock().unwrap().loop_playback);
    }
}
