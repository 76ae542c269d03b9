use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Interval between fade-out volume steps.
pub const FADE_TICK: Duration = Duration::from_millis(100);

/// Timer notifications delivered to the player's foreground loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleEvent {
    /// The shuffle delay ran out; the fade (or the track change) is due.
    DelayElapsed,
    /// One fade interval passed; the volume should step down.
    FadeTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    CountingDown,
    Fading,
}

/// Drives automatic track changes: one countdown per track, optionally
/// followed by a fade-out that steps the volume down every tick.
///
/// The scheduler only emits events; the player applies them, so volume
/// changes and track advances stay on the foreground path. At most one
/// countdown and one fade task exist at a time.
pub struct ShuffleScheduler {
    state: SchedulerState,
    time_remaining: Option<Duration>,
    fade_multiplier: f64,
    fade_duration: Option<f64>,
    fade_ticks: u32,
    deadline: Option<Instant>,
    delay_task: Option<JoinHandle<()>>,
    fade_task: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ShuffleEvent>,
    handle: Handle,
}

impl ShuffleScheduler {
    pub fn new(handle: Handle) -> (Self, mpsc::UnboundedReceiver<ShuffleEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                state: SchedulerState::Idle,
                time_remaining: None,
                fade_multiplier: 1.0,
                fade_duration: None,
                fade_ticks: 0,
                deadline: None,
                delay_task: None,
                fade_task: None,
                events,
                handle,
            },
            receiver,
        )
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Current fade volume multiplier, 1.0 outside a fade.
    pub fn fade_multiplier(&self) -> f64 {
        self.fade_multiplier
    }

    /// Remaining countdown captured by the last pause.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.time_remaining
    }

    /// Begin (or restart) the countdown. A pause snapshot takes precedence
    /// over `configured_seconds`; with neither, the scheduler stays idle.
    pub fn start(&mut self, configured_seconds: Option<f64>, playing: bool) {
        self.halt_timers(playing);

        let delay = self
            .time_remaining
            .take()
            .or_else(|| configured_seconds.map(Duration::from_secs_f64));
        let delay = match delay {
            Some(delay) => delay,
            None => return,
        };

        debug!("Shuffle countdown started: {:.1}s", delay.as_secs_f64());
        self.state = SchedulerState::CountingDown;
        self.deadline = Some(Instant::now() + delay);

        let events = self.events.clone();
        self.delay_task = Some(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ShuffleEvent::DelayElapsed);
        }));
    }

    /// Switch from counting down to fading: a tick fires every `FADE_TICK`
    /// until the player stops the fade or starts the next countdown.
    pub fn begin_fade(&mut self, fade_duration_seconds: f64) {
        if let Some(task) = self.delay_task.take() {
            task.abort();
        }
        if let Some(task) = self.fade_task.take() {
            task.abort();
        }

        debug!("Fade started: {:.1}s", fade_duration_seconds);
        self.state = SchedulerState::Fading;
        self.fade_duration = Some(fade_duration_seconds);
        self.fade_ticks = 0;
        self.deadline = None;

        let events = self.events.clone();
        self.fade_task = Some(self.handle.spawn(async move {
            loop {
                tokio::time::sleep(FADE_TICK).await;
                if events.send(ShuffleEvent::FadeTick).is_err() {
                    break;
                }
            }
        }));
    }

    /// Step the fade volume down one tick and return the new multiplier,
    /// floored at zero.
    pub fn apply_fade_tick(&mut self) -> f64 {
        let duration = match self.fade_duration {
            Some(duration) if duration > 0.0 => duration,
            _ => return self.fade_multiplier,
        };
        self.fade_ticks += 1;
        let faded = self.fade_ticks as f64 * FADE_TICK.as_secs_f64() / duration;
        self.fade_multiplier = (1.0 - faded).max(0.0);
        self.fade_multiplier
    }

    /// Reset the fade volume to full, for when playback (re)starts.
    pub fn reset_fade(&mut self) {
        self.fade_multiplier = 1.0;
        self.fade_ticks = 0;
    }

    /// Halt the timers and remember how much countdown was left, so a later
    /// start resumes where the track left off.
    pub fn pause(&mut self, playing: bool) {
        if self.state == SchedulerState::CountingDown {
            if let Some(deadline) = self.deadline {
                self.time_remaining = Some(deadline.saturating_duration_since(Instant::now()));
            }
        }
        self.halt_timers(playing);
    }

    /// Halt the timers and discard any pause snapshot.
    pub fn stop(&mut self, playing: bool) {
        self.halt_timers(playing);
        self.time_remaining = None;
    }

    /// Abort both timer tasks. The fade volume snaps back to full only when
    /// a track was playing at the time of the halt.
    fn halt_timers(&mut self, playing: bool) {
        if let Some(task) = self.delay_task.take() {
            task.abort();
        }
        if let Some(task) = self.fade_task.take() {
            task.abort();
        }
        self.state = SchedulerState::Idle;
        self.deadline = None;
        self.fade_duration = None;
        if playing {
            self.reset_fade();
        }
    }
}

impl Drop for ShuffleScheduler {
    fn drop(&mut self) {
        self.halt_timers(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (ShuffleScheduler, mpsc::UnboundedReceiver<ShuffleEvent>) {
        ShuffleScheduler::new(Handle::current())
    }

    #[tokio::test]
    async fn test_start_without_delay_stays_idle() {
        let (mut scheduler, mut events) = scheduler();
        scheduler.start(None, true);

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_emits_delay_elapsed() {
        let (mut scheduler, mut events) = scheduler();
        scheduler.start(Some(5.0), true);
        assert_eq!(scheduler.state(), SchedulerState::CountingDown);

        let event = events.recv().await.unwrap();
        assert_eq!(event, ShuffleEvent::DelayElapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_snapshots_remaining_time() {
        let (mut scheduler, _events) = scheduler();
        scheduler.start(Some(10.0), true);

        tokio::time::advance(Duration::from_secs(3)).await;
        scheduler.pause(false);

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.time_remaining(), Some(Duration::from_secs(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_uses_snapshot_over_configured_time() {
        let (mut scheduler, mut events) = scheduler();
        scheduler.start(Some(10.0), true);
        tokio::time::advance(Duration::from_secs(9)).await;
        scheduler.pause(false);

        // Resuming with a long configured time still fires after the
        // remaining second.
        scheduler.start(Some(600.0), true);
        assert!(scheduler.time_remaining().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(events.recv().await.unwrap(), ShuffleEvent::DelayElapsed);
    }

    #[tokio::test]
    async fn test_stop_discards_snapshot() {
        let (mut scheduler, _events) = scheduler();
        scheduler.start(Some(10.0), true);
        scheduler.pause(false);
        assert!(scheduler.time_remaining().is_some());

        scheduler.stop(false);
        assert!(scheduler.time_remaining().is_none());
    }

    #[tokio::test]
    async fn test_fade_steps_down_and_floors_at_zero() {
        let (mut scheduler, _events) = scheduler();
        scheduler.begin_fade(2.0);
        assert_eq!(scheduler.state(), SchedulerState::Fading);

        // 2.0s fade at 0.1s per tick reaches silence on the 20th tick.
        for _ in 0..19 {
            assert!(scheduler.apply_fade_tick() > 0.0);
        }
        assert_eq!(scheduler.apply_fade_tick(), 0.0);
        // Further ticks stay floored.
        assert_eq!(scheduler.apply_fade_tick(), 0.0);
    }

    #[tokio::test]
    async fn test_halt_while_playing_resets_fade_volume() {
        let (mut scheduler, _events) = scheduler();
        scheduler.begin_fade(1.0);
        scheduler.apply_fade_tick();
        assert!(scheduler.fade_multiplier() < 1.0);

        scheduler.stop(true);
        assert_eq!(scheduler.fade_multiplier(), 1.0);
    }

    #[tokio::test]
    async fn test_halt_while_paused_keeps_fade_volume() {
        let (mut scheduler, _events) = scheduler();
        scheduler.begin_fade(1.0);
        let faded = scheduler.apply_fade_tick();

        scheduler.pause(false);
        assert_eq!(scheduler.fade_multiplier(), faded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_countdown() {
        let (mut scheduler, mut events) = scheduler();
        scheduler.start(Some(100.0), true);
        scheduler.start(Some(1.0), true);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(events.recv().await.unwrap(), ShuffleEvent::DelayElapsed);
        // The aborted first countdown never fires.
        assert!(events.try_recv().is_err());
    }
}
