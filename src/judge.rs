//! Beat judgment: accuracy scoring, beat elimination, miss detection.
//!
//! A [`Judge`] owns the clock, the timing grid, the timer queue and the bar
//! schedulers, so every moving part reads the same notion of "now". The
//! host pumps it with [`Judge::run_due`] and interrogates it whenever the
//! player acts; nothing here spawns threads or blocks.

use tracing::{debug, trace, warn};

use crate::clock::{ClockSource, GameClock};
use crate::grid::{BeatGrid, GridError, JudgeConfig};
use crate::scheduler::{Action, BarScheduler, ScheduleError};
use crate::timer::{TimerId, TimerQueue, TimerTask};

/// Handle returned by [`Judge::attach_listener`], for targeted detach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut()>;
type BeatSink = Box<dyn FnMut(i64)>;

/// Timing judge for one play session.
///
/// Scores presses against the beat grid, consumes one pending beat per
/// accepted press, force-consumes beats nobody pressed for, and drives any
/// number of [`BarScheduler`]s off the same clock.
pub struct Judge {
    clock: GameClock,
    grid: BeatGrid,
    /// Player fine-tune latency shift, adjustable mid-session.
    extra_offset_ms: f64,
    /// Earliest beat index not yet consumed. Starts at 1: index 0 is the
    /// session origin, not a judged beat.
    next_beat_index: i64,
    last_score: f64,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
    beat_sink: Option<BeatSink>,
    schedulers: Vec<BarScheduler>,
    timers: TimerQueue<TimerTask>,
    miss_timer: Option<TimerId>,
}

impl Judge {
    /// Build a judge from `config`. Fails only when the grid geometry is
    /// unusable, see [`BeatGrid::new`].
    pub fn new(source: ClockSource, config: &JudgeConfig) -> Result<Self, GridError> {
        let grid = BeatGrid::new(config)?;
        let schedulers = (0..config.scheduler_count).map(|_| BarScheduler::new()).collect();
        Ok(Self {
            clock: GameClock::new(source),
            grid,
            extra_offset_ms: 0.0,
            next_beat_index: 1,
            last_score: 1.0,
            listeners: Vec::new(),
            next_listener_id: 0,
            beat_sink: None,
            schedulers,
            timers: TimerQueue::new(),
            miss_timer: None,
        })
    }

    pub fn grid(&self) -> &BeatGrid {
        &self.grid
    }

    pub fn clock(&self) -> &GameClock {
        &self.clock
    }

    /// Mutable clock access, for pausing and for advancing a manual source.
    /// Timer deadlines live in clock-elapsed time, so pausing the clock
    /// pauses judgment and scheduling with it.
    pub fn clock_mut(&mut self) -> &mut GameClock {
        &mut self.clock
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Score of the most recent beat elimination, 0.0 perfect to 1.0 miss.
    pub fn last_score(&self) -> f64 {
        self.last_score
    }

    /// Earliest beat index not yet consumed.
    pub fn next_beat_index(&self) -> i64 {
        self.next_beat_index
    }

    pub fn extra_offset_ms(&self) -> f64 {
        self.extra_offset_ms
    }

    /// Adjust the fine-tune latency shift. Takes effect on the next time
    /// read; already-armed timers self-correct a cycle later.
    pub fn set_extra_offset_ms(&mut self, offset_ms: f64) {
        if offset_ms.is_finite() {
            self.extra_offset_ms = offset_ms;
        } else {
            warn!(offset_ms, "ignoring non-finite fine-tune offset");
        }
    }

    /// Session position in milliseconds: clock elapsed time plus the
    /// configured and fine-tune offsets.
    pub fn current_time_ms(&self) -> f64 {
        self.clock.elapsed_ms() + self.grid.offset_ms() + self.extra_offset_ms
    }

    /// Index of the beat nearest to now. Exactly halfway rounds up.
    pub fn current_beat_index(&self) -> i64 {
        let beat = self.grid.beat_interval_ms();
        ((self.current_time_ms() + beat / 2.0) / beat).floor() as i64
    }

    /// Accuracy of a press landing right now: 0.0 at or inside the perfect
    /// window, 1.0 at or past the miss window, linear in between. Pressing
    /// before the pending beat's window is a plain 1.0, however close the
    /// previous (already consumed) beat is.
    pub fn measure(&self) -> f64 {
        if self.current_beat_index() < self.next_beat_index {
            return 1.0;
        }
        let beat = self.grid.beat_interval_ms();
        let deviation = self.current_time_ms().rem_euclid(beat);
        let deviation = deviation.min(beat - deviation);
        let perfect = self.grid.perfect_cutoff_ms();
        let ramp = self.grid.miss_cutoff_ms() - perfect;
        ((deviation - perfect) / ramp).clamp(0.0, 1.0)
    }

    /// Whether a checkout right now is allowed to consume the pending beat:
    /// true once the nearest beat has caught up to within the horizon.
    pub fn after_checkout_horizon(&self) -> bool {
        self.grid.checkout_horizon_beats() + self.current_beat_index() > self.next_beat_index
    }

    /// Judge a press: score it, and when inside the horizon fire every
    /// listener and consume the pending beat. The returned score stands
    /// whether or not a beat was consumed; [`Judge::last_score`] updates
    /// only on consumption.
    pub fn checkout(&mut self) -> f64 {
        let score = self.measure();
        if self.after_checkout_horizon() {
            for (_, listener) in &mut self.listeners {
                listener();
            }
            self.next_beat_index += 1;
            self.last_score = score;
            debug!(next_beat_index = self.next_beat_index, score, "beat consumed");
            if let Some(sink) = &mut self.beat_sink {
                sink(self.next_beat_index);
            }
        }
        score
    }

    /// Milliseconds until `beat_index` lands, zero if it already passed.
    pub fn time_until_beat_ms(&self, beat_index: i64) -> f64 {
        (beat_index as f64 * self.grid.beat_interval_ms() - self.current_time_ms()).max(0.0)
    }

    /// Register a callback fired on every beat consumption, player-made or
    /// forced by miss detection.
    pub fn attach_listener(&mut self, listener: impl FnMut() + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Unknown or already-detached ids are a no-op.
    pub fn detach_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(attached, _)| *attached != id);
    }

    /// Register the single callback told the new pending index after every
    /// consumption. Replaces any previous sink.
    pub fn set_beat_sink(&mut self, sink: impl FnMut(i64) + 'static) {
        self.beat_sink = Some(Box::new(sink));
    }

    pub fn clear_beat_sink(&mut self) {
        self.beat_sink = None;
    }

    /// Begin a session: zero the clock and the judgment state, arm the
    /// first miss check, and start scheduler 0. Listener registrations and
    /// scheduled-action patterns survive, so a host can re-run a configured
    /// session; use [`Judge::finalize`] for a full teardown.
    pub fn start(&mut self) {
        self.timers.clear();
        self.miss_timer = None;
        {
            let Self { schedulers, timers, .. } = self;
            for scheduler in schedulers.iter_mut() {
                scheduler.rewind(timers);
            }
        }
        self.next_beat_index = 1;
        self.last_score = 1.0;
        self.clock.reset();
        self.clock.start();

        let first_check_ms =
            self.clock.elapsed_ms() + self.grid.offset_ms() + self.grid.miss_cutoff_ms();
        self.miss_timer = Some(self.timers.schedule(first_check_ms, TimerTask::MissCheck));
        trace!(deadline_ms = first_check_ms, "armed first miss check");

        if !self.schedulers.is_empty() {
            self.start_scheduler(0);
        }
    }

    /// Tear the session down: disarm everything, zero the clock, drop all
    /// listeners, the beat sink and every registered action pattern. The
    /// scheduler count is kept, each one fresh.
    pub fn finalize(&mut self) {
        self.miss_timer = None;
        self.timers.clear();
        self.clock.reset();
        self.next_beat_index = 1;
        self.last_score = 1.0;
        self.listeners.clear();
        self.beat_sink = None;
        let count = self.schedulers.len();
        self.schedulers = (0..count).map(|_| BarScheduler::new()).collect();
        debug!("judge finalized");
    }

    pub fn scheduler_count(&self) -> usize {
        self.schedulers.len()
    }

    /// Read access to one scheduler's ring, for host inspection.
    pub fn scheduler(&self, index: usize) -> Option<&BarScheduler> {
        self.schedulers.get(index)
    }

    /// Register `(bar offset, action)` pairs on the scheduler at `index`.
    /// A running scheduler whose ring was empty restarts so the new slots
    /// take effect at the correct bar phase.
    pub fn add_actions(
        &mut self,
        index: usize,
        offsets: &[f64],
        actions: &[Action],
    ) -> Result<(), ScheduleError> {
        let Some(scheduler) = self.schedulers.get_mut(index) else {
            return Err(ScheduleError::NoSuchScheduler(index));
        };
        let needs_restart = scheduler.add_actions(offsets, actions)?;
        if needs_restart {
            debug!(scheduler = index, "restarting scheduler to pick up first registration");
            self.start_scheduler(index);
        }
        Ok(())
    }

    /// (Re)start the scheduler at `index`, phase-anchored to the current
    /// bar. Out-of-range indices are ignored.
    pub fn start_scheduler(&mut self, index: usize) {
        let clock_now_ms = self.clock.elapsed_ms();
        let current_time_ms = self.current_time_ms();
        let bar_interval_ms = self.grid.bar_interval_ms();
        let Self { schedulers, timers, .. } = self;
        let Some(scheduler) = schedulers.get_mut(index) else {
            warn!(index, "no scheduler at index, not starting");
            return;
        };
        scheduler.stop(timers);
        scheduler.start(clock_now_ms, current_time_ms, bar_interval_ms, index, timers);
    }

    /// Stop the scheduler at `index`, disarming its pending dispatch.
    pub fn stop_scheduler(&mut self, index: usize) {
        let Self { schedulers, timers, .. } = self;
        if let Some(scheduler) = schedulers.get_mut(index) {
            scheduler.stop(timers);
        }
    }

    /// Earliest pending timer deadline, in clock-elapsed milliseconds.
    /// Drivers sleep or step to this.
    pub fn next_deadline_ms(&mut self) -> Option<f64> {
        self.timers.next_deadline_ms()
    }

    /// Fire every timer due at the current clock position, in deadline
    /// order. Returns how many fired.
    pub fn run_due(&mut self) -> usize {
        let mut fired = 0;
        loop {
            let now_ms = self.clock.elapsed_ms();
            let Some((id, task)) = self.timers.pop_due(now_ms) else {
                break;
            };
            fired += 1;
            match task {
                TimerTask::MissCheck => self.on_miss_check(id),
                TimerTask::Dispatch { scheduler } => self.on_dispatch(scheduler, id),
            }
        }
        fired
    }

    /// One pass of the miss-detection loop: force a checkout if the nearest
    /// beat has overtaken the pending one, then re-arm so the next check
    /// lands one miss window after the next beat.
    fn on_miss_check(&mut self, fired: TimerId) {
        if self.miss_timer != Some(fired) {
            return; // superseded by a session restart
        }
        self.miss_timer = None;

        if self.current_beat_index() > self.next_beat_index {
            debug!(beat = self.next_beat_index, "no press for beat, forcing checkout");
            self.checkout();
        }

        // Fold (now + miss window) to the nearest beat line; the remainder
        // to the next line is the re-arm delay. Derived from the live clock
        // each pass, so a late fire does not shift later checks.
        let beat = self.grid.beat_interval_ms();
        let mut folded_ms = (self.current_time_ms() + self.grid.miss_cutoff_ms()).rem_euclid(beat);
        if folded_ms > beat / 2.0 {
            folded_ms -= beat;
        }
        let deadline_ms = self.clock.elapsed_ms() + (beat - folded_ms);
        self.miss_timer = Some(self.timers.schedule(deadline_ms, TimerTask::MissCheck));
        trace!(deadline_ms, "re-armed miss check");
    }

    fn on_dispatch(&mut self, index: usize, fired: TimerId) {
        let clock_now_ms = self.clock.elapsed_ms();
        let current_time_ms = self.current_time_ms();
        let bar_interval_ms = self.grid.bar_interval_ms();
        let Self { schedulers, timers, .. } = self;
        let Some(scheduler) = schedulers.get_mut(index) else {
            return;
        };
        scheduler.on_dispatch(fired, clock_now_ms, current_time_ms, bar_interval_ms, index, timers);
    }
}
