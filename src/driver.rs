//! Host-side drivers: realtime pumping and deterministic stepping.
//!
//! Both feed the same [`Judge::run_due`] pump. Realtime sleeps toward the
//! next deadline with `spin_sleep`; stepping advances a manual clock to
//! each intermediate deadline exactly, so an offline run replays what a
//! realtime run would have done.

use std::time::Duration;

use spin_sleep::SpinSleeper;

use crate::clock::ClockSource;
use crate::judge::Judge;

/// Upper bound on timers fired by one stepping call, to turn runaway
/// re-arming into a loud failure instead of a hang.
const MAX_TIMESLICES: usize = 1_000_000;

/// Wall-time pump for a [`ClockSource::Wall`] judge.
pub struct RealtimeDriver {
    sleeper: SpinSleeper,
    /// Longest single sleep, so the host callback stays responsive even
    /// when the next deadline is far out.
    max_slice: Duration,
}

impl Default for RealtimeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeDriver {
    pub fn new() -> Self {
        Self {
            sleeper: SpinSleeper::default(),
            max_slice: Duration::from_millis(4),
        }
    }

    pub fn with_max_slice(mut self, max_slice: Duration) -> Self {
        self.max_slice = max_slice;
        self
    }

    /// Pump `judge` until `is_done` reports true.
    ///
    /// Each pass fires due timers, polls `is_done`, then sleeps toward the
    /// next deadline (capped at the max slice). The callback is the host's
    /// hook for input polling and checkouts.
    pub fn run_until<F>(&self, judge: &mut Judge, mut is_done: F)
    where
        F: FnMut(&mut Judge) -> bool,
    {
        loop {
            judge.run_due();
            if is_done(judge) {
                return;
            }
            let sleep = match judge.next_deadline_ms() {
                Some(deadline_ms) => {
                    let wait_ms = (deadline_ms - judge.clock().elapsed_ms()).max(0.0);
                    Duration::from_secs_f64(wait_ms / 1000.0).min(self.max_slice)
                }
                None => self.max_slice,
            };
            self.sleeper.sleep(sleep);
        }
    }

    /// Pump for a fixed stretch of clock time.
    pub fn run_for(&self, judge: &mut Judge, duration_ms: f64) {
        let end_ms = judge.clock().elapsed_ms() + duration_ms.max(0.0);
        self.run_until(judge, |j| j.clock().elapsed_ms() >= end_ms);
    }
}

/// Advance a manual-clock judge by `dt_ms`, firing every intermediate
/// timer exactly at its deadline. A paused clock stays frozen: the source
/// time moves but nothing fires.
pub fn step(judge: &mut Judge, dt_ms: f64) {
    step_with_jitter(judge, dt_ms, || 0.0);
}

/// Like [`step`], but each timer fires `jitter_ms()` milliseconds after
/// its deadline, for exercising the self-correcting delay recomputation.
/// Negative jitter is clamped to zero; jitter may carry the clock past
/// `dt_ms`, in which case the final top-up advance is skipped.
pub fn step_with_jitter(judge: &mut Judge, dt_ms: f64, mut jitter_ms: impl FnMut() -> f64) {
    assert_eq!(
        judge.clock().source(),
        ClockSource::Manual,
        "stepping drives a manual clock; use RealtimeDriver for wall time"
    );
    let dt_ms = if dt_ms.is_finite() && dt_ms > 0.0 { dt_ms } else { 0.0 };
    if !judge.clock().is_running() {
        judge.clock_mut().advance_ms(dt_ms);
        return;
    }

    let target_ms = judge.clock().elapsed_ms() + dt_ms;
    let mut slices = 0usize;
    while let Some(deadline_ms) = judge.next_deadline_ms() {
        if deadline_ms > target_ms {
            break;
        }
        let fire_at_ms = deadline_ms + jitter_ms().max(0.0);
        let now_ms = judge.clock().elapsed_ms();
        if fire_at_ms > now_ms {
            judge.clock_mut().advance_ms(fire_at_ms - now_ms);
        }
        judge.run_due();
        slices += 1;
        if slices > MAX_TIMESLICES {
            panic!("step({dt_ms} ms) exceeded {MAX_TIMESLICES} timeslices; timer re-arming has run away");
        }
    }
    let now_ms = judge.clock().elapsed_ms();
    if target_ms > now_ms {
        judge.clock_mut().advance_ms(target_ms - now_ms);
    }
}
