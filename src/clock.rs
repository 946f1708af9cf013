//! Pausable session stopwatch over a wall or manual time source.
//!
//! Judgment and scheduling code only ever reads elapsed milliseconds;
//! whether "now" comes from a monotonic instant or a host-advanced counter
//! is fixed at construction, so realtime sessions and stepped simulations
//! share one code path.

use std::time::Instant;

/// Where a [`GameClock`] reads "now" from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    /// Monotonic wall time via [`Instant`].
    Wall,
    /// Host-advanced counter, for stepped or simulated runs.
    Manual,
}

/// Pausable elapsed-time stopwatch.
///
/// `start` resumes, `stop` pauses and commits the running span, `reset`
/// zeroes. Elapsed time never decreases while running, and pausing freezes
/// it exactly, so anything keyed off this clock pauses with it.
#[derive(Clone, Debug)]
pub struct GameClock {
    source: ClockSource,
    epoch: Instant,
    manual_now_ms: f64,
    /// Raw "now" at the last start or resume; `None` while paused.
    resumed_at_ms: Option<f64>,
    banked_ms: f64,
}

impl GameClock {
    pub fn new(source: ClockSource) -> Self {
        Self {
            source,
            epoch: Instant::now(),
            manual_now_ms: 0.0,
            resumed_at_ms: None,
            banked_ms: 0.0,
        }
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }

    fn raw_now_ms(&self) -> f64 {
        match self.source {
            ClockSource::Wall => self.epoch.elapsed().as_secs_f64() * 1000.0,
            ClockSource::Manual => self.manual_now_ms,
        }
    }

    /// Start or resume the stopwatch. No-op while already running.
    pub fn start(&mut self) {
        if self.resumed_at_ms.is_none() {
            self.resumed_at_ms = Some(self.raw_now_ms());
        }
    }

    /// Pause, banking the span since the last resume. Idempotent.
    pub fn stop(&mut self) {
        if let Some(at) = self.resumed_at_ms.take() {
            self.banked_ms += self.raw_now_ms() - at;
        }
    }

    /// Zero the stopwatch and leave it paused.
    pub fn reset(&mut self) {
        self.banked_ms = 0.0;
        self.resumed_at_ms = None;
    }

    pub fn is_running(&self) -> bool {
        self.resumed_at_ms.is_some()
    }

    /// Total elapsed milliseconds across all running spans.
    pub fn elapsed_ms(&self) -> f64 {
        match self.resumed_at_ms {
            Some(at) => self.banked_ms + (self.raw_now_ms() - at),
            None => self.banked_ms,
        }
    }

    /// Advance a manual source by `dt_ms`. Negative or non-finite deltas
    /// are ignored, as is the call on a wall source.
    pub fn advance_ms(&mut self, dt_ms: f64) {
        if self.source == ClockSource::Manual && dt_ms.is_finite() && dt_ms > 0.0 {
            self.manual_now_ms += dt_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_counts_only_while_running() {
        let mut clock = GameClock::new(ClockSource::Manual);
        assert!(!clock.is_running());
        assert_eq!(clock.elapsed_ms(), 0.0);

        clock.advance_ms(100.0);
        assert_eq!(clock.elapsed_ms(), 0.0, "paused clock must not accumulate");

        clock.start();
        clock.advance_ms(250.0);
        assert_eq!(clock.elapsed_ms(), 250.0);

        clock.stop();
        clock.advance_ms(500.0);
        assert_eq!(clock.elapsed_ms(), 250.0, "pause freezes elapsed time");

        clock.start();
        clock.advance_ms(50.0);
        assert_eq!(clock.elapsed_ms(), 300.0, "resume keeps the banked span");
    }

    #[test]
    fn reset_zeroes_and_pauses() {
        let mut clock = GameClock::new(ClockSource::Manual);
        clock.start();
        clock.advance_ms(42.0);
        clock.reset();
        assert!(!clock.is_running());
        assert_eq!(clock.elapsed_ms(), 0.0);
        clock.start();
        clock.advance_ms(7.0);
        assert_eq!(clock.elapsed_ms(), 7.0);
    }

    #[test]
    fn bad_deltas_are_ignored() {
        let mut clock = GameClock::new(ClockSource::Manual);
        clock.start();
        clock.advance_ms(-10.0);
        clock.advance_ms(f64::NAN);
        clock.advance_ms(f64::INFINITY);
        assert_eq!(clock.elapsed_ms(), 0.0);
    }

    #[test]
    fn wall_clock_is_monotone() {
        let mut clock = GameClock::new(ClockSource::Wall);
        clock.start();
        let a = clock.elapsed_ms();
        let b = clock.elapsed_ms();
        assert!(b >= a);
        assert!(a >= 0.0);
        // advance_ms has no effect on a wall source
        let before = clock.elapsed_ms();
        clock.advance_ms(10_000.0);
        assert!(clock.elapsed_ms() - before < 1_000.0);
    }
}
