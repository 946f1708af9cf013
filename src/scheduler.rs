//! Bar-synchronized action dispatch.
//!
//! A [`BarScheduler`] walks an ordered ring of fractional-offset slots,
//! once around per bar, invoking every action whose multi-bar cycle is due.
//! Each timer delay is re-derived from the shared clock at dispatch time
//! rather than chained from the previous delay, so late fires do not
//! accumulate into phase drift.

use std::rc::Rc;

use thiserror::Error;
use tracing::trace;

use crate::timer::{TimerId, TimerQueue, TimerTask};

/// Callback invoked when its slot comes due.
///
/// `Rc` rather than `Box` because bulk registration repeats the last
/// element of the shorter input sequence, sharing one callback across
/// several slots.
pub type Action = Rc<dyn Fn()>;

/// Rejected action registration.
#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("action registration needs at least one offset and one action")]
    EmptyPattern,
    #[error("bar offset {0} is not a finite non-negative number")]
    InvalidOffset(f64),
    #[error("no scheduler at index {0}")]
    NoSuchScheduler(usize),
}

/// One registered callback, gated by its own multi-bar repeat cycle.
pub struct ScheduledAction {
    action: Action,
    cycle_position: u64,
    cycle_length: u64,
}

impl ScheduledAction {
    fn is_due(&self, loop_counter: u64) -> bool {
        loop_counter % self.cycle_length == self.cycle_position
    }

    /// Which loop of the cycle this action fires on.
    pub fn cycle_position(&self) -> u64 {
        self.cycle_position
    }

    /// Cycle length in bars, shared by every action of one registration.
    pub fn cycle_length(&self) -> u64 {
        self.cycle_length
    }
}

/// Every action registered at one fractional position within the bar.
pub struct ActionSlot {
    fractional_offset: f64,
    actions: Vec<ScheduledAction>,
}

impl ActionSlot {
    fn invoke_due(&self, loop_counter: u64) {
        for scheduled in &self.actions {
            if scheduled.is_due(loop_counter) {
                (scheduled.action)();
            }
        }
    }

    /// Position within the bar, in `[0, 1)`.
    pub fn fractional_offset(&self) -> f64 {
        self.fractional_offset
    }

    pub fn actions(&self) -> &[ScheduledAction] {
        &self.actions
    }
}

/// Dispatch ring of [`ActionSlot`]s, phase-locked to the bar grid.
///
/// Owned and driven by a `Judge`, which supplies the clock reads and the
/// shared timer queue. Dispatch callbacks run synchronously inside the
/// owner's timer pump and must not call back into it; record work and act
/// from the host loop instead.
pub struct BarScheduler {
    slots: Vec<ActionSlot>,
    current_slot_index: usize,
    /// Completed trips around the slot ring since the last rewind.
    loop_counter: u64,
    /// Bar the ring believes it is dispatching in. Compared against the
    /// live bar index to fold missed bars into the next delay.
    bar_reference_index: i64,
    ready: bool,
    pending: Option<TimerId>,
}

impl BarScheduler {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            current_slot_index: 0,
            loop_counter: 0,
            bar_reference_index: 0,
            ready: false,
            pending: None,
        }
    }

    /// Whether the scheduler has been started and not stopped since.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_actions(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Slots in ascending fractional-offset order.
    pub fn slots(&self) -> &[ActionSlot] {
        &self.slots
    }

    pub fn loop_counter(&self) -> u64 {
        self.loop_counter
    }

    pub fn bar_reference_index(&self) -> i64 {
        self.bar_reference_index
    }

    /// Register a batch of `(bar offset, action)` pairs.
    ///
    /// Offsets are in bars: the fractional part places the slot within the
    /// bar, the integer part places it within a repeat cycle spanning
    /// `floor(max(offsets)) + 1` bars. The shorter input repeats its last
    /// element until the pair counts match. Returns whether the caller must
    /// restart the scheduler because a running ring went from empty to
    /// populated.
    pub(crate) fn add_actions(
        &mut self,
        offsets: &[f64],
        actions: &[Action],
    ) -> Result<bool, ScheduleError> {
        if offsets.is_empty() || actions.is_empty() {
            return Err(ScheduleError::EmptyPattern);
        }
        if let Some(&bad) = offsets.iter().find(|o| !o.is_finite() || **o < 0.0) {
            return Err(ScheduleError::InvalidOffset(bad));
        }
        let was_empty = self.slots.is_empty();

        let max_offset = offsets.iter().copied().fold(0.0_f64, f64::max);
        let cycle_length = max_offset.floor() as u64 + 1;
        let pairs = offsets.len().max(actions.len());
        for i in 0..pairs {
            let offset = offsets[i.min(offsets.len() - 1)];
            let action = actions[i.min(actions.len() - 1)].clone();
            let entry = ScheduledAction {
                action,
                cycle_position: offset.floor() as u64,
                cycle_length,
            };
            self.insert(offset.fract(), entry);
        }
        trace!(
            pairs,
            cycle_length,
            slots = self.slots.len(),
            "registered scheduled actions"
        );
        Ok(was_empty && self.ready)
    }

    fn insert(&mut self, fractional_offset: f64, entry: ScheduledAction) {
        match self
            .slots
            .iter()
            .position(|slot| slot.fractional_offset >= fractional_offset)
        {
            Some(at) if self.slots[at].fractional_offset == fractional_offset => {
                self.slots[at].actions.push(entry);
            }
            Some(at) => self
                .slots
                .insert(at, ActionSlot { fractional_offset, actions: vec![entry] }),
            None => self
                .slots
                .push(ActionSlot { fractional_offset, actions: vec![entry] }),
        }
    }

    /// Arm the first dispatch, anchored to the bar phase of `current_time_ms`.
    ///
    /// The phase is folded to `(-bar/2, bar/2]`, so slightly past a bar line
    /// counts as that bar line and late in a bar rolls to the next one. With
    /// no slots this stops instead, but still marks the scheduler ready so a
    /// later registration restarts it.
    pub(crate) fn start(
        &mut self,
        clock_now_ms: f64,
        current_time_ms: f64,
        bar_interval_ms: f64,
        index: usize,
        timers: &mut TimerQueue<TimerTask>,
    ) {
        let mut phase_ms = current_time_ms.rem_euclid(bar_interval_ms);
        if phase_ms > bar_interval_ms / 2.0 {
            phase_ms -= bar_interval_ms;
        }
        self.bar_reference_index = (current_time_ms / bar_interval_ms).floor() as i64;
        if let Some(first) = self.slots.get(self.current_slot_index) {
            let phase_fraction = phase_ms / bar_interval_ms;
            let delay_ms =
                ((first.fractional_offset - phase_fraction) * bar_interval_ms).max(0.0);
            self.pending = Some(
                timers.schedule(clock_now_ms + delay_ms, TimerTask::Dispatch { scheduler: index }),
            );
            trace!(scheduler = index, delay_ms, "armed first dispatch");
        } else {
            self.stop(timers);
        }
        self.ready = true;
    }

    /// Disarm the pending dispatch and rewind the ring to its first slot.
    /// The loop counter survives, so a restarted ring resumes its repeat
    /// cycle where it left off.
    pub(crate) fn stop(&mut self, timers: &mut TimerQueue<TimerTask>) {
        if let Some(id) = self.pending.take() {
            timers.cancel(id);
        }
        self.current_slot_index = 0;
        self.ready = false;
    }

    /// Stop and zero the repeat cycle, for a fresh session.
    pub(crate) fn rewind(&mut self, timers: &mut TimerQueue<TimerTask>) {
        self.stop(timers);
        self.loop_counter = 0;
        self.bar_reference_index = 0;
    }

    /// Handle a fired dispatch timer: invoke the current slot's due actions,
    /// advance the ring, and arm the next dispatch from the live clock.
    pub(crate) fn on_dispatch(
        &mut self,
        fired: TimerId,
        clock_now_ms: f64,
        current_time_ms: f64,
        bar_interval_ms: f64,
        index: usize,
        timers: &mut TimerQueue<TimerTask>,
    ) {
        if self.pending != Some(fired) {
            return; // stale fire from before a stop or restart
        }
        self.pending = None;

        let loop_counter = self.loop_counter;
        let Some(slot) = self.slots.get(self.current_slot_index) else {
            return;
        };
        slot.invoke_due(loop_counter);

        self.current_slot_index = (self.current_slot_index + 1) % self.slots.len();
        if self.current_slot_index == 0 {
            self.loop_counter += 1;
            self.bar_reference_index += 1;
        }

        // Delay to the next slot, re-derived from the absolute clock. The
        // (bar_reference - live_bar) term folds any bars the ring has fallen
        // behind into an immediate catch-up fire.
        let next = &self.slots[self.current_slot_index];
        let live_bar_index = (current_time_ms / bar_interval_ms).floor() as i64;
        let bars_ahead = (self.bar_reference_index - live_bar_index) as f64;
        let next_delay_ms = (next.fractional_offset + bars_ahead) * bar_interval_ms
            - current_time_ms.rem_euclid(bar_interval_ms);
        self.pending = Some(timers.schedule(
            clock_now_ms + next_delay_ms,
            TimerTask::Dispatch { scheduler: index },
        ));
        trace!(
            scheduler = index,
            slot = self.current_slot_index,
            loop_counter = self.loop_counter,
            next_delay_ms,
            "dispatched slot, armed next"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn noop() -> Action {
        Rc::new(|| {})
    }

    fn layout(scheduler: &BarScheduler) -> Vec<(f64, Vec<(u64, u64)>)> {
        scheduler
            .slots()
            .iter()
            .map(|slot| {
                let cycles = slot
                    .actions()
                    .iter()
                    .map(|a| (a.cycle_position(), a.cycle_length()))
                    .collect();
                (slot.fractional_offset(), cycles)
            })
            .collect()
    }

    #[test]
    fn offsets_split_into_fraction_and_cycle() {
        let mut scheduler = BarScheduler::new();
        scheduler
            .add_actions(&[0.0, 0.5, 1.0], &[noop(), noop(), noop()])
            .unwrap();
        // 0.0 and 1.0 share the downbeat slot on alternating loops of a
        // two-bar cycle; 0.5 sits mid-bar
        assert_eq!(
            layout(&scheduler),
            vec![(0.0, vec![(0, 2), (1, 2)]), (0.5, vec![(0, 2)])]
        );
    }

    #[test]
    fn slots_stay_sorted_across_registrations() {
        let mut scheduler = BarScheduler::new();
        scheduler.add_actions(&[0.75], &[noop()]).unwrap();
        scheduler.add_actions(&[0.25], &[noop()]).unwrap();
        scheduler.add_actions(&[0.5, 0.25], &[noop(), noop()]).unwrap();
        let offsets: Vec<f64> = scheduler
            .slots()
            .iter()
            .map(ActionSlot::fractional_offset)
            .collect();
        assert_eq!(offsets, vec![0.25, 0.5, 0.75]);
        assert_eq!(scheduler.slots()[0].actions().len(), 2);
    }

    #[test]
    fn shorter_side_repeats_its_last_element() {
        let mut scheduler = BarScheduler::new();
        // one action, three offsets: the action lands in all three slots
        scheduler.add_actions(&[0.0, 0.25, 0.5], &[noop()]).unwrap();
        assert_eq!(scheduler.slots().len(), 3);
        assert!(scheduler.slots().iter().all(|s| s.actions().len() == 1));

        // three actions, one offset: all three stack in one slot
        let mut stacked = BarScheduler::new();
        stacked
            .add_actions(&[0.5], &[noop(), noop(), noop()])
            .unwrap();
        assert_eq!(stacked.slots().len(), 1);
        assert_eq!(stacked.slots()[0].actions().len(), 3);
        assert!(stacked.slots()[0].actions().iter().all(|a| a.cycle_length() == 1));
    }

    #[test]
    fn cycle_length_comes_from_the_largest_offset() {
        let mut scheduler = BarScheduler::new();
        scheduler
            .add_actions(&[0.5, 2.25], &[noop(), noop()])
            .unwrap();
        assert_eq!(
            layout(&scheduler),
            vec![(0.25, vec![(2, 3)]), (0.5, vec![(0, 3)])]
        );
    }

    #[test]
    fn empty_and_invalid_registrations_are_rejected() {
        let mut scheduler = BarScheduler::new();
        assert_eq!(
            scheduler.add_actions(&[], &[noop()]),
            Err(ScheduleError::EmptyPattern)
        );
        assert_eq!(
            scheduler.add_actions(&[0.5], &[]),
            Err(ScheduleError::EmptyPattern)
        );
        assert_eq!(
            scheduler.add_actions(&[-0.25], &[noop()]),
            Err(ScheduleError::InvalidOffset(-0.25))
        );
        assert!(matches!(
            scheduler.add_actions(&[0.0, f64::NAN], &[noop()]),
            Err(ScheduleError::InvalidOffset(_))
        ));
        assert!(!scheduler.has_actions(), "rejected batches must not partially apply");
    }

    #[test]
    fn start_with_no_slots_still_marks_ready() {
        let mut scheduler = BarScheduler::new();
        let mut timers = TimerQueue::new();
        scheduler.start(0.0, 0.0, 2000.0, 0, &mut timers);
        assert!(scheduler.is_ready());
        assert!(timers.is_empty(), "nothing to dispatch without slots");
        // first registration on a ready ring asks the owner for a restart
        assert_eq!(scheduler.add_actions(&[0.0], &[noop()]), Ok(true));
    }

    #[test]
    fn registration_on_a_stopped_ring_needs_no_restart() {
        let mut scheduler = BarScheduler::new();
        assert_eq!(scheduler.add_actions(&[0.0], &[noop()]), Ok(false));
        // growing an already-populated ring never restarts either
        let mut timers = TimerQueue::new();
        scheduler.start(0.0, 0.0, 2000.0, 0, &mut timers);
        assert_eq!(scheduler.add_actions(&[0.5], &[noop()]), Ok(false));
    }

    #[test]
    fn first_dispatch_lands_on_the_slot_phase() {
        let mut scheduler = BarScheduler::new();
        let mut timers = TimerQueue::new();
        scheduler.add_actions(&[0.25], &[noop()]).unwrap();
        // started 300 ms into a 2000 ms bar: slot 0.25 is 200 ms away
        scheduler.start(300.0, 300.0, 2000.0, 0, &mut timers);
        assert_eq!(timers.next_deadline_ms(), Some(500.0));
    }

    #[test]
    fn start_past_the_half_bar_rolls_to_the_next_bar() {
        let mut scheduler = BarScheduler::new();
        let mut timers = TimerQueue::new();
        scheduler.add_actions(&[0.0], &[noop()]).unwrap();
        // phase 1500/2000 folds to -0.25 bars, so the downbeat is 500 ms out
        scheduler.start(1500.0, 1500.0, 2000.0, 0, &mut timers);
        assert_eq!(timers.next_deadline_ms(), Some(2000.0));
        assert_eq!(scheduler.bar_reference_index(), 0);
    }

    #[test]
    fn start_just_past_the_bar_line_fires_immediately() {
        let mut scheduler = BarScheduler::new();
        let mut timers = TimerQueue::new();
        scheduler.add_actions(&[0.0], &[noop()]).unwrap();
        // phase folds to +0.05 bars; the delay clamps to zero instead of
        // waiting out the whole next bar
        scheduler.start(2100.0, 2100.0, 2000.0, 0, &mut timers);
        assert_eq!(timers.next_deadline_ms(), Some(2100.0));
        assert_eq!(scheduler.bar_reference_index(), 1);
    }

    #[test]
    fn stale_dispatch_after_stop_is_ignored() {
        let fired = Rc::new(RefCell::new(0));
        let counter = {
            let fired = fired.clone();
            Rc::new(move || *fired.borrow_mut() += 1) as Action
        };

        let mut scheduler = BarScheduler::new();
        let mut timers = TimerQueue::new();
        scheduler.add_actions(&[0.0], &[counter]).unwrap();
        scheduler.start(0.0, 0.0, 2000.0, 0, &mut timers);
        let (armed, task) = timers.pop_due(0.0).unwrap();
        assert_eq!(task, TimerTask::Dispatch { scheduler: 0 });

        scheduler.stop(&mut timers);
        scheduler.on_dispatch(armed, 0.0, 0.0, 2000.0, 0, &mut timers);
        assert_eq!(*fired.borrow(), 0, "fire armed before stop must be dropped");
        assert!(timers.is_empty());
    }
}
