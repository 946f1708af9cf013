//! Directional-input gating for beat-locked movement.
//!
//! Hosts poll held-key state every frame, but a judgment must happen once
//! per discrete press. The gate turns the held signal into press edges and
//! routes each press through a single checkout, whose score then decides
//! whether the host may act on it.

use crate::judge::Judge;

/// Where the gate is in its press cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputPhase {
    /// Session not unlocked yet; all input is swallowed.
    #[default]
    WaitingForInit,
    /// Accepting the next press.
    Walking,
    /// A press was consumed; waiting for release.
    IgnoringInput,
}

/// Outcome of one frame's poll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepDecision {
    /// Gate not unlocked yet.
    Waiting,
    /// No press this frame.
    Idle,
    /// The press landed on the groove; the host may act.
    Step { score: f64 },
    /// The press was judged and came up a full miss; hold position.
    Blocked { score: f64 },
    /// Still held from an earlier frame; already judged.
    Held,
}

/// Press-edge detector wired to a [`Judge`].
#[derive(Clone, Copy, Debug, Default)]
pub struct InputGate {
    phase: InputPhase,
}

impl InputGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> InputPhase {
        self.phase
    }

    /// Open the gate. Call when the playable section begins.
    pub fn unlock(&mut self) {
        self.phase = InputPhase::Walking;
    }

    /// Swallow input again, for session teardown.
    pub fn reset(&mut self) {
        self.phase = InputPhase::WaitingForInit;
    }

    /// Feed one frame of held-input state.
    ///
    /// The checkout happens here, exactly once per press edge; the judge
    /// alone decides whether a beat is consumed. Anything under a full
    /// miss counts as on the groove.
    pub fn poll(&mut self, pressing: bool, judge: &mut Judge) -> StepDecision {
        match self.phase {
            InputPhase::WaitingForInit => StepDecision::Waiting,
            InputPhase::Walking => {
                if !pressing {
                    return StepDecision::Idle;
                }
                self.phase = InputPhase::IgnoringInput;
                let score = judge.checkout();
                if score < 1.0 {
                    StepDecision::Step { score }
                } else {
                    StepDecision::Blocked { score }
                }
            }
            InputPhase::IgnoringInput => {
                if pressing {
                    StepDecision::Held
                } else {
                    self.phase = InputPhase::Walking;
                    StepDecision::Idle
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSource;
    use crate::grid::JudgeConfig;

    fn judge_at(time_ms: f64) -> Judge {
        let config = JudgeConfig { bpm: 120.0, ..Default::default() };
        let mut judge = Judge::new(ClockSource::Manual, &config).unwrap();
        judge.clock_mut().start();
        judge.clock_mut().advance_ms(time_ms);
        judge
    }

    #[test]
    fn locked_gate_swallows_presses() {
        let mut judge = judge_at(500.0);
        let mut gate = InputGate::new();
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Waiting);
        assert_eq!(judge.next_beat_index(), 1, "no checkout while locked");
    }

    #[test]
    fn on_groove_press_steps_and_consumes_one_beat() {
        let mut judge = judge_at(500.0);
        let mut gate = InputGate::new();
        gate.unlock();

        assert_eq!(gate.poll(false, &mut judge), StepDecision::Idle);
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Step { score: 0.0 });
        assert_eq!(judge.next_beat_index(), 2);

        // holding the key does not judge again
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Held);
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Held);
        assert_eq!(judge.next_beat_index(), 2);

        // release re-arms, next press judges anew
        assert_eq!(gate.poll(false, &mut judge), StepDecision::Idle);
        judge.clock_mut().advance_ms(500.0);
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Step { score: 0.0 });
        assert_eq!(judge.next_beat_index(), 3);
    }

    #[test]
    fn half_ramp_press_still_steps() {
        let mut judge = judge_at(625.0);
        let mut gate = InputGate::new();
        gate.unlock();
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Step { score: 0.5 });
    }

    #[test]
    fn off_groove_press_blocks_but_is_still_judged() {
        // worst-case press halfway between beats
        let mut judge = judge_at(750.0);
        let mut gate = InputGate::new();
        gate.unlock();

        assert_eq!(gate.poll(true, &mut judge), StepDecision::Blocked { score: 1.0 });
        // the judge still consumed the beat; the gate only blocks movement
        assert_eq!(judge.next_beat_index(), 2);
        assert_eq!(gate.phase(), InputPhase::IgnoringInput, "a blocked press still needs release");
    }

    #[test]
    fn too_early_press_blocks_without_consuming() {
        let mut judge = judge_at(100.0);
        let mut gate = InputGate::new();
        gate.unlock();

        // nearest beat is 0: horizon 2 + 0 > 1 holds, so the press consumes
        // beat 1 at full miss
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Blocked { score: 1.0 });
        assert_eq!(judge.next_beat_index(), 2);

        // mash again immediately: horizon now closed, nothing consumed
        gate.poll(false, &mut judge);
        assert_eq!(gate.poll(true, &mut judge), StepDecision::Blocked { score: 1.0 });
        assert_eq!(judge.next_beat_index(), 2);
    }

    #[test]
    fn reset_relocks_the_gate() {
        let mut judge = judge_at(500.0);
        let mut gate = InputGate::new();
        gate.unlock();
        gate.poll(true, &mut judge);
        gate.reset();
        assert_eq!(gate.poll(false, &mut judge), StepDecision::Waiting);
        assert_eq!(gate.phase(), InputPhase::WaitingForInit);
    }
}
