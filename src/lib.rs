//! Beat judgment and bar-synchronized scheduling for rhythm gameplay.
//!
//! Everything hangs off one pausable clock:
//! - Accuracy scoring of presses against a periodic beat grid, with a
//!   linear ramp between a perfect and a miss window
//! - Checkout bookkeeping: each accepted press consumes one pending beat,
//!   and a miss-detection loop force-consumes beats nobody pressed for
//! - Bar-cycle action scheduling with per-action multi-bar repeat periods
//! - Drift-free re-arming: every timer delay is re-derived from the
//!   absolute clock, and wall/manual time sources share one pump

pub mod clock;
pub mod driver;
pub mod grid;
pub mod input;
pub mod judge;
pub mod rng;
pub mod scheduler;
pub mod timer;


pub use clock::{ClockSource, GameClock};
pub use driver::{step, step_with_jitter, RealtimeDriver};
pub use grid::{BeatGrid, GridError, JudgeConfig};
pub use input::{InputGate, InputPhase, StepDecision};
pub use judge::{Judge, ListenerId};
pub use scheduler::{Action, ActionSlot, BarScheduler, ScheduleError, ScheduledAction};
pub use timer::{TimerId, TimerQueue, TimerTask};
