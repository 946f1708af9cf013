//! Wall-clock demo: a click track judged against a simulated player.
//!
//! Runs a realtime session with a bar-synced click pattern and an
//! autoplayer that presses near each beat with seeded jitter, skipping
//! some presses so the miss-detection loop has work to do.
//!
//! Usage:
//!   cargo run --bin metronome
//!   cargo run --bin metronome -- --bpm 90 --bars 8 --spread-ms 80
//!   RUST_LOG=beatlock=debug cargo run --bin metronome

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use beatlock::{
    Action, ClockSource, InputGate, Judge, JudgeConfig, RealtimeDriver, StepDecision,
};
use beatlock::rng::DetRng;

#[derive(Parser, Debug)]
#[command(name = "metronome", about = "Beat-judged click track with a simulated player")]
struct Args {
    /// Tempo in beats per minute
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,

    /// Judged subdivisions per bar
    #[arg(long, default_value_t = 4.0)]
    divisor: f64,

    /// Bars to play
    #[arg(long, default_value_t = 4)]
    bars: u32,

    /// Largest autoplayer press error, in milliseconds either side
    #[arg(long, default_value_t = 60.0)]
    spread_ms: f64,

    /// Skip every Nth press so some beats go to miss detection (0 skips none)
    #[arg(long, default_value_t = 5)]
    skip_every: u32,

    /// Autoplayer seed; the same seed replays the same session
    #[arg(long, default_value = "metronome")]
    seed: String,
}

fn grade(score: f64) -> &'static str {
    if score == 0.0 {
        "perfect"
    } else if score < 0.5 {
        "good"
    } else if score < 1.0 {
        "sloppy"
    } else {
        "miss"
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let config = JudgeConfig {
        bpm: args.bpm,
        bar_divisor: args.divisor,
        ..Default::default()
    };
    let mut judge = Judge::new(ClockSource::Wall, &config)?;
    let beat_ms = judge.grid().beat_interval_ms();
    let bar_ms = judge.grid().bar_interval_ms();

    println!(
        "{} bpm, {} beats per bar, {} bars (beat {:.1} ms, bar {:.1} ms)",
        args.bpm, args.divisor, args.bars, beat_ms, bar_ms
    );

    // Click pattern: a numbered downbeat and three offbeat ticks per bar.
    let bar_counter = Rc::new(Cell::new(0u32));
    let downbeat: Action = {
        let bar_counter = bar_counter.clone();
        Rc::new(move || {
            let bar = bar_counter.get() + 1;
            bar_counter.set(bar);
            println!("== bar {bar} ==");
        })
    };
    let tick: Action = Rc::new(|| println!("   ."));
    judge.add_actions(
        0,
        &[0.0, 0.25, 0.5, 0.75],
        &[downbeat, tick.clone(), tick.clone(), tick],
    )?;

    // Press once near every beat, late or early by a seeded spread, with
    // every Nth beat left to the miss loop.
    let total_beats = (args.bars as f64 * bar_ms / beat_ms).round() as i64;
    let mut rng = DetRng::new(&args.seed);
    let mut presses: VecDeque<f64> = (1..=total_beats)
        .filter(|k| args.skip_every == 0 || k % i64::from(args.skip_every) != 0)
        .map(|k| (k as f64 * beat_ms + rng.range(-args.spread_ms, args.spread_ms)).max(0.0))
        .collect();

    let scores = Rc::new(RefCell::new(Vec::new()));
    let mut gate = InputGate::new();
    gate.unlock();

    judge.start();
    let end_ms = args.bars as f64 * bar_ms + beat_ms;
    let mut held_until_ms = f64::NEG_INFINITY;

    let driver = RealtimeDriver::new();
    driver.run_until(&mut judge, |judge| {
        let now_ms = judge.current_time_ms();
        let pressing = if now_ms < held_until_ms {
            true
        } else if presses.front().map_or(false, |&at| now_ms >= at) {
            presses.pop_front();
            held_until_ms = now_ms + 30.0;
            true
        } else {
            false
        };

        match gate.poll(pressing, judge) {
            StepDecision::Step { score } => {
                println!("   press {:>7}  ({score:.2})", grade(score));
                scores.borrow_mut().push(score);
            }
            StepDecision::Blocked { score } => {
                println!("   press {:>7}  ({score:.2}, held)", grade(score));
                scores.borrow_mut().push(score);
            }
            _ => {}
        }

        judge.clock().elapsed_ms() >= end_ms
    });

    let consumed = judge.next_beat_index() - 1;
    let scores = scores.borrow();
    let on_groove = scores.iter().filter(|s| **s < 1.0).count();
    let mean = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    println!();
    println!(
        "{consumed} beats consumed, {} presses, {on_groove} on the groove, mean score {mean:.3}",
        scores.len()
    );

    judge.finalize();
    Ok(())
}
