// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred counter.
//!
//! Every distinct text gets the next number from a slow counter. Typing
//! through several texts shows which ones ever started a count and which
//! count the consumer finally displays.
//!
//! Run:
//! - `cargo run -p understory_deferred_demos --example deferred_counter`
//! - `cargo run -p understory_deferred_demos --example deferred_counter -- --writes h he hel --gap-ms 100`

use std::error::Error;
use std::time::Duration;

use clap::Parser;
use understory_deferred::{EventLoop, Session, SessionConfig, TextRenderer};
use understory_deferred_demos::{counter, init_logging, type_text};

#[derive(Parser, Debug)]
#[command(about = "Type into a text box keyed to a slow counter")]
struct Args {
    /// Text written on each keystroke.
    #[arg(long, num_args = 1.., default_values = ["a", "ab"])]
    writes: Vec<String>,
    /// Milliseconds between keystrokes; 0 writes them all at once.
    #[arg(long, default_value_t = 0)]
    gap_ms: u64,
    /// Milliseconds before a count is ready.
    #[arg(long, default_value_t = 5000)]
    latency_ms: u64,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let event_loop = EventLoop::new();
    let compute = counter(&event_loop, Duration::from_millis(args.latency_ms));
    let session = Session::new(
        event_loop,
        SessionConfig::default(),
        String::new(),
        compute,
        TextRenderer::with_fallback("Loading count..."),
    )?;
    session.event_loop().run_until_idle();

    type_text(
        &session,
        &args.writes,
        Duration::from_millis(args.gap_ms),
        true,
    );
    session.event_loop().run_until_idle();

    for (at, text) in session.renderer().history() {
        println!("  {at:?}: {text}");
    }
    println!("counts started for: {:?}", session.cache().keys());
    println!(
        "deferred text {:?} after {} commits",
        session.current_deferred_value(),
        session.stats().commits
    );
    Ok(())
}
