//! vtime Shared Clock Demo - two nodes on one virtual clock
//!
//! Shows the three rules of the scheduler:
//!
//! 1. Immediate work never moves time
//! 2. Time only advances once every application sharing the clock is idle
//! 3. Timers fire in deadline order, each at exactly its deadline
//!
//! Run: `cargo run --example shared_clock_demo`

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use vtime_core::{Application, ClockView, VirtualClock, VirtualTimer};

fn main() {
    let clock = VirtualClock::new();
    let alice = Application::named(&clock, "alice");
    let bob = Application::named(&clock, "bob");

    let trace = Rc::new(RefCell::new(Vec::new()));

    let alice_timer = VirtualTimer::new(&alice);
    let bob_timer = VirtualTimer::new(&bob);

    {
        let trace = Rc::clone(&trace);
        let view = clock.clone();
        alice_timer.expires_from_now(Duration::from_secs(2));
        alice_timer.async_wait(move |r| {
            trace.borrow_mut().push(format!("{} alice timer {:?}", view.format_now(), r));
        });
    }
    {
        let trace = Rc::clone(&trace);
        let view = clock.clone();
        bob_timer.expires_from_now(Duration::from_secs(1));
        bob_timer.async_wait(move |r| {
            trace.borrow_mut().push(format!("{} bob timer {:?}", view.format_now(), r));
        });
    }
    {
        let trace = Rc::clone(&trace);
        let view = clock.clone();
        bob.post(move || trace.borrow_mut().push(format!("{} bob task", view.format_now())));
    }

    println!("━━━ vtime shared clock demo ━━━");
    println!("apps on clock: {}", clock.app_count());

    let mut round = 0;
    loop {
        let ran_alice = alice.crank(false);
        let ran_bob = bob.crank(false);
        if ran_alice + ran_bob == 0 {
            break;
        }
        round += 1;
        println!(
            "round {:>2}: alice={} bob={} now={}",
            round,
            ran_alice,
            ran_bob,
            VirtualClock::format_iso8601(clock.now())
        );
    }

    println!();
    for line in trace.borrow().iter() {
        println!("  {}", line);
    }
}
