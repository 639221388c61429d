//! Wash Cycle
//!
//! This example runs a few loads of laundry through one machine.
//!
//! Key concepts:
//! - Powering up and waiting for published states
//! - Moving laundry between repositories and the drum
//! - Wash-dry cycles, aborts and shutdown
//! - Observing state changes on the event thread
//!
//! Run with: cargo run --example wash_cycle
//! Set RUST_LOG=laundry_machine=debug to see transitions as they fire.

use laundry_machine::{
    LaundryBin, LaundryItem, LaundryMachine, LaundryMachineStateCode as Code, LaundryRepository,
    MachineConfig, MachineEvent,
};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(10);

/// Wait until the states entered after `before` end back in Full.
fn wait_for_cycle(machine: &LaundryMachine, before: u64) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        let back_in_full = machine
            .state_history()
            .is_some_and(|history| history.path_since(before).last() == Some(&&Code::Full));
        if back_in_full {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn main() -> Result<(), laundry_machine::MachineError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("laundry_machine=info")),
        )
        .init();

    println!("=== Laundry Machine Demo ===\n");

    let machine = LaundryMachine::new(MachineConfig::fast())?;
    machine.on_event(|event| {
        if let MachineEvent::StateChanged { old, new, change_count, .. } = event {
            println!("  [{change_count:>2}] {old} -> {new}");
        }
    });

    let dirty = LaundryBin::with_items(
        "dirty",
        [
            LaundryItem::new("jeans", 220, 10),
            LaundryItem::new("towel", 120, 60),
            LaundryItem::new("shirt", 90, 0),
        ],
    );
    let clean = LaundryBin::new("clean");
    let token = CancellationToken::new();

    println!("Powering up:");
    assert!(machine.turn_on());
    assert!(machine.wait_for_state(Code::Empty, WAIT));

    while !dirty.is_empty() {
        let Some(id) = machine.load_from(&dirty, Duration::from_millis(100), &token) else {
            break;
        };
        println!("\nWashing and drying {id}:");
        machine.wait_for_state(Code::Full, WAIT);
        let before = machine.state_change_count().unwrap_or_default();
        if !machine.initiate_wash_dry() {
            println!("  cycle refused");
            break;
        }
        if !wait_for_cycle(&machine, before) {
            println!("  cycle did not finish");
            break;
        }
        machine.unload_into(&clean);
    }

    println!("\nAborting a wash part way through:");
    machine.load(LaundryItem::new("duvet", 200, 0));
    machine.wait_for_state(Code::Full, WAIT);
    machine.initiate_wash();
    machine.wait_for_state(Code::Washing, WAIT);
    thread::sleep(Duration::from_millis(30));
    machine.abort();
    machine.wait_for_state(Code::Full, WAIT);
    if let Some(item) = machine.unload_any() {
        println!(
            "  {} came out with soil {} and dampness {}",
            item.description(),
            item.soiled_factor(),
            item.dampness()
        );
    }

    println!("\nPowering down:");
    machine.turn_off();
    machine.wait_for_state(Code::PoweredDown, WAIT);

    println!("\nClean laundry:");
    for item in clean.dump() {
        println!(
            "  {:<6} soil {:>3} dampness {:>3}",
            item.description(),
            item.soiled_factor(),
            item.dampness()
        );
    }

    machine.dispose();
    println!("\n=== Demo Complete ===");
    Ok(())
}
