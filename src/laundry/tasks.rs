//! Bodies of the activation, wash and dry tasks.
//!
//! Each timed phase sleeps cooperatively. When cancelled part way through,
//! a phase applies its effect in proportion to the time it actually ran and
//! then reports the cancellation.

use super::context::MachineContext;
use crate::error::{fail_fast, StatusError};
use crate::executor::{CancellationPair, Cancelled, TaskFailure};
use crate::status::{ErrorState, LaundryItem, LaundryStatusFlags};
use std::sync::Weak;
use std::time::Duration;
use tracing::{debug, warn};

/// Result type every task body returns.
pub(crate) type TaskOutcome = Result<String, TaskFailure>;

/// Timings copied out of the config when a task is created.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseTiming {
    pub(crate) duration: Duration,
    pub(crate) check_interval: Duration,
}

pub(crate) fn activate(
    context: Weak<MachineContext>,
    timing: PhaseTiming,
) -> impl FnOnce(&CancellationPair) -> TaskOutcome + Send + 'static {
    move |tokens: &CancellationPair| {
        tokens.check()?;
        if let Err(e) = with_flags(&context, recover_error)? {
            fail_fast(&format!("activation could not recover a registered error: {e}"));
        }
        tokens
            .sleep(timing.duration, timing.check_interval)
            .map_err(|interrupted| TaskFailure::Cancelled(interrupted.cause))?;
        check_fault(&context, "activation")?;
        Ok("machine activated".to_string())
    }
}

pub(crate) fn wash(
    context: Weak<MachineContext>,
    soak: PhaseTiming,
    cleanse: PhaseTiming,
) -> impl FnOnce(&CancellationPair) -> TaskOutcome + Send + 'static {
    move |tokens: &CancellationPair| {
        run_phase(&context, tokens, "soak", soak, LaundryItem::soak)?;
        check_fault(&context, "soak")?;
        run_phase(&context, tokens, "cleanse", cleanse, LaundryItem::cleanse)?;
        check_fault(&context, "cleanse")?;
        Ok("laundry washed".to_string())
    }
}

pub(crate) fn dry(
    context: Weak<MachineContext>,
    timing: PhaseTiming,
) -> impl FnOnce(&CancellationPair) -> TaskOutcome + Send + 'static {
    move |tokens: &CancellationPair| {
        run_phase(&context, tokens, "dry", timing, LaundryItem::dry)?;
        check_fault(&context, "dry")?;
        Ok("laundry dried".to_string())
    }
}

/// Walk a leftover error through process -> clear -> reset.
///
/// A logic error cannot be recovered from and is reported as such.
fn recover_error(flags: &mut LaundryStatusFlags) -> Result<(), StatusError> {
    if flags.error_is(ErrorState::Nil) {
        return Ok(());
    }
    if flags.error_status().is_logic_error() {
        return Err(StatusError::StateLogic(format!(
            "logic error {:?} cannot be recovered",
            flags.error_status().id()
        )));
    }
    if flags.error_is(ErrorState::Registered) && !flags.process_error("processed during activation") {
        return Err(refused("process"));
    }
    if !flags.clear_error("cleared during activation") {
        return Err(refused("clear"));
    }
    if !flags.reset_error() {
        return Err(refused("reset"));
    }
    debug!("registered error recovered during activation");
    Ok(())
}

fn refused(step: &str) -> StatusError {
    StatusError::StateLogic(format!("error status refused to {step} during activation"))
}

fn run_phase(
    context: &Weak<MachineContext>,
    tokens: &CancellationPair,
    phase: &'static str,
    timing: PhaseTiming,
    effect: fn(&mut LaundryItem, f64),
) -> Result<(), TaskFailure> {
    match tokens.sleep(timing.duration, timing.check_interval) {
        Ok(()) => apply(context, phase, effect, 1.0),
        Err(interrupted) => {
            let fraction = completed_fraction(interrupted.elapsed, timing.duration);
            debug!(phase, fraction, "phase interrupted, applying partial effect");
            // Best effort: the cancellation is what gets reported.
            if let Err(e) = apply(context, phase, effect, fraction) {
                warn!(phase, error = %e, "partial effect not applied");
            }
            Err(TaskFailure::Cancelled(interrupted.cause))
        }
    }
}

fn apply(
    context: &Weak<MachineContext>,
    phase: &'static str,
    effect: fn(&mut LaundryItem, f64),
    fraction: f64,
) -> Result<(), TaskFailure> {
    let applied = with_flags(context, |flags| {
        flags.apply_to_loaded(|item| effect(item, fraction))
    })?;
    if applied {
        Ok(())
    } else {
        Err(TaskFailure::Fault(format!("no laundry loaded during {phase}")))
    }
}

fn check_fault(context: &Weak<MachineContext>, phase: &str) -> Result<(), TaskFailure> {
    let context = context.upgrade().ok_or(TaskFailure::Cancelled(Cancelled::Overall))?;
    if context.faults().should_fault() {
        warn!(phase, "simulated hardware fault");
        return Err(TaskFailure::Fault(format!("simulated hardware fault during {phase}")));
    }
    Ok(())
}

fn with_flags<R>(
    context: &Weak<MachineContext>,
    f: impl FnOnce(&mut LaundryStatusFlags) -> R,
) -> Result<R, TaskFailure> {
    let context = context.upgrade().ok_or(TaskFailure::Cancelled(Cancelled::Overall))?;
    let mut guard = context
        .flags()
        .lock_default()
        .map_err(|e| TaskFailure::Fault(format!("status unavailable: {e}")))?;
    Ok(guard.mixed(f))
}

pub(crate) fn completed_fraction(elapsed: Duration, required: Duration) -> f64 {
    if required.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / required.as_secs_f64()).min(1.0)
}
