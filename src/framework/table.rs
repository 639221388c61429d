//! Priority-ordered transition tables and their evaluation.

use super::error::{BuildError, TransitionError};
use super::transition::Transition;
use crate::core::State;
use crate::error::VaultError;
use crate::vault::GuardedValue;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// What one evaluation pass over a table produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation<S> {
    /// No predicate held.
    NoneFired,

    /// A transition fired. `next` is `None` when it stays in the origin.
    Fired {
        transition: String,
        priority: u32,
        next: Option<S>,
    },

    /// The aggregate guard could not be acquired in time.
    TimedOut(VaultError),

    /// The aggregate vault is disposed or the acquisition was cancelled.
    Unavailable(VaultError),

    /// A procedure returned an error.
    Failed {
        transition: String,
        error: TransitionError,
    },

    /// A predicate or procedure panicked.
    Panicked(String),
}

impl<S: Clone> Evaluation<S> {
    /// The state to move to, if this evaluation asks for a change.
    pub fn next_state(&self) -> Option<S> {
        match self {
            Self::Fired { next, .. } => next.clone(),
            _ => None,
        }
    }
}

/// Transitions of one origin state, keyed by unique priority.
pub struct TransitionTable<S: State, A, C> {
    origin: S,
    transitions: BTreeMap<u32, Transition<S, A, C>>,
}

impl<S: State, A, C> TransitionTable<S, A, C> {
    pub fn new(origin: S) -> Self {
        Self {
            origin,
            transitions: BTreeMap::new(),
        }
    }

    pub fn origin(&self) -> &S {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Transitions in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Transition<S, A, C>> {
        self.transitions.values()
    }

    /// Every state some transition of this table may move to.
    pub fn destinations(&self) -> Vec<S> {
        let mut all: Vec<S> = Vec::new();
        for dest in self.transitions.values().flat_map(|t| t.destinations.iter()) {
            if !all.contains(dest) {
                all.push(dest.clone());
            }
        }
        all
    }

    /// Add a transition. Priorities must be unique within the table.
    pub fn insert(&mut self, transition: Transition<S, A, C>) -> Result<(), BuildError> {
        if transition.origin != self.origin {
            return Err(BuildError::OriginMismatch {
                table: self.origin.name().to_string(),
                transition: transition.name.clone(),
                origin: transition.origin.name().to_string(),
            });
        }
        if let Some(existing) = self.transitions.get(&transition.priority) {
            return Err(BuildError::DuplicatePriority {
                state: self.origin.name().to_string(),
                priority: transition.priority,
                existing: existing.name.clone(),
            });
        }
        self.transitions.insert(transition.priority, transition);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, transition: Transition<S, A, C>) -> Result<Self, BuildError> {
        self.insert(transition)?;
        Ok(self)
    }

    /// Acquire the aggregate once, fire the first transition whose predicate
    /// holds and run its side effect after the guard is released.
    pub fn evaluate(&self, vault: &GuardedValue<A>, timeout: Duration, context: &C) -> Evaluation<S> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut guard = match vault.lock(timeout) {
                Ok(guard) => guard,
                Err(e) if e.is_timeout() => return Err(Evaluation::TimedOut(e)),
                Err(e) => return Err(Evaluation::Unavailable(e)),
            };
            let fired = guard.mixed(|aggregate| {
                let transition = self.transitions.values().find(|t| t.is_possible(aggregate))?;
                Some((transition, transition.execute(aggregate, context)))
            });
            drop(guard);
            Ok(fired)
        }));

        let fired = match outcome {
            Ok(Ok(fired)) => fired,
            Ok(Err(evaluation)) => return evaluation,
            Err(payload) => return Evaluation::Panicked(panic_message(payload.as_ref())),
        };

        match fired {
            None => Evaluation::NoneFired,
            Some((transition, Ok(next))) => {
                transition.after_execute(context, next.as_ref());
                Evaluation::Fired {
                    transition: transition.name.clone(),
                    priority: transition.priority,
                    next,
                }
            }
            Some((transition, Err(error))) => Evaluation::Failed {
                transition: transition.name.clone(),
                error,
            },
        }
    }
}

impl<S: State, A, C> std::fmt::Debug for TransitionTable<S, A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionTable")
            .field("origin", &self.origin)
            .field("transitions", &self.transitions.values().collect::<Vec<_>>())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::TransitionBuilder;
    use std::sync::Arc;

    crate::state_enum! {
        #[derive(Copy, Eq)]
        enum Valve {
            Shut,
            Open,
            Stuck,
        }
        error: [Stuck]
    }

    type Table = TransitionTable<Valve, i32, ()>;
    type Builder = TransitionBuilder<Valve, i32, ()>;

    fn vault(value: i32) -> GuardedValue<i32> {
        GuardedValue::new("pressure", move || value, Duration::from_millis(50))
    }

    fn table() -> Table {
        Table::new(Valve::Shut)
            .with(
                Builder::new("overpressure")
                    .from(Valve::Shut)
                    .priority(0)
                    .when(|p| *p > 100)
                    .goes_to(Valve::Stuck)
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .with(
                Builder::new("open")
                    .from(Valve::Shut)
                    .priority(1)
                    .when(|p| *p > 10)
                    .to(Valve::Open)
                    .execute(|p, _| {
                        *p -= 10;
                        Ok(Some(Valve::Open))
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn duplicate_priority_is_a_build_error() {
        let err = table()
            .with(
                Builder::new("again")
                    .from(Valve::Shut)
                    .priority(1)
                    .when(|_| true)
                    .goes_to(Valve::Open)
                    .build()
                    .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicatePriority { priority: 1, .. }));
    }

    #[test]
    fn foreign_origin_is_a_build_error() {
        let err = table()
            .with(
                Builder::new("elsewhere")
                    .from(Valve::Open)
                    .priority(7)
                    .when(|_| true)
                    .goes_to(Valve::Shut)
                    .build()
                    .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::OriginMismatch { .. }));
    }

    #[test]
    fn lowest_priority_true_predicate_wins() {
        let vault = vault(500);
        let evaluation = table().evaluate(&vault, Duration::from_millis(50), &());
        assert_eq!(evaluation.next_state(), Some(Valve::Stuck));
        // The first transition does not mutate.
        assert_eq!(vault.lock_default().unwrap().query(|p| *p), 500);
    }

    #[test]
    fn procedure_mutates_under_the_same_guard() {
        let vault = vault(50);
        let evaluation = table().evaluate(&vault, Duration::from_millis(50), &());
        assert_eq!(
            evaluation,
            Evaluation::Fired {
                transition: "open".to_string(),
                priority: 1,
                next: Some(Valve::Open),
            }
        );
        assert_eq!(vault.lock_default().unwrap().query(|p| *p), 40);
    }

    #[test]
    fn nothing_fires_when_no_predicate_holds() {
        let vault = vault(1);
        assert_eq!(
            table().evaluate(&vault, Duration::from_millis(50), &()),
            Evaluation::NoneFired
        );
        assert_eq!(table().destinations(), vec![Valve::Stuck, Valve::Open]);
    }

    #[test]
    fn held_vault_reports_timeout() {
        let vault = Arc::new(vault(500));
        let _held = vault.lock_default().unwrap();
        let evaluation = table().evaluate(&vault, Duration::from_millis(20), &());
        assert!(matches!(evaluation, Evaluation::TimedOut(_)));
    }

    #[test]
    fn disposed_vault_is_unavailable() {
        let vault = vault(500);
        vault.dispose(Duration::from_millis(20));
        let evaluation = table().evaluate(&vault, Duration::from_millis(20), &());
        assert!(matches!(evaluation, Evaluation::Unavailable(_)));
    }

    #[test]
    fn panicking_predicate_is_reported_and_releases_guard() {
        let table = Table::new(Valve::Shut)
            .with(
                Builder::new("explodes")
                    .from(Valve::Shut)
                    .priority(0)
                    .when(|_| panic!("sensor failure"))
                    .goes_to(Valve::Open)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let vault = vault(0);
        let evaluation = table.evaluate(&vault, Duration::from_millis(20), &());
        assert_eq!(evaluation, Evaluation::Panicked("sensor failure".to_string()));
        assert!(vault.spin_lock(Duration::from_millis(10)).is_ok());
    }
}
