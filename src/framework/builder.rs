//! Fluent builder for transitions.

use super::error::{BuildError, TransitionError};
use super::transition::{Predicate, Procedure, SideEffect, Transition};
use crate::core::State;

/// Builder for constructing transitions with a fluent API.
///
/// # Example
///
/// ```
/// use laundry_machine::framework::TransitionBuilder;
/// use laundry_machine::LaundryMachineStateCode as Code;
///
/// let transition = TransitionBuilder::<Code, bool, ()>::new("loaded")
///     .from(Code::Empty)
///     .priority(1)
///     .when(|loaded: &bool| *loaded)
///     .goes_to(Code::Full)
///     .build()
///     .unwrap();
///
/// assert!(transition.is_possible(&true));
/// assert_eq!(transition.destinations, vec![Code::Full]);
/// ```
pub struct TransitionBuilder<S: State, A, C> {
    name: String,
    origin: Option<S>,
    priority: Option<u32>,
    destinations: Vec<S>,
    predicate: Option<Predicate<A>>,
    procedure: Option<Procedure<S, A, C>>,
    side_effect: Option<SideEffect<S, C>>,
}

impl<S: State + 'static, A: 'static, C: 'static> TransitionBuilder<S, A, C> {
    /// Create a new transition builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: None,
            priority: None,
            destinations: Vec::new(),
            predicate: None,
            procedure: None,
            side_effect: None,
        }
    }

    /// Set the origin state (required).
    pub fn from(mut self, state: S) -> Self {
        self.origin = Some(state);
        self
    }

    /// Set the priority (required). Lower values are evaluated first.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Declare a state the procedure may move to. Can be called repeatedly.
    pub fn to(mut self, state: S) -> Self {
        if !self.destinations.contains(&state) {
            self.destinations.push(state);
        }
        self
    }

    /// Set the predicate (required).
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Set the procedure run when the predicate holds.
    pub fn execute<F>(mut self, procedure: F) -> Self
    where
        F: Fn(&mut A, &C) -> Result<Option<S>, TransitionError> + Send + Sync + 'static,
    {
        self.procedure = Some(Box::new(procedure));
        self
    }

    /// Shorthand for a procedure that only moves to `state`.
    pub fn goes_to(self, state: S) -> Self {
        let target = state.clone();
        self.to(state)
            .execute(move |_, _| Ok(Some(target.clone())))
    }

    /// Hook invoked after the aggregate guard is released.
    pub fn on_executed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&C, Option<&S>) + Send + Sync + 'static,
    {
        self.side_effect = Some(Box::new(hook));
        self
    }

    /// Build the transition.
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<Transition<S, A, C>, BuildError> {
        let origin = self
            .origin
            .ok_or_else(|| BuildError::MissingOrigin(self.name.clone()))?;
        let priority = self
            .priority
            .ok_or_else(|| BuildError::MissingPriority(self.name.clone()))?;
        let predicate = self
            .predicate
            .ok_or_else(|| BuildError::MissingPredicate(self.name.clone()))?;
        let procedure = self
            .procedure
            .ok_or_else(|| BuildError::MissingProcedure(self.name.clone()))?;

        Ok(Transition {
            name: self.name,
            origin,
            priority,
            destinations: self.destinations,
            predicate,
            procedure,
            side_effect: self.side_effect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    crate::state_enum! {
        #[derive(Copy, Eq)]
        enum Tap {
            Closed,
            Running,
        }
    }

    type Builder = TransitionBuilder<Tap, u8, AtomicUsize>;

    #[test]
    fn builder_validates_required_fields() {
        let missing_origin = Builder::new("open").priority(0).build();
        assert!(matches!(missing_origin, Err(BuildError::MissingOrigin(_))));

        let missing_priority = Builder::new("open").from(Tap::Closed).build();
        assert!(matches!(missing_priority, Err(BuildError::MissingPriority(_))));

        let missing_predicate = Builder::new("open").from(Tap::Closed).priority(0).build();
        assert!(matches!(missing_predicate, Err(BuildError::MissingPredicate(_))));

        let missing_procedure = Builder::new("open")
            .from(Tap::Closed)
            .priority(0)
            .when(|_| true)
            .build();
        assert!(matches!(missing_procedure, Err(BuildError::MissingProcedure(_))));
    }

    #[test]
    fn destinations_are_deduplicated() {
        let transition = Builder::new("open")
            .from(Tap::Closed)
            .priority(0)
            .to(Tap::Running)
            .when(|_| true)
            .goes_to(Tap::Running)
            .build()
            .unwrap();
        assert_eq!(transition.destinations, vec![Tap::Running]);
    }

    #[test]
    fn side_effect_receives_next_state() {
        let transition = Builder::new("open")
            .from(Tap::Closed)
            .priority(0)
            .when(|_| true)
            .goes_to(Tap::Running)
            .on_executed(|count: &AtomicUsize, next: Option<&Tap>| {
                if next == Some(&Tap::Running) {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        let count = AtomicUsize::new(0);
        let mut level = 0_u8;
        let next = transition.execute(&mut level, &count).unwrap();
        transition.after_execute(&count, next.as_ref());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
