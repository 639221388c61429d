//! A single transition: predicate, procedure, priority and destinations.

use super::error::TransitionError;
use crate::core::State;

/// Read-only test evaluated against the aggregate.
pub type Predicate<A> = Box<dyn Fn(&A) -> bool + Send + Sync>;

/// Mutates the aggregate and names the next state, or `None` to stay.
pub type Procedure<S, A, C> =
    Box<dyn Fn(&mut A, &C) -> Result<Option<S>, TransitionError> + Send + Sync>;

/// Runs after the aggregate guard has been released.
pub type SideEffect<S, C> = Box<dyn Fn(&C, Option<&S>) + Send + Sync>;

/// A transition owned by one origin state.
///
/// `S` is the state code, `A` the aggregate the predicate and procedure see,
/// and `C` the per-activation context handed to procedures and side effects.
pub struct Transition<S: State, A, C> {
    pub name: String,
    pub origin: S,
    pub priority: u32,
    pub destinations: Vec<S>,
    pub(super) predicate: Predicate<A>,
    pub(super) procedure: Procedure<S, A, C>,
    pub(super) side_effect: Option<SideEffect<S, C>>,
}

impl<S: State, A, C> Transition<S, A, C> {
    /// Check if the predicate holds for `aggregate` (pure).
    pub fn is_possible(&self, aggregate: &A) -> bool {
        (self.predicate)(aggregate)
    }

    /// Run the procedure and verify the state it names was declared.
    ///
    /// Returning the origin state is treated the same as staying.
    pub fn execute(&self, aggregate: &mut A, context: &C) -> Result<Option<S>, TransitionError> {
        match (self.procedure)(aggregate, context)? {
            Some(next) if next == self.origin => Ok(None),
            Some(next) if !self.destinations.contains(&next) => {
                Err(TransitionError::UndeclaredDestination {
                    transition: self.name.clone(),
                    destination: next.name().to_string(),
                })
            }
            next => Ok(next),
        }
    }

    /// Invoke the side-effect hook, if any.
    pub fn after_execute(&self, context: &C, next: Option<&S>) {
        if let Some(hook) = &self.side_effect {
            hook(context, next);
        }
    }
}

impl<S: State, A, C> std::fmt::Debug for Transition<S, A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("priority", &self.priority)
            .field("destinations", &self.destinations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::TransitionBuilder;

    crate::state_enum! {
        #[derive(Copy, Eq)]
        enum Lamp {
            Off,
            On,
            Blown,
        }
        error: [Blown]
    }

    #[test]
    fn predicate_is_evaluated_against_aggregate() {
        let transition = TransitionBuilder::<Lamp, u32, ()>::new("switch on")
            .from(Lamp::Off)
            .priority(0)
            .when(|watts: &u32| *watts > 0)
            .goes_to(Lamp::On)
            .build()
            .unwrap();

        assert!(transition.is_possible(&60));
        assert!(!transition.is_possible(&0));
    }

    #[test]
    fn undeclared_destination_is_rejected() {
        let transition = TransitionBuilder::<Lamp, u32, ()>::new("sneaky")
            .from(Lamp::Off)
            .priority(0)
            .to(Lamp::On)
            .when(|_| true)
            .execute(|_, _| Ok(Some(Lamp::Blown)))
            .build()
            .unwrap();

        let mut watts = 1;
        let err = transition.execute(&mut watts, &()).unwrap_err();
        assert!(err.is_defect());
    }

    #[test]
    fn returning_origin_means_stay() {
        let transition = TransitionBuilder::<Lamp, u32, ()>::new("flicker")
            .from(Lamp::On)
            .priority(3)
            .when(|_| true)
            .execute(|watts, _| {
                *watts += 1;
                Ok(Some(Lamp::On))
            })
            .build()
            .unwrap();

        let mut watts = 0;
        assert_eq!(transition.execute(&mut watts, &()).unwrap(), None);
        assert_eq!(watts, 1);
    }
}
