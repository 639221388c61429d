//! Entry and exit invariants.
//!
//! Checks use `Validation` so that every failing invariant is reported at
//! once instead of stopping at the first.

use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// One invariant that failed, by description.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{description}")]
pub struct InvariantViolation {
    pub description: String,
}

type Check<A> = Box<dyn Fn(&A) -> bool + Send + Sync>;

/// A named condition on the aggregate.
pub struct Invariant<A> {
    description: String,
    check: Check<A>,
}

impl<A> Invariant<A> {
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Box::new(check),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn holds(&self, aggregate: &A) -> bool {
        (self.check)(aggregate)
    }
}

impl<A> std::fmt::Debug for Invariant<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invariant")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Evaluate every invariant, accumulating ALL violations.
pub fn check_invariants<A>(
    invariants: &[Invariant<A>],
    aggregate: &A,
) -> Validation<(), NonEmptyVec<InvariantViolation>> {
    let mut checks: Vec<Validation<(), NonEmptyVec<InvariantViolation>>> = Vec::new();

    for invariant in invariants {
        let check = if invariant.holds(aggregate) {
            Validation::success(())
        } else {
            Validation::fail(InvariantViolation {
                description: invariant.description.clone(),
            })
        };
        checks.push(check);
    }

    Validation::all_vec(checks).map(|_| ())
}

/// Like [`check_invariants`], with violations joined into one description.
pub fn verify_invariants<A>(invariants: &[Invariant<A>], aggregate: &A) -> Result<(), String> {
    match check_invariants(invariants, aggregate) {
        Validation::Success(_) => Ok(()),
        Validation::Failure(errors) => Err(errors
            .iter()
            .map(|e| e.description.as_str())
            .collect::<Vec<_>>()
            .join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invariants() -> Vec<Invariant<i32>> {
        vec![
            Invariant::new("must be positive", |n: &i32| *n > 0),
            Invariant::new("must be even", |n: &i32| n % 2 == 0),
            Invariant::new("must be small", |n: &i32| *n < 100),
        ]
    }

    #[test]
    fn all_violations_are_accumulated() {
        match check_invariants(&invariants(), &-3) {
            Validation::Failure(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().any(|e| e.description == "must be positive"));
                assert!(errors.iter().any(|e| e.description == "must be even"));
            }
            Validation::Success(_) => panic!("Expected failures, got success"),
        }
    }

    #[test]
    fn passing_invariants_succeed() {
        assert!(check_invariants(&invariants(), &42).is_success());
        assert_eq!(verify_invariants(&invariants(), &42), Ok(()));
    }

    #[test]
    fn verify_joins_descriptions() {
        let err = verify_invariants(&invariants(), &101).unwrap_err();
        assert_eq!(err, "must be even; must be small");
    }
}
