use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Errors that escape the promise machinery instead of turning into rejections.
#[derive(Debug, Error)]
pub enum PromiseError {
    /// A host handed [`Promise::try_new`](crate::Promise::try_new) an empty resolver slot.
    #[error("promise resolver is not a function")]
    ResolverNotCallable,
    #[error(transparent)]
    Uncaught(#[from] UncaughtRejection),
    #[error("microtask budget of {budget} exhausted before the queue drained")]
    BudgetExhausted { budget: usize },
    #[error("event loop went idle before the promise settled")]
    Stalled,
}

/// A promise was rejected while nothing was registered to observe the rejection.
///
/// The original reason is kept type-erased; recover it with [`UncaughtRejection::reason`].
#[derive(Error)]
#[error("uncaught ({provenance}) {description}")]
pub struct UncaughtRejection {
    reason: Box<dyn Any>,
    description: String,
    provenance: &'static str,
}

impl UncaughtRejection {
    pub(crate) fn new<E: fmt::Debug + 'static>(reason: E) -> Self {
        Self {
            description: format!("{reason:?}"),
            reason: Box::new(reason),
            provenance: "in promise",
        }
    }

    /// The original rejection reason, if it is an `E`.
    pub fn reason<E: 'static>(&self) -> Option<&E> {
        self.reason.downcast_ref()
    }

    /// `Debug` rendering of the reason.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn provenance(&self) -> &'static str {
        self.provenance
    }
}

impl fmt::Debug for UncaughtRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncaughtRejection")
            .field("reason", &self.description)
            .field("provenance", &self.provenance)
            .finish()
    }
}

/// Rejection reason of [`Promise::any`](crate::Promise::any) once every input rejected.
///
/// `errors` is index-aligned with the input promises.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AggregateError<E> {
    pub errors: Vec<E>,
    pub message: String,
}

impl<E> AggregateError<E> {
    pub const ALL_REJECTED: &'static str = "All promises rejected";

    pub fn new(errors: Vec<E>) -> Self {
        Self {
            errors,
            message: Self::ALL_REJECTED.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncaught_keeps_reason() {
        let uncaught = UncaughtRejection::new(String::from("💥"));
        assert_eq!(uncaught.reason::<String>().map(String::as_str), Some("💥"));
        assert!(uncaught.reason::<i32>().is_none());
        assert_eq!(uncaught.to_string(), "uncaught (in promise) \"💥\"");
    }

    #[test]
    fn test_aggregate_message() {
        let err = AggregateError::new(vec!["a", "b"]);
        assert_eq!(err.to_string(), "All promises rejected");
        assert_eq!(err.errors, ["a", "b"]);
    }

    #[test]
    fn test_promise_error_display() {
        assert_eq!(
            PromiseError::ResolverNotCallable.to_string(),
            "promise resolver is not a function"
        );
        let err: PromiseError = UncaughtRejection::new(7).into();
        assert_eq!(err.to_string(), "uncaught (in promise) 7");
    }
}
