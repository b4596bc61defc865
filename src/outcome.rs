use crate::Promise;

/// What a continuation hands to its chained promise.
///
/// `Promise` is the flattening case: the chained promise adopts whatever the
/// inner promise eventually settles with.
#[derive(Debug, Clone)]
pub enum Outcome<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Error(E),
}

/// Anything that can settle a `Promise<T, E>`.
///
/// # Examples
///
/// ```
/// use promise_q::{IntoOutcome, Outcome, Promise};
///
/// let ready: Result<i32, String> = Ok(1);
/// assert!(!ready.is_promise());
/// assert!(Promise::<i32, String>::new().is_promise());
/// assert!(matches!(ready.into_outcome(), Outcome::Value(1)));
/// ```
pub trait IntoOutcome<T, E> {
    fn into_outcome(self) -> Outcome<T, E>;

    /// Whether settling with this defers to another promise.
    fn is_promise(&self) -> bool {
        false
    }
}

impl<T, E> IntoOutcome<T, E> for Outcome<T, E> {
    fn into_outcome(self) -> Outcome<T, E> {
        self
    }

    fn is_promise(&self) -> bool {
        matches!(self, Outcome::Promise(_))
    }
}

impl<T, E> IntoOutcome<T, E> for Result<T, E> {
    fn into_outcome(self) -> Outcome<T, E> {
        match self {
            Ok(value) => Outcome::Value(value),
            Err(error) => Outcome::Error(error),
        }
    }
}

impl<T, E> IntoOutcome<T, E> for Promise<T, E> {
    fn into_outcome(self) -> Outcome<T, E> {
        Outcome::Promise(self)
    }

    fn is_promise(&self) -> bool {
        true
    }
}
