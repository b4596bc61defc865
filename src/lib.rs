//! Settle-once promises.
//!
//! A [`Promise`] eventually holds either a value or an error. Continuations
//! registered with [`Promise::then`] and [`Promise::fail`] run synchronously
//! when the promise settles and each produce a chained promise. Resolving a
//! promise with another promise adopts the inner promise's outcome, so a
//! settled value is never itself a promise.
//!
//! # Examples
//!
//! ```
//! use promise_q::Promise;
//!
//! let promise = Promise::<i32, String>::new();
//! let next = promise.then(|x| Ok(x + 1));
//! promise.resolve(5);
//! assert_eq!(next.value(), Some(6));
//! ```
mod combinators;
mod dispatch;
mod outcome;
mod promise;
mod unhandled;
mod waiter;

pub use combinators::{all, fcall, is_promise, reject, resolve, resolve_with};
pub use outcome::{IntoOutcome, Outcome};
pub use promise::{Promise, State};
pub use unhandled::{
    set_unhandled_rejection_hook, take_unhandled_rejection_hook, UnhandledRejection,
};
pub use waiter::Waiter;

use thiserror::Error as ThisError;

/// Why a promise could not produce a value.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    #[error("promise was rejected")]
    Rejected(E),
    #[error("promise is still pending")]
    Pending,
    #[error("promise was abandoned before it settled")]
    Abandoned,
}

impl<E> Error<E> {
    /// The rejection payload, if this is a rejection.
    pub fn into_rejection(self) -> Option<E> {
        match self {
            Error::Rejected(error) => Some(error),
            _ => None,
        }
    }
}
