use std::sync::Arc;

use parking_lot::Mutex;

use crate::{IntoOutcome, Promise};

/// A promise settled by calling `f` right away. `f` failing (returning
/// `Err`) rejects the promise; returning a promise defers to it.
///
/// # Examples
///
/// ```
/// use promise_q::fcall;
///
/// let parsed = fcall(|| "12".parse::<i32>().map_err(|e| e.to_string()));
/// assert_eq!(parsed.value(), Some(12));
///
/// let broken = fcall(|| "x".parse::<i32>().map_err(|e| e.to_string()));
/// assert!(broken.is_rejected());
/// ```
pub fn fcall<T, E, R, F>(f: F) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    R: IntoOutcome<T, E>,
    F: FnOnce() -> R,
{
    let promise = Promise::new();
    promise.settle(f());
    promise
}

/// An already resolved promise.
pub fn resolve<T, E>(value: T) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    Promise::resolved(value)
}

/// A promise that follows `promise`.
pub fn resolve_with<T, E>(promise: &Promise<T, E>) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let follower = Promise::new();
    follower.resolve_with(promise);
    follower
}

/// An already rejected promise.
pub fn reject<T, E>(error: E) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    Promise::rejected(error)
}

/// Whether settling with `value` would defer to another promise.
pub fn is_promise<T, E, V>(value: &V) -> bool
where
    V: IntoOutcome<T, E>,
{
    value.is_promise()
}

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Wait for every promise.
///
/// Resolves with the values in input order once all inputs have resolved, or
/// rejects with the first rejection observed. An empty input resolves at once
/// with an empty `Vec`.
///
/// # Examples
///
/// ```
/// use promise_q::{all, Promise};
///
/// let (a, b) = (Promise::<i32, String>::new(), Promise::new());
/// let both = all([a.clone(), b.clone()]);
/// b.resolve(2);
/// a.resolve(1);
/// assert_eq!(both.value(), Some(vec![1, 2]));
/// ```
pub fn all<T, E, I>(promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<Promise<T, E>> = promises.into_iter().collect();
    let aggregate = Promise::new();
    if promises.is_empty() {
        aggregate.resolve(Vec::new());
        return aggregate;
    }

    let gather = Arc::new(Mutex::new(Gather {
        values: vec![None; promises.len()],
        remaining: promises.len(),
    }));
    for (index, promise) in promises.iter().enumerate() {
        let gather = gather.clone();
        let aggregate = aggregate.clone();
        promise.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => {
                let values = {
                    let mut gather = gather.lock();
                    gather.values[index] = Some(value);
                    gather.remaining -= 1;
                    if gather.remaining == 0 {
                        Some(gather.values.drain(..).flatten().collect::<Vec<T>>())
                    } else {
                        None
                    }
                };
                if let Some(values) = values {
                    aggregate.resolve(values);
                }
            }
            Err(error) => aggregate.reject(error),
        }));
    }
    aggregate
}
