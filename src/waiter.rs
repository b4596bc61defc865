//! Awaiting a promise from an async context. The promise itself never polls
//! anything; a `Waiter` only parks the task until some other code settles the
//! promise.
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::promise::Shared;
use crate::{Error, Promise};

/// Future returned by [`Promise::wait`].
///
/// Resolves to the promise's value, to `Error::Rejected` with its error, or to
/// `Error::Abandoned` if every `Promise` handle was dropped while it was still
/// pending.
///
/// # Examples
///
/// ```
/// use promise_q::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let promise = Promise::<String, String>::new();
/// let waiter = promise.wait();
/// let task = thread::spawn(move || block_on(async {
///     println!("Received {:?}", waiter.await);
/// }));
/// promise.resolve("Hi".into());
/// task.join().expect("The task thread has panicked.");
/// ```
pub struct Waiter<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Wait for this promise to settle. Waiting counts as handling a
    /// rejection.
    pub fn wait(&self) -> Waiter<T, E> {
        self.shared.inner.lock().handled = true;
        Waiter {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Future for Waiter<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        if let Some(outcome) = &inner.outcome {
            return Poll::Ready(outcome.clone().map_err(Error::Rejected));
        }
        if self.shared.handles.load(Ordering::Acquire) == 0 {
            return Poll::Ready(Err(Error::Abandoned));
        }
        if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, Error<E>>;
    type IntoFuture = Waiter<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

impl<T, E> std::fmt::Debug for Waiter<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").finish_non_exhaustive()
    }
}
