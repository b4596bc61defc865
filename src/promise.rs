use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Waker;

use parking_lot::Mutex;

use crate::{dispatch, unhandled, Error, IntoOutcome, Outcome};

pub(crate) type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

/// Where a promise is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Resolved,
    Rejected,
}

/// A settle-once cell that eventually holds a value or an error.
///
/// `Promise` is a handle: clones share the same cell, and any clone may
/// settle it. Continuations registered with [`then`](Promise::then),
/// [`fail`](Promise::fail) or [`then_fail`](Promise::then_fail) run on the
/// thread that settles the promise, before `resolve`/`reject` returns, or
/// immediately if the promise has already settled. Each registration returns
/// its own chained promise.
///
/// # Examples
///
/// ```
/// use promise_q::Promise;
/// use std::thread;
///
/// let promise = Promise::<String, String>::new();
/// let shouted = promise.then(|text| Ok(text.to_uppercase()));
///
/// let settler = promise.clone();
/// thread::spawn(move || settler.resolve("hi".into()))
///     .join()
///     .expect("The settler thread has panicked");
///
/// assert_eq!(shouted.value(), Some("HI".to_string()));
/// ```
pub struct Promise<T, E> {
    pub(crate) shared: Arc<Shared<T, E>>,
}

pub(crate) struct Shared<T, E> {
    pub(crate) inner: Mutex<Inner<T, E>>,
    /// Live `Promise` handles. Waiters do not count.
    pub(crate) handles: AtomicUsize,
    report: fn(&Shared<T, E>),
    release: fn(Vec<Reaction<T, E>>),
}

pub(crate) struct Inner<T, E> {
    pub(crate) outcome: Option<Result<T, E>>,
    /// Resolved with another promise and waiting for it to settle.
    locked: bool,
    /// Something has subscribed to or waited on this promise.
    pub(crate) handled: bool,
    reactions: Vec<Reaction<T, E>>,
    pub(crate) wakers: Vec<Waker>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a pending promise.
    pub fn new() -> Self {
        Promise {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    outcome: None,
                    locked: false,
                    handled: false,
                    reactions: Vec::new(),
                    wakers: Vec::new(),
                }),
                handles: AtomicUsize::new(1),
                report: Self::report_unhandled,
                release: Self::release_reactions,
            }),
        }
    }

    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        promise.resolve(value);
        promise
    }

    pub fn rejected(error: E) -> Self {
        let promise = Self::new();
        promise.reject(error);
        promise
    }

    /// Resolve with `value`. Ignored if the promise has already settled or
    /// has been resolved with another promise.
    pub fn resolve(&self, value: T) {
        self.complete(Ok(value), false);
    }

    /// Reject with `error`. Ignored if the promise has already settled or
    /// has been resolved with another promise.
    pub fn reject(&self, error: E) {
        self.complete(Err(error), false);
    }

    /// Resolve with another promise: this promise stays pending and then
    /// adopts whatever `other` settles with.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_q::Promise;
    ///
    /// let outer = Promise::<i32, String>::new();
    /// let inner = Promise::new();
    /// outer.resolve_with(&inner);
    /// assert!(outer.is_pending());
    ///
    /// inner.resolve(42);
    /// assert_eq!(outer.value(), Some(42));
    /// ```
    pub fn resolve_with(&self, other: &Promise<T, E>) {
        if Promise::ptr_eq(self, other) {
            log::warn!("[promise] ignoring attempt to resolve a promise with itself");
            return;
        }
        {
            let mut inner = self.shared.inner.lock();
            if inner.outcome.is_some() || inner.locked {
                log::debug!("[promise] ignoring resolve_with on a promise that is no longer open");
                return;
            }
            inner.locked = true;
        }
        let target = self.clone();
        other.subscribe(Box::new(move |outcome| target.complete(outcome, true)));
    }

    /// Settle from anything that converts into an [`Outcome`].
    pub fn settle(&self, outcome: impl IntoOutcome<T, E>) {
        match outcome.into_outcome() {
            Outcome::Value(value) => self.resolve(value),
            Outcome::Error(error) => self.reject(error),
            Outcome::Promise(other) => self.resolve_with(&other),
        }
    }

    /// Chain a continuation for the resolved value.
    ///
    /// The returned promise settles with whatever `on_resolve` returns. If
    /// this promise rejects, the returned promise rejects with the same error
    /// and `on_resolve` never runs.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_q::Promise;
    ///
    /// let promise = Promise::<i32, String>::resolved(7);
    /// let next = promise.then(|x| if x > 5 { Ok(x * 2) } else { Err("too small".to_string()) });
    /// assert_eq!(next.value(), Some(14));
    /// ```
    pub fn then<U, R, F>(&self, on_resolve: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        R: IntoOutcome<U, E>,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.chain(move |outcome, next| match outcome {
            Ok(value) => next.settle(on_resolve(value)),
            Err(error) => next.reject(error),
        })
    }

    /// Chain a continuation for the rejection error.
    ///
    /// The returned promise settles with whatever `on_reject` returns, so the
    /// continuation can recover with `Ok(..)` or keep failing with `Err(..)`.
    /// If this promise resolves, the value passes through untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_q::Promise;
    ///
    /// let promise = Promise::<i32, String>::rejected("boom".into());
    /// let recovered = promise.fail(|_| Ok::<_, String>(0));
    /// assert_eq!(recovered.value(), Some(0));
    /// ```
    pub fn fail<R, F>(&self, on_reject: F) -> Promise<T, E>
    where
        R: IntoOutcome<T, E>,
        F: FnOnce(E) -> R + Send + 'static,
    {
        self.chain(move |outcome, next| match outcome {
            Ok(value) => next.resolve(value),
            Err(error) => next.settle(on_reject(error)),
        })
    }

    /// Chain a continuation pair; exactly one of them runs.
    pub fn then_fail<U, R, F, G>(&self, on_resolve: F, on_reject: G) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        R: IntoOutcome<U, E>,
        F: FnOnce(T) -> R + Send + 'static,
        G: FnOnce(E) -> R + Send + 'static,
    {
        self.chain(move |outcome, next| match outcome {
            Ok(value) => next.settle(on_resolve(value)),
            Err(error) => next.settle(on_reject(error)),
        })
    }

    /// The resolved value, if any.
    pub fn value(&self) -> Option<T> {
        match self.shared.inner.lock().outcome {
            Some(Ok(ref value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection error, if any. Reading it counts as handling the
    /// rejection.
    pub fn error(&self) -> Option<E> {
        let mut inner = self.shared.inner.lock();
        let error = match inner.outcome {
            Some(Err(ref error)) => error.clone(),
            _ => return None,
        };
        inner.handled = true;
        Some(error)
    }

    /// The settled outcome, or [`Error::Pending`]. Reading a rejection counts
    /// as handling it.
    pub fn outcome(&self) -> Result<T, Error<E>> {
        let mut inner = self.shared.inner.lock();
        let error = match inner.outcome {
            Some(Ok(ref value)) => return Ok(value.clone()),
            Some(Err(ref error)) => error.clone(),
            None => return Err(Error::Pending),
        };
        inner.handled = true;
        Err(Error::Rejected(error))
    }

    /// Run `reaction` once this promise settles, or right away if it already
    /// has. Never called with the lock held.
    pub(crate) fn subscribe(&self, reaction: Reaction<T, E>) {
        let mut inner = self.shared.inner.lock();
        inner.handled = true;
        let Some(outcome) = inner.outcome.clone() else {
            inner.reactions.push(reaction);
            return;
        };
        drop(inner);
        dispatch::run(Box::new(move || reaction(outcome)));
    }

    fn chain<U, F>(&self, react: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, E>, &Promise<U, E>) + Send + 'static,
    {
        let next = Promise::new();
        let successor = next.clone();
        self.subscribe(Box::new(move |outcome| react(outcome, &successor)));
        next
    }

    /// The single Pending -> Resolved/Rejected transition. `forwarded` is set
    /// when the outcome comes from the promise this one was resolved with.
    fn complete(&self, outcome: Result<T, E>, forwarded: bool) {
        let (reactions, wakers) = {
            let mut inner = self.shared.inner.lock();
            if inner.outcome.is_some() || (inner.locked && !forwarded) {
                log::debug!("[promise] ignoring repeated settlement");
                return;
            }
            inner.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut inner.reactions),
                std::mem::take(&mut inner.wakers),
            )
        };
        log::trace!(
            "[promise] {} with {} reaction(s)",
            if outcome.is_ok() { "resolved" } else { "rejected" },
            reactions.len()
        );
        for waker in wakers {
            waker.wake();
        }
        for reaction in reactions {
            let outcome = outcome.clone();
            dispatch::run(Box::new(move || reaction(outcome)));
        }
    }

    fn report_unhandled(shared: &Shared<T, E>) {
        let error = match shared.inner.lock().outcome {
            Some(Err(ref error)) => error.clone(),
            _ => return,
        };
        unhandled::report(&error);
    }

    /// Released reactions may hold the last handle of a successor, so the
    /// release is queued to let a long chain unwind without recursion.
    fn release_reactions(reactions: Vec<Reaction<T, E>>) {
        dispatch::run(Box::new(move || drop(reactions)));
    }
}

impl<T, E> Promise<T, E> {
    pub fn state(&self) -> State {
        match self.shared.inner.lock().outcome {
            None => State::Pending,
            Some(Ok(_)) => State::Resolved,
            Some(Err(_)) => State::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == State::Resolved
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.shared, &other.shared)
    }
}

impl<T, E> Default for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        self.shared.handles.fetch_add(1, Ordering::Relaxed);
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Drop for Promise<T, E> {
    /// Dropping the last handle of a pending promise abandons it: waiters
    /// wake with `Error::Abandoned` and held reactions are released. Dropping
    /// the last handle of a rejection nobody looked at reports it.
    fn drop(&mut self) {
        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let mut inner = self.shared.inner.lock();
        if inner.outcome.is_none() {
            let reactions = std::mem::take(&mut inner.reactions);
            let wakers = std::mem::take(&mut inner.wakers);
            drop(inner);
            log::trace!("[promise] abandoned with {} reaction(s)", reactions.len());
            for waker in wakers {
                waker.wake();
            }
            if !reactions.is_empty() {
                (self.shared.release)(reactions);
            }
        } else if !inner.handled && matches!(inner.outcome, Some(Err(_))) {
            inner.handled = true;
            drop(inner);
            (self.shared.report)(&*self.shared);
        }
    }
}

impl<T, E> Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("state", &self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Promise, State};
    use crate::Error;
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_settles_only_once() {
        let promise = Promise::<i32, String>::new();
        promise.resolve(1);
        promise.resolve(2);
        promise.reject("late".into());
        assert_eq!(promise.state(), State::Resolved);
        assert_eq!(promise.value(), Some(1));
        assert_eq!(promise.error(), None);

        let promise = Promise::<i32, String>::new();
        promise.reject("first".into());
        promise.resolve(3);
        assert_eq!(promise.error(), Some("first".to_string()));
        assert_eq!(promise.value(), None);
    }

    #[test]
    fn test_accessors_follow_state() {
        let promise = Promise::<i32, String>::new();
        assert!(promise.is_pending());
        assert!(!promise.is_resolved());
        assert!(!promise.is_rejected());
        assert_eq!(promise.value(), None);
        assert_eq!(promise.error(), None);
        assert_eq!(promise.outcome(), Err(crate::Error::Pending));

        promise.reject("nope".into());
        assert!(promise.is_rejected());
        assert_eq!(
            promise.outcome(),
            Err(crate::Error::Rejected("nope".to_string()))
        );
    }

    #[test]
    fn test_then_transforms_value() {
        let promise = Promise::<i32, String>::new();
        let next = promise.then(|x| Ok(x + 1));
        assert!(next.is_pending());
        promise.resolve(5);
        assert_eq!(next.value(), Some(6));
    }

    #[test]
    fn test_then_after_settlement_fires_before_returning() {
        let promise = Promise::<i32, String>::resolved(7);
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = seen.clone();
        let next = promise.then(move |x| {
            observed.store(x as usize, Ordering::SeqCst);
            Ok(x * 3)
        });
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(next.value(), Some(21));
    }

    #[test]
    fn test_rejection_passes_through_then() {
        let promise = Promise::<i32, String>::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let next = promise.then(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(x)
        });
        promise.reject("E".into());
        assert_eq!(next.error(), Some("E".to_string()));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_value_passes_through_fail() {
        let promise = Promise::<i32, String>::new();
        let next = promise.fail(|_| Ok::<_, String>(-1));
        promise.resolve(9);
        assert_eq!(next.value(), Some(9));
    }

    #[test]
    fn test_then_then_fail_chain() {
        let promise = Promise::<i32, String>::new();
        let handled = promise
            .then(|x| Ok(x * 2))
            .then(|_| Err::<i32, _>("broken".to_string()))
            .fail(|error| Ok::<_, String>(error.len() as i32));
        promise.resolve(1);
        assert_eq!(handled.value(), Some(6));
    }

    #[test]
    fn test_failing_continuation_rejects_successor() {
        let promise = Promise::<i32, String>::resolved(1);
        let next: Promise<i32, String> = promise.then(|_| Err("bad".to_string()));
        assert_eq!(next.error(), Some("bad".to_string()));
        assert!(promise.is_resolved());
    }

    #[test]
    fn test_then_fail_runs_exactly_one_side() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (ok_calls, err_calls) = (calls.clone(), calls.clone());
        let promise = Promise::<i32, String>::new();
        let next = promise.then_fail(
            move |x| {
                ok_calls.fetch_add(1, Ordering::SeqCst);
                Ok(x.to_string())
            },
            move |error| {
                err_calls.fetch_add(10, Ordering::SeqCst);
                Ok(error)
            },
        );
        promise.reject("oops".into());
        assert_eq!(next.value(), Some("oops".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_each_registration_gets_its_own_successor() {
        let promise = Promise::<i32, String>::new();
        let plus = promise.then(|x| Ok(x + 1));
        let times = promise.then(|x| Ok(x * 10));
        assert!(!Promise::ptr_eq(&plus, &times));
        promise.resolve(4);
        assert_eq!(plus.value(), Some(5));
        assert_eq!(times.value(), Some(40));
    }

    #[test]
    fn test_resolve_with_pending_promise_flattens() {
        let outer = Promise::<i32, String>::new();
        let inner = Promise::new();
        outer.resolve_with(&inner);
        assert!(outer.is_pending());

        // Locked onto `inner`, so direct settlement is ignored.
        outer.resolve(1);
        outer.reject("ignored".into());
        assert!(outer.is_pending());

        inner.resolve(42);
        assert_eq!(outer.value(), Some(42));
    }

    #[test]
    fn test_resolve_with_rejecting_promise() {
        let outer = Promise::<i32, String>::new();
        let inner = Promise::new();
        outer.resolve_with(&inner);
        inner.reject("E".into());
        assert_eq!(outer.error(), Some("E".to_string()));
    }

    #[test]
    fn test_flattening_is_transitive() {
        let first = Promise::<&'static str, String>::new();
        let second = Promise::new();
        let third = Promise::new();
        first.resolve_with(&second);
        second.resolve_with(&third);
        assert!(first.is_pending() && second.is_pending());
        third.resolve("deep");
        assert_eq!(first.value(), Some("deep"));
        assert_eq!(second.value(), Some("deep"));
    }

    #[test]
    fn test_continuation_returning_promise_flattens() {
        let promise = Promise::<i32, String>::new();
        let inner = Promise::<i32, String>::new();
        let handed_out = inner.clone();
        let next = promise.then(move |_| handed_out);
        promise.resolve(0);
        assert!(next.is_pending());
        inner.resolve(99);
        assert_eq!(next.value(), Some(99));
    }

    #[test]
    fn test_resolve_with_self_is_ignored() {
        let promise = Promise::<i32, String>::new();
        promise.resolve_with(&promise.clone());
        promise.resolve(3);
        assert_eq!(promise.value(), Some(3));
    }

    #[test]
    fn test_continuation_may_read_its_own_promise() {
        let promise = Promise::<i32, String>::new();
        let same = promise.clone();
        let next = promise.then(move |x| Ok(same.value().unwrap_or_default() + x));
        promise.resolve(2);
        assert_eq!(next.value(), Some(4));
    }

    #[test]
    fn test_concurrent_settlement_has_one_winner() {
        for _ in 0..20 {
            let promise = Promise::<usize, usize>::new();
            let fired = Arc::new(AtomicUsize::new(0));
            let counter = fired.clone();
            let _next = promise.then(move |x| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(x)
            });
            let settlers: Vec<_> = (0..8)
                .map(|i| {
                    let promise = promise.clone();
                    thread::spawn(move || {
                        if i % 2 == 0 {
                            promise.resolve(i)
                        } else {
                            promise.reject(i)
                        }
                    })
                })
                .collect();
            for settler in settlers {
                settler.join().expect("The settler thread has panicked");
            }
            assert!(!promise.is_pending());
            assert!(fired.load(Ordering::SeqCst) <= 1);
            assert!(promise.value().is_some() ^ promise.error().is_some());
        }
    }

    #[test]
    fn test_panicking_continuation_does_not_strand_siblings() {
        let promise = Promise::<i32, String>::new();
        let broken = promise.then(|_| -> Result<i32, String> { panic!("continuation bug") });
        let sibling = promise.then(|x| Ok(x + 1));
        let waiter = promise.wait();
        let task = thread::spawn(move || block_on(waiter));

        promise.resolve(1);

        assert!(promise.is_resolved());
        assert_eq!(sibling.value(), Some(2));
        assert!(broken.is_pending());
        assert_eq!(task.join().expect("The task thread has panicked"), Ok(1));
    }

    #[test]
    fn test_panicking_continuation_on_settled_promise_is_contained() {
        let promise = Promise::<i32, String>::resolved(1);
        let broken = promise.then(|_| -> Result<i32, String> { panic!("continuation bug") });
        let sibling = promise.then(|x| Ok(x + 1));
        assert!(broken.is_pending());
        assert_eq!(sibling.value(), Some(2));
    }

    const LINKS: usize = 100_000;

    #[test]
    fn test_long_then_chain_settles() {
        let head = Promise::<usize, String>::new();
        let mut tail = head.then(|x| Ok(x + 1));
        for _ in 1..LINKS {
            tail = tail.then(|x| Ok(x + 1));
        }
        head.resolve(0);
        assert_eq!(tail.value(), Some(LINKS));
    }

    #[test]
    fn test_long_resolve_with_chain_settles() {
        let links: Vec<Promise<usize, String>> = (0..=LINKS).map(|_| Promise::new()).collect();
        for pair in links.windows(2) {
            pair[0].resolve_with(&pair[1]);
        }
        links[LINKS].reject("deep".into());
        assert_eq!(links[0].error(), Some("deep".to_string()));
    }

    #[test]
    fn test_dropping_long_pending_chain_abandons_tail() {
        let head = Promise::<usize, String>::new();
        let mut tail = head.then(|x| Ok(x + 1));
        for _ in 1..LINKS {
            tail = tail.then(|x| Ok(x + 1));
        }
        let waiter = tail.wait();
        drop(tail);
        drop(head);
        assert_eq!(block_on(waiter), Err(Error::Abandoned));
    }

    #[test]
    fn test_debug_shows_state() {
        let promise = Promise::<i32, String>::resolved(1);
        assert_eq!(format!("{:?}", promise), "Promise { state: Resolved }");
    }
}
