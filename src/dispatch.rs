//! Per-thread run queue for reactions.
//!
//! Settling a promise runs its reactions, which settle their successors,
//! which run theirs. Running those inline would use one stack frame per link
//! in a chain, so the outermost settlement on a thread drains a queue instead
//! and nested settlements only enqueue. Every queued job still runs before the
//! outermost `resolve`/`reject` returns.
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

type Job = Box<dyn FnOnce()>;

struct RunQueue {
    jobs: RefCell<VecDeque<Job>>,
    draining: Cell<bool>,
}

thread_local! {
    static RUN_QUEUE: RunQueue = RunQueue {
        jobs: RefCell::new(VecDeque::new()),
        draining: Cell::new(false),
    };
}

struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let _ = RUN_QUEUE.try_with(|queue| queue.draining.set(false));
    }
}

/// Run `job` now, or after the job currently running on this thread if there
/// is one. A panicking job is logged and does not stop the others.
pub(crate) fn run(job: Job) {
    let mut job = Some(job);
    let drain = RUN_QUEUE.try_with(|queue| {
        if let Some(job) = job.take() {
            queue.jobs.borrow_mut().push_back(job);
        }
        !queue.draining.replace(true)
    });
    match drain {
        Ok(true) => {}
        Ok(false) => return,
        Err(_) => {
            // Thread-local storage is already torn down.
            if let Some(job) = job {
                run_guarded(job);
            }
            return;
        }
    }

    let _draining = Draining;
    while let Some(job) = RUN_QUEUE.with(|queue| queue.jobs.borrow_mut().pop_front()) {
        run_guarded(job);
    }
}

fn run_guarded(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        log::error!("[promise] continuation panicked: {}", panic_message(panic.as_ref()));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
