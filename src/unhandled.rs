//! Reporting of rejections nobody handled.
//!
//! A rejected promise counts as handled once a continuation, a combinator or a
//! waiter has been attached to it, or once its error has been read through
//! `error()` or `outcome()`. Checking `is_rejected()` alone does not count.
//! When the last handle to an unhandled rejection is dropped the rejection is
//! reported, either to the hook set with [`set_unhandled_rejection_hook`] or
//! as a `log` warning.
use std::any::{type_name, Any};
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

pub(crate) type Hook = Arc<dyn Fn(&UnhandledRejection<'_>) + Send + Sync>;

static HOOK: LazyLock<RwLock<Option<Hook>>> = LazyLock::new(|| RwLock::new(None));

/// A rejection that was dropped without being observed.
pub struct UnhandledRejection<'a> {
    error_type: &'static str,
    error: &'a (dyn Any + Send),
}

impl<'a> UnhandledRejection<'a> {
    /// Name of the rejection payload's type.
    pub fn error_type(&self) -> &'static str {
        self.error_type
    }

    pub fn error(&self) -> &'a (dyn Any + Send) {
        self.error
    }

    pub fn downcast_ref<E: Any>(&self) -> Option<&'a E> {
        self.error.downcast_ref::<E>()
    }
}

impl fmt::Debug for UnhandledRejection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnhandledRejection")
            .field("error_type", &self.error_type)
            .finish_non_exhaustive()
    }
}

/// Install a process-wide hook for unhandled rejections, replacing any
/// previous one. The hook runs on whichever thread drops the last handle.
///
/// # Examples
///
/// ```
/// use promise_q::{reject, set_unhandled_rejection_hook, take_unhandled_rejection_hook};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// #[derive(Clone)]
/// struct Oops;
///
/// let seen = Arc::new(AtomicBool::new(false));
/// let flag = seen.clone();
/// set_unhandled_rejection_hook(move |rejection| {
///     if rejection.downcast_ref::<Oops>().is_some() {
///         flag.store(true, Ordering::SeqCst);
///     }
/// });
/// drop(reject::<(), Oops>(Oops));
/// assert!(seen.load(Ordering::SeqCst));
/// take_unhandled_rejection_hook();
/// ```
pub fn set_unhandled_rejection_hook<F>(hook: F)
where
    F: Fn(&UnhandledRejection<'_>) + Send + Sync + 'static,
{
    *HOOK.write() = Some(Arc::new(hook));
}

/// Remove the installed hook, falling back to logging.
pub fn take_unhandled_rejection_hook() -> Option<Hook> {
    HOOK.write().take()
}

pub(crate) fn report<E: Send + 'static>(error: &E) {
    let rejection = UnhandledRejection {
        error_type: type_name::<E>(),
        error,
    };
    let hook = HOOK.read().clone();
    match hook {
        Some(hook) => hook(&rejection),
        None => log::warn!(
            "[promise] rejection of type {} dropped without a handler",
            rejection.error_type
        ),
    }
}
