//! Client plus its cleanup action, scoped to one test invocation.

use std::ops::{Deref, DerefMut};

use tracing::debug;

type Cleanup<T> = Box<dyn FnOnce(&mut T) + Send>;

/// A resource that runs its cleanup exactly once.
///
/// Cleanup runs on [`Disposable::dispose`] or, failing that, when the value
/// is dropped, which includes unwinding out of a failed test body.
pub struct Disposable<T> {
    resource: T,
    cleanup: Option<Cleanup<T>>,
}

impl<T> Disposable<T> {
    pub fn new(resource: T, cleanup: impl FnOnce(&mut T) + Send + 'static) -> Self {
        Self {
            resource,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Whether the cleanup is still pending.
    pub fn has_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Run the cleanup now. Later calls and the eventual drop are no-ops.
    pub fn dispose(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            debug!("Disposing {}", std::any::type_name::<T>());
            cleanup(&mut self.resource);
        }
    }
}

impl<T> Deref for Disposable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T> DerefMut for Disposable<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

impl<T> Drop for Disposable<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Disposable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("resource", &self.resource)
            .field("pending_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> Disposable<Vec<u8>> {
        let counter = Arc::clone(counter);
        Disposable::new(Vec::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn cleanup_runs_once_on_explicit_dispose_and_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut resource = counting(&counter);
        resource.dispose();
        resource.dispose();
        drop(resource);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_runs_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _resource = counting(&counter);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_runs_when_the_test_body_panics() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        let result = std::panic::catch_unwind(move || {
            let _resource = counting(&inner);
            panic!("test body failed");
        });
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_sees_the_resource() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let mut resource = Disposable::new(vec![1u8, 2, 3], move |v: &mut Vec<u8>| {
            sink.store(v.len(), Ordering::SeqCst);
        });
        resource.push(4);
        drop(resource);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn dispose_consumes_the_pending_cleanup() {
        let mut resource = Disposable::new(5u32, |_| {});
        assert!(resource.has_cleanup());
        resource.dispose();
        assert!(!resource.has_cleanup());
        assert_eq!(*resource, 5);
    }
}
