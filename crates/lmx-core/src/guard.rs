//! Generic ownership wrapper for one opaque native handle.
//!
//! Every double-free and use-after-free risk in the crate is concentrated
//! here: value types, the model, and in-flight generations are all `Guard`
//! specializations that differ only in their free operation.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use lmx_native::{NULL_HANDLE, NativeApi, RawHandle, Status};

use crate::error::{LmxError, Result, check};

/// A kind of native handle, supplying the matching free operation.
pub(crate) trait HandleKind {
    /// Human-readable kind name, used in log and error messages.
    const NAME: &'static str;
    /// Native operation name of the free call.
    const FREE_OP: &'static str;

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status;
}

/// Owns exactly one native handle of kind `K`.
///
/// The handle is dereferenced only while not disposed; disposal is
/// idempotent and marks the guard gone before any failure from the native
/// free call is surfaced, so a disposal attempt is never re-enterable.
pub(crate) struct Guard<K: HandleKind> {
    api: Arc<dyn NativeApi>,
    raw: RawHandle,
    disposed: bool,
    _kind: PhantomData<K>,
}

impl<K: HandleKind> std::fmt::Debug for Guard<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("kind", &K::NAME)
            .field("raw", &self.raw)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl<K: HandleKind> Guard<K> {
    /// Invoke a constructor-style native call that writes a handle through
    /// the out-slot. On a nonzero status any non-null partial handle is
    /// freed before the failure is surfaced, so error paths never leak.
    pub(crate) fn acquire(
        api: Arc<dyn NativeApi>,
        op: &'static str,
        call: impl FnOnce(&dyn NativeApi, &mut RawHandle) -> Status,
    ) -> Result<Self> {
        let mut raw = NULL_HANDLE;
        let status = call(&*api, &mut raw);
        if status != lmx_native::STATUS_OK {
            if raw != NULL_HANDLE {
                let rc = K::free(&*api, raw);
                if rc != 0 {
                    warn!(kind = K::NAME, code = rc, "freeing partial handle failed");
                }
            }
            return Err(LmxError::Native { op, code: status });
        }
        debug!(kind = K::NAME, handle = raw, "acquired");
        Ok(Self {
            api,
            raw,
            disposed: false,
            _kind: PhantomData,
        })
    }

    /// Expose the handle to `call` while the guard is live.
    pub(crate) fn with<T>(
        &self,
        call: impl FnOnce(&dyn NativeApi, RawHandle) -> Result<T>,
    ) -> Result<T> {
        if self.disposed {
            return Err(LmxError::InvalidState(format!(
                "{} handle used after dispose",
                K::NAME
            )));
        }
        call(&*self.api, self.raw)
    }

    /// The raw handle, for calls that take several handles at once.
    pub(crate) fn raw(&self) -> Result<RawHandle> {
        if self.disposed {
            return Err(LmxError::InvalidState(format!(
                "{} handle used after dispose",
                K::NAME
            )));
        }
        Ok(self.raw)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    /// Free the native handle. A second call is a no-op. The disposed flag
    /// is set before a failing free call is surfaced; the handle is gone
    /// either way.
    pub(crate) fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        debug!(kind = K::NAME, handle = self.raw, "disposing");
        check(K::FREE_OP, K::free(&*self.api, self.raw))
    }
}

impl<K: HandleKind> Drop for Guard<K> {
    fn drop(&mut self) {
        if !self.disposed {
            self.disposed = true;
            let rc = K::free(&*self.api, self.raw);
            if rc != 0 {
                warn!(kind = K::NAME, code = rc, "free failed during drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmx_native::fake::{FakeRuntime, kind};

    struct StringKind;

    impl HandleKind for StringKind {
        const NAME: &'static str = "string";
        const FREE_OP: &'static str = "string_free";

        fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
            api.string_free(raw)
        }
    }

    fn acquire_string(api: &Arc<FakeRuntime>) -> Guard<StringKind> {
        let api: Arc<dyn NativeApi> = api.clone();
        Guard::acquire(api, "string_new", |api, out| api.string_new(b"abc", out)).unwrap()
    }

    #[test]
    fn dispose_twice_frees_once() {
        let rt = Arc::new(FakeRuntime::new());
        let mut guard = acquire_string(&rt);
        guard.dispose().unwrap();
        guard.dispose().unwrap();
        assert_eq!(rt.freed(kind::STRING), 1);
    }

    #[test]
    fn with_fails_after_dispose() {
        let rt = Arc::new(FakeRuntime::new());
        let mut guard = acquire_string(&rt);
        guard.dispose().unwrap();
        let err = guard.with(|_, _| Ok(())).unwrap_err();
        assert!(matches!(err, LmxError::InvalidState(_)));
    }

    #[test]
    fn drop_frees_undisposed_handle() {
        let rt = Arc::new(FakeRuntime::new());
        {
            let _guard = acquire_string(&rt);
            assert_eq!(rt.live_handles(), 1);
        }
        assert_eq!(rt.live_handles(), 0);
    }

    #[test]
    fn failed_acquire_frees_partial_handle() {
        let rt = Arc::new(FakeRuntime::new());
        rt.inject_failure_with_partial("string_new", 42);
        let api: Arc<dyn NativeApi> = rt.clone();
        let err = Guard::<StringKind>::acquire(api, "string_new", |api, out| {
            api.string_new(b"abc", out)
        })
        .unwrap_err();
        assert!(matches!(
            err,
            LmxError::Native {
                op: "string_new",
                code: 42
            }
        ));
        assert_eq!(rt.live_handles(), 0);
        assert_eq!(rt.freed(kind::STRING), 1);
    }

    #[test]
    fn dispose_failure_still_marks_disposed() {
        let rt = Arc::new(FakeRuntime::new());
        let mut guard = acquire_string(&rt);
        rt.inject_failure("string_free", 9);
        let err = guard.dispose().unwrap_err();
        assert!(matches!(err, LmxError::Native { code: 9, .. }));
        assert!(guard.is_disposed());
        // Second attempt is a no-op, not a retry.
        guard.dispose().unwrap();
    }
}
