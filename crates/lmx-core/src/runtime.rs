//! Entry point binding a native runtime implementation to the safe wrapper.

use std::sync::Arc;

use tracing::info;

use lmx_native::{NativeApi, RawHandle, Status};

use crate::error::{Result, check};
use crate::guard::{Guard, HandleKind};

pub(crate) struct StreamKind;

impl HandleKind for StreamKind {
    const NAME: &'static str = "stream";
    const FREE_OP: &'static str = "stream_free";

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
        api.stream_free(raw)
    }
}

struct Inner {
    api: Arc<dyn NativeApi>,
    stream: Guard<StreamKind>,
}

/// Handle to a native runtime instance.
///
/// Owns the default execution stream and is cloned into every model and
/// value created through it, keeping the dispatch table alive for as long as
/// any wrapper object exists.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Bind the wrapper to a native implementation and acquire the default
    /// execution stream.
    pub fn new(api: Arc<dyn NativeApi>) -> Result<Self> {
        let stream = Guard::acquire(api.clone(), "default_stream", |api, out| {
            api.default_stream(out)
        })?;
        info!("lmx runtime initialized");
        Ok(Self {
            inner: Arc::new(Inner { api, stream }),
        })
    }

    pub(crate) fn api(&self) -> &Arc<dyn NativeApi> {
        &self.inner.api
    }

    /// Block until all work queued on the default stream has completed.
    pub fn synchronize(&self) -> Result<()> {
        self.inner
            .stream
            .with(|api, raw| check("synchronize", api.synchronize(raw)))
    }
}
