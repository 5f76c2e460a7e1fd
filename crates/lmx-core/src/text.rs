//! Native string value type.

use std::sync::Arc;

use lmx_native::{NativeApi, RawHandle, Status};

use crate::error::{Result, check};
use crate::guard::{Guard, HandleKind};
use crate::runtime::Runtime;

pub(crate) struct TextKind;

impl HandleKind for TextKind {
    const NAME: &'static str = "string";
    const FREE_OP: &'static str = "string_free";

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
        api.string_free(raw)
    }
}

/// Owned wrapper around a native string handle.
pub struct Text {
    guard: Guard<TextKind>,
}

impl Text {
    /// Copy `text` into a new native string.
    pub fn new(runtime: &Runtime, text: &str) -> Result<Self> {
        Self::acquire(runtime.api().clone(), "string_new", |api, out| {
            api.string_new(text.as_bytes(), out)
        })
    }

    pub(crate) fn acquire(
        api: Arc<dyn NativeApi>,
        op: &'static str,
        call: impl FnOnce(&dyn NativeApi, &mut RawHandle) -> Status,
    ) -> Result<Self> {
        Ok(Self {
            guard: Guard::acquire(api, op, call)?,
        })
    }

    /// Copy the native byte contents into a caller-owned buffer.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.guard.with(|api, raw| {
            let mut out = Vec::new();
            check("string_data", api.string_data(raw, &mut out))?;
            Ok(out)
        })
    }

    /// Extract the contents as a `String`, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.bytes()?).into_owned())
    }

    /// Free the native string. Idempotent.
    pub fn dispose(&mut self) -> Result<()> {
        self.guard.dispose()
    }
}
