//! Native integer-vector value type.

use std::sync::Arc;

use lmx_native::{NativeApi, RawHandle, Status};

use crate::error::{Result, check};
use crate::guard::{Guard, HandleKind};

pub(crate) struct IntVectorKind;

impl HandleKind for IntVectorKind {
    const NAME: &'static str = "int vector";
    const FREE_OP: &'static str = "vector_int_free";

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
        api.vector_int_free(raw)
    }
}

/// Owned wrapper around a native vector of 32-bit integers, as produced by
/// tokenization.
pub struct IntSequence {
    guard: Guard<IntVectorKind>,
}

impl IntSequence {
    pub(crate) fn acquire(
        api: Arc<dyn NativeApi>,
        op: &'static str,
        call: impl FnOnce(&dyn NativeApi, &mut RawHandle) -> Status,
    ) -> Result<Self> {
        Ok(Self {
            guard: Guard::acquire(api, op, call)?,
        })
    }

    pub fn len(&self) -> Result<usize> {
        self.guard.with(|api, raw| {
            let mut out = 0;
            check("vector_int_size", api.vector_int_size(raw, &mut out))?;
            Ok(out)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index`; out-of-range indexes surface the native failure.
    pub fn get(&self, index: usize) -> Result<i32> {
        self.guard.with(|api, raw| {
            let mut out = 0;
            check("vector_int_get", api.vector_int_get(raw, index, &mut out))?;
            Ok(out)
        })
    }

    /// Copy the whole sequence into a caller-owned `Vec`.
    pub fn to_vec(&self) -> Result<Vec<i32>> {
        let len = self.len()?;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(self.get(i)?);
        }
        Ok(out)
    }

    /// Free the native vector. Idempotent.
    pub fn dispose(&mut self) -> Result<()> {
        self.guard.dispose()
    }
}
