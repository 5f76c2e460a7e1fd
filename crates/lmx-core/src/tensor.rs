//! Native array value type and its element-type tags.

use std::fmt;

use lmx_native::{NativeApi, RawHandle, Status, dtype_tag};

use crate::error::{LmxError, Result, check};
use crate::guard::{Guard, HandleKind};
use crate::runtime::Runtime;

/// Element types reported by the native array interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    Bool,
    I32,
    F16,
    F32,
    F64,
}

impl Dtype {
    pub(crate) fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            dtype_tag::BOOL => Some(Self::Bool),
            dtype_tag::I32 => Some(Self::I32),
            dtype_tag::F16 => Some(Self::F16),
            dtype_tag::F32 => Some(Self::F32),
            dtype_tag::F64 => Some(Self::F64),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> i32 {
        match self {
            Self::Bool => dtype_tag::BOOL,
            Self::I32 => dtype_tag::I32,
            Self::F16 => dtype_tag::F16,
            Self::F32 => dtype_tag::F32,
            Self::F64 => dtype_tag::F64,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::I32 => write!(f, "i32"),
            Self::F16 => write!(f, "f16"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
        }
    }
}

pub(crate) struct ArrayKind;

impl HandleKind for ArrayKind {
    const NAME: &'static str = "array";
    const FREE_OP: &'static str = "array_free";

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
        api.array_free(raw)
    }
}

/// Owned wrapper around a native array handle.
///
/// Metadata accessors are always available while the tensor is live; the
/// bytes themselves are only meaningfully readable after the pending
/// computation is forced ([`eval`](Self::eval)) and the execution stream has
/// been synchronized, which [`to_host_vec`](Self::to_host_vec) and the
/// scalar reads do internally.
pub struct Tensor {
    guard: Guard<ArrayKind>,
    runtime: Runtime,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor").finish_non_exhaustive()
    }
}

impl Tensor {
    /// Create an f32 tensor from host data. The shape's element product must
    /// match `data.len()`.
    pub fn from_slice(runtime: &Runtime, data: &[f32], shape: &[i32]) -> Result<Self> {
        let count: i64 = shape.iter().map(|&d| i64::from(d)).product();
        if count < 0 || count as usize != data.len() {
            return Err(LmxError::InvalidArgument(format!(
                "shape {shape:?} does not describe {} elements",
                data.len()
            )));
        }
        let guard = Guard::acquire(runtime.api().clone(), "array_new_f32", |api, out| {
            api.array_new_f32(data, shape, out)
        })?;
        Ok(Self {
            guard,
            runtime: runtime.clone(),
        })
    }

    pub fn dtype(&self) -> Result<Dtype> {
        let tag = self.guard.with(|api, raw| {
            let mut out = 0;
            check("array_dtype", api.array_dtype(raw, &mut out))?;
            Ok(out)
        })?;
        Dtype::from_tag(tag)
            .ok_or_else(|| LmxError::InvalidState(format!("unknown dtype tag {tag}")))
    }

    pub fn ndim(&self) -> Result<usize> {
        self.guard.with(|api, raw| {
            let mut out = 0;
            check("array_ndim", api.array_ndim(raw, &mut out))?;
            Ok(out)
        })
    }

    pub fn dim(&self, axis: usize) -> Result<i32> {
        self.guard.with(|api, raw| {
            let mut out = 0;
            check("array_dim", api.array_dim(raw, axis, &mut out))?;
            Ok(out)
        })
    }

    /// Per-dimension extents.
    pub fn shape(&self) -> Result<Vec<i32>> {
        let ndim = self.ndim()?;
        let mut shape = Vec::with_capacity(ndim);
        for axis in 0..ndim {
            shape.push(self.dim(axis)?);
        }
        Ok(shape)
    }

    /// Total element count.
    pub fn size(&self) -> Result<usize> {
        self.guard.with(|api, raw| {
            let mut out = 0;
            check("array_size", api.array_size(raw, &mut out))?;
            Ok(out)
        })
    }

    /// Byte width of one element.
    pub fn itemsize(&self) -> Result<usize> {
        self.guard.with(|api, raw| {
            let mut out = 0;
            check("array_itemsize", api.array_itemsize(raw, &mut out))?;
            Ok(out)
        })
    }

    /// Force any pending computation backing this tensor.
    pub fn eval(&self) -> Result<()> {
        self.guard
            .with(|api, raw| check("array_eval", api.array_eval(raw)))
    }

    /// A converted copy of this tensor with element type `dtype`.
    pub fn astype(&self, dtype: Dtype) -> Result<Tensor> {
        let raw = self.guard.raw()?;
        let guard = Guard::acquire(self.guard.api().clone(), "array_astype", |api, out| {
            api.array_astype(raw, dtype.tag(), out)
        })?;
        Ok(Tensor {
            guard,
            runtime: self.runtime.clone(),
        })
    }

    /// Copy the tensor's contents into a caller-owned f32 buffer.
    ///
    /// Non-f32 tensors are routed through a transient converted copy, which
    /// is disposed before this call returns. The copy happens only after
    /// forcing materialization and synchronizing the execution stream.
    pub fn to_host_vec(&self) -> Result<Vec<f32>> {
        if self.dtype()? != Dtype::F32 {
            let mut converted = self.astype(Dtype::F32)?;
            let read = converted.read_host_f32();
            let disposed = converted.dispose();
            let data = read?;
            disposed?;
            return Ok(data);
        }
        self.read_host_f32()
    }

    fn read_host_f32(&self) -> Result<Vec<f32>> {
        self.eval()?;
        self.runtime.synchronize()?;
        let data = self.guard.with(|api, raw| {
            let mut out = Vec::new();
            check("array_data_f32", api.array_data_f32(raw, &mut out))?;
            Ok(out)
        })?;
        let size = self.size()?;
        if data.len() != size && size > 0 {
            return Err(LmxError::InvalidState(
                "native array data pointer is null".into(),
            ));
        }
        Ok(data)
    }

    fn require_scalar(&self) -> Result<()> {
        let size = self.size()?;
        if size != 1 {
            return Err(LmxError::InvalidState(format!(
                "scalar read on tensor of {size} elements"
            )));
        }
        // Materialize and wait so the read is consistent.
        self.eval()?;
        self.runtime.synchronize()
    }

    pub fn as_f64(&self) -> Result<f64> {
        self.require_scalar()?;
        self.guard.with(|api, raw| {
            let mut out = 0.0;
            check("array_item_f64", api.array_item_f64(raw, &mut out))?;
            Ok(out)
        })
    }

    pub fn as_i32(&self) -> Result<i32> {
        self.require_scalar()?;
        self.guard.with(|api, raw| {
            let mut out = 0;
            check("array_item_i32", api.array_item_i32(raw, &mut out))?;
            Ok(out)
        })
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.require_scalar()?;
        self.guard.with(|api, raw| {
            let mut out = false;
            check("array_item_bool", api.array_item_bool(raw, &mut out))?;
            Ok(out)
        })
    }

    /// Free the native array. Idempotent.
    pub fn dispose(&mut self) -> Result<()> {
        self.guard.dispose()
    }
}
