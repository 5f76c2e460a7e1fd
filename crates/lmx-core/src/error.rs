use lmx_native::Status;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LmxError {
    /// The native layer rejected a call. The code is opaque to this crate
    /// and reported verbatim for diagnosis against native documentation.
    #[error("native call '{op}' failed with code {code}")]
    Native { op: &'static str, code: Status },

    /// Caller misuse detected at the wrapper boundary: a disposed handle,
    /// a malformed shape, a scalar read on a non-scalar.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A structurally invalid argument, rejected before any native call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A generation is already active on this model.
    #[error("a generation is already active on this model")]
    GenerationActive,
}

pub type Result<T> = std::result::Result<T, LmxError>;

/// Classify a native status code. Performs no cleanup; callers own any
/// partially-written out-handle on the failure path.
pub(crate) fn check(op: &'static str, status: Status) -> Result<()> {
    if status == lmx_native::STATUS_OK {
        Ok(())
    } else {
        Err(LmxError::Native { op, code: status })
    }
}
