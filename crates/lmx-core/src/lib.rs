//! Safe Rust wrapper around the lmx native runtime C API.
//!
//! Every native value is an opaque handle with an explicit free operation;
//! this crate provides RAII-managed types for model loading, tokenization,
//! array access, and streaming text generation, with the single-active-
//! generation invariant and exactly-once teardown enforced by construction.

pub mod error;
mod generation;
mod guard;
pub mod model;
pub mod options;
pub mod runtime;
pub mod stream;
pub mod tensor;
pub mod text;
pub mod vector;

pub use error::{LmxError, Result};
pub use model::Model;
pub use options::{GenerateOptions, StopMode};
pub use runtime::Runtime;
pub use stream::GenerationStream;
pub use tensor::{Dtype, Tensor};
pub use text::Text;
pub use vector::IntSequence;
