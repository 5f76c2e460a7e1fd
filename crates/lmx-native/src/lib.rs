//! Native call catalogue for the lmx runtime C API.
//!
//! The native library exposes every value (model, generation, array, string,
//! int vector, execution stream) as an opaque context pointer and reports
//! success or failure through an integer status code, writing result handles
//! through out-parameters. The catalogue of operations is a stable,
//! mechanically generated contract; this crate expresses it as the
//! [`NativeApi`] trait so the safe wrapper in `lmx-core` dispatches through a
//! shared `Arc<dyn NativeApi>` instead of link-time symbols.
//!
//! [`fake::FakeRuntime`] is the in-process reference implementation used by
//! the test suite and the demo CLI.

pub mod fake;

/// Pointer-sized opaque handle issued by the native layer.
///
/// The bit pattern is meaningless to the caller; a handle is valid only as an
/// argument back into the interface that issued it, and becomes invalid
/// forever once passed to its matching `*_free` operation.
pub type RawHandle = u64;

/// The null handle. Constructor-style calls leave this in the out-slot when
/// they allocate nothing.
pub const NULL_HANDLE: RawHandle = 0;

/// Integer status code returned by every native call. Zero is success; any
/// nonzero value is an opaque failure code.
pub type Status = i32;

pub const STATUS_OK: Status = 0;

/// Element type tags used by array operations.
pub mod dtype_tag {
    pub const BOOL: i32 = 0;
    pub const I32: i32 = 1;
    pub const F16: i32 = 2;
    pub const F32: i32 = 3;
    pub const F64: i32 = 4;
}

/// The fixed native operation catalogue.
///
/// Conventions mirrored from the C header:
/// - every method returns a [`Status`]; zero means success;
/// - constructor-style methods write their result through `out`; on failure
///   the out-slot may still hold a non-null handle, which the caller must
///   free to avoid a leak;
/// - `*_free` invalidates the handle permanently.
pub trait NativeApi: Send + Sync {
    // Model
    fn model_load(&self, directory: &str, out: &mut RawHandle) -> Status;
    fn model_free(&self, model: RawHandle) -> Status;

    // Tokenizer
    fn tokenize(
        &self,
        model: RawHandle,
        text: &str,
        add_bos: bool,
        add_eos: bool,
        out: &mut RawHandle,
    ) -> Status;
    fn detokenize(&self, model: RawHandle, tokens: &[i32], out: &mut RawHandle) -> Status;

    // Strings
    fn string_new(&self, bytes: &[u8], out: &mut RawHandle) -> Status;
    fn string_data(&self, string: RawHandle, out: &mut Vec<u8>) -> Status;
    fn string_free(&self, string: RawHandle) -> Status;

    // Int vectors
    fn vector_int_size(&self, vector: RawHandle, out: &mut usize) -> Status;
    fn vector_int_get(&self, vector: RawHandle, index: usize, out: &mut i32) -> Status;
    fn vector_int_free(&self, vector: RawHandle) -> Status;

    // Arrays
    fn array_new_f32(&self, data: &[f32], shape: &[i32], out: &mut RawHandle) -> Status;
    fn array_dtype(&self, array: RawHandle, out: &mut i32) -> Status;
    fn array_ndim(&self, array: RawHandle, out: &mut usize) -> Status;
    fn array_dim(&self, array: RawHandle, axis: usize, out: &mut i32) -> Status;
    fn array_size(&self, array: RawHandle, out: &mut usize) -> Status;
    fn array_itemsize(&self, array: RawHandle, out: &mut usize) -> Status;
    /// Force any pending computation backing the array.
    fn array_eval(&self, array: RawHandle) -> Status;
    fn array_astype(&self, array: RawHandle, dtype: i32, out: &mut RawHandle) -> Status;
    /// Copy the array's native data into `out` as f32. `out` is cleared
    /// first; a null native data pointer leaves it empty.
    fn array_data_f32(&self, array: RawHandle, out: &mut Vec<f32>) -> Status;
    fn array_item_f64(&self, array: RawHandle, out: &mut f64) -> Status;
    fn array_item_i32(&self, array: RawHandle, out: &mut i32) -> Status;
    fn array_item_bool(&self, array: RawHandle, out: &mut bool) -> Status;
    fn array_free(&self, array: RawHandle) -> Status;

    // Execution stream
    fn default_stream(&self, out: &mut RawHandle) -> Status;
    /// Block until all work queued on the stream has completed.
    fn synchronize(&self, stream: RawHandle) -> Status;
    fn stream_free(&self, stream: RawHandle) -> Status;

    // Generation parameter block
    fn generate_params_new(&self, out: &mut RawHandle) -> Status;
    fn generate_params_set_sampling(
        &self,
        params: RawHandle,
        temperature: f32,
        top_p: f32,
        top_k: i32,
        max_tokens: i32,
        repetition_penalty: f32,
        has_seed: bool,
        seed: u64,
    ) -> Status;
    /// Install the stop-sequence string handles. `include_match` selects
    /// whether output is truncated at the match or includes the matched text.
    fn generate_params_set_stops(
        &self,
        params: RawHandle,
        stops: &[RawHandle],
        include_match: bool,
    ) -> Status;
    fn generate_params_free(&self, params: RawHandle) -> Status;

    // Generation
    fn generation_start(
        &self,
        model: RawHandle,
        prompt: &str,
        params: RawHandle,
        out: &mut RawHandle,
    ) -> Status;
    /// Produce the next fragment. Writes a string handle (possibly empty)
    /// through `out_piece` and the completion flag through `out_done`. After
    /// completion, repeated calls keep returning an empty fragment with
    /// `out_done = true`.
    fn generation_next(
        &self,
        generation: RawHandle,
        out_piece: &mut RawHandle,
        out_done: &mut bool,
    ) -> Status;
    /// Stop producing further fragments. Idempotent; clears the owning
    /// model's native active-generation flag.
    fn generation_cancel(&self, generation: RawHandle) -> Status;
    fn generation_free(&self, generation: RawHandle) -> Status;
}
