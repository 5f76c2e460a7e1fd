//! In-process reference implementation of the native catalogue.
//!
//! Deterministic stand-in for the real runtime: the tokenizer maps bytes 1:1
//! (BOS = 1, EOS = 2), generation echoes the prompt back one whitespace-
//! delimited fragment at a time, and every handle lives in an internal slab
//! keyed by its id. The runtime keeps per-operation call counters, per-kind
//! allocation/free counters, and a failure-injection queue so tests can
//! exercise error paths and verify that no handle leaks.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::{NativeApi, RawHandle, STATUS_OK, Status, dtype_tag};

/// Token id injected at the start of a sequence when `add_bos` is set.
pub const TOKEN_BOS: i32 = 1;
/// Token id appended when `add_eos` is set.
pub const TOKEN_EOS: i32 = 2;

/// Failure codes produced by the reference runtime itself (injected failures
/// carry whatever code the test chose).
pub mod code {
    use crate::Status;

    pub const BAD_HANDLE: Status = 100;
    pub const KIND_MISMATCH: Status = 101;
    pub const OUT_OF_RANGE: Status = 102;
    pub const GENERATION_BUSY: Status = 103;
    pub const BAD_TOKEN: Status = 104;
    pub const BAD_ARGUMENT: Status = 105;
}

/// Handle-kind names used by the allocation/free counters.
pub mod kind {
    pub const MODEL: &str = "model";
    pub const STRING: &str = "string";
    pub const INT_VECTOR: &str = "int_vector";
    pub const ARRAY: &str = "array";
    pub const STREAM: &str = "stream";
    pub const PARAMS: &str = "params";
    pub const GENERATION: &str = "generation";
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_handle: RawHandle,
    entries: HashMap<RawHandle, Entry>,
    injections: HashMap<String, VecDeque<Injection>>,
    calls: HashMap<String, u64>,
    allocated: HashMap<&'static str, u64>,
    freed: HashMap<&'static str, u64>,
    null_array_data: bool,
}

struct Injection {
    code: Status,
    partial: bool,
}

enum Entry {
    Model(ModelEntry),
    Str(Vec<u8>),
    IntVec(Vec<i32>),
    Array(ArrayEntry),
    Stream,
    Params(ParamsEntry),
    Generation(GenEntry),
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::Model(_) => kind::MODEL,
            Entry::Str(_) => kind::STRING,
            Entry::IntVec(_) => kind::INT_VECTOR,
            Entry::Array(_) => kind::ARRAY,
            Entry::Stream => kind::STREAM,
            Entry::Params(_) => kind::PARAMS,
            Entry::Generation(_) => kind::GENERATION,
        }
    }
}

struct ModelEntry {
    #[allow(dead_code)]
    directory: String,
    active: bool,
}

struct ArrayEntry {
    dtype: i32,
    shape: Vec<i32>,
    data: Vec<f32>,
    evaluated: bool,
}

#[derive(Default)]
struct ParamsEntry {
    max_tokens: i32,
    stops: Vec<String>,
    include_match: bool,
}

struct GenEntry {
    model: RawHandle,
    fragments: Vec<String>,
    pos: usize,
    finished: bool,
}

impl State {
    fn insert(&mut self, entry: Entry) -> RawHandle {
        self.next_handle += 1;
        let handle = self.next_handle;
        *self.allocated.entry(entry.kind()).or_insert(0) += 1;
        self.entries.insert(handle, entry);
        handle
    }

    fn remove(&mut self, handle: RawHandle, expected: &'static str) -> Result<Entry, Status> {
        match self.entries.get(&handle) {
            None => Err(code::BAD_HANDLE),
            Some(e) if e.kind() != expected => Err(code::KIND_MISMATCH),
            Some(_) => {
                let entry = self.entries.remove(&handle).unwrap();
                *self.freed.entry(expected).or_insert(0) += 1;
                Ok(entry)
            }
        }
    }

    fn take_injection(&mut self, op: &str) -> Option<Injection> {
        let queue = self.injections.get_mut(op)?;
        let inj = queue.pop_front();
        if queue.is_empty() {
            self.injections.remove(op);
        }
        inj
    }

    fn set_model_active(&mut self, model: RawHandle, active: bool) {
        if let Some(Entry::Model(m)) = self.entries.get_mut(&model) {
            m.active = active;
        }
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, op: &'static str) -> std::sync::MutexGuard<'_, State> {
        let mut st = self.state.lock().unwrap();
        *st.calls.entry(op.to_string()).or_insert(0) += 1;
        st
    }

    //  Test/diagnostic surface (not part of the native catalogue)

    /// Queue a failure: the next call to `op` returns `code` without doing
    /// its normal work.
    pub fn inject_failure(&self, op: &str, code: Status) {
        self.state
            .lock()
            .unwrap()
            .injections
            .entry(op.to_string())
            .or_default()
            .push_back(Injection {
                code,
                partial: false,
            });
    }

    /// Like [`inject_failure`](Self::inject_failure), but constructor-style
    /// operations also write a live handle through their out-slot before
    /// failing, exercising the caller's partial-allocation cleanup.
    pub fn inject_failure_with_partial(&self, op: &str, code: Status) {
        self.state
            .lock()
            .unwrap()
            .injections
            .entry(op.to_string())
            .or_default()
            .push_back(Injection {
                code,
                partial: true,
            });
    }

    /// Make the next `array_data_f32` call succeed with a null data pointer
    /// (an empty copy).
    pub fn nullify_next_array_data(&self) {
        self.state.lock().unwrap().null_array_data = true;
    }

    /// Times `op` has been invoked.
    pub fn calls(&self, op: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Handles of `kind` allocated so far (see [`kind`]).
    pub fn allocated(&self, kind: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .allocated
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    /// Handles of `kind` freed so far.
    pub fn freed(&self, kind: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .freed
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    /// Total live handles of every kind.
    pub fn live_handles(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Whether any loaded model currently has a generation marked active on
    /// the native side.
    pub fn any_generation_active(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .entries
            .values()
            .any(|e| matches!(e, Entry::Model(m) if m.active))
    }
}

/// Split `prompt` into the fragment script a generation will replay,
/// honoring the max-token cap and stop sequences from `params`.
fn build_fragments(prompt: &str, params: &ParamsEntry) -> Vec<String> {
    let mut fragments: Vec<String> = prompt
        .split_whitespace()
        .map(|w| format!("{w} "))
        .collect();
    if params.max_tokens > 0 {
        fragments.truncate(params.max_tokens as usize);
    }

    let text = fragments.concat();
    let mut cut = text.len();
    for stop in &params.stops {
        if let Some(idx) = text.find(stop.as_str()) {
            let end = if params.include_match {
                idx + stop.len()
            } else {
                idx
            };
            cut = cut.min(end);
        }
    }
    if cut == text.len() {
        return fragments;
    }

    // Rebuild the script up to the cut point, truncating the boundary
    // fragment.
    let mut rebuilt = Vec::new();
    let mut consumed = 0;
    for frag in fragments {
        if consumed + frag.len() <= cut {
            consumed += frag.len();
            rebuilt.push(frag);
        } else {
            let keep = cut - consumed;
            if keep > 0 {
                rebuilt.push(frag[..keep].to_string());
            }
            break;
        }
    }
    rebuilt
}

impl NativeApi for FakeRuntime {
    fn model_load(&self, directory: &str, out: &mut RawHandle) -> Status {
        let mut st = self.enter("model_load");
        if let Some(inj) = st.take_injection("model_load") {
            if inj.partial {
                *out = st.insert(Entry::Model(ModelEntry {
                    directory: directory.to_string(),
                    active: false,
                }));
            }
            return inj.code;
        }
        if directory.is_empty() {
            return code::BAD_ARGUMENT;
        }
        *out = st.insert(Entry::Model(ModelEntry {
            directory: directory.to_string(),
            active: false,
        }));
        STATUS_OK
    }

    fn model_free(&self, model: RawHandle) -> Status {
        let mut st = self.enter("model_free");
        if let Some(inj) = st.take_injection("model_free") {
            return inj.code;
        }
        match st.remove(model, kind::MODEL) {
            Ok(_) => STATUS_OK,
            Err(code) => code,
        }
    }

    fn tokenize(
        &self,
        model: RawHandle,
        text: &str,
        add_bos: bool,
        add_eos: bool,
        out: &mut RawHandle,
    ) -> Status {
        let mut st = self.enter("tokenize");
        if let Some(inj) = st.take_injection("tokenize") {
            if inj.partial {
                *out = st.insert(Entry::IntVec(Vec::new()));
            }
            return inj.code;
        }
        if !matches!(st.entries.get(&model), Some(Entry::Model(_))) {
            return code::BAD_HANDLE;
        }
        let mut tokens = Vec::with_capacity(text.len() + 2);
        if add_bos {
            tokens.push(TOKEN_BOS);
        }
        tokens.extend(text.bytes().map(i32::from));
        if add_eos {
            tokens.push(TOKEN_EOS);
        }
        *out = st.insert(Entry::IntVec(tokens));
        STATUS_OK
    }

    fn detokenize(&self, model: RawHandle, tokens: &[i32], out: &mut RawHandle) -> Status {
        let mut st = self.enter("detokenize");
        if let Some(inj) = st.take_injection("detokenize") {
            if inj.partial {
                *out = st.insert(Entry::Str(Vec::new()));
            }
            return inj.code;
        }
        if !matches!(st.entries.get(&model), Some(Entry::Model(_))) {
            return code::BAD_HANDLE;
        }
        let mut bytes = Vec::with_capacity(tokens.len());
        for &t in tokens {
            if t == TOKEN_BOS || t == TOKEN_EOS {
                continue;
            }
            if !(0..=255).contains(&t) {
                return code::BAD_TOKEN;
            }
            bytes.push(t as u8);
        }
        *out = st.insert(Entry::Str(bytes));
        STATUS_OK
    }

    fn string_new(&self, bytes: &[u8], out: &mut RawHandle) -> Status {
        let mut st = self.enter("string_new");
        if let Some(inj) = st.take_injection("string_new") {
            if inj.partial {
                *out = st.insert(Entry::Str(Vec::new()));
            }
            return inj.code;
        }
        *out = st.insert(Entry::Str(bytes.to_vec()));
        STATUS_OK
    }

    fn string_data(&self, string: RawHandle, out: &mut Vec<u8>) -> Status {
        let mut st = self.enter("string_data");
        if let Some(inj) = st.take_injection("string_data") {
            return inj.code;
        }
        match st.entries.get(&string) {
            Some(Entry::Str(bytes)) => {
                out.clear();
                out.extend_from_slice(bytes);
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn string_free(&self, string: RawHandle) -> Status {
        let mut st = self.enter("string_free");
        if let Some(inj) = st.take_injection("string_free") {
            return inj.code;
        }
        match st.remove(string, kind::STRING) {
            Ok(_) => STATUS_OK,
            Err(code) => code,
        }
    }

    fn vector_int_size(&self, vector: RawHandle, out: &mut usize) -> Status {
        let mut st = self.enter("vector_int_size");
        if let Some(inj) = st.take_injection("vector_int_size") {
            return inj.code;
        }
        match st.entries.get(&vector) {
            Some(Entry::IntVec(v)) => {
                *out = v.len();
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn vector_int_get(&self, vector: RawHandle, index: usize, out: &mut i32) -> Status {
        let mut st = self.enter("vector_int_get");
        if let Some(inj) = st.take_injection("vector_int_get") {
            return inj.code;
        }
        match st.entries.get(&vector) {
            Some(Entry::IntVec(v)) => match v.get(index) {
                Some(&value) => {
                    *out = value;
                    STATUS_OK
                }
                None => code::OUT_OF_RANGE,
            },
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn vector_int_free(&self, vector: RawHandle) -> Status {
        let mut st = self.enter("vector_int_free");
        if let Some(inj) = st.take_injection("vector_int_free") {
            return inj.code;
        }
        match st.remove(vector, kind::INT_VECTOR) {
            Ok(_) => STATUS_OK,
            Err(code) => code,
        }
    }

    fn array_new_f32(&self, data: &[f32], shape: &[i32], out: &mut RawHandle) -> Status {
        let mut st = self.enter("array_new_f32");
        if let Some(inj) = st.take_injection("array_new_f32") {
            if inj.partial {
                *out = st.insert(Entry::Array(ArrayEntry {
                    dtype: dtype_tag::F32,
                    shape: Vec::new(),
                    data: Vec::new(),
                    evaluated: false,
                }));
            }
            return inj.code;
        }
        let expected: i64 = shape.iter().map(|&d| d as i64).product();
        if expected < 0 || expected as usize != data.len() {
            return code::BAD_ARGUMENT;
        }
        *out = st.insert(Entry::Array(ArrayEntry {
            dtype: dtype_tag::F32,
            shape: shape.to_vec(),
            data: data.to_vec(),
            evaluated: false,
        }));
        STATUS_OK
    }

    fn array_dtype(&self, array: RawHandle, out: &mut i32) -> Status {
        let mut st = self.enter("array_dtype");
        if let Some(inj) = st.take_injection("array_dtype") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => {
                *out = a.dtype;
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_ndim(&self, array: RawHandle, out: &mut usize) -> Status {
        let mut st = self.enter("array_ndim");
        if let Some(inj) = st.take_injection("array_ndim") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => {
                *out = a.shape.len();
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_dim(&self, array: RawHandle, axis: usize, out: &mut i32) -> Status {
        let mut st = self.enter("array_dim");
        if let Some(inj) = st.take_injection("array_dim") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => match a.shape.get(axis) {
                Some(&dim) => {
                    *out = dim;
                    STATUS_OK
                }
                None => code::OUT_OF_RANGE,
            },
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_size(&self, array: RawHandle, out: &mut usize) -> Status {
        let mut st = self.enter("array_size");
        if let Some(inj) = st.take_injection("array_size") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => {
                *out = a.data.len();
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_itemsize(&self, array: RawHandle, out: &mut usize) -> Status {
        let mut st = self.enter("array_itemsize");
        if let Some(inj) = st.take_injection("array_itemsize") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => {
                *out = match a.dtype {
                    dtype_tag::BOOL => 1,
                    dtype_tag::F16 => 2,
                    dtype_tag::F64 => 8,
                    _ => 4,
                };
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_eval(&self, array: RawHandle) -> Status {
        let mut st = self.enter("array_eval");
        if let Some(inj) = st.take_injection("array_eval") {
            return inj.code;
        }
        match st.entries.get_mut(&array) {
            Some(Entry::Array(a)) => {
                a.evaluated = true;
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_astype(&self, array: RawHandle, dtype: i32, out: &mut RawHandle) -> Status {
        let mut st = self.enter("array_astype");
        if let Some(inj) = st.take_injection("array_astype") {
            if inj.partial {
                *out = st.insert(Entry::Array(ArrayEntry {
                    dtype,
                    shape: Vec::new(),
                    data: Vec::new(),
                    evaluated: false,
                }));
            }
            return inj.code;
        }
        let converted = match st.entries.get(&array) {
            Some(Entry::Array(a)) => ArrayEntry {
                dtype,
                shape: a.shape.clone(),
                data: a.data.clone(),
                evaluated: false,
            },
            Some(_) => return code::KIND_MISMATCH,
            None => return code::BAD_HANDLE,
        };
        *out = st.insert(Entry::Array(converted));
        STATUS_OK
    }

    fn array_data_f32(&self, array: RawHandle, out: &mut Vec<f32>) -> Status {
        let mut st = self.enter("array_data_f32");
        if let Some(inj) = st.take_injection("array_data_f32") {
            return inj.code;
        }
        if st.null_array_data {
            st.null_array_data = false;
            out.clear();
            return STATUS_OK;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => {
                out.clear();
                out.extend_from_slice(&a.data);
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_item_f64(&self, array: RawHandle, out: &mut f64) -> Status {
        let mut st = self.enter("array_item_f64");
        if let Some(inj) = st.take_injection("array_item_f64") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => match a.data.first() {
                Some(&v) => {
                    *out = f64::from(v);
                    STATUS_OK
                }
                None => code::OUT_OF_RANGE,
            },
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_item_i32(&self, array: RawHandle, out: &mut i32) -> Status {
        let mut st = self.enter("array_item_i32");
        if let Some(inj) = st.take_injection("array_item_i32") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => match a.data.first() {
                Some(&v) => {
                    *out = v as i32;
                    STATUS_OK
                }
                None => code::OUT_OF_RANGE,
            },
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_item_bool(&self, array: RawHandle, out: &mut bool) -> Status {
        let mut st = self.enter("array_item_bool");
        if let Some(inj) = st.take_injection("array_item_bool") {
            return inj.code;
        }
        match st.entries.get(&array) {
            Some(Entry::Array(a)) => match a.data.first() {
                Some(&v) => {
                    *out = v != 0.0;
                    STATUS_OK
                }
                None => code::OUT_OF_RANGE,
            },
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn array_free(&self, array: RawHandle) -> Status {
        let mut st = self.enter("array_free");
        if let Some(inj) = st.take_injection("array_free") {
            return inj.code;
        }
        match st.remove(array, kind::ARRAY) {
            Ok(_) => STATUS_OK,
            Err(code) => code,
        }
    }

    fn default_stream(&self, out: &mut RawHandle) -> Status {
        let mut st = self.enter("default_stream");
        if let Some(inj) = st.take_injection("default_stream") {
            if inj.partial {
                *out = st.insert(Entry::Stream);
            }
            return inj.code;
        }
        *out = st.insert(Entry::Stream);
        STATUS_OK
    }

    fn synchronize(&self, stream: RawHandle) -> Status {
        let mut st = self.enter("synchronize");
        if let Some(inj) = st.take_injection("synchronize") {
            return inj.code;
        }
        match st.entries.get(&stream) {
            Some(Entry::Stream) => STATUS_OK,
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn stream_free(&self, stream: RawHandle) -> Status {
        let mut st = self.enter("stream_free");
        if let Some(inj) = st.take_injection("stream_free") {
            return inj.code;
        }
        match st.remove(stream, kind::STREAM) {
            Ok(_) => STATUS_OK,
            Err(code) => code,
        }
    }

    fn generate_params_new(&self, out: &mut RawHandle) -> Status {
        let mut st = self.enter("generate_params_new");
        if let Some(inj) = st.take_injection("generate_params_new") {
            if inj.partial {
                *out = st.insert(Entry::Params(ParamsEntry::default()));
            }
            return inj.code;
        }
        *out = st.insert(Entry::Params(ParamsEntry::default()));
        STATUS_OK
    }

    fn generate_params_set_sampling(
        &self,
        params: RawHandle,
        _temperature: f32,
        _top_p: f32,
        _top_k: i32,
        max_tokens: i32,
        _repetition_penalty: f32,
        _has_seed: bool,
        _seed: u64,
    ) -> Status {
        let mut st = self.enter("generate_params_set_sampling");
        if let Some(inj) = st.take_injection("generate_params_set_sampling") {
            return inj.code;
        }
        match st.entries.get_mut(&params) {
            Some(Entry::Params(p)) => {
                p.max_tokens = max_tokens;
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn generate_params_set_stops(
        &self,
        params: RawHandle,
        stops: &[RawHandle],
        include_match: bool,
    ) -> Status {
        let mut st = self.enter("generate_params_set_stops");
        if let Some(inj) = st.take_injection("generate_params_set_stops") {
            return inj.code;
        }
        let mut resolved = Vec::with_capacity(stops.len());
        for &handle in stops {
            match st.entries.get(&handle) {
                Some(Entry::Str(bytes)) => {
                    resolved.push(String::from_utf8_lossy(bytes).into_owned());
                }
                Some(_) => return code::KIND_MISMATCH,
                None => return code::BAD_HANDLE,
            }
        }
        match st.entries.get_mut(&params) {
            Some(Entry::Params(p)) => {
                p.stops = resolved;
                p.include_match = include_match;
                STATUS_OK
            }
            Some(_) => code::KIND_MISMATCH,
            None => code::BAD_HANDLE,
        }
    }

    fn generate_params_free(&self, params: RawHandle) -> Status {
        let mut st = self.enter("generate_params_free");
        if let Some(inj) = st.take_injection("generate_params_free") {
            return inj.code;
        }
        match st.remove(params, kind::PARAMS) {
            Ok(_) => STATUS_OK,
            Err(code) => code,
        }
    }

    fn generation_start(
        &self,
        model: RawHandle,
        prompt: &str,
        params: RawHandle,
        out: &mut RawHandle,
    ) -> Status {
        let mut st = self.enter("generation_start");
        if let Some(inj) = st.take_injection("generation_start") {
            if inj.partial {
                *out = st.insert(Entry::Generation(GenEntry {
                    model,
                    fragments: Vec::new(),
                    pos: 0,
                    finished: true,
                }));
            }
            return inj.code;
        }
        let fragments = match st.entries.get(&params) {
            Some(Entry::Params(p)) => build_fragments(prompt, p),
            Some(_) => return code::KIND_MISMATCH,
            None => return code::BAD_HANDLE,
        };
        match st.entries.get_mut(&model) {
            Some(Entry::Model(m)) => {
                if m.active {
                    return code::GENERATION_BUSY;
                }
                m.active = true;
            }
            Some(_) => return code::KIND_MISMATCH,
            None => return code::BAD_HANDLE,
        }
        *out = st.insert(Entry::Generation(GenEntry {
            model,
            fragments,
            pos: 0,
            finished: false,
        }));
        STATUS_OK
    }

    fn generation_next(
        &self,
        generation: RawHandle,
        out_piece: &mut RawHandle,
        out_done: &mut bool,
    ) -> Status {
        let mut st = self.enter("generation_next");
        if let Some(inj) = st.take_injection("generation_next") {
            if inj.partial {
                *out_piece = st.insert(Entry::Str(Vec::new()));
            }
            return inj.code;
        }
        let (piece, done, model) = match st.entries.get_mut(&generation) {
            Some(Entry::Generation(g)) => {
                if g.finished || g.pos >= g.fragments.len() {
                    let first_completion = !g.finished;
                    g.finished = true;
                    (Vec::new(), true, first_completion.then_some(g.model))
                } else {
                    let piece = g.fragments[g.pos].clone().into_bytes();
                    g.pos += 1;
                    (piece, false, None)
                }
            }
            Some(_) => return code::KIND_MISMATCH,
            None => return code::BAD_HANDLE,
        };
        // Natural completion releases the model's native active flag.
        if let Some(model) = model {
            st.set_model_active(model, false);
        }
        *out_piece = st.insert(Entry::Str(piece));
        *out_done = done;
        STATUS_OK
    }

    fn generation_cancel(&self, generation: RawHandle) -> Status {
        let mut st = self.enter("generation_cancel");
        if let Some(inj) = st.take_injection("generation_cancel") {
            return inj.code;
        }
        let model = match st.entries.get_mut(&generation) {
            Some(Entry::Generation(g)) => {
                g.finished = true;
                g.model
            }
            Some(_) => return code::KIND_MISMATCH,
            None => return code::BAD_HANDLE,
        };
        st.set_model_active(model, false);
        STATUS_OK
    }

    fn generation_free(&self, generation: RawHandle) -> Status {
        let mut st = self.enter("generation_free");
        if let Some(inj) = st.take_injection("generation_free") {
            return inj.code;
        }
        match st.remove(generation, kind::GENERATION) {
            Ok(Entry::Generation(g)) => {
                st.set_model_active(g.model, false);
                STATUS_OK
            }
            Ok(_) => unreachable!("remove checked the kind"),
            Err(code) => code,
        }
    }
}
