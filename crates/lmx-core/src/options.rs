//! Generation configuration and its native marshaling.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use lmx_native::{NativeApi, RawHandle, Status};

use crate::error::{LmxError, Result, check};
use crate::guard::{Guard, HandleKind};
use crate::text::TextKind;

/// How a matched stop sequence is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Truncate the output at the start of the match.
    #[default]
    Truncate,
    /// Keep the matched text in the output.
    Include,
}

/// User-facing sampling configuration. Immutable once built; validated at
/// marshal time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: i32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Ordered stop strings; each must be non-empty.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub stop_mode: StopMode,
}

fn default_temperature() -> f32 {
    0.8
}
fn default_top_p() -> f32 {
    0.95
}
fn default_top_k() -> i32 {
    40
}
fn default_max_tokens() -> u32 {
    512
}
fn default_repetition_penalty() -> f32 {
    1.1
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_tokens: default_max_tokens(),
            repetition_penalty: default_repetition_penalty(),
            seed: None,
            stop_sequences: Vec::new(),
            stop_mode: StopMode::default(),
        }
    }
}

impl GenerateOptions {
    /// Range-check every field, reporting the first violation.
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature >= 0.0) {
            return Err(LmxError::InvalidArgument(format!(
                "temperature must be >= 0, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(LmxError::InvalidArgument(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.top_k < 0 {
            return Err(LmxError::InvalidArgument(format!(
                "top_k must be >= 0, got {}",
                self.top_k
            )));
        }
        if self.max_tokens == 0 {
            return Err(LmxError::InvalidArgument(
                "max_tokens must be > 0".into(),
            ));
        }
        if !(self.repetition_penalty > 0.0) {
            return Err(LmxError::InvalidArgument(format!(
                "repetition_penalty must be > 0, got {}",
                self.repetition_penalty
            )));
        }
        if let Some(i) = self.stop_sequences.iter().position(|s| s.is_empty()) {
            return Err(LmxError::InvalidArgument(format!(
                "stop sequence {i} is empty"
            )));
        }
        Ok(())
    }
}

pub(crate) struct ParamsKind;

impl HandleKind for ParamsKind {
    const NAME: &'static str = "params";
    const FREE_OP: &'static str = "generate_params_free";

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
        api.generate_params_free(raw)
    }
}

/// A populated native parameter block plus the stop-sequence strings it
/// references. All of it is freed when this value drops, whatever the
/// outcome of the start call it was built for.
pub(crate) struct MarshaledOptions {
    params: Guard<ParamsKind>,
    _stops: Vec<Guard<TextKind>>,
}

impl MarshaledOptions {
    pub(crate) fn params_raw(&self) -> Result<RawHandle> {
        self.params.raw()
    }
}

/// Validate `options` and build the transient native parameter block: one
/// native string per stop sequence, the pointer array, and the block itself.
pub(crate) fn marshal(
    options: &GenerateOptions,
    api: &Arc<dyn NativeApi>,
) -> Result<MarshaledOptions> {
    options.validate()?;

    let params = Guard::<ParamsKind>::acquire(api.clone(), "generate_params_new", |api, out| {
        api.generate_params_new(out)
    })?;

    params.with(|api, raw| {
        check(
            "generate_params_set_sampling",
            api.generate_params_set_sampling(
                raw,
                options.temperature,
                options.top_p,
                options.top_k,
                options.max_tokens as i32,
                options.repetition_penalty,
                options.seed.is_some(),
                options.seed.unwrap_or(0),
            ),
        )
    })?;

    let mut stops = Vec::with_capacity(options.stop_sequences.len());
    for stop in &options.stop_sequences {
        stops.push(Guard::<TextKind>::acquire(
            api.clone(),
            "string_new",
            |api, out| api.string_new(stop.as_bytes(), out),
        )?);
    }
    let stop_raws = stops.iter().map(|s| s.raw()).collect::<Result<Vec<_>>>()?;

    params.with(|api, raw| {
        check(
            "generate_params_set_stops",
            api.generate_params_set_stops(
                raw,
                &stop_raws,
                options.stop_mode == StopMode::Include,
            ),
        )
    })?;

    Ok(MarshaledOptions {
        params,
        _stops: stops,
    })
}
