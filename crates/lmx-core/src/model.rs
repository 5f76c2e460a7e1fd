//! Loaded-model handle.

use std::cell::Cell;

use tracing::{debug, info};

use lmx_native::{NativeApi, RawHandle, Status};

use crate::error::{LmxError, Result};
use crate::generation::Generation;
use crate::guard::{Guard, HandleKind};
use crate::options::{self, GenerateOptions};
use crate::runtime::Runtime;
use crate::stream::GenerationStream;
use crate::text::Text;
use crate::vector::IntSequence;

pub(crate) struct ModelKind;

impl HandleKind for ModelKind {
    const NAME: &'static str = "model";
    const FREE_OP: &'static str = "model_free";

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
        api.model_free(raw)
    }
}

/// A loaded model context.
///
/// At most one generation may be active against a model at a time; the
/// client-side flag backing that invariant is owned here and mutated only
/// when a stream starts or tears down.
pub struct Model {
    guard: Guard<ModelKind>,
    active: Cell<bool>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").finish_non_exhaustive()
    }
}

impl Model {
    /// Load a model from `directory`.
    pub fn load(runtime: &Runtime, directory: &str) -> Result<Self> {
        if directory.is_empty() {
            return Err(LmxError::InvalidArgument(
                "model directory must not be empty".into(),
            ));
        }
        info!(directory, "loading model");
        let guard = Guard::acquire(runtime.api().clone(), "model_load", |api, out| {
            api.model_load(directory, out)
        })?;
        info!(directory, "model loaded");
        Ok(Self {
            guard,
            active: Cell::new(false),
        })
    }

    /// Tokenize `text`, optionally adding beginning/end-of-sequence tokens.
    pub fn tokenize(&self, text: &str, add_bos: bool, add_eos: bool) -> Result<IntSequence> {
        let model = self.guard.raw()?;
        IntSequence::acquire(self.guard.api().clone(), "tokenize", |api, out| {
            api.tokenize(model, text, add_bos, add_eos, out)
        })
    }

    /// Decode a token sequence back into text. The transient native string
    /// is extracted and freed before returning.
    pub fn decode(&self, tokens: &[i32]) -> Result<String> {
        let model = self.guard.raw()?;
        let mut text = Text::acquire(self.guard.api().clone(), "detokenize", |api, out| {
            api.detokenize(model, tokens, out)
        })?;
        let decoded = text.to_string_lossy();
        let freed = text.dispose();
        let decoded = decoded?;
        freed?;
        Ok(decoded)
    }

    /// Start a streaming generation for `prompt`.
    ///
    /// Fails with [`LmxError::GenerationActive`] without touching native
    /// state while another generation on this model is live. The marshaled
    /// parameter block and stop strings are released as soon as the native
    /// start call returns, success or failure.
    pub fn generate<'m>(
        &'m self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerationStream<'m>> {
        if self.active.get() {
            return Err(LmxError::GenerationActive);
        }
        if prompt.is_empty() {
            return Err(LmxError::InvalidArgument("prompt must not be empty".into()));
        }
        let model = self.guard.raw()?;
        let api = self.guard.api();

        let marshaled = options::marshal(options, api)?;
        let generation = Generation::start(api.clone(), model, prompt, &marshaled)?;
        drop(marshaled);

        self.active.set(true);
        debug!(prompt_len = prompt.len(), "generation started");
        Ok(GenerationStream::new(self, generation))
    }

    /// Whether a generation is currently active against this model.
    pub fn is_generating(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn clear_generating(&self) {
        self.active.set(false);
    }

    /// Free the native model context. Idempotent. Any generation on this
    /// model must have been torn down first; streams do that on every exit
    /// path, including drop.
    pub fn dispose(&mut self) -> Result<()> {
        self.guard.dispose()
    }
}
