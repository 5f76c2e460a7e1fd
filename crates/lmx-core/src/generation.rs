//! In-flight generation handle and its poll/cancel/free protocol.

use std::sync::Arc;

use lmx_native::{NativeApi, RawHandle, Status};

use crate::error::{Result, check};
use crate::guard::{Guard, HandleKind};
use crate::options::MarshaledOptions;
use crate::text::Text;

pub(crate) struct GenerationKind;

impl HandleKind for GenerationKind {
    const NAME: &'static str = "generation";
    const FREE_OP: &'static str = "generation_free";

    fn free(api: &dyn NativeApi, raw: RawHandle) -> Status {
        api.generation_free(raw)
    }
}

/// One in-flight generation context.
///
/// Lifecycle: started, polled repeatedly, then cancelled and freed. The
/// position cursor lives natively; this wrapper holds no progress state of
/// its own.
pub(crate) struct Generation {
    guard: Guard<GenerationKind>,
}

impl Generation {
    pub(crate) fn start(
        api: Arc<dyn NativeApi>,
        model: RawHandle,
        prompt: &str,
        options: &MarshaledOptions,
    ) -> Result<Self> {
        let params = options.params_raw()?;
        let guard = Guard::acquire(api, "generation_start", |api, out| {
            api.generation_start(model, prompt, params, out)
        })?;
        Ok(Self { guard })
    }

    /// Poll for the next fragment. The native text handle is extracted to an
    /// owned `String` and freed before this returns, never held across
    /// polls. Once the done flag has been observed true it stays true on
    /// every further poll.
    pub(crate) fn next_piece(&self) -> Result<(String, bool)> {
        let generation = self.guard.raw()?;
        let mut done = false;
        let mut piece = Text::acquire(
            self.guard.api().clone(),
            "generation_next",
            |api, out| api.generation_next(generation, out, &mut done),
        )?;
        let extracted = piece.to_string_lossy();
        let freed = piece.dispose();
        let fragment = extracted?;
        freed?;
        Ok((fragment, done))
    }

    /// Ask the native layer to stop producing fragments. Idempotent; safe
    /// on a generation that already completed.
    pub(crate) fn cancel(&self) -> Result<()> {
        self.guard
            .with(|api, raw| check("generation_cancel", api.generation_cancel(raw)))
    }

    /// Free the native generation context. Idempotent.
    pub(crate) fn dispose(&mut self) -> Result<()> {
        self.guard.dispose()
    }
}
