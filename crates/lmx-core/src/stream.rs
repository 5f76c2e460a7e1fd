//! Lazy fragment stream over an in-flight generation.

use tracing::{debug, warn};

use crate::error::{LmxError, Result};
use crate::generation::Generation;
use crate::model::Model;

/// A finite, forward-only sequence of text fragments produced by one
/// generation.
///
/// The consumer drives progress: each [`Iterator::next`] call performs one
/// synchronous native poll. On every exit path — natural completion, the
/// consumer dropping the stream mid-way, or a native error — the stream runs
/// cancel, then free, then clears the model's active flag, exactly once, so
/// the model is always left reusable.
pub struct GenerationStream<'m> {
    model: &'m Model,
    generation: Option<Generation>,
    pending: Option<LmxError>,
    finished: bool,
}

impl std::fmt::Debug for GenerationStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationStream").finish_non_exhaustive()
    }
}

impl<'m> GenerationStream<'m> {
    pub(crate) fn new(model: &'m Model, generation: Generation) -> Self {
        Self {
            model,
            generation: Some(generation),
            pending: None,
            finished: false,
        }
    }

    /// Drain the stream and concatenate the fragments.
    pub fn into_text(self) -> Result<String> {
        let mut text = String::new();
        for fragment in self {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    /// Cancel, free, clear the model flag. Cancel failures are always
    /// suppressed (logged) so they cannot mask a primary error or skip the
    /// free step; a free failure is returned only when `suppress_free_error`
    /// is false, and logged otherwise.
    fn teardown(&mut self, suppress_free_error: bool) -> Option<LmxError> {
        let mut generation = self.generation.take()?;
        if let Err(e) = generation.cancel() {
            warn!(error = %e, "cancel failed during stream teardown");
        }
        let freed = generation.dispose();
        self.model.clear_generating();
        debug!("generation stream torn down");
        match freed {
            Ok(()) => None,
            Err(e) if suppress_free_error => {
                warn!(error = %e, "free failed during stream teardown");
                None
            }
            Err(e) => Some(e),
        }
    }
}

impl Iterator for GenerationStream<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        if self.finished {
            return None;
        }
        loop {
            let step = match self.generation.as_ref() {
                Some(generation) => generation.next_piece(),
                None => return None,
            };
            match step {
                Ok((fragment, done)) => {
                    if done {
                        self.finished = true;
                        let teardown_err = self.teardown(false);
                        return if fragment.is_empty() {
                            teardown_err.map(Err)
                        } else {
                            // Deliver the final fragment now; a teardown
                            // failure surfaces on the next poll.
                            self.pending = teardown_err;
                            Some(Ok(fragment))
                        };
                    }
                    if fragment.is_empty() {
                        continue;
                    }
                    return Some(Ok(fragment));
                }
                Err(e) => {
                    self.finished = true;
                    self.teardown(true);
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Drop for GenerationStream<'_> {
    fn drop(&mut self) {
        // Consumer abandoned the stream (or an error path already ran
        // teardown, making this a no-op). Nothing can be reported from here.
        self.teardown(true);
    }
}
