use crate::Result;
use crate::store::AioReply;
use std::sync::{Arc, Mutex, PoisonError};

/// Invoked by the store client, on its own thread, once the operation has an outcome.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Async completion object shared between a waiter and the store client.
///
/// The store records the outcome with [`AioCompletion::complete`], which then fires the
/// callback. Each side releases its handle by dropping it; the callback, and whatever it
/// owns, is dropped with the last handle if it never fired.
#[derive(Clone)]
pub struct AioCompletion {
    inner: Arc<Mutex<CompletionState>>,
}

struct CompletionState {
    outcome: Option<Result<AioReply>>,
    callback: Option<CompletionCallback>,
    fired: bool,
}

impl AioCompletion {
    pub fn new(callback: CompletionCallback) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CompletionState {
                outcome: None,
                callback: Some(callback),
                fired: false,
            })),
        }
    }

    /// Records the outcome and runs the callback outside the lock. Only the first call
    /// has any effect.
    pub fn complete(&self, outcome: Result<AioReply>) {
        let callback = {
            let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if state.fired {
                return;
            }
            state.fired = true;
            state.outcome = Some(outcome);
            state.callback.take()
        };

        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fired
    }

    /// Takes the recorded outcome, if the store has produced one.
    pub fn take_outcome(&self) -> Option<Result<AioReply>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outcome
            .take()
    }

    /// Drops this handle.
    pub fn release(self) {}

    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}
