//! Handler and filter traits for the message pipeline

use crate::bundle::TransactionBundle;
use crate::error::{HandlerResult, Result};

/// A pipeline leaf that inspects and mutates the transaction bundle.
///
/// All phases default to no-ops; implementations override what they need.
/// `pre` runs before the response shape exists and is where applicability
/// checks and short-circuits (rate limits, server-id checks) belong. `handle`
/// builds the response. `post` sees the final response and must not abort;
/// anything it returns as an error is logged and swallowed.
pub trait Handler: Send + Sync {
    /// Name for log messages
    fn name(&self) -> &'static str;

    /// Per-worker initialisation, called after the worker owns the handler.
    /// Resources that must not be shared between workers (store handles,
    /// file descriptors) are opened here.
    fn worker_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Pre-process the bundle; may abort the whole pipeline
    fn pre(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
        Ok(())
    }

    /// Do the main work; may abort the whole pipeline
    fn handle(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
        Ok(())
    }

    /// Side effects that need the final response; aborts are ignored
    fn post(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
        Ok(())
    }
}

/// An interior pipeline node gating a subtree.
///
/// When `matches` returns false for the bundle's current state, the filter's
/// whole subtree contributes nothing to any phase.
pub trait Filter: Handler {
    /// Whether the subtree applies to this bundle
    fn matches(&self, bundle: &TransactionBundle) -> bool;

    /// Short description of the condition, for log messages
    fn description(&self) -> String {
        self.name().to_string()
    }
}
