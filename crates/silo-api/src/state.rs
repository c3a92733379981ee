//! Application state shared across handlers.

use silo_core::{Cache, OpContext};
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers: one cache backend per
/// namespace and the per-request timeout.
#[derive(Clone)]
pub struct AppState {
    pub cas: Arc<dyn Cache>,
    pub ac: Arc<dyn Cache>,
    pub timeout: Option<Duration>,
}

impl AppState {
    pub fn new(cas: Arc<dyn Cache>, ac: Arc<dyn Cache>, timeout: Option<Duration>) -> Self {
        Self { cas, ac, timeout }
    }

    /// Derive the operation context for one request.
    pub fn op_context(&self) -> OpContext {
        match self.timeout {
            Some(timeout) => OpContext::with_timeout(timeout),
            None => OpContext::background(),
        }
    }
}
