//! Hooks into the application's dispatch pipeline.
//!
//! The middleware talks to the host application through two sinks:
//!
//! - `dispatch` re-enters the pipeline from the top (used for actions the
//!   middleware synthesizes, such as `SOCKET_CONNECTED`)
//! - `next` hands an action to the following stage (used for passthrough
//!   and for the configured disconnect substitute)

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::action::Action;

// ============================================================================
// ActionSink
// ============================================================================

/// Receiver of actions emitted by the middleware.
///
/// Implemented for any `Fn(Action) + Send + Sync` closure.
pub trait ActionSink: Send + Sync + 'static {
    /// Delivers an action.
    fn send(&self, action: Action);
}

impl<F> ActionSink for F
where
    F: Fn(Action) + Send + Sync + 'static,
{
    #[inline]
    fn send(&self, action: Action) {
        self(action);
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The `dispatch` / `next` pair handed to the middleware.
#[derive(Clone)]
pub struct Pipeline {
    dispatch: Arc<dyn ActionSink>,
    next: Arc<dyn ActionSink>,
}

impl Pipeline {
    /// Creates a pipeline from its two sinks.
    pub fn new(dispatch: impl ActionSink, next: impl ActionSink) -> Self {
        Self {
            dispatch: Arc::new(dispatch),
            next: Arc::new(next),
        }
    }

    /// Dispatches an action from the top of the pipeline.
    #[inline]
    pub fn dispatch(&self, action: Action) {
        self.dispatch.send(action);
    }

    /// Forwards an action to the next stage.
    #[inline]
    pub fn next(&self, action: Action) {
        self.next.send(action);
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[test]
    fn test_pipeline_routes_to_separate_sinks() {
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let forwarded = Arc::new(Mutex::new(Vec::new()));

        let d = Arc::clone(&dispatched);
        let n = Arc::clone(&forwarded);
        let pipeline = Pipeline::new(
            move |action: Action| d.lock().push(action.kind),
            move |action: Action| n.lock().push(action.kind),
        );

        pipeline.dispatch(Action::new("A"));
        pipeline.next(Action::new("B"));

        assert_eq!(*dispatched.lock(), vec!["A".to_string()]);
        assert_eq!(*forwarded.lock(), vec!["B".to_string()]);
    }
}
