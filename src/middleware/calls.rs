//! Outbound emits.
//!
//! An [`OutboundCall`] without an acknowledgment is sent as a fire and
//! forgotten. With one, the call runs on a spawned task and the
//! acknowledgment receives the reply.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, error};

use crate::action::OutboundCall;
use crate::error::Error;
use crate::pipeline::Pipeline;

use super::connection::LiveSocket;
use super::options::{FailurePolicy, MiddlewareOptions};
use super::report_error;

// ============================================================================
// CallDispatcher
// ============================================================================

/// Sends [`OutboundCall`]s on the connected socket.
#[derive(Debug, Clone)]
pub(crate) struct CallDispatcher {
    options: Arc<MiddlewareOptions>,
    pipeline: Pipeline,
}

impl CallDispatcher {
    pub(crate) fn new(options: Arc<MiddlewareOptions>, pipeline: Pipeline) -> Self {
        Self { options, pipeline }
    }

    /// Sends `call` on `live`.
    ///
    /// A failed fire is only logged. A failed call never reaches the
    /// acknowledgment; it is handled by the call failure policy.
    pub(crate) fn emit(&self, live: LiveSocket, call: OutboundCall) {
        let args = call.args();
        let OutboundCall {
            call_type,
            acknowledge,
            ..
        } = call;

        let Some(acknowledge) = acknowledge else {
            let Some(socket) = live.get() else {
                debug!(epoch = %live.epoch(), event = %call_type, "Socket gone before fire");
                return;
            };
            if let Err(e) = socket.fire(&call_type, args) {
                debug!(event = %call_type, error = %e, "Fire failed");
            }
            return;
        };

        let options = Arc::clone(&self.options);
        let pipeline = self.pipeline.clone();

        tokio::spawn(async move {
            let result = match live.get() {
                Some(socket) => socket.call(&call_type, args).await,
                None => Err(Error::NotConnected),
            };

            match result {
                Ok(reply) => acknowledge.invoke(reply),
                Err(e) => match options.call_failures {
                    FailurePolicy::Swallow => {
                        error!(method = %call_type, error = %e, "Unhandled socket call failure");
                    }
                    FailurePolicy::Report => {
                        if live.get().is_some() {
                            report_error(&options, &pipeline, &e);
                        } else {
                            debug!(method = %call_type, error = %e, "Call failed on superseded socket");
                        }
                    }
                },
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
