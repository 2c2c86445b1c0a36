//! Inbound listener registration.
//!
//! | Listener | Socket registration | Dispatched payload |
//! |----------|---------------------|--------------------|
//! | bind (no `ack`) | `SocketHandle::bind` | received arguments as an array |
//! | hook (`ack` set) | `SocketHandle::hook` | the call payload, when truthy |
//!
//! Handlers capture the epoch they were bound under and stop dispatching
//! once the connection slot moves on.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::identifiers::Epoch;
use crate::pipeline::Pipeline;
use crate::transport::{BindHandler, HookHandler, SocketHandle};

use super::connection::EpochGate;
use super::options::ListenerSpec;

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Turns listener specs into socket handlers.
#[derive(Debug, Clone)]
pub(crate) struct ListenerRegistry {
    pipeline: Pipeline,
    gate: EpochGate,
    debug: bool,
}

impl ListenerRegistry {
    pub(crate) fn new(pipeline: Pipeline, gate: EpochGate, debug: bool) -> Self {
        Self {
            pipeline,
            gate,
            debug,
        }
    }

    /// Registers every valid spec on `socket`, in order.
    ///
    /// An invalid spec is logged and skipped. Returns the number of
    /// handlers registered.
    pub(crate) fn bind(&self, socket: &dyn SocketHandle, epoch: Epoch, specs: &[ListenerSpec]) -> usize {
        let mut bound = 0;

        for spec in specs {
            if let Err(e) = spec.validate() {
                warn!(event = %spec.event, error = %e, "Skipping invalid listener");
                continue;
            }

            match &spec.ack {
                Some(ack) => {
                    if self.debug {
                        info!(event = %spec.event, action = %spec.action_type, "Hooking socket call");
                    }
                    socket.hook(
                        &spec.event,
                        self.hook_handler(epoch, spec.action_type.clone(), ack.clone()),
                    );
                }
                None => {
                    if self.debug {
                        info!(event = %spec.event, action = %spec.action_type, "Binding socket event");
                    }
                    socket.bind(
                        &spec.event,
                        self.bind_handler(epoch, spec.action_type.clone()),
                    );
                }
            }

            bound += 1;
        }

        bound
    }

    fn bind_handler(&self, epoch: Epoch, action_type: String) -> BindHandler {
        let pipeline = self.pipeline.clone();
        let gate = self.gate.clone();

        Arc::new(move |args| {
            if !gate.is_current(epoch) {
                debug!(%epoch, action = %action_type, "Dropping event for superseded socket");
                return;
            }
            pipeline.dispatch(Action::with_payload(action_type.clone(), Value::Array(args)));
        })
    }

    fn hook_handler(&self, epoch: Epoch, action_type: String, ack: Bytes) -> HookHandler {
        let pipeline = self.pipeline.clone();
        let gate = self.gate.clone();

        Arc::new(move |payload| {
            if let Some(payload) = payload.filter(is_truthy)
                && gate.is_current(epoch)
            {
                pipeline.dispatch(Action::with_payload(action_type.clone(), payload));
            }
            future::ready(ack.clone()).boxed()
        })
    }
}

/// Returns `false` for `null`, `false`, zero, NaN and `""`.
///
/// Arrays and objects are truthy even when empty.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::transport::{Endpoint, LifecycleObservers, MemoryTransport, Transport};

    fn registry() -> (ListenerRegistry, Arc<Mutex<Vec<Action>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pipeline = Pipeline::new(move |action: Action| sink.lock().push(action), |_: Action| {});
        (ListenerRegistry::new(pipeline, EpochGate::default(), false), seen)
    }

    fn socket(transport: &MemoryTransport) -> Arc<dyn SocketHandle> {
        let endpoint = Endpoint {
            host: "localhost".to_string(),
            port: 1,
            use_tls: false,
            subprotocols: Vec::new(),
            namespace: None,
        };
        transport.connect(&endpoint, LifecycleObservers::noop())
    }

    #[test]
    fn test_truthy_payloads() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!("0")));
    }

    #[test]
    fn test_bind_dispatches_arguments_as_array() {
        let transport = MemoryTransport::new();
        let handle = socket(&transport);
        let (registry, seen) = registry();

        let bound = registry.bind(handle.as_ref(), Epoch::INITIAL, &[ListenerSpec::bind("block", "NEW_BLOCK")]);
        assert_eq!(bound, 1);

        transport
            .last_socket()
            .expect("socket")
            .deliver("block", vec![json!(1), json!("two")]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is("NEW_BLOCK"));
        assert_eq!(seen[0].payload, Some(json!([1, "two"])));
    }

    #[tokio::test]
    async fn test_hook_acks_and_skips_empty_payloads() {
        let transport = MemoryTransport::new();
        let handle = socket(&transport);
        let (registry, seen) = registry();

        registry.bind(handle.as_ref(), Epoch::INITIAL, &[ListenerSpec::hook("tx", "NEW_TX", "ok")]);
        let memory = transport.last_socket().expect("socket");

        let ack = memory.request("tx", Some(json!({ "hash": "ab" }))).await;
        assert_eq!(ack, Some(Bytes::from_static(b"ok")));

        let ack = memory.request("tx", None).await;
        assert_eq!(ack, Some(Bytes::from_static(b"ok")));

        for falsy in [json!(false), json!(0), json!(""), json!(null)] {
            let ack = memory.request("tx", Some(falsy)).await;
            assert_eq!(ack, Some(Bytes::from_static(b"ok")));
        }

        memory.request("tx", Some(json!([]))).await;
        memory.request("tx", Some(json!({}))).await;

        let seen = seen.lock();
        let payloads: Vec<_> = seen.iter().map(|a| a.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![Some(json!({ "hash": "ab" })), Some(json!([])), Some(json!({}))]
        );
    }

    #[test]
    fn test_invalid_spec_does_not_block_others() {
        let transport = MemoryTransport::new();
        let handle = socket(&transport);
        let (registry, _seen) = registry();

        let specs = [
            ListenerSpec::bind("a", "A"),
            ListenerSpec::bind("", "B"),
            ListenerSpec::bind("c", ""),
            ListenerSpec::bind("d", "D"),
        ];
        assert_eq!(registry.bind(handle.as_ref(), Epoch::INITIAL, &specs), 2);

        let memory = transport.last_socket().expect("socket");
        assert_eq!(memory.bind_count("a"), 1);
        assert_eq!(memory.bind_count("d"), 1);
        assert_eq!(memory.bind_count("c"), 0);
    }

    #[test]
    fn test_stale_epoch_handlers_are_silent() {
        let transport = MemoryTransport::new();
        let handle = socket(&transport);
        let (registry, seen) = registry();

        registry.bind(handle.as_ref(), Epoch::from_u64(7), &[ListenerSpec::bind("a", "A")]);
        transport.last_socket().expect("socket").deliver("a", vec![json!(1)]);

        assert!(seen.lock().is_empty());
    }
}
