//! Inbound handler table shared by the transports.

use rustc_hash::FxHashMap;

use super::{BindHandler, HookHandler};

/// Bind and hook handlers of one socket, keyed by event name.
///
/// Several bind handlers may share an event name; a later hook replaces an
/// earlier one since an inbound call has a single answer.
#[derive(Default)]
pub(crate) struct HandlerTable {
    binds: FxHashMap<String, Vec<BindHandler>>,
    hooks: FxHashMap<String, HookHandler>,
}

impl HandlerTable {
    pub(crate) fn bind(&mut self, event: &str, handler: BindHandler) {
        self.binds.entry(event.to_string()).or_default().push(handler);
    }

    pub(crate) fn hook(&mut self, event: &str, handler: HookHandler) {
        self.hooks.insert(event.to_string(), handler);
    }

    /// Returns the bind handlers for `event`, cloned so the caller can run
    /// them without holding a lock.
    pub(crate) fn binds_for(&self, event: &str) -> Vec<BindHandler> {
        self.binds.get(event).cloned().unwrap_or_default()
    }

    pub(crate) fn hook_for(&self, event: &str) -> Option<HookHandler> {
        self.hooks.get(event).cloned()
    }

    pub(crate) fn bind_count(&self, event: &str) -> usize {
        self.binds.get(event).map_or(0, Vec::len)
    }

    pub(crate) fn has_hook(&self, event: &str) -> bool {
        self.hooks.contains_key(event)
    }

    pub(crate) fn clear(&mut self) {
        self.binds.clear();
        self.hooks.clear();
    }
}
