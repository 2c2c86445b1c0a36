//! Action classification.
//!
//! | Kind | Designator | Route |
//! |------|------------|-------|
//! | `CONNECT_SOCKET` | `Connect` | [`Route::Connect`] |
//! | `DISCONNECT_SOCKET` | `Disconnect` | [`Route::Disconnect`] |
//! | `EMIT_SOCKET` | `Emit` | [`Route::Emit`] |
//! | anything else | any or none | [`Route::Passthrough`] |

use crate::action::{Action, Designator, kinds};

/// Where an inbound action goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Connect,
    Disconnect,
    Emit,
    Passthrough,
}

impl Route {
    /// Classifies `action`; both kind and designator must agree.
    pub(crate) fn of(action: &Action) -> Self {
        match (action.kind.as_str(), action.designator()) {
            (kinds::CONNECT_SOCKET, Some(Designator::Connect(_))) => Self::Connect,
            (kinds::DISCONNECT_SOCKET, Some(Designator::Disconnect)) => Self::Disconnect,
            (kinds::EMIT_SOCKET, Some(Designator::Emit(_))) => Self::Emit,
            _ => Self::Passthrough,
        }
    }
}
