//! Events emitted by successful escrow operations.

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::state::EscrowState;

/// Which operation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum EventKind {
    Created,
    Funded,
    Delivered,
    Cancelled,
}

/// Observable outcome of one operation. Emitted into the unit of work, so
/// it is published only if the surrounding transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct EscrowEvent {
    pub escrow: Address,
    pub kind: EventKind,
    /// State of the record after the operation.
    pub state: EscrowState,
}

impl EscrowEvent {
    pub fn new(escrow: Address, kind: EventKind, state: EscrowState) -> Self {
        Self {
            escrow,
            kind,
            state,
        }
    }
}
