//! Security negotiation state machine

use crate::{Error, Result};

/// Security state of a proxied connection.
///
/// Exactly one of `Active`, `Declined` or `Failed` is reached per
/// connection, and the terminal states are never left again. `Failed`
/// refuses all further I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    /// Initial state, no probe seen or sent
    Unnegotiated,

    /// Probe received (acceptor) or sent (initiator), outcome pending
    Requested,

    /// Handshake completed; I/O is routed through the security session
    Active,

    /// Negotiation declined by configuration or peer; plaintext I/O
    Declined,

    /// Handshake or negotiation failed; the connection is unusable
    Failed,
}

impl SecurityState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: SecurityState) -> bool {
        use SecurityState::*;

        matches!(
            (self, next),
            (Unnegotiated, Requested)
                | (Unnegotiated, Declined)
                | (Requested, Active)
                | (Requested, Declined)
                | (Requested, Failed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: SecurityState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {self:?}"),
                actual: format!("{next:?}"),
            });
        }
        *self = next;
        Ok(())
    }

    /// True once negotiation can no longer change the outcome.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SecurityState::Active | SecurityState::Declined | SecurityState::Failed
        )
    }
}

impl std::fmt::Display for SecurityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unnegotiated => write!(f, "unnegotiated"),
            Self::Requested => write!(f, "requested"),
            Self::Active => write!(f, "active"),
            Self::Declined => write!(f, "declined"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
