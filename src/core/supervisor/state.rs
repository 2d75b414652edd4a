use crate::core::relay::RelayOutcome;
use std::fmt;

/// Lifecycle of the accept loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed, not yet accepting
    Idle,
    /// Waiting for a client
    Listening,
    /// A relay session owns the serial device
    SessionActive,
    /// Finished; terminal
    Shutdown,
}

impl SupervisorState {
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;

        match (self, next) {
            (Idle, Listening) | (Listening, SessionActive) | (SessionActive, Listening) => true,
            (Shutdown, _) => false,
            (_, Shutdown) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SupervisorState::Shutdown
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "Idle"),
            SupervisorState::Listening => write!(f, "Listening"),
            SupervisorState::SessionActive => write!(f, "SessionActive"),
            SupervisorState::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Totals collected over the supervisor's lifetime
#[derive(Debug, Clone, Default)]
pub struct SupervisorReport {
    pub sessions: u64,
    pub failed_sessions: u64,
    pub bytes_to_serial: u64,
    pub bytes_to_network: u64,
    pub last_outcome: Option<RelayOutcome>,
}

impl SupervisorReport {
    pub fn record(&mut self, outcome: RelayOutcome) {
        self.sessions += 1;
        if outcome.is_error() {
            self.failed_sessions += 1;
        }
        self.bytes_to_serial += outcome.bytes_to_serial;
        self.bytes_to_network += outcome.bytes_to_network;
        self.last_outcome = Some(outcome);
    }
}
