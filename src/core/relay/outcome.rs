use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Why a relay session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The client closed its connection
    ClientClosed,
    /// Reading from or writing to the serial device failed
    SerialError,
    /// Reading from or writing to the client failed
    NetworkError,
    /// The session was cancelled from outside
    Clean,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::ClientClosed => write!(f, "client closed"),
            OutcomeKind::SerialError => write!(f, "serial error"),
            OutcomeKind::NetworkError => write!(f, "network error"),
            OutcomeKind::Clean => write!(f, "clean"),
        }
    }
}

/// Report produced once per relay session
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub session_id: String,
    pub peer: SocketAddr,
    pub kind: OutcomeKind,
    pub detail: String,
    pub bytes_to_serial: u64,
    pub bytes_to_network: u64,
    pub duration: Duration,
}

impl RelayOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self.kind, OutcomeKind::SerialError | OutcomeKind::NetworkError)
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} bytes to serial, {} bytes to network in {:.1?}",
            self.kind, self.detail, self.bytes_to_serial, self.bytes_to_network, self.duration
        )
    }
}
