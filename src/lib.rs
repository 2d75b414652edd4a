//! Serial2Net Library
//!
//! Exposes a serial device on a TCP port. A connection supervisor accepts
//! one client at a time and runs a relay session that copies bytes, unmodified,
//! between the serial line and the client in both directions.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::core::relay::{OutcomeKind, RelayOptions, RelayOutcome, RelaySession};
pub use crate::core::shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
pub use crate::core::supervisor::{ConnectionSupervisor, SessionPolicy, SupervisorReport, SupervisorState};
pub use domain::config::{BridgeConfig, RuntimeConfig, SerialConfig};
pub use domain::error::{BridgeError, BridgeResult};
pub use infrastructure::serial::{SerialEndpoint, SerialRead};
pub use infrastructure::tcp::{Connection, NetworkListener, ReadOutcome};
