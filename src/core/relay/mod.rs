// Relay module - Bidirectional serial <-> network byte pump
pub mod outcome;
pub mod session;

pub use outcome::{OutcomeKind, RelayOutcome};
pub use session::{RelayOptions, RelaySession};
