// Supervisor module - Accept loop and session lifecycle
pub mod state;
pub mod supervisor;

pub use crate::domain::config::SessionPolicy;
pub use state::{SupervisorReport, SupervisorState};
pub use supervisor::ConnectionSupervisor;
