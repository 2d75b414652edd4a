// Core module - Relay engine and connection lifecycle
pub mod relay;
pub mod shutdown;
pub mod supervisor;
