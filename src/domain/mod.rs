// Domain module - Configuration model and error types
pub mod config;
pub mod error;
