// TCP module - Listening socket and client connections
pub mod listener;

pub use listener::{
    is_transient_accept_error, Connection, ConnectionReader, ConnectionWriter, NetworkListener,
    ReadOutcome,
};
