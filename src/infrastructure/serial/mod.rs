// Serial module - Serial device access
pub mod endpoint;

pub use endpoint::{list_ports, PortSummary, SerialEndpoint, SerialRead, SerialReader, SerialWriter};
