use crate::domain::config::{BridgeConfig, Parity, SessionPolicy};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Command line arguments for Serial2Net
///
/// Flags left unset fall back to the configuration file, then to built-in defaults.
#[derive(Parser, Debug)]
#[command(
    name = "serial2net",
    version = env!("CARGO_PKG_VERSION"),
    about = "Bridge a serial port to a TCP socket",
    long_about = "Exposes a serial device on a TCP port. Bytes are relayed unmodified in both directions between the serial line and one connected client at a time."
)]
pub struct Args {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(long)]
    pub serial: Option<String>,

    /// Serial port baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Data bits (5, 6, 7 or 8)
    #[arg(long)]
    pub bits: Option<u8>,

    /// Parity
    #[arg(long, value_enum)]
    pub parity: Option<ParityArg>,

    /// Stop bits (1 or 2)
    #[arg(long)]
    pub stop: Option<u8>,

    /// TCP address to listen on (e.g., :8000)
    #[arg(long)]
    pub tcp: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serve a single client, then exit
    #[arg(long)]
    pub once: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// List available serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,
}

/// Parity configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ParityArg {
    None,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Self::None,
            ParityArg::Odd => Self::Odd,
            ParityArg::Even => Self::Even,
        }
    }
}

impl Args {
    /// Overlay the flags that were given on top of `config`.
    pub fn apply_to(&self, config: &mut BridgeConfig) {
        if let Some(port) = &self.serial {
            config.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(bits) = self.bits {
            config.serial.data_bits = bits;
        }
        if let Some(parity) = self.parity {
            config.serial.parity = parity.into();
        }
        if let Some(stop) = self.stop {
            config.serial.stop_bits = stop;
        }
        if let Some(tcp) = &self.tcp {
            config.network.listen = tcp.clone();
        }
        if self.once {
            config.relay.policy = SessionPolicy::Once;
        }
    }
}
