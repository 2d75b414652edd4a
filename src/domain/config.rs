use crate::domain::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Baud rates accepted on the command line and in config files.
pub const SUPPORTED_BAUD_RATES: [u32; 15] = [
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 230400, 460800,
    921600,
];

/// Serial2Net configuration as stored in a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialSettings,
    /// Listening socket settings
    #[serde(default)]
    pub network: NetworkSettings,
    /// Relay engine settings
    #[serde(default)]
    pub relay: RelaySettings,
}

/// Serial line settings, unvalidated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path (e.g. COM3, /dev/ttyUSB0)
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Upper bound on a single blocking read, in milliseconds
    #[serde(default = "default_serial_timeout")]
    pub timeout_ms: u64,
}

/// Listening socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Listen address; `:port` binds on all interfaces
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Disable Nagle's algorithm on accepted connections
    #[serde(default = "default_no_delay")]
    pub no_delay: bool,
}

/// Relay engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Size of a single read buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Chunks queued between a network task and a serial task
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// How long a closing session may spend writing the client's last bytes to the device, in milliseconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// What to do once a session ends
    #[serde(default)]
    pub policy: SessionPolicy,
}

/// Parity configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Whether the supervisor keeps accepting clients after a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// Serve a single client, then exit
    Once,
    /// Accept the next client after each session
    #[default]
    Loop,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(windows)]
fn default_serial_port() -> String {
    "COM3".to_string()
}

#[cfg(not(windows))]
fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_serial_timeout() -> u64 {
    100
}

fn default_listen() -> String {
    ":8000".to_string()
}

fn default_no_delay() -> bool {
    true
}

fn default_buffer_size() -> usize {
    1024
}

fn default_channel_capacity() -> usize {
    32
}

fn default_drain_timeout() -> u64 {
    1000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            serial: SerialSettings::default(),
            network: NetworkSettings::default(),
            relay: RelaySettings::default(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_serial_timeout(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            no_delay: default_no_delay(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            channel_capacity: default_channel_capacity(),
            drain_timeout_ms: default_drain_timeout(),
            policy: SessionPolicy::default(),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::None => write!(f, "none"),
            Parity::Odd => write!(f, "odd"),
            Parity::Even => write!(f, "even"),
        }
    }
}

impl fmt::Display for SessionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPolicy::Once => write!(f, "once"),
            SessionPolicy::Loop => write!(f, "loop"),
        }
    }
}

/// A baud rate from [`SUPPORTED_BAUD_RATES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudRate(u32);

impl BaudRate {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = BridgeError;

    fn try_from(value: u32) -> BridgeResult<Self> {
        if SUPPORTED_BAUD_RATES.contains(&value) {
            Ok(Self(value))
        } else {
            Err(BridgeError::config(format!(
                "Unsupported baud rate {}; expected one of {:?}",
                value, SUPPORTED_BAUD_RATES
            )))
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = BridgeError;

    fn try_from(value: u8) -> BridgeResult<Self> {
        match value {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => Err(BridgeError::config(format!(
                "Invalid data bits {}; expected 5, 6, 7 or 8",
                value
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = BridgeError;

    fn try_from(value: u8) -> BridgeResult<Self> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(BridgeError::config(format!(
                "Invalid stop bits {}; expected 1 or 2",
                value
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Validated serial line configuration. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: BaudRate,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub timeout: Duration,
}

impl SerialConfig {
    /// Short line description such as `9600 8N1`.
    pub fn line_summary(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        format!(
            "{} {}{}{}",
            self.baud_rate,
            u8::from(self.data_bits),
            parity,
            u8::from(self.stop_bits)
        )
    }
}

impl TryFrom<&SerialSettings> for SerialConfig {
    type Error = BridgeError;

    fn try_from(settings: &SerialSettings) -> BridgeResult<Self> {
        if settings.port.trim().is_empty() {
            return Err(BridgeError::config("Serial port name must not be empty"));
        }
        if settings.timeout_ms == 0 {
            return Err(BridgeError::config(
                "Serial read timeout must be greater than zero",
            ));
        }

        Ok(Self {
            port_name: settings.port.clone(),
            baud_rate: BaudRate::try_from(settings.baud_rate)?,
            data_bits: DataBits::try_from(settings.data_bits)?,
            parity: settings.parity,
            stop_bits: StopBits::try_from(settings.stop_bits)?,
            timeout: Duration::from_millis(settings.timeout_ms),
        })
    }
}

/// Everything the bridge needs at runtime, validated and immutable.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub serial: SerialConfig,
    pub listen_addr: String,
    pub no_delay: bool,
    pub buffer_size: usize,
    pub channel_capacity: usize,
    pub drain_timeout: Duration,
    pub policy: SessionPolicy,
}

impl BridgeConfig {
    /// Validate every section and freeze the result.
    pub fn validate(&self) -> BridgeResult<RuntimeConfig> {
        let serial = SerialConfig::try_from(&self.serial)?;
        let listen_addr = normalize_listen_addr(&self.network.listen)?;

        if self.relay.buffer_size == 0 || self.relay.buffer_size > 65536 {
            return Err(BridgeError::config(format!(
                "Relay buffer size {} out of range (1..=65536)",
                self.relay.buffer_size
            )));
        }
        if self.relay.channel_capacity == 0 {
            return Err(BridgeError::config(
                "Relay channel capacity must be at least 1",
            ));
        }

        Ok(RuntimeConfig {
            serial,
            listen_addr,
            no_delay: self.network.no_delay,
            buffer_size: self.relay.buffer_size,
            channel_capacity: self.relay.channel_capacity,
            drain_timeout: Duration::from_millis(self.relay.drain_timeout_ms),
            policy: self.relay.policy,
        })
    }
}

/// Turn `:8000` into `0.0.0.0:8000` and check that a port is present.
pub fn normalize_listen_addr(addr: &str) -> BridgeResult<String> {
    let addr = addr.trim();
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        BridgeError::config(format!("Listen address '{}' has no port", addr))
    })?;

    port.parse::<u16>().map_err(|_| {
        BridgeError::config(format!("Invalid port '{}' in listen address '{}'", port, addr))
    })?;

    if host.is_empty() {
        Ok(format!("0.0.0.0:{}", port))
    } else {
        Ok(addr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.serial.baud_rate, 9600);
        assert_eq!(deserialized.relay.policy, SessionPolicy::Loop);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyACM0"
            baud_rate = 115200
            parity = "even"

            [relay]
            policy = "once"
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.network.listen, ":8000");
        assert_eq!(config.relay.policy, SessionPolicy::Once);
        assert_eq!(config.relay.buffer_size, 1024);
    }

    #[test]
    fn test_default_config_validates() {
        let runtime = BridgeConfig::default().validate().unwrap();
        assert_eq!(runtime.listen_addr, "0.0.0.0:8000");
        assert_eq!(runtime.serial.line_summary(), "9600 8N1");
        assert_eq!(runtime.serial.timeout, Duration::from_millis(100));
        assert_eq!(runtime.drain_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_every_supported_baud_rate_accepted() {
        for rate in SUPPORTED_BAUD_RATES {
            assert_eq!(BaudRate::try_from(rate).unwrap().get(), rate);
        }
    }

    #[test]
    fn test_unlisted_baud_rate_rejected() {
        let mut config = BridgeConfig::default();
        config.serial.baud_rate = 57601;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
        assert!(err.to_string().contains("57601"));
    }

    #[test]
    fn test_data_and_stop_bits_bounds() {
        assert!(DataBits::try_from(4).is_err());
        assert!(DataBits::try_from(9).is_err());
        assert_eq!(DataBits::try_from(7).unwrap(), DataBits::Seven);
        assert!(StopBits::try_from(0).is_err());
        assert!(StopBits::try_from(3).is_err());
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
    }

    #[test]
    fn test_line_summary() {
        let settings = SerialSettings {
            baud_rate: 115200,
            data_bits: 7,
            parity: Parity::Odd,
            stop_bits: 2,
            ..SerialSettings::default()
        };
        let config = SerialConfig::try_from(&settings).unwrap();
        assert_eq!(config.line_summary(), "115200 7O2");
    }

    #[test]
    fn test_empty_port_rejected() {
        let mut config = BridgeConfig::default();
        config.serial.port = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_bounds() {
        let mut config = BridgeConfig::default();
        config.relay.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.relay.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_listen_addr() {
        assert_eq!(normalize_listen_addr(":8000").unwrap(), "0.0.0.0:8000");
        assert_eq!(
            normalize_listen_addr("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000"
        );
        assert_eq!(normalize_listen_addr("[::1]:7000").unwrap(), "[::1]:7000");
        assert!(normalize_listen_addr("8000").is_err());
        assert!(normalize_listen_addr(":http").is_err());
        assert!(normalize_listen_addr(":70000").is_err());
    }
}
