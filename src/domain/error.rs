use thiserror::Error;

/// Serial2Net unified error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to open serial port {port}: {source}")]
    DeviceOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial I/O error: {0}")]
    DeviceIo(#[source] std::io::Error),

    #[error("Serial port {port} is no longer available")]
    DeviceUnavailable { port: String },

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Output error: {0}")]
    Output(String),
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config { .. } => 2,
            _ => 1,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_exit_code() {
        assert_eq!(BridgeError::config("bad baud").exit_code(), 2);
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let bind = BridgeError::Bind {
            addr: "0.0.0.0:8000".to_string(),
            source: io,
        };
        assert_eq!(bind.exit_code(), 1);
    }

    #[test]
    fn test_bind_error_names_address() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = BridgeError::Bind {
            addr: "127.0.0.1:9".to_string(),
            source: io,
        };
        assert!(err.to_string().contains("127.0.0.1:9"));
    }
}
