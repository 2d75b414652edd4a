use crate::domain::config::{DataBits, Parity, SerialConfig, StopBits};
use crate::domain::error::{BridgeError, BridgeResult};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Reading half of a serial device.
pub trait SerialRead: Read + Send + 'static {
    /// Drop any input the device has buffered but nobody has read yet.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl SerialRead for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

pub type SerialReader = Box<dyn SerialRead>;
pub type SerialWriter = Box<dyn Write + Send>;

/// Serial I/O that hit the port timeout (or a signal) and can simply be attempted again.
pub fn is_retryable_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read once, reporting "nothing available" as `Ok(0)`.
///
/// The serial read primitive blocks for at most the configured timeout, so a
/// timed-out read is the normal idle case rather than a failure.
pub fn read_available<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    match reader.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if is_retryable_io(&e) => Ok(0),
        Err(e) => Err(e),
    }
}

/// Write all of `bytes`, then flush, retrying attempts that hit the port timeout.
///
/// Retries continue until the data is accepted or `stop` is set; a stop that
/// interrupts the write is reported as `Interrupted`.
pub fn write_retrying<W: Write + ?Sized>(
    writer: &mut W,
    bytes: &[u8],
    stop: &AtomicBool,
) -> io::Result<()> {
    let stopped = |written: usize| {
        io::Error::new(
            io::ErrorKind::Interrupted,
            format!(
                "write abandoned with {} of {} bytes delivered",
                written,
                bytes.len()
            ),
        )
    };

    let mut written = 0;
    while written < bytes.len() {
        if stop.load(Ordering::Acquire) {
            return Err(stopped(written));
        }
        match writer.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if is_retryable_io(&e) => debug!("Serial write timed out, retrying"),
            Err(e) => return Err(e),
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(e) if is_retryable_io(&e) => {
                if stop.load(Ordering::Acquire) {
                    return Err(stopped(written));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// The open serial device, held for the lifetime of the process.
///
/// The device is kept as two halves on disjoint OS handles: relay sessions
/// borrow the reader for the serial-to-network direction and the writer for
/// the network-to-serial direction, then hand both back.
pub struct SerialEndpoint {
    port_name: String,
    reader: Option<SerialReader>,
    writer: Option<SerialWriter>,
}

impl SerialEndpoint {
    pub fn open(config: &SerialConfig) -> BridgeResult<Self> {
        let open_error = |source| BridgeError::DeviceOpen {
            port: config.port_name.clone(),
            source,
        };

        let builder = serialport::new(&config.port_name, config.baud_rate.get())
            .data_bits(match config.data_bits {
                DataBits::Five => serialport::DataBits::Five,
                DataBits::Six => serialport::DataBits::Six,
                DataBits::Seven => serialport::DataBits::Seven,
                DataBits::Eight => serialport::DataBits::Eight,
            })
            .parity(match config.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
            })
            .stop_bits(match config.stop_bits {
                StopBits::One => serialport::StopBits::One,
                StopBits::Two => serialport::StopBits::Two,
            })
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout);

        let port = builder.open().map_err(open_error)?;
        let writer = port.try_clone().map_err(open_error)?;

        info!(
            "Successfully opened serial port {} at {}",
            config.port_name,
            config.line_summary()
        );

        Ok(Self {
            port_name: config.port_name.clone(),
            reader: Some(Box::new(port)),
            writer: Some(Box::new(writer)),
        })
    }

    /// Build an endpoint from an arbitrary reader/writer pair, e.g. a virtual device.
    pub fn from_parts<R, W>(port_name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: SerialRead,
        W: Write + Send + 'static,
    {
        Self {
            port_name: port_name.into(),
            reader: Some(Box::new(reader)),
            writer: Some(Box::new(writer)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Both halves are present and the endpoint has not been closed.
    pub fn is_available(&self) -> bool {
        self.reader.is_some() && self.writer.is_some()
    }

    /// Blocking read bounded by the configured timeout; `Ok(0)` means nothing arrived.
    pub fn read(&mut self, buf: &mut [u8]) -> BridgeResult<usize> {
        if let Some(reader) = self.reader.as_mut() {
            return read_available(reader, buf).map_err(BridgeError::DeviceIo);
        }
        Err(self.unavailable())
    }

    pub fn write(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            return write_retrying(writer, bytes, &AtomicBool::new(false))
                .map_err(BridgeError::DeviceIo);
        }
        Err(self.unavailable())
    }

    pub fn discard_input(&mut self) -> BridgeResult<()> {
        if let Some(reader) = self.reader.as_mut() {
            return reader.discard_input().map_err(BridgeError::DeviceIo);
        }
        Err(self.unavailable())
    }

    /// Lend both halves to a relay session.
    pub(crate) fn take_halves(&mut self) -> BridgeResult<(SerialReader, SerialWriter)> {
        match (self.reader.take(), self.writer.take()) {
            (Some(reader), Some(writer)) => Ok((reader, writer)),
            (reader, writer) => {
                self.reader = reader;
                self.writer = writer;
                Err(self.unavailable())
            }
        }
    }

    pub(crate) fn restore_reader(&mut self, reader: SerialReader) {
        self.reader = Some(reader);
    }

    pub(crate) fn restore_writer(&mut self, writer: SerialWriter) {
        self.writer = Some(writer);
    }

    /// Release the device. Calling this more than once is harmless.
    pub fn close(&mut self) {
        let had_reader = self.reader.take().is_some();
        let had_writer = self.writer.take().is_some();
        if had_reader || had_writer {
            info!("Serial port {} closed", self.port_name);
        } else {
            debug!("Serial port {} already closed", self.port_name);
        }
    }

    fn unavailable(&self) -> BridgeError {
        BridgeError::DeviceUnavailable {
            port: self.port_name.clone(),
        }
    }
}

impl Drop for SerialEndpoint {
    fn drop(&mut self) {
        if self.reader.is_some() || self.writer.is_some() {
            self.close();
        }
    }
}

/// A serial port found on the host
#[derive(Debug, Clone)]
pub struct PortSummary {
    pub name: String,
    pub kind: String,
}

/// Enumerate serial ports present on the host.
pub fn list_ports() -> BridgeResult<Vec<PortSummary>> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        warn!("No serial ports found");
    }

    Ok(ports
        .into_iter()
        .map(|port| PortSummary {
            kind: match port.port_type {
                SerialPortType::UsbPort(info) => {
                    let mut kind = format!("USB {:04x}:{:04x}", info.vid, info.pid);
                    if let Some(product) = info.product {
                        kind.push(' ');
                        kind.push_str(&product);
                    }
                    kind
                }
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            },
            name: port.port_name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{BridgeConfig, SerialSettings};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedReader {
        script: VecDeque<io::Result<Vec<u8>>>,
        discarded: bool,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
            }
        }
    }

    impl SerialRead for ScriptedReader {
        fn discard_input(&mut self) -> io::Result<()> {
            self.script.clear();
            self.discarded = true;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted_endpoint(script: Vec<io::Result<Vec<u8>>>) -> (SerialEndpoint, SharedSink) {
        let sink = SharedSink::default();
        let reader = ScriptedReader {
            script: script.into(),
            discarded: false,
        };
        (
            SerialEndpoint::from_parts("virtual0", reader, sink.clone()),
            sink,
        )
    }

    #[test]
    fn test_open_missing_device_fails() {
        let settings = SerialSettings {
            port: "/dev/serial2net-missing-device".to_string(),
            ..BridgeConfig::default().serial
        };
        let config = SerialConfig::try_from(&settings).unwrap();

        match SerialEndpoint::open(&config) {
            Err(BridgeError::DeviceOpen { port, .. }) => {
                assert_eq!(port, "/dev/serial2net-missing-device")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opening a missing device must fail"),
        }
    }

    #[test]
    fn test_read_treats_timeout_as_empty() {
        let (mut endpoint, _) = scripted_endpoint(vec![
            Ok(b"AT".to_vec()),
            Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        ]);
        let mut buf = [0u8; 16];

        assert_eq!(endpoint.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"AT");
        assert_eq!(endpoint.read(&mut buf).unwrap(), 0);
        assert!(matches!(
            endpoint.read(&mut buf),
            Err(BridgeError::DeviceIo(_))
        ));
    }

    #[test]
    fn test_write_reaches_device() {
        let (mut endpoint, sink) = scripted_endpoint(Vec::new());
        endpoint.write(b"\x01\x02\x03").unwrap();
        assert_eq!(*sink.0.lock().unwrap(), b"\x01\x02\x03");
    }

    /// Accepts at most two bytes per call after timing out `timeouts` times.
    struct SlowWriter {
        timeouts: usize,
        accepted: Vec<u8>,
    }

    impl Write for SlowWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.timeouts > 0 {
                self.timeouts -= 1;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "output buffer full"));
            }
            let n = buf.len().min(2);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_retries_after_timeout() {
        let mut writer = SlowWriter {
            timeouts: 2,
            accepted: Vec::new(),
        };
        write_retrying(&mut writer, b"\x01\x02\x03\x04\x05", &AtomicBool::new(false)).unwrap();
        assert_eq!(writer.accepted, b"\x01\x02\x03\x04\x05");
    }

    #[test]
    fn test_write_stops_when_asked() {
        let mut writer = SlowWriter {
            timeouts: usize::MAX,
            accepted: Vec::new(),
        };
        let err = write_retrying(&mut writer, b"abc", &AtomicBool::new(true)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(err.to_string().contains("0 of 3"));
        assert!(writer.accepted.is_empty());
    }

    #[test]
    fn test_take_and_restore_halves() {
        let (mut endpoint, _) = scripted_endpoint(Vec::new());
        let (reader, writer) = endpoint.take_halves().unwrap();
        assert!(!endpoint.is_available());
        assert!(matches!(
            endpoint.take_halves(),
            Err(BridgeError::DeviceUnavailable { .. })
        ));

        endpoint.restore_reader(reader);
        assert!(!endpoint.is_available());
        endpoint.restore_writer(writer);
        assert!(endpoint.is_available());
    }

    #[test]
    fn test_partial_take_keeps_remaining_half() {
        let (mut endpoint, _) = scripted_endpoint(Vec::new());
        let (reader, _writer) = endpoint.take_halves().unwrap();
        endpoint.restore_reader(reader);

        assert!(endpoint.take_halves().is_err());
        assert!(endpoint.discard_input().is_ok());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut endpoint, _) = scripted_endpoint(Vec::new());
        endpoint.close();
        endpoint.close();
        assert!(!endpoint.is_available());
        assert!(matches!(
            endpoint.write(b"x"),
            Err(BridgeError::DeviceUnavailable { .. })
        ));
    }
}
