//! In-memory serial device and socket helpers shared by the integration tests.
#![allow(dead_code)]

use serial2net::{Connection, NetworkListener, SerialEndpoint, SerialRead};
use std::io::{self, Read, Write};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// How long a virtual read blocks before reporting a timeout.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Reading half of the virtual device: bytes the device "transmits".
pub struct VirtualReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for VirtualReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(data) => self.pending = data,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl SerialRead for VirtualReader {
    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }
}

/// Blocks writers until opened.
#[derive(Clone)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new((Mutex::new(false), Condvar::new())))
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

pub enum WriteMode {
    Normal,
    Failing,
    Gated(Gate),
    /// The first `n` writes time out, as a port with a full output buffer does.
    TimingOut(usize),
}

/// Writing half of the virtual device: bytes the device "receives".
pub struct VirtualWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    mode: WriteMode,
}

impl Write for VirtualWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.mode {
            WriteMode::Normal => {}
            WriteMode::Failing => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transmit failed"))
            }
            WriteMode::Gated(gate) => gate.wait(),
            WriteMode::TimingOut(remaining) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "output buffer full"));
                }
            }
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Test-side handle to the virtual device.
pub struct VirtualDevice {
    output: Option<std_mpsc::Sender<Vec<u8>>>,
    received: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl VirtualDevice {
    /// Make the device transmit `bytes` towards the bridge.
    pub fn emit(&self, bytes: &[u8]) {
        if let Some(output) = &self.output {
            output.send(bytes.to_vec()).unwrap();
        }
    }

    /// Subsequent reads on the bridge side fail as if the cable was pulled.
    pub fn unplug(&mut self) {
        self.output = None;
    }

    /// Wait until at least `len` bytes arrived at the device, or give up after a few seconds.
    pub async fn expect_received(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            match tokio::time::timeout(Duration::from_secs(5), self.received.recv()).await {
                Ok(Some(chunk)) => out.extend(chunk),
                Ok(None) | Err(_) => break,
            }
        }
        out
    }

    /// Everything that already arrived, without waiting.
    pub fn take_received(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.received.try_recv() {
            out.extend(chunk);
        }
        out
    }
}

pub fn virtual_endpoint(mode: WriteMode) -> (SerialEndpoint, VirtualDevice) {
    let (output_tx, output_rx) = std_mpsc::channel();
    let (received_tx, received_rx) = mpsc::unbounded_channel();

    let endpoint = SerialEndpoint::from_parts(
        "virtual0",
        VirtualReader {
            rx: output_rx,
            pending: Vec::new(),
        },
        VirtualWriter {
            tx: received_tx,
            mode,
        },
    );
    let device = VirtualDevice {
        output: Some(output_tx),
        received: received_rx,
    };
    (endpoint, device)
}

/// Abort the connection with a reset instead of an orderly close.
pub fn reset(client: TcpStream) {
    client.set_linger(Some(Duration::ZERO)).unwrap();
    drop(client);
}

/// A server-side connection and the matching client socket over loopback.
pub async fn connected_pair() -> (Connection, TcpStream) {
    let listener = NetworkListener::listen("127.0.0.1:0", true).await.unwrap();
    let client = TcpStream::connect(listener.local_addr()).await.unwrap();
    let connection = listener.accept().await.unwrap();
    (connection, client)
}
