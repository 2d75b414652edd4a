use crate::core::relay::outcome::{OutcomeKind, RelayOutcome};
use crate::core::shutdown::ShutdownSignal;
use crate::domain::config::RuntimeConfig;
use crate::domain::error::BridgeError;
use crate::infrastructure::serial::endpoint::{read_available, write_retrying};
use crate::infrastructure::serial::{SerialEndpoint, SerialReader, SerialWriter};
use crate::infrastructure::tcp::{Connection, ConnectionReader, ConnectionWriter, ReadOutcome};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinHandle};
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

/// Tuning for a relay session
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Size of a single read buffer in bytes
    pub buffer_size: usize,
    /// Chunks queued between a network task and a serial task
    pub channel_capacity: usize,
    /// Time allowed, after the client closes, to write its remaining bytes to the device
    pub drain_timeout: Duration,
    /// Time a serial task gets to notice it must stop before its half is given up
    pub stop_grace: Duration,
}

const MIN_STOP_GRACE: Duration = Duration::from_millis(500);

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            channel_capacity: 32,
            drain_timeout: Duration::from_secs(1),
            stop_grace: MIN_STOP_GRACE,
        }
    }
}

impl From<&RuntimeConfig> for RelayOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            channel_capacity: config.channel_capacity,
            drain_timeout: config.drain_timeout,
            // One blocking serial call may run for a full port timeout.
            stop_grace: (config.serial.timeout * 2).max(MIN_STOP_GRACE),
        }
    }
}

#[derive(Debug, Default)]
struct SessionCounters {
    to_serial: AtomicU64,
    to_network: AtomicU64,
}

impl SessionCounters {
    fn record_to_serial(&self, n: usize) {
        self.to_serial.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn record_to_network(&self, n: usize) {
        self.to_network.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// First condition that ended one of the directions
#[derive(Debug)]
enum Terminal {
    PeerClosed,
    NetworkRead(BridgeError),
    NetworkWrite(BridgeError),
    SerialReaderStopped,
    SerialWriterStopped,
    Cancelled,
}

type ReaderJoin = Result<(SerialReader, io::Result<()>), JoinError>;
type WriterJoin = Result<(SerialWriter, io::Result<()>), JoinError>;

/// A serial task that did not finish within its grace period.
struct Abandoned(Duration);

/// Bidirectional byte pump between the serial device and one client.
///
/// Serial I/O runs on two blocking tasks (one reads the device, the other
/// writes it) and network I/O on two async pumps. Bounded channels join each
/// serial task to its network pump, so the two directions never wait on each
/// other. The serial endpoint is borrowed for the session and handed back
/// when it ends; it is never closed here.
pub struct RelaySession<'a> {
    id: String,
    serial: &'a mut SerialEndpoint,
    connection: Connection,
    options: RelayOptions,
}

impl<'a> RelaySession<'a> {
    pub fn new(serial: &'a mut SerialEndpoint, connection: Connection, options: RelayOptions) -> Self {
        let options = RelayOptions {
            buffer_size: options.buffer_size.max(1),
            channel_capacity: options.channel_capacity.max(1),
            ..options
        };
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            serial,
            connection,
            options,
        }
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pump bytes until the client leaves, I/O fails or `shutdown` fires.
    pub async fn run(self, shutdown: ShutdownSignal) -> RelayOutcome {
        let span = info_span!("session", id = %self.id, peer = %self.connection.peer_addr());
        self.relay(shutdown).instrument(span).await
    }

    async fn relay(self, mut shutdown: ShutdownSignal) -> RelayOutcome {
        let started = Instant::now();
        let Self {
            id,
            serial,
            mut connection,
            options,
        } = self;
        let peer = connection.peer_addr();
        let counters = Arc::new(SessionCounters::default());

        let finish = |kind: OutcomeKind, detail: String, counters: &SessionCounters| RelayOutcome {
            session_id: id.clone(),
            peer,
            kind,
            detail,
            bytes_to_serial: counters.to_serial.load(Ordering::Relaxed),
            bytes_to_network: counters.to_network.load(Ordering::Relaxed),
            duration: started.elapsed(),
        };

        let (mut reader, writer) = match serial.take_halves() {
            Ok(halves) => halves,
            Err(e) => {
                error!("Cannot start session: {}", e);
                connection.close().await;
                return finish(OutcomeKind::SerialError, e.to_string(), &counters);
            }
        };

        if let Err(e) = reader.discard_input() {
            warn!("Failed to discard stale serial input: {}", e);
        }

        info!("Relay session started for {}", peer);

        let (net_reader, mut net_writer) = connection.split();
        let (to_network_tx, to_network_rx) = mpsc::channel::<Vec<u8>>(options.channel_capacity);
        let (to_serial_tx, to_serial_rx) = mpsc::channel::<Vec<u8>>(options.channel_capacity);

        let buffer_size = options.buffer_size;
        let reader_span = Span::current();
        let serial_reader_task = task::spawn_blocking(move || {
            let _enter = reader_span.enter();
            read_serial(reader, to_network_tx, buffer_size)
        });

        let writer_span = Span::current();
        let writer_counters = Arc::clone(&counters);
        let stop_writer = Arc::new(AtomicBool::new(false));
        let writer_stop = Arc::clone(&stop_writer);
        let mut serial_writer_task = task::spawn_blocking(move || {
            let _enter = writer_span.enter();
            write_serial(writer, to_serial_rx, &writer_counters, &writer_stop)
        });

        let mut writer_joined: Option<WriterJoin> = None;
        let terminal = {
            let mut net_reader = net_reader;
            let to_network = pump_to_network(&mut net_writer, to_network_rx, &counters);
            let from_network = pump_from_network(&mut net_reader, to_serial_tx, buffer_size);
            tokio::pin!(to_network);
            tokio::pin!(from_network);

            tokio::select! {
                terminal = &mut to_network => terminal,
                terminal = &mut from_network => terminal,
                joined = &mut serial_writer_task => {
                    writer_joined = Some(joined);
                    Terminal::SerialWriterStopped
                }
                _ = shutdown.wait() => Terminal::Cancelled,
            }
        };
        debug!("Session terminating: {:?}", terminal);

        // Both pumps are gone, so the serial reader sees its channel closed.
        // Only a client that closed normally gets its queued bytes written out.
        let drain = matches!(terminal, Terminal::PeerClosed);
        if !drain {
            stop_writer.store(true, Ordering::Release);
        }
        net_writer.close().await;
        drop(net_writer);

        let writer_joined = match writer_joined {
            Some(joined) => Ok(joined),
            None => join_writer(serial_writer_task, &stop_writer, drain, &options).await,
        };
        let writer_error = restore_writer(serial, writer_joined);
        let reader_joined = join_within(serial_reader_task, options.stop_grace).await;
        let reader_error = restore_reader(serial, reader_joined);

        let (kind, detail) = match terminal {
            Terminal::PeerClosed => match writer_error.as_ref() {
                // Bytes the client sent never reached the device.
                Some(e) => (OutcomeKind::SerialError, e.to_string()),
                None => (
                    OutcomeKind::ClientClosed,
                    "connection closed by peer".to_string(),
                ),
            },
            Terminal::NetworkRead(e) | Terminal::NetworkWrite(e) => {
                (OutcomeKind::NetworkError, e.to_string())
            }
            Terminal::SerialReaderStopped => (
                OutcomeKind::SerialError,
                describe_serial_stop(reader_error.as_ref(), "serial reader stopped"),
            ),
            Terminal::SerialWriterStopped => (
                OutcomeKind::SerialError,
                describe_serial_stop(writer_error.as_ref(), "serial writer stopped"),
            ),
            Terminal::Cancelled => (OutcomeKind::Clean, "shutdown requested".to_string()),
        };

        if kind != OutcomeKind::SerialError {
            if let Some(e) = writer_error.as_ref().or(reader_error.as_ref()) {
                warn!("Serial I/O cut short during session teardown: {}", e);
            }
        }

        let outcome = finish(kind, detail, &counters);
        match outcome.kind {
            OutcomeKind::ClientClosed | OutcomeKind::Clean => {
                info!("TCP connection from {} closed: {}", peer, outcome)
            }
            OutcomeKind::SerialError | OutcomeKind::NetworkError => {
                warn!("TCP connection from {} ended: {}", peer, outcome)
            }
        }
        outcome
    }
}

fn describe_serial_stop(error: Option<&BridgeError>, fallback: &str) -> String {
    error.map_or_else(|| fallback.to_string(), |e| e.to_string())
}

async fn join_within<T>(
    mut task: JoinHandle<T>,
    limit: Duration,
) -> Result<Result<T, JoinError>, Abandoned> {
    tokio::time::timeout(limit, &mut task)
        .await
        .map_err(|_| Abandoned(limit))
}

/// Wait for the serial writer, draining first when `drain` is set.
///
/// A drain that overruns `drain_timeout` is stopped; the writer then has
/// `stop_grace` to return before its half is abandoned.
async fn join_writer(
    mut task: JoinHandle<(SerialWriter, io::Result<()>)>,
    stop: &AtomicBool,
    drain: bool,
    options: &RelayOptions,
) -> Result<WriterJoin, Abandoned> {
    if drain {
        if let Ok(joined) = tokio::time::timeout(options.drain_timeout, &mut task).await {
            return Ok(joined);
        }
        warn!(
            "Serial writes still pending after {:?}, abandoning them",
            options.drain_timeout
        );
        stop.store(true, Ordering::Release);
    }
    join_within(task, options.stop_grace).await
}

fn lost_half(serial: &SerialEndpoint) -> Option<BridgeError> {
    Some(BridgeError::DeviceUnavailable {
        port: serial.port_name().to_string(),
    })
}

fn restore_reader(
    serial: &mut SerialEndpoint,
    joined: Result<ReaderJoin, Abandoned>,
) -> Option<BridgeError> {
    match joined {
        Ok(Ok((reader, result))) => {
            serial.restore_reader(reader);
            result.err().map(BridgeError::DeviceIo)
        }
        Ok(Err(e)) => {
            error!("Serial reader task failed, reading half lost: {}", e);
            lost_half(serial)
        }
        Err(Abandoned(limit)) => {
            error!("Serial reader did not stop within {:?}, reading half lost", limit);
            lost_half(serial)
        }
    }
}

fn restore_writer(
    serial: &mut SerialEndpoint,
    joined: Result<WriterJoin, Abandoned>,
) -> Option<BridgeError> {
    match joined {
        Ok(Ok((writer, result))) => {
            serial.restore_writer(writer);
            result.err().map(BridgeError::DeviceIo)
        }
        Ok(Err(e)) => {
            error!("Serial writer task failed, writing half lost: {}", e);
            lost_half(serial)
        }
        Err(Abandoned(limit)) => {
            error!("Serial writer did not stop within {:?}, writing half lost", limit);
            lost_half(serial)
        }
    }
}

/// Serial -> channel. Runs on a blocking task until the channel closes or the device fails.
fn read_serial(
    mut reader: SerialReader,
    tx: mpsc::Sender<Vec<u8>>,
    buffer_size: usize,
) -> (SerialReader, io::Result<()>) {
    let mut buf = vec![0u8; buffer_size];

    while !tx.is_closed() {
        match read_available(&mut reader, &mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                trace!("serial rx: {}", hex::encode(&buf[..n]));
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    debug!("Discarding {} serial bytes read after session end", n);
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read from serial port: {}", e);
                return (reader, Err(e));
            }
        }
    }

    (reader, Ok(()))
}

/// Channel -> serial. Runs on a blocking task and drains the channel until `stop` is set.
fn write_serial(
    mut writer: SerialWriter,
    mut rx: mpsc::Receiver<Vec<u8>>,
    counters: &SessionCounters,
    stop: &AtomicBool,
) -> (SerialWriter, io::Result<()>) {
    while let Some(chunk) = rx.blocking_recv() {
        if let Err(e) = write_retrying(&mut writer, &chunk, stop) {
            if stop.load(Ordering::Acquire) {
                debug!("Serial writer stopped with client data still queued: {}", e);
            } else {
                error!("Failed to write to serial port: {}", e);
            }
            return (writer, Err(e));
        }
        counters.record_to_serial(chunk.len());
        debug!("Wrote {} bytes to serial port", chunk.len());
    }

    (writer, Ok(()))
}

/// Channel -> client.
async fn pump_to_network(
    writer: &mut ConnectionWriter,
    mut rx: mpsc::Receiver<Vec<u8>>,
    counters: &SessionCounters,
) -> Terminal {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = writer.write(&chunk).await {
            error!("Error writing to TCP connection {}: {}", writer.peer_addr(), e);
            return Terminal::NetworkWrite(e);
        }
        counters.record_to_network(chunk.len());
        debug!("Sent {} bytes from serial to TCP", chunk.len());
    }

    Terminal::SerialReaderStopped
}

/// Client -> channel.
async fn pump_from_network(
    reader: &mut ConnectionReader,
    tx: mpsc::Sender<Vec<u8>>,
    buffer_size: usize,
) -> Terminal {
    let mut buf = vec![0u8; buffer_size];

    loop {
        match reader.read(&mut buf).await {
            Ok(ReadOutcome::ClosedByPeer) => {
                debug!("TCP connection from {} closed by peer", reader.peer_addr());
                return Terminal::PeerClosed;
            }
            Ok(ReadOutcome::Data(n)) => {
                debug!("Received {} bytes from TCP", n);
                trace!("tcp rx: {}", hex::encode(&buf[..n]));
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    return Terminal::SerialWriterStopped;
                }
            }
            Err(e) => {
                error!("Error reading from TCP connection {}: {}", reader.peer_addr(), e);
                return Terminal::NetworkRead(e);
            }
        }
    }
}
