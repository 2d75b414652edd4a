use crate::domain::config::normalize_listen_addr;
use crate::domain::error::{BridgeError, BridgeResult};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Result of a single read from a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    /// The peer shut down its sending side (end of stream)
    ClosedByPeer,
}

fn classify_read(result: io::Result<usize>) -> BridgeResult<ReadOutcome> {
    match result {
        Ok(0) => Ok(ReadOutcome::ClosedByPeer),
        Ok(n) => Ok(ReadOutcome::Data(n)),
        Err(e) => Err(BridgeError::Network(e)),
    }
}

/// Accept errors that concern a single connection attempt rather than the
/// listening socket itself.
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}

/// Listening socket for bridge clients
pub struct NetworkListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    no_delay: bool,
}

impl NetworkListener {
    /// Bind to `addr`. A missing host (`:8000`) binds on all interfaces.
    pub async fn listen(addr: &str, no_delay: bool) -> BridgeResult<Self> {
        let bind_addr = normalize_listen_addr(addr)?;
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| BridgeError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| BridgeError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;

        info!("Listening for TCP connections on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            no_delay,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next client.
    pub async fn accept(&self) -> BridgeResult<Connection> {
        let (stream, peer) = self.listener.accept().await.map_err(BridgeError::Accept)?;

        if self.no_delay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
        }

        info!("Accepted TCP connection from {}", peer);
        Ok(Connection::new(stream, peer))
    }
}

/// One accepted client socket
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    closed: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            closed: false,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        classify_read(self.stream.read(buf).await)
    }

    pub async fn write(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Shut down the sending side. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of connection {} reported: {}", self.peer, e);
        }
    }

    /// Split into halves that can be driven by separate tasks.
    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            ConnectionReader {
                half: read_half,
                peer: self.peer,
            },
            ConnectionWriter {
                half: write_half,
                peer: self.peer,
                closed: self.closed,
            },
        )
    }
}

/// Receiving half of a [`Connection`]
pub struct ConnectionReader {
    half: OwnedReadHalf,
    peer: SocketAddr,
}

impl ConnectionReader {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        classify_read(self.half.read(buf).await)
    }
}

/// Sending half of a [`Connection`]
pub struct ConnectionWriter {
    half: OwnedWriteHalf,
    peer: SocketAddr,
    closed: bool,
}

impl ConnectionWriter {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn write(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.half.write_all(bytes).await?;
        Ok(())
    }

    /// Shut down the sending side. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.half.shutdown().await {
            debug!("Shutdown of connection {} reported: {}", self.peer, e);
        }
    }
}
