//! Module `handler`
//!
//! Data connection handlers produced for a single file transfer. A passive
//! handler owns a listening socket and waits for the client; an active handler
//! holds the client's address and dials out. Either way `open` consumes the
//! handler, so a handler serves exactly one data connection.

use log::{debug, info, warn};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};

use crate::error::TransferError;

/// FTP transfer modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Active,
    Passive,
}

/// Server-side listener waiting for the client's data connection.
#[derive(Debug)]
pub struct PassiveHandler {
    listener: TcpListener,
    port: u16,
    allowed_peer: Option<IpAddr>,
}

impl PassiveHandler {
    pub(crate) fn new(listener: TcpListener) -> io::Result<Self> {
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            allowed_peer: None,
        })
    }

    /// Only accept a data connection coming from `ip`.
    pub fn allow_peer(mut self, ip: IpAddr) -> Self {
        self.allowed_peer = Some(ip);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts exactly one inbound data connection, then drops the listener.
    pub async fn open(self) -> Result<TcpStream, TransferError> {
        debug!("Waiting for passive data connection on port {}", self.port);
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(TransferError::Accept)?;

        if let Some(owner) = self.allowed_peer {
            if owner != peer_addr.ip() {
                warn!(
                    "Rejected data connection from {} on port {} (expected {})",
                    peer_addr, self.port, owner
                );
                drop(stream);
                return Err(TransferError::PeerRejected(peer_addr));
            }
        }

        info!(
            "Passive data connection accepted from {} on port {}",
            peer_addr, self.port
        );
        Ok(stream)
    }
}

/// Client-side address the server connects back to.
#[derive(Debug, Clone)]
pub struct ActiveHandler {
    remote_addr: SocketAddr,
}

impl ActiveHandler {
    /// Pure construction; the address is only used at connect time.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self { remote_addr }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Dials the client's data port.
    pub async fn open(self) -> Result<TcpStream, TransferError> {
        debug!("Connecting to active data socket {}", self.remote_addr);
        let stream = TcpStream::connect(self.remote_addr)
            .await
            .map_err(|e| TransferError::Connect(self.remote_addr, e))?;
        info!("Active data connection established to {}", self.remote_addr);
        Ok(stream)
    }
}

/// A data connection waiting to be established.
#[derive(Debug)]
pub enum DataConnectionHandler {
    Passive(PassiveHandler),
    Active(ActiveHandler),
}

impl DataConnectionHandler {
    pub fn mode(&self) -> TransferMode {
        match self {
            DataConnectionHandler::Passive(_) => TransferMode::Passive,
            DataConnectionHandler::Active(_) => TransferMode::Active,
        }
    }

    /// Produces the live data socket, accepting or connecting as the mode requires.
    pub async fn open(self) -> Result<TcpStream, TransferError> {
        match self {
            DataConnectionHandler::Passive(handler) => handler.open().await,
            DataConnectionHandler::Active(handler) => handler.open().await,
        }
    }
}

impl From<PassiveHandler> for DataConnectionHandler {
    fn from(handler: PassiveHandler) -> Self {
        DataConnectionHandler::Passive(handler)
    }
}

impl From<ActiveHandler> for DataConnectionHandler {
    fn from(handler: ActiveHandler) -> Self {
        DataConnectionHandler::Active(handler)
    }
}
