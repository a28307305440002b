//! Error types
//!
//! Defines domain-specific error types for each module of the FTP server.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::server::PortRange;

/// Storage backend resolution errors
#[derive(Debug)]
pub enum ResolveError {
    MalformedSelector(String),
    UnknownBackend(String),
    InvalidParameter {
        backend: String,
        key: String,
        reason: String,
    },
    BackendInit {
        backend: String,
        source: io::Error,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::MalformedSelector(s) => write!(f, "Malformed storage selector: {}", s),
            ResolveError::UnknownBackend(b) => write!(f, "Unknown storage backend: {}", b),
            ResolveError::InvalidParameter {
                backend,
                key,
                reason,
            } => write!(f, "Invalid parameter '{}' for {} backend: {}", key, backend, reason),
            ResolveError::BackendInit { backend, source } => {
                write!(f, "Failed to initialize {} backend: {}", backend, source)
            }
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::BackendInit { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Storage module errors
#[derive(Debug)]
pub enum StorageError {
    NotFound(String),
    IsDirectory(String),
    NotADirectory(String),
    PermissionDenied(String),
    InvalidPath(String),
    IoError(io::Error),
}

impl StorageError {
    /// Maps an I/O error raised while touching `path` to the closest storage error.
    pub fn from_io(path: &str, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            io::ErrorKind::NotADirectory => StorageError::NotADirectory(path.to_string()),
            _ => StorageError::IoError(error),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(p) => write!(f, "Not found: {}", p),
            StorageError::IsDirectory(p) => write!(f, "Is a directory: {}", p),
            StorageError::NotADirectory(p) => write!(f, "Not a directory: {}", p),
            StorageError::PermissionDenied(p) => write!(f, "Permission denied: {}", p),
            StorageError::InvalidPath(p) => write!(f, "Invalid path: {}", p),
            StorageError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Control listener errors
#[derive(Debug)]
pub enum ServerError {
    Bind(String, io::Error),
    NotStarted,
    ListenerClosed,
    Accept(io::Error),
    Storage(ResolveError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Cannot listen on {}: {}", addr, e),
            ServerError::NotStarted => write!(f, "Server is not listening"),
            ServerError::ListenerClosed => write!(f, "Listener was closed"),
            ServerError::Accept(e) => write!(f, "Failed to accept connection: {}", e),
            ServerError::Storage(e) => write!(f, "Storage unavailable: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ResolveError> for ServerError {
    fn from(error: ResolveError) -> Self {
        ServerError::Storage(error)
    }
}

/// Transfer module errors
#[derive(Debug)]
pub enum TransferError {
    NoAvailablePort {
        range: PortRange,
        attempts: usize,
        last_error: Option<io::Error>,
    },
    Accept(io::Error),
    Connect(SocketAddr, io::Error),
    PeerRejected(SocketAddr),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::NoAvailablePort {
                range,
                attempts,
                last_error,
            } => {
                write!(f, "Cannot listen on any port in {} after {} attempts", range, attempts)?;
                if let Some(e) = last_error {
                    write!(f, ": {}", e)?;
                }
                Ok(())
            }
            TransferError::Accept(e) => write!(f, "Failed to accept data connection: {}", e),
            TransferError::Connect(addr, e) => {
                write!(f, "Failed to connect to {}: {}", addr, e)
            }
            TransferError::PeerRejected(addr) => {
                write!(f, "Rejected data connection from {}", addr)
            }
        }
    }
}

impl std::error::Error for TransferError {}

/// General FTP server error that encompasses all error types
#[derive(Debug)]
pub enum FtpServerError {
    Resolve(ResolveError),
    Storage(StorageError),
    Server(ServerError),
    Transfer(TransferError),
    Config(String),
}

impl fmt::Display for FtpServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpServerError::Resolve(e) => write!(f, "Resolve error: {}", e),
            FtpServerError::Storage(e) => write!(f, "Storage error: {}", e),
            FtpServerError::Server(e) => write!(f, "Server error: {}", e),
            FtpServerError::Transfer(e) => write!(f, "Transfer error: {}", e),
            FtpServerError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for FtpServerError {}

impl From<ResolveError> for FtpServerError {
    fn from(error: ResolveError) -> Self {
        FtpServerError::Resolve(error)
    }
}

impl From<StorageError> for FtpServerError {
    fn from(error: StorageError) -> Self {
        FtpServerError::Storage(error)
    }
}

impl From<ServerError> for FtpServerError {
    fn from(error: ServerError) -> Self {
        FtpServerError::Server(error)
    }
}

impl From<TransferError> for FtpServerError {
    fn from(error: TransferError) -> Self {
        FtpServerError::Transfer(error)
    }
}

impl From<config::ConfigError> for FtpServerError {
    fn from(error: config::ConfigError) -> Self {
        FtpServerError::Config(error.to_string())
    }
}
