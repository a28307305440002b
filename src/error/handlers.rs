//! Error handlers
//!
//! Logging and reply-code mapping for errors handed to the protocol layer.

use crate::error::types::{FtpServerError, StorageError};
use log::error;

/// Handle an FTP server error
pub fn handle_error(err: &FtpServerError) {
    error!("FTP Server Error: {}", err);
}

/// Convert error to FTP response code
pub fn error_to_ftp_code(err: &FtpServerError) -> u16 {
    match err {
        FtpServerError::Resolve(_) => 421,
        FtpServerError::Storage(StorageError::InvalidPath(_)) => 553,
        FtpServerError::Storage(StorageError::IoError(_)) => 451,
        FtpServerError::Storage(_) => 550,
        FtpServerError::Server(_) => 421,
        FtpServerError::Transfer(_) => 425,
        FtpServerError::Config(_) => 421,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServerError, TransferError};
    use std::io;
    use crate::server::PortRange;

    #[test]
    fn passive_exhaustion_maps_to_cannot_open_data_connection() {
        let err = FtpServerError::from(TransferError::NoAvailablePort {
            range: PortRange::new(50000, 50005),
            attempts: 10,
            last_error: None,
        });
        assert_eq!(error_to_ftp_code(&err), 425);
    }

    #[test]
    fn storage_errors_map_to_file_unavailable() {
        let not_found = FtpServerError::from(StorageError::NotFound("/a".into()));
        assert_eq!(error_to_ftp_code(&not_found), 550);

        let traversal = FtpServerError::from(StorageError::InvalidPath("/..".into()));
        assert_eq!(error_to_ftp_code(&traversal), 553);
    }

    #[test]
    fn control_listener_failures_map_to_service_unavailable() {
        let accept = FtpServerError::from(ServerError::Accept(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "aborted",
        )));
        assert_eq!(error_to_ftp_code(&accept), 421);
        assert_eq!(
            error_to_ftp_code(&FtpServerError::from(ServerError::ListenerClosed)),
            421
        );
    }

    #[test]
    fn failed_backend_io_maps_to_local_error() {
        let err = FtpServerError::from(StorageError::from_io(
            "/a",
            io::Error::other("disk"),
        ));
        assert_eq!(error_to_ftp_code(&err), 451);
    }
}
