//! Transfer module for FTP server
//!
//! Builds the per-transfer data connection handlers for passive and active mode.

pub mod handler;
pub mod passive;

// Re-export key types and functions
pub use handler::{ActiveHandler, DataConnectionHandler, PassiveHandler, TransferMode};
pub use passive::{PortSelector, RandomPortSelector, allocate, attempt_budget};
