pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod transfer;

pub use server::Server;
