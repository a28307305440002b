//! Server core functionality
//!
//! This module contains the composition root that owns the control listener,
//! the resolved storage handle and the settings shared by every session.

pub mod core;
pub mod settings;

pub use self::core::Server;
pub use settings::{PortRange, ServerSettings};
