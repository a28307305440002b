//! Server settings
//!
//! Immutable listener and data-port settings shared by every session.

use std::fmt;

/// Port range used for passive data listeners.
///
/// Ports are drawn from the half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of ports in the range, zero when `end <= start`.
    pub fn width(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port < self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Settings consumed by the listener and the transfer factories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub listen_host: String,
    pub listen_port: u16,
    pub passive_ports: PortRange,
}

impl ServerSettings {
    /// Get listen host and port as a bindable address string
    pub fn control_socket(&self) -> String {
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 2121,
            passive_ports: PortRange::new(2122, 2222),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_saturates_on_inverted_range() {
        assert_eq!(PortRange::new(50005, 50000).width(), 0);
        assert_eq!(PortRange::new(50000, 50005).width(), 5);
    }

    #[test]
    fn range_excludes_end() {
        let range = PortRange::new(50000, 50005);
        assert!(range.contains(50000));
        assert!(range.contains(50004));
        assert!(!range.contains(50005));
        assert!(!range.contains(49999));
    }

    #[test]
    fn control_socket_brackets_ipv6() {
        let settings = ServerSettings {
            listen_host: "::1".into(),
            listen_port: 21,
            ..ServerSettings::default()
        };
        assert_eq!(settings.control_socket(), "[::1]:21");
        assert_eq!(ServerSettings::default().control_socket(), "127.0.0.1:2121");
    }
}
