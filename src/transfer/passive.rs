//! Passive endpoint allocation
//!
//! Opens a short-lived data listener on a port drawn from the configured
//! passive range. Ports are tried at random rather than scanned in order so
//! that concurrent sessions do not all collide on the low end of the range.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::TcpListener;

use crate::error::TransferError;
use crate::server::PortRange;
use crate::transfer::handler::{DataConnectionHandler, PassiveHandler};

pub const MIN_ATTEMPTS: usize = 10;
pub const MAX_ATTEMPTS: usize = 1000;

/// Picks the next port to try.
///
/// Returning `None` or a port outside `range` counts as a failed attempt.
pub trait PortSelector: Send {
    fn select(&mut self, range: &PortRange) -> Option<u16>;
}

/// Uniform random selection over `[start, end)`.
#[derive(Debug)]
pub struct RandomPortSelector {
    rng: StdRng,
}

impl RandomPortSelector {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence, for reproducing a probing run.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomPortSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl PortSelector for RandomPortSelector {
    fn select(&mut self, range: &PortRange) -> Option<u16> {
        if range.is_empty() {
            return None;
        }
        Some(self.rng.gen_range(range.start..range.end))
    }
}

/// Number of bind attempts made for `range`: its width clamped to 10..=1000.
pub fn attempt_budget(range: &PortRange) -> usize {
    range.width().clamp(MIN_ATTEMPTS, MAX_ATTEMPTS)
}

/// Binds a listener on `bind_host` at a port from `range`.
///
/// Gives up after [`attempt_budget`] tries with
/// [`TransferError::NoAvailablePort`]; the caller reports that to the client
/// as a transient failure.
pub async fn allocate<S>(
    bind_host: &str,
    range: &PortRange,
    selector: &mut S,
) -> Result<(DataConnectionHandler, u16), TransferError>
where
    S: PortSelector + ?Sized,
{
    let attempts = attempt_budget(range);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let port = match selector.select(range) {
            Some(port) if port != 0 && range.contains(port) => port,
            Some(port) => {
                debug!("Attempt {}/{}: port {} outside {}", attempt, attempts, port, range);
                continue;
            }
            None => {
                debug!("Attempt {}/{}: no port available in {}", attempt, attempts, range);
                continue;
            }
        };

        let listener = match TcpListener::bind((bind_host, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                debug!(
                    "Attempt {}/{}: cannot listen on {}:{}: {}",
                    attempt, attempts, bind_host, port, e
                );
                last_error = Some(e);
                continue;
            }
        };

        match PassiveHandler::new(listener) {
            Ok(handler) => {
                info!(
                    "Passive data listener bound to {}:{} after {} attempt(s)",
                    bind_host, port, attempt
                );
                let port = handler.port();
                return Ok((DataConnectionHandler::Passive(handler), port));
            }
            Err(e) => last_error = Some(e),
        }
    }

    warn!(
        "Cannot listen on {} in {} after {} attempts",
        bind_host, range, attempts
    );
    Err(TransferError::NoAvailablePort {
        range: *range,
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(width: u16) -> usize {
        attempt_budget(&PortRange::new(1000, 1000 + width))
    }

    #[test]
    fn attempt_budget_is_clamped() {
        assert_eq!(budget(0), 10);
        assert_eq!(budget(1), 10);
        assert_eq!(budget(9), 10);
        assert_eq!(budget(10), 10);
        assert_eq!(budget(999), 999);
        assert_eq!(budget(1000), 1000);
        assert_eq!(budget(5000), 1000);
    }

    #[test]
    fn random_selector_stays_in_range() {
        let range = PortRange::new(50000, 50005);
        let mut selector = RandomPortSelector::seeded(7);
        for _ in 0..500 {
            let port = selector.select(&range).unwrap();
            assert!(range.contains(port));
        }
        assert_eq!(selector.select(&PortRange::new(50000, 50000)), None);
    }

    #[test]
    fn seeded_selectors_repeat() {
        let range = PortRange::new(40000, 60000);
        let mut a = RandomPortSelector::seeded(42);
        let mut b = RandomPortSelector::seeded(42);
        let first: Vec<_> = (0..20).map(|_| a.select(&range)).collect();
        let second: Vec<_> = (0..20).map(|_| b.select(&range)).collect();
        assert_eq!(first, second);
    }
}
