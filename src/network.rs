//! Connectivity detection
//!
//! A full install downloads packages in most of its steps, so it first waits
//! a bounded time for the network. The check is a plain TCP connect to a
//! configured `host:port`.

use crate::wait::{self, CancelToken, WaitOutcome};
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-attempt connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between connectivity probes.
const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// TCP connection to the probe address succeeded
    Online,
    /// Resolution or connection failed
    Offline,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// Try one TCP connection to `address` (`host:port`).
pub fn probe(address: &str, timeout: Duration) -> NetworkState {
    let addrs = match address.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Cannot resolve {}: {}", address, e);
            return NetworkState::Offline;
        }
    };
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_stream) => return NetworkState::Online,
            Err(e) => debug!("Connect to {} failed: {}", addr, e),
        }
    }
    NetworkState::Offline
}

/// Wait until `address` accepts a connection, `timeout` passes, or the
/// operator interrupts. `progress` gets the remaining time.
pub fn wait_for_connectivity(
    address: &str,
    timeout: Duration,
    cancel: &CancelToken,
    progress: impl FnMut(Duration),
) -> WaitOutcome<()> {
    info!("Waiting up to {}s for connectivity to {}", timeout.as_secs(), address);
    let attempt = CONNECT_TIMEOUT.min(timeout.max(Duration::from_millis(200)));
    let outcome = wait::poll(
        timeout,
        PROBE_INTERVAL,
        cancel,
        || probe(address, attempt).is_online().then_some(()),
        progress,
    );
    match outcome {
        WaitOutcome::Ready(()) => info!("Network connectivity confirmed ({})", address),
        WaitOutcome::TimedOut => warn!("No connectivity to {} after {}s", address, timeout.as_secs()),
        WaitOutcome::Cancelled => info!("Connectivity wait cancelled"),
    }
    outcome
}
