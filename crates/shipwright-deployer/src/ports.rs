//! External port allocation for managed services.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use shipwright_core::managed::{MAX_EXTERNAL_PORT, ManagedClass, PORT_WINDOW};
use shipwright_core::{Error, Result};

/// Finds a free, externally reachable TCP port inside a class's window.
///
/// There is no authoritative port registry; the probe asks the network. A
/// successful connect means occupied, refusal or timeout means free. The
/// probe is advisory, not a reservation: two concurrent allocations can
/// race to the same port, and the later bind fails the whole synthesis,
/// which is retried as a fresh deployment.
pub struct PortAllocator {
    probe_timeout: Duration,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            probe_timeout: Duration::from_millis(400),
        }
    }

    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Allocate an external port for `class` on `host_ip`.
    pub async fn allocate(&self, class: ManagedClass, host_ip: IpAddr) -> Result<u16> {
        let base = class.profile().external_base;
        let port = self
            .scan(base, PORT_WINDOW, MAX_EXTERNAL_PORT, host_ip)
            .await
            .map_err(|_| {
                Error::PortExhausted(format!(
                    "no free port for {class} in {base}..{}",
                    base.saturating_add(PORT_WINDOW)
                ))
            })?;
        debug!(class = %class, port, "Allocated external port");
        Ok(port)
    }

    async fn scan(&self, base: u16, window: u16, max: u16, host_ip: IpAddr) -> Result<u16> {
        for port in candidate_ports(base, window, max) {
            if self.probe_free(host_ip, port).await {
                return Ok(port);
            }
        }
        Err(Error::PortExhausted(format!("window at {base} exhausted")))
    }

    async fn probe_free(&self, host_ip: IpAddr, port: u16) -> bool {
        let addr = SocketAddr::new(host_ip, port);
        match timeout(self.probe_timeout, TcpStream::connect(addr)).await {
            // Something answered: the port is taken.
            Ok(Ok(_)) => false,
            // Refused or timed out: nothing listens there.
            Ok(Err(_)) | Err(_) => true,
        }
    }
}

/// Candidate ports of a window, stopping at the platform maximum.
fn candidate_ports(base: u16, window: u16, max: u16) -> impl Iterator<Item = u16> {
    (0..window)
        .map(move |offset| base.saturating_add(offset))
        .take_while(move |port| *port <= max)
}
