//! TCP port availability probing.
//!
//! The generator asks, for each configured listener, whether tor will be
//! able to bind it.  The answer comes from an attempted listen-bind that
//! is closed immediately.  Probing is a trait so that generation is
//! testable without touching the network.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::trace;

use tor_ctladdr::{HostIp, Port, PortRange, ProxyPort};

use crate::err::ConfigError;

/// Something that can answer "could we bind this port right now?".
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Return true if `(host, port)` accepted a listen-bind.
    async fn is_available(&self, host: &HostIp, port: Port) -> bool;
}

/// The real probe: attempts a TCP listen-bind and closes it.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_available(&self, host: &HostIp, port: Port) -> bool {
        is_port_available(host, port).await
    }
}

/// Attempt a listen-bind of `(host, port)`, closing it immediately.
pub async fn is_port_available(host: &HostIp, port: Port) -> bool {
    let addr: SocketAddr = match host {
        HostIp::V4(v4) => (v4.addr(), port.get()).into(),
        HostIp::V6(v6) => (v6.addr(), port.get()).into(),
        _ => unreachable!("HostIp is non-exhaustive but only has V4/V6 variants"),
    };
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) => {
            trace!("bind probe of {} failed: {}", addr, e);
            false
        }
    }
}

/// Find an available port, starting at `start` and probing up to `limit`
/// candidates in wrap-around order.
///
/// `limit` must be in `1..=1000`.  The scan yields between attempts so
/// that a caller who has lost interest can cancel it.
pub async fn find_available_port<P: PortProbe + ?Sized>(
    probe: &P,
    host: &HostIp,
    start: ProxyPort,
    limit: usize,
) -> Result<ProxyPort, ConfigError> {
    let range = PortRange::new(start, limit).ok_or_else(|| {
        ConfigError::invalid(format!("probe limit {limit} outside 1..=1000"))
    })?;
    for candidate in range {
        if probe.is_available(host, candidate.port()).await {
            return Ok(candidate);
        }
        // Cancellation point between attempts.
        tokio::task::yield_now().await;
    }
    Err(ConfigError::PortUnavailable {
        host: host.clone(),
        port: start.port(),
    })
}
