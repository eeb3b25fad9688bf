//! Port availability checking and probe URL construction.

use crate::config::serde_duration;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

/// Default number of bind attempts before a port is declared free.
pub const DEFAULT_PORT_CHECK_ATTEMPTS: u32 = 5;

/// Port the probe URL leaves implicit.
const DEFAULT_HTTP_PORT: u16 = 80;

/// How hard to look for a competing listener before launching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortCheckConfig {
    /// Number of bind attempts.
    pub attempts: u32,
    /// Pause between attempts.
    #[serde(with = "serde_duration")]
    pub interval: Duration,
}

impl Default for PortCheckConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_PORT_CHECK_ATTEMPTS,
            interval: Duration::from_millis(200),
        }
    }
}

/// Check whether a port can be bound right now.
///
/// Attempts to bind to the wildcard address on `port`. The socket is
/// released as soon as the listener is dropped.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

/// Check whether a port is in use, retrying a bounded number of times.
///
/// A previous server that is still shutting down may hold the port for a
/// moment, so a failed bind is retried after `config.interval`. The port
/// counts as free on the first successful bind and as in use only when
/// every attempt fails.
pub async fn is_port_in_use(port: u16, config: &PortCheckConfig) -> bool {
    for attempt in 0..config.attempts {
        if is_port_available(port) {
            return false;
        }
        tracing::debug!(port, attempt, "Port is busy");
        if attempt + 1 < config.attempts {
            tokio::time::sleep(config.interval).await;
        }
    }
    true
}

/// Build the URL probed for startup, e.g. `http://localhost:8888/`.
///
/// Port 80 is left out of the URL.
pub fn probe_url(host: &str, port: u16) -> String {
    if port == DEFAULT_HTTP_PORT {
        format!("http://{}/", host)
    } else {
        format!("http://{}:{}/", host, port)
    }
}
