//! Startup probing for a freshly launched dev server.
//!
//! A [`StartupProber`] polls the server URL on its own tokio task until the
//! server answers, the attempt budget runs out, or it is cancelled. One
//! prober serves exactly one launch attempt.
//!
//! The callbacks are `FnOnce`, so a prober fires at most once. Deciding to
//! fire and [`ProberHandle::cancel`] take the same lock: once `cancel`
//! returns, a callback has either already started or never will.
//!
//! # Examples
//!
//! ```no_run
//! use devserver_runner::prober::{HttpProbe, ProberConfig, StartupProber};
//! use std::sync::Arc;
//!
//! # async fn run() -> devserver_runner::Result<()> {
//! let config = ProberConfig::default();
//! let probe = Arc::new(HttpProbe::new(config.request_timeout)?);
//! let handle = StartupProber::new("http://localhost:8888/", config, probe)
//!     .spawn(|| println!("server is up"), || println!("server never answered"));
//! let outcome = handle.join().await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

use crate::config::serde_duration;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What to do when a bounded prober runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeExhaustion {
    /// Log and leave the server starting; it may still be reachable.
    #[default]
    LogOnly,
    /// Treat the launch as failed and stop the server.
    Stop,
}

/// Prober configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProberConfig {
    /// Delay before the first probe.
    #[serde(with = "serde_duration")]
    pub initial_delay: Duration,
    /// Delay between probes.
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Probe budget; `None` keeps probing until cancelled.
    pub max_attempts: Option<u32>,
    /// Connect/read timeout of a single probe.
    #[serde(with = "serde_duration")]
    pub request_timeout: Duration,
    /// Reaction to an exhausted budget.
    pub on_exhausted: ProbeExhaustion,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            interval: Duration::from_millis(250),
            max_attempts: None,
            request_timeout: Duration::from_secs(2),
            on_exhausted: ProbeExhaustion::LogOnly,
        }
    }
}

/// A single readiness check against a URL.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Succeeds when the server answered at all.
    async fn probe(&self, url: &str) -> Result<()>;
}

/// HTTP GET probe. Any response, whatever its status, means the server is up.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| Error::Probe(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Probe(e.to_string()))?;
        trace!(url, status = %response.status(), "Probe answered");
        Ok(())
    }
}

/// How a prober run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered on the given attempt.
    Ready { attempts: u32 },
    /// The attempt budget ran out.
    Exhausted { attempts: u32 },
    /// The prober was cancelled first.
    Cancelled,
}

/// Background poller for one launch attempt.
pub struct StartupProber {
    url: String,
    config: ProberConfig,
    probe: Arc<dyn Probe>,
}

impl StartupProber {
    /// Create a prober for `url`.
    pub fn new(url: impl Into<String>, config: ProberConfig, probe: Arc<dyn Probe>) -> Self {
        Self {
            url: url.into(),
            config,
            probe,
        }
    }

    /// The URL being probed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start polling on a background task.
    ///
    /// `on_ready` runs after the first successful probe; `on_exhausted` runs
    /// when a bounded budget is spent. At most one of them runs, and neither
    /// runs once the prober has been cancelled.
    pub fn spawn<R, E>(self, on_ready: R, on_exhausted: E) -> ProberHandle
    where
        R: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let gate = FireGate::new();
        let task = tokio::spawn(self.run(gate.clone(), on_ready, on_exhausted));
        ProberHandle { gate, task }
    }

    async fn run<R, E>(self, gate: FireGate, on_ready: R, on_exhausted: E) -> ProbeOutcome
    where
        R: FnOnce(),
        E: FnOnce(),
    {
        let token = &gate.token;
        if !wait_or_cancel(token, self.config.initial_delay).await {
            return ProbeOutcome::Cancelled;
        }

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return ProbeOutcome::Cancelled,
                result = self.probe.probe(&self.url) => result,
            };

            match result {
                // The probe may have raced a cancel; the gate decides.
                Ok(()) if !gate.try_fire() => return ProbeOutcome::Cancelled,
                Ok(()) => {
                    debug!(url = %self.url, attempts, "Server answered startup probe");
                    on_ready();
                    return ProbeOutcome::Ready { attempts };
                }
                Err(e) => trace!(url = %self.url, attempts, error = %e, "Server not ready yet"),
            }

            if let Some(max) = self.config.max_attempts
                && attempts >= max
            {
                if !gate.try_fire() {
                    return ProbeOutcome::Cancelled;
                }
                warn!(url = %self.url, attempts, "Server did not answer startup probes");
                on_exhausted();
                return ProbeOutcome::Exhausted { attempts };
            }

            if !wait_or_cancel(token, self.config.interval).await {
                return ProbeOutcome::Cancelled;
            }
        }
    }
}

/// Sleep for `delay`; returns `false` if cancelled first.
async fn wait_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => !token.is_cancelled(),
    }
}

/// Cancellation token plus the lock that orders firing against `cancel`.
#[derive(Debug, Clone)]
struct FireGate {
    token: CancellationToken,
    lock: Arc<Mutex<()>>,
}

impl FireGate {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn cancel(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.token.cancel();
    }

    /// Commit to firing a callback unless already cancelled.
    fn try_fire(&self) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        !self.token.is_cancelled()
    }
}

/// Control handle of a running prober.
#[derive(Debug)]
pub struct ProberHandle {
    gate: FireGate,
    task: JoinHandle<ProbeOutcome>,
}

impl ProberHandle {
    /// Stop polling at the next wait boundary. No callback starts once this
    /// returns.
    pub fn cancel(&self) {
        self.gate.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.gate.token.is_cancelled()
    }

    /// Whether the polling task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the polling task to end.
    pub async fn join(self) -> ProbeOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Startup prober task failed");
                ProbeOutcome::Cancelled
            }
        }
    }
}
