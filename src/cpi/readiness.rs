//! Application-level readiness polling.
//!
//! "Process is up" is not enough: the director is ready once its API
//! answers. Both backends share [`poll_until_ready`], supplying a
//! [`ReadinessProbe`] and a liveness check that tells an exited container
//! apart from a slow one.

use crate::constants::{READY_POLL_INTERVAL, READY_PROBE_TIMEOUT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One readiness check against the director.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `Ok` once the director answers; the error text is kept as the last
    /// failure reason for the timeout report.
    async fn probe(&self) -> Result<()>;
}

/// Probes `GET {base}/info`, accepting the director's self-signed
/// certificate.
pub struct HttpInfoProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpInfoProbe {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(READY_PROBE_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("readiness HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: format!("{}/info", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReadinessProbe for HttpInfoProbe {
    async fn probe(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Director {
                operation: "probe",
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Director {
                operation: "probe",
                reason: format!("{} returned {}", self.url, status),
            })
        }
    }
}

/// Whether the container is still worth waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Exited(Option<i64>),
}

/// Polls `probe` every [`READY_POLL_INTERVAL`] until it succeeds.
///
/// After each failed probe `liveness` is consulted; an exited container
/// fails immediately with [`Error::ContainerExited`]. Exhausting `max_wait`
/// yields [`Error::ReadinessTimeout`] carrying the last probe failure.
pub async fn poll_until_ready<F, Fut>(
    name: &str,
    cancel: &CancellationToken,
    max_wait: Duration,
    probe: &dyn ReadinessProbe,
    mut liveness: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Liveness>>,
{
    let deadline = Instant::now() + max_wait;
    let mut last_error = String::from("no probe completed");
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = probe.probe() => outcome,
        };

        match outcome {
            Ok(()) => {
                debug!("{} ready after {} probes", name, attempts);
                return Ok(());
            }
            Err(e) => {
                debug!("Readiness probe {} for {} failed: {}", attempts, name, e);
                last_error = e.to_string();
            }
        }

        if let Liveness::Exited(exit_code) = liveness().await? {
            return Err(Error::ContainerExited {
                name: name.to_string(),
                exit_code,
            });
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::ReadinessTimeout {
                waited: max_wait,
                last_error,
            });
        }

        let pause = READY_POLL_INTERVAL.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
