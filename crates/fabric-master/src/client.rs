//! Worker start-RPC clients.
//!
//! The dispatcher talks to workers through the [`WorkerClient`] trait so the
//! transport can be swapped: HTTP in production, in-process doubles in
//! tests. The trait uses native `async fn` (via `impl Future` return types);
//! [`WorkerClientBoxed`] is the object-safe companion for dynamic dispatch,
//! with a blanket impl covering every concrete client.

use crate::error::DispatchError;
use crate::registry::WorkerEndpoint;
use fabric_core::{ContainerRequest, ShortId};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Starts containers on workers.
pub trait WorkerClient: Send + Sync {
    /// Asks `worker` to create a container for `request`, returning the
    /// runtime-assigned short id on success.
    fn start_container(
        &self,
        worker: WorkerEndpoint,
        request: ContainerRequest,
    ) -> impl Future<Output = Result<ShortId, DispatchError>> + Send;

    /// Client name for logs.
    fn name(&self) -> &str;
}

/// Object-safe version of [`WorkerClient`] for dynamic dispatch.
pub trait WorkerClientBoxed: Send + Sync {
    /// Boxed-future form of [`WorkerClient::start_container`].
    fn start_container_boxed(
        &self,
        worker: WorkerEndpoint,
        request: ContainerRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ShortId, DispatchError>> + Send + '_>>;

    /// Client name for logs.
    fn name(&self) -> &str;
}

/// Blanket implementation: any `WorkerClient` can be used boxed.
impl<T: WorkerClient> WorkerClientBoxed for T {
    fn start_container_boxed(
        &self,
        worker: WorkerEndpoint,
        request: ContainerRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ShortId, DispatchError>> + Send + '_>> {
        Box::pin(self.start_container(worker, request))
    }

    fn name(&self) -> &str {
        WorkerClient::name(self)
    }
}

/// HTTP client posting start requests to the workers' container runtime
/// endpoint.
pub struct HttpWorkerClient {
    http: reqwest::Client,
    token: String,
}

impl HttpWorkerClient {
    /// Creates a client authenticating with `token`.
    pub fn new(token: impl Into<String>) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            token: token.into(),
        })
    }
}

impl WorkerClient for HttpWorkerClient {
    async fn start_container(
        &self,
        worker: WorkerEndpoint,
        request: ContainerRequest,
    ) -> Result<ShortId, DispatchError> {
        let url = format!(
            "http://{}:{}/docker?token={}&command=create",
            worker.address, worker.port, self.token
        );
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                address: worker.address,
                port: worker.port,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        let short_id = ShortId::parse(&body)?;
        debug!(%short_id, worker = %worker, "worker created container");
        Ok(short_id)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Configuration for [`RetryingWorkerClient`] backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts (0 = only the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the exponentially growing delay.
    pub max_delay: Duration,
    /// Delay multiplier per retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Decorator adding bounded exponential-backoff retries to any client.
///
/// Only errors where the container is known not to have started are retried
/// (see [`DispatchError::is_retryable`]); everything else fails fast so the
/// at-most-once start discipline is preserved.
pub struct RetryingWorkerClient<C: WorkerClient> {
    inner: C,
    config: RetryConfig,
    total_retries: AtomicU64,
    recovered_dispatches: AtomicU64,
}

impl<C: WorkerClient> RetryingWorkerClient<C> {
    /// Wraps `inner` with the given retry policy.
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
            recovered_dispatches: AtomicU64::new(0),
        }
    }

    /// Wraps `inner` with the default retry policy.
    pub fn with_defaults(inner: C) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    /// Total retry attempts made.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Dispatches that succeeded after at least one retry.
    pub fn recovered_dispatches(&self) -> u64 {
        self.recovered_dispatches.load(Ordering::Relaxed)
    }
}

impl<C: WorkerClient> WorkerClient for RetryingWorkerClient<C> {
    async fn start_container(
        &self,
        worker: WorkerEndpoint,
        request: ContainerRequest,
    ) -> Result<ShortId, DispatchError> {
        let max_attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                sleep(delay).await;
            }

            match self
                .inner
                .start_container(worker.clone(), request.clone())
                .await
            {
                Ok(short_id) => {
                    if attempt > 0 {
                        self.recovered_dispatches.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(short_id);
                }
                Err(error) if error.is_retryable() => {
                    warn!(%worker, attempt, %error, "start request failed, will retry");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or(DispatchError::RetriesExhausted {
            attempts: max_attempts,
        }))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
