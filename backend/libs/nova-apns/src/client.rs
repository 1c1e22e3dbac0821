use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ApnsConfig, DeliveryMode};
use crate::credentials::CredentialProvider;
use crate::error::{ApnsError, Result};
use crate::metrics::ApnsMetrics;
use crate::notification::Notification;
use crate::request::RequestBuilder;
use crate::response::{classify, classify_response, DeliveryState, NotificationOutcome};
use crate::token::TokenCache;
use crate::transport::Transport;
use crate::worker_pool::WorkerPool;

/// How long a handle keeps waiting past the deadline for the worker's own
/// verdict before reporting a timeout itself.
const OUTCOME_GRACE: Duration = Duration::from_millis(250);

/// Trait for push notification providers
#[async_trait::async_trait]
pub trait PushProvider: Send + Sync {
    /// Delivers a notification and waits for its terminal outcome
    ///
    /// # Arguments
    /// * `notification` - Prebuilt notification (payload, device token, headers)
    ///
    /// # Returns
    /// `Ok(outcome)` for every attempt that reached the dispatch stage, whether
    /// accepted, rejected, timed out or failed in transport. `Err(ApnsError)`
    /// only when the notification could not be dispatched at all.
    async fn deliver(&self, notification: Notification) -> Result<NotificationOutcome>;
}

/// Boxed provider for services that hold it as a trait object
pub type DynPushProvider = Box<dyn PushProvider>;

/// Result of [`ApnsClient::send_notification`]
#[derive(Debug)]
pub enum Delivery {
    /// Synchronous mode: the send already finished
    Completed(NotificationOutcome),
    /// Asynchronous mode: the send is queued on the worker pool
    Pending(DispatchHandle),
}

impl Delivery {
    pub async fn outcome(self) -> Result<NotificationOutcome> {
        match self {
            Delivery::Completed(outcome) => Ok(outcome),
            Delivery::Pending(handle) => handle.outcome().await,
        }
    }
}

/// Handle to an asynchronous send
///
/// The worker decides the outcome, and the handle only relays it, so the
/// handle and the completion callback always see the same result. Awaiting
/// [`DispatchHandle::outcome`] never takes longer than the wait time plus a
/// short grace period.
#[derive(Debug)]
pub struct DispatchHandle {
    receiver: oneshot::Receiver<Result<NotificationOutcome>>,
    deadline: Instant,
    wait_time: Duration,
}

impl DispatchHandle {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub async fn outcome(self) -> Result<NotificationOutcome> {
        match tokio::time::timeout_at(self.deadline + OUTCOME_GRACE, self.receiver).await {
            Ok(Ok(result)) => result,
            // The job was dropped without reporting, e.g. the runtime went away
            Ok(Err(_)) => Err(ApnsError::PoolShutdown),
            // Worker never got to it, e.g. still queued behind slower sends
            Err(_) => Ok(NotificationOutcome::timed_out(self.wait_time)),
        }
    }
}

/// Build, send and classify one notification.
struct Dispatcher {
    builder: RequestBuilder,
    transport: Transport,
}

impl Dispatcher {
    async fn deliver(&self, notification: &Notification) -> Result<NotificationOutcome> {
        let started = std::time::Instant::now();
        let token_prefix = notification.device_token_prefix();

        let request = self.builder.build(notification).map_err(|e| {
            error!("Failed to build APNs request for token {}: {}", token_prefix, e);
            e
        })?;
        debug!(device_token = %token_prefix, state = %DeliveryState::Built, "APNs request built");

        debug!(device_token = %token_prefix, state = %DeliveryState::Sent, "APNs request sent");
        let outcome = match self.transport.send(request).await {
            Ok(response) => classify_response(response),
            Err(e) => classify(None, None, Some(e)),
        };

        let reason = outcome
            .rejection_reason()
            .map(|reason| reason.as_str())
            .unwrap_or("none");
        ApnsMetrics::record_outcome(outcome.state().as_str(), reason, started.elapsed());

        match outcome.state() {
            DeliveryState::Accepted => info!(
                "APNs notification sent successfully to token {} (apns_id: {:?})",
                token_prefix,
                outcome.apns_id()
            ),
            DeliveryState::Rejected => warn!(
                device_token = %token_prefix,
                status = ?outcome.http_status(),
                reason = %reason,
                specific_reason = ?outcome.specific_reason(),
                "APNs notification rejected"
            ),
            _ => error!("APNs send failed for token {}: {}", token_prefix, outcome),
        }

        Ok(outcome)
    }
}

struct ClientInner {
    config: ApnsConfig,
    dispatcher: Arc<Dispatcher>,
    token_cache: Option<Arc<TokenCache>>,
    pool: WorkerPool,
}

/// Apple Push Notification Service (APNs) client
///
/// Cloning is cheap; clones share the HTTP/2 connections, the provider token
/// and the worker pool.
#[derive(Clone)]
pub struct ApnsClient {
    inner: Arc<ClientInner>,
}

impl ApnsClient {
    /// Creates a new APNs client, loading credentials from the paths in `config`
    ///
    /// Must be called from within a Tokio runtime; the worker pool is started
    /// immediately.
    pub fn new(config: ApnsConfig) -> Result<Self> {
        config.validate()?;
        let credentials = CredentialProvider::load(&config.auth)?;
        Self::with_credentials(config, credentials)
    }

    /// Creates a client around credentials the caller already loaded.
    /// `config.auth` is not consulted.
    pub fn with_credentials(config: ApnsConfig, credentials: CredentialProvider) -> Result<Self> {
        config.validate()?;

        let token_cache = credentials
            .signing_credential()
            .map(|signer| Arc::new(TokenCache::new(signer.clone(), config.token_lifetime)));
        let transport = Transport::new(&config, &credentials)?;
        let builder = RequestBuilder::new(transport.base_url().clone(), token_cache.clone());
        let pool = WorkerPool::new(config.worker_pool, config.queue_capacity)?;

        info!(
            "Initialized APNs client for endpoint={}, production={}, mode={:?}, token_auth={}",
            transport.base_url(),
            config.environment.is_production(),
            config.delivery_mode,
            credentials.uses_token_auth()
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                dispatcher: Arc::new(Dispatcher { builder, transport }),
                token_cache,
                pool,
            }),
        })
    }

    pub fn config(&self) -> &ApnsConfig {
        &self.inner.config
    }

    /// Provider token cache, present only with token authentication
    pub fn token_cache(&self) -> Option<&Arc<TokenCache>> {
        self.inner.token_cache.as_ref()
    }

    /// Send according to the configured delivery mode.
    ///
    /// `on_complete` receives the result in both modes. A panic inside it is
    /// caught and logged. If the notification cannot be queued the error is
    /// returned here and `on_complete` is not called.
    pub async fn send_notification<F>(
        &self,
        notification: Notification,
        on_complete: F,
    ) -> Result<Delivery>
    where
        F: FnOnce(Result<NotificationOutcome>) + Send + 'static,
    {
        match self.inner.config.delivery_mode {
            DeliveryMode::Synchronous => {
                let result = self.send(&notification).await;
                complete(on_complete, result.clone(), &notification.device_token_prefix());
                result.map(Delivery::Completed)
            }
            DeliveryMode::Asynchronous => self.submit(notification, on_complete).map(Delivery::Pending),
        }
    }

    /// Send on the caller's task and return the classified outcome.
    ///
    /// Bounded by the HTTP client's request timeout. Only configuration and
    /// credential problems are returned as `Err`.
    pub async fn send(&self, notification: &Notification) -> Result<NotificationOutcome> {
        self.inner.dispatcher.deliver(notification).await
    }

    /// Queue a send on the worker pool.
    ///
    /// The send must finish within the configured wait time, counted from
    /// now; otherwise it is abandoned and resolves to a timed-out outcome.
    pub fn submit<F>(&self, notification: Notification, on_complete: F) -> Result<DispatchHandle>
    where
        F: FnOnce(Result<NotificationOutcome>) + Send + 'static,
    {
        let wait_time = self.inner.config.wait_time;
        let deadline = Instant::now() + wait_time;
        let (sender, receiver) = oneshot::channel();
        let dispatcher = self.inner.dispatcher.clone();

        let job = Box::pin(async move {
            let token_prefix = notification.device_token_prefix();
            // Sends that sat in the queue past their deadline are not started
            let finished = if Instant::now() >= deadline {
                None
            } else {
                tokio::time::timeout_at(deadline, dispatcher.deliver(&notification))
                    .await
                    .ok()
            };
            let result = match finished {
                Some(result) => result,
                None => {
                    warn!(
                        device_token = %token_prefix,
                        wait_time_ms = wait_time.as_millis() as u64,
                        "APNs send abandoned after wait time"
                    );
                    ApnsMetrics::record_outcome(DeliveryState::TimedOut.as_str(), "none", wait_time);
                    Ok(NotificationOutcome::timed_out(wait_time))
                }
            };

            let _ = sender.send(result.clone());
            complete(on_complete, result, &token_prefix);
        });

        self.inner.pool.submit(job).map_err(|e| {
            warn!("Failed to queue APNs notification: {}", e);
            e
        })?;

        Ok(DispatchHandle {
            receiver,
            deadline,
            wait_time,
        })
    }

    /// Stop the worker pool after queued sends finish.
    ///
    /// Later submissions fail with [`ApnsError::PoolShutdown`]; synchronous
    /// sends keep working.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
        info!("APNs client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.pool.is_shut_down()
    }
}

#[async_trait::async_trait]
impl PushProvider for ApnsClient {
    async fn deliver(&self, notification: Notification) -> Result<NotificationOutcome> {
        match self.inner.config.delivery_mode {
            DeliveryMode::Synchronous => self.send(&notification).await,
            DeliveryMode::Asynchronous => self.submit(notification, |_| {})?.outcome().await,
        }
    }
}

fn complete<F>(on_complete: F, result: Result<NotificationOutcome>, token_prefix: &str)
where
    F: FnOnce(Result<NotificationOutcome>),
{
    if std::panic::catch_unwind(AssertUnwindSafe(move || on_complete(result))).is_err() {
        error!("APNs completion callback panicked for token {}", token_prefix);
    }
}
