//! Nova APNs Library
//!
//! Delivery engine for the Apple Push Notification service HTTP/2 API. It
//! turns a prebuilt [`Notification`] into an authenticated gateway request,
//! sends it inline or through a bounded worker pool with a wait-time budget,
//! and classifies the gateway's reply into a [`NotificationOutcome`].
//!
//! It handles:
//! - Mutual-TLS certificates or ES256 provider tokens (cached and re-signed lazily)
//! - HTTP/2 connection pooling
//! - Synchronous and asynchronous delivery with completion callbacks
//! - Rejection reasons and stale-token / refresh-credential hints
//!
//! Payload JSON is built by the caller; retries are the caller's decision.
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod notification;
pub mod request;
pub mod response;
pub mod token;
pub mod transport;
pub mod worker_pool;

#[cfg(test)]
mod test_utils;

pub use client::{ApnsClient, Delivery, DispatchHandle, DynPushProvider, PushProvider};
pub use config::{ApnsConfig, AuthConfig, DeliveryMode, Environment, WorkerPoolConfig};
pub use credentials::{ClientIdentity, Credential, CredentialProvider, SigningCredential};
pub use error::{ApnsError, Result};
pub use notification::{Notification, HIGH_PRIORITY, LOW_PRIORITY};
pub use request::{ApnsHeader, ApnsRequest, RequestBuilder};
pub use response::{
    classify, DeliveryState, FailureBody, NotificationOutcome, RejectionHint, RejectionReason,
};
pub use token::{SignedToken, TokenCache};
pub use transport::{GatewayResponse, Transport};
