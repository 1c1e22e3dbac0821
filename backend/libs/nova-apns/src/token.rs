//! Provider token cache.
//!
//! APNs accepts an ES256 JWT as a bearer credential and expects it to be
//! reused for a while rather than signed per request. The cache keeps the
//! current token and re-signs once it is older than the configured lifetime.
//! The staleness check and the re-sign happen under one lock, so concurrent
//! senders never sign twice for the same expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::credentials::SigningCredential;
use crate::error::Result;
use crate::metrics::ApnsMetrics;

/// A signed provider token and the moment it was issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    value: String,
    issued_at: DateTime<Utc>,
    lifetime: Duration,
}

impl SignedToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Valid while `now - issued_at < lifetime`.
    ///
    /// If the wall clock stepped back, the token stays valid only while it is
    /// less than one lifetime ahead of `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (now - self.issued_at).to_std() {
            Ok(elapsed) => elapsed < self.lifetime,
            Err(_) => match (self.issued_at - now).to_std() {
                Ok(ahead) => ahead < self.lifetime,
                Err(_) => false,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ProviderClaims<'a> {
    iss: &'a str,
    iat: i64,
}

/// Sign `{"alg":"ES256","kid":..}.{"iss":..,"iat":..}` with the provider key.
pub fn sign_provider_token(signer: &SigningCredential, issued_at: DateTime<Utc>) -> Result<String> {
    let mut header = Header::new(Algorithm::ES256);
    header.typ = None;
    header.kid = Some(signer.key_id().to_string());

    let claims = ProviderClaims {
        iss: signer.team_id(),
        iat: issued_at.timestamp(),
    };

    Ok(encode(&header, &claims, signer.encoding_key())?)
}

/// Single-flight cache for the current provider token
#[derive(Debug)]
pub struct TokenCache {
    signer: SigningCredential,
    lifetime: Duration,
    current: Mutex<Option<SignedToken>>,
    regenerations: AtomicU64,
}

impl TokenCache {
    pub fn new(signer: SigningCredential, lifetime: Duration) -> Self {
        Self {
            signer,
            lifetime,
            current: Mutex::new(None),
            regenerations: AtomicU64::new(0),
        }
    }

    /// Return a valid token, signing a new one if none is cached or the
    /// cached one has outlived its lifetime.
    pub fn get_token(&self) -> Result<String> {
        self.get_token_at(Utc::now())
    }

    /// [`get_token`](Self::get_token) against an explicit clock reading.
    pub fn get_token_at(&self, now: DateTime<Utc>) -> Result<String> {
        let mut current = self.current.lock();

        if let Some(token) = current.as_ref() {
            if token.is_valid_at(now) {
                return Ok(token.value.clone());
            }
            debug!(
                key_id = %self.signer.key_id(),
                issued_at = %token.issued_at,
                "APNs provider token expired, re-signing"
            );
        }

        let value = sign_provider_token(&self.signer, now).map_err(|e| {
            error!(key_id = %self.signer.key_id(), "Failed to sign APNs provider token: {}", e);
            e
        })?;

        *current = Some(SignedToken {
            value: value.clone(),
            issued_at: now,
            lifetime: self.lifetime,
        });
        self.regenerations.fetch_add(1, Ordering::Relaxed);
        ApnsMetrics::record_token_regeneration();
        info!(key_id = %self.signer.key_id(), "Signed new APNs provider token");

        Ok(value)
    }

    /// Drop the cached token so the next caller signs a fresh one.
    ///
    /// Meant for callers reacting to an `ExpiredProviderToken` rejection.
    pub fn invalidate(&self) {
        if self.current.lock().take().is_some() {
            info!(key_id = %self.signer.key_id(), "APNs provider token invalidated");
        }
    }

    /// Snapshot of the cached token, if any.
    pub fn current(&self) -> Option<SignedToken> {
        self.current.lock().clone()
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Number of tokens signed since construction
    pub fn regeneration_count(&self) -> u64 {
        self.regenerations.load(Ordering::Relaxed)
    }
}
