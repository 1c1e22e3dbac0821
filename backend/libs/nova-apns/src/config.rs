use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ApnsError, Result};

pub const PRODUCTION_HOST: &str = "api.push.apple.com";
pub const DEVELOPMENT_HOST: &str = "api.sandbox.push.apple.com";

pub const DEFAULT_CONNECTION_POOL_SIZE: usize = 3;
pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// APNs refuses provider tokens older than one hour.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Gateway environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Get APNs API host based on environment
    pub fn host(&self) -> &'static str {
        match self {
            Environment::Production => PRODUCTION_HOST,
            Environment::Development => DEVELOPMENT_HOST,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// How the service authenticates against the gateway.
///
/// Exactly one mechanism is active per service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Mutual TLS with a PKCS#12 client certificate
    Certificate { path: PathBuf, passphrase: String },
    /// ES256 provider tokens signed with a `.p8` key
    Token {
        key_path: PathBuf,
        key_id: String,
        team_id: String,
    },
}

impl AuthConfig {
    pub fn is_token(&self) -> bool {
        matches!(self, AuthConfig::Token { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The caller awaits the full round trip
    #[serde(alias = "sync")]
    Synchronous,
    /// Work is queued on the worker pool and reported through a continuation
    #[default]
    #[serde(alias = "async")]
    Asynchronous,
}

impl FromStr for DeliveryMode {
    type Err = ApnsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sync" | "synchronous" => Ok(DeliveryMode::Synchronous),
            "async" | "asynchronous" => Ok(DeliveryMode::Asynchronous),
            other => Err(ApnsError::Configuration(format!(
                "unknown delivery mode: {other}"
            ))),
        }
    }
}

/// Sizing policy for the asynchronous worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerPoolConfig {
    /// A constant number of workers
    Fixed { workers: usize },
    /// `core` permanent workers, growing up to `max` under load; extra
    /// workers retire after `idle` without work.
    Elastic {
        core: usize,
        max: usize,
        idle: Duration,
    },
}

impl WorkerPoolConfig {
    pub fn core_workers(&self) -> usize {
        match *self {
            WorkerPoolConfig::Fixed { workers } => workers,
            WorkerPoolConfig::Elastic { core, .. } => core,
        }
    }

    pub fn max_workers(&self) -> usize {
        match *self {
            WorkerPoolConfig::Fixed { workers } => workers,
            WorkerPoolConfig::Elastic { max, .. } => max,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match *self {
            WorkerPoolConfig::Fixed { .. } => None,
            WorkerPoolConfig::Elastic { idle, .. } => Some(idle),
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        WorkerPoolConfig::Fixed {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// APNs Configuration
///
/// Built once, validated by [`ApnsConfig::validate`] when the client is
/// created, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnsConfig {
    #[serde(default)]
    pub environment: Environment,
    pub auth: AuthConfig,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    /// Idle HTTP/2 connections kept per gateway host
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Overall budget for an asynchronous send, measured from submission
    #[serde(default = "default_wait_time")]
    pub wait_time: Duration,
    /// Per-request timeout enforced by the HTTP client
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime: Duration,
    /// Overrides `https://{environment host}`; used against local gateways
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_connection_pool_size() -> usize {
    DEFAULT_CONNECTION_POOL_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_wait_time() -> Duration {
    DEFAULT_WAIT_TIME
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_token_lifetime() -> Duration {
    DEFAULT_TOKEN_LIFETIME
}

impl ApnsConfig {
    /// Create new APNs configuration with default pool and timeout settings
    pub fn new(environment: Environment, auth: AuthConfig) -> Self {
        Self {
            environment,
            auth,
            delivery_mode: DeliveryMode::default(),
            connection_pool_size: DEFAULT_CONNECTION_POOL_SIZE,
            worker_pool: WorkerPoolConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            wait_time: DEFAULT_WAIT_TIME,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            base_url: None,
        }
    }

    pub fn with_delivery_mode(mut self, delivery_mode: DeliveryMode) -> Self {
        self.delivery_mode = delivery_mode;
        self
    }

    pub fn with_worker_pool(mut self, worker_pool: WorkerPoolConfig) -> Self {
        self.worker_pool = worker_pool;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Get APNs API endpoint based on environment
    pub fn endpoint(&self) -> &str {
        self.environment.host()
    }

    /// Gateway base URL every request path is joined onto.
    pub fn gateway_url(&self) -> Result<reqwest::Url> {
        let raw = match &self.base_url {
            Some(url) => url.clone(),
            None => format!("https://{}", self.endpoint()),
        };
        reqwest::Url::parse(&raw)
            .map_err(|e| ApnsError::Configuration(format!("invalid gateway url {raw}: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        match &self.auth {
            AuthConfig::Certificate { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(config_error("certificate path is empty"));
                }
            }
            AuthConfig::Token {
                key_path,
                key_id,
                team_id,
            } => {
                if key_path.as_os_str().is_empty() {
                    return Err(config_error("signing key path is empty"));
                }
                if key_id.trim().is_empty() || team_id.trim().is_empty() {
                    return Err(config_error("token auth requires both key_id and team_id"));
                }
            }
        }

        if self.connection_pool_size == 0 {
            return Err(config_error("connection_pool_size must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(config_error("queue_capacity must be at least 1"));
        }
        match self.worker_pool {
            WorkerPoolConfig::Fixed { workers } if workers == 0 => {
                return Err(config_error("worker pool needs at least 1 worker"));
            }
            WorkerPoolConfig::Elastic { core, max, idle } => {
                if max == 0 || core > max {
                    return Err(config_error(
                        "elastic worker pool requires 0 <= core <= max and max >= 1",
                    ));
                }
                if idle.is_zero() {
                    return Err(config_error("elastic worker idle timeout must be positive"));
                }
            }
            _ => {}
        }

        if self.wait_time.is_zero() {
            return Err(config_error("wait_time must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(config_error("request_timeout must be positive"));
        }
        if self.token_lifetime.is_zero() || self.token_lifetime > MAX_TOKEN_LIFETIME {
            return Err(config_error("token_lifetime must be between 1s and 60 minutes"));
        }

        self.gateway_url().map(|_| ())
    }

    /// Load configuration from `APNS_*` environment variables.
    ///
    /// Exactly one of `APNS_CERTIFICATE_PATH` or `APNS_KEY_PATH` must be set.
    pub fn from_env() -> Result<Self> {
        let certificate_path = non_empty_var("APNS_CERTIFICATE_PATH");
        let key_path = non_empty_var("APNS_KEY_PATH");

        let auth = match (certificate_path, key_path) {
            (Some(_), Some(_)) => {
                return Err(config_error(
                    "APNS_CERTIFICATE_PATH and APNS_KEY_PATH are mutually exclusive",
                ))
            }
            (None, None) => {
                return Err(config_error(
                    "either APNS_CERTIFICATE_PATH or APNS_KEY_PATH is required",
                ))
            }
            (Some(path), None) => AuthConfig::Certificate {
                path: PathBuf::from(path),
                passphrase: std::env::var("APNS_CERTIFICATE_PASSPHRASE").unwrap_or_default(),
            },
            (None, Some(path)) => AuthConfig::Token {
                key_path: PathBuf::from(path),
                key_id: non_empty_var("APNS_KEY_ID")
                    .ok_or_else(|| config_error("APNS_KEY_ID is required with APNS_KEY_PATH"))?,
                team_id: non_empty_var("APNS_TEAM_ID")
                    .ok_or_else(|| config_error("APNS_TEAM_ID is required with APNS_KEY_PATH"))?,
            },
        };

        let environment = if parse_var("APNS_PRODUCTION", false)? {
            Environment::Production
        } else {
            Environment::Development
        };

        let workers: usize = parse_var("APNS_WORKERS", DEFAULT_WORKERS)?;
        let worker_pool = match non_empty_var("APNS_WORKERS_MAX") {
            Some(max) => WorkerPoolConfig::Elastic {
                core: workers,
                max: max
                    .parse()
                    .map_err(|e| config_error(&format!("invalid APNS_WORKERS_MAX: {e}")))?,
                idle: Duration::from_secs(parse_var("APNS_WORKER_IDLE_SECS", 60u64)?),
            },
            None => WorkerPoolConfig::Fixed { workers },
        };

        let config = ApnsConfig {
            environment,
            auth,
            delivery_mode: parse_var("APNS_DELIVERY_MODE", DeliveryMode::default())?,
            connection_pool_size: parse_var("APNS_POOL_SIZE", DEFAULT_CONNECTION_POOL_SIZE)?,
            worker_pool,
            queue_capacity: parse_var("APNS_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            wait_time: Duration::from_millis(parse_var(
                "APNS_WAIT_TIME_MS",
                DEFAULT_WAIT_TIME.as_millis() as u64,
            )?),
            request_timeout: Duration::from_secs(parse_var(
                "APNS_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )?),
            token_lifetime: Duration::from_secs(parse_var(
                "APNS_TOKEN_LIFETIME_SECS",
                DEFAULT_TOKEN_LIFETIME.as_secs(),
            )?),
            base_url: non_empty_var("APNS_BASE_URL"),
        };

        config.validate()?;
        Ok(config)
    }
}

fn config_error(message: &str) -> ApnsError {
    ApnsError::Configuration(message.to_string())
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ApnsError::Configuration(format!("invalid {name}={raw}: {e}"))),
        None => Ok(default),
    }
}
