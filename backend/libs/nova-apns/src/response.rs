//! Classification of gateway responses into notification outcomes.
//!
//! Rejections are ordinary values, never errors, so one bad device token does
//! not abort a batch. Transport failures and timeouts are outcomes as well;
//! only configuration and credential problems surface as `Err`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApnsError;
use crate::transport::GatewayResponse;

/// Symbolic meaning of a non-200 gateway status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    BadRequest,
    AuthenticationError,
    BadMethod,
    InactiveDeviceTokenForTopic,
    PayloadTooLarge,
    TooManyRequestForToken,
    InternalServerError,
    ServerUnavailable,
    Unknown,
}

impl RejectionReason {
    pub const KNOWN: [RejectionReason; 8] = [
        RejectionReason::BadRequest,
        RejectionReason::AuthenticationError,
        RejectionReason::BadMethod,
        RejectionReason::InactiveDeviceTokenForTopic,
        RejectionReason::PayloadTooLarge,
        RejectionReason::TooManyRequestForToken,
        RejectionReason::InternalServerError,
        RejectionReason::ServerUnavailable,
    ];

    /// Map a known rejection status; anything else is `Unknown`.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => RejectionReason::BadRequest,
            403 => RejectionReason::AuthenticationError,
            405 => RejectionReason::BadMethod,
            410 => RejectionReason::InactiveDeviceTokenForTopic,
            413 => RejectionReason::PayloadTooLarge,
            429 => RejectionReason::TooManyRequestForToken,
            500 => RejectionReason::InternalServerError,
            503 => RejectionReason::ServerUnavailable,
            _ => RejectionReason::Unknown,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RejectionReason::BadRequest => Some(400),
            RejectionReason::AuthenticationError => Some(403),
            RejectionReason::BadMethod => Some(405),
            RejectionReason::InactiveDeviceTokenForTopic => Some(410),
            RejectionReason::PayloadTooLarge => Some(413),
            RejectionReason::TooManyRequestForToken => Some(429),
            RejectionReason::InternalServerError => Some(500),
            RejectionReason::ServerUnavailable => Some(503),
            RejectionReason::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::BadRequest => "BAD_REQUEST",
            RejectionReason::AuthenticationError => "AUTHENTICATION_ERROR",
            RejectionReason::BadMethod => "BAD_METHOD",
            RejectionReason::InactiveDeviceTokenForTopic => "INACTIVE_DEVICE_TOKEN_FOR_TOPIC",
            RejectionReason::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            RejectionReason::TooManyRequestForToken => "TOO_MANY_REQUEST_FOR_TOKEN",
            RejectionReason::InternalServerError => "INTERNAL_SERVER_ERROR",
            RejectionReason::ServerUnavailable => "SERVER_UNAVAILABLE",
            RejectionReason::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed rejection body: `{"reason": "...", "timestamp": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureBody {
    pub reason: String,
    /// Only sent with 410: when the device token stopped being valid
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFailureBody {
    reason: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

impl FailureBody {
    /// Parse a rejection body. The gateway sends `timestamp` as epoch
    /// milliseconds; string timestamps are accepted as-is.
    pub fn parse(body: &str) -> Result<Self, ApnsError> {
        let raw: RawFailureBody = serde_json::from_str(body)
            .map_err(|e| ApnsError::ResponseParse(format!("rejection body is not JSON: {e}")))?;

        let reason = raw
            .reason
            .ok_or_else(|| ApnsError::ResponseParse("rejection body has no reason".to_string()))?;

        let timestamp = match raw.timestamp {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self { reason, timestamp })
    }
}

/// Advisory next step derived from a rejection body.
///
/// Inferred only from whether a timestamp is present, so treat it as a hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionHint {
    /// The device token is no longer valid; stop sending to it
    DeviceTokenStale { since: String },
    /// Regenerate the provider token or check the certificate
    RefreshCredentials,
}

/// Lifecycle of a single send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Created,
    Built,
    Sent,
    Accepted,
    Rejected,
    TimedOut,
    TransportFailed,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Accepted
                | DeliveryState::Rejected
                | DeliveryState::TimedOut
                | DeliveryState::TransportFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Created => "created",
            DeliveryState::Built => "built",
            DeliveryState::Sent => "sent",
            DeliveryState::Accepted => "accepted",
            DeliveryState::Rejected => "rejected",
            DeliveryState::TimedOut => "timed_out",
            DeliveryState::TransportFailed => "transport_failed",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOutcome {
    state: DeliveryState,
    status: Option<u16>,
    apns_id: Option<String>,
    rejection_reason: Option<RejectionReason>,
    failure: Option<FailureBody>,
    hint: Option<RejectionHint>,
    raw_body: Option<String>,
    error: Option<ApnsError>,
    parse_error: Option<ApnsError>,
}

impl NotificationOutcome {
    fn empty(state: DeliveryState) -> Self {
        Self {
            state,
            status: None,
            apns_id: None,
            rejection_reason: None,
            failure: None,
            hint: None,
            raw_body: None,
            error: None,
            parse_error: None,
        }
    }

    /// Outcome of a send that did not finish within its wait time.
    pub fn timed_out(wait_time: Duration) -> Self {
        Self {
            error: Some(ApnsError::Timeout(wait_time)),
            ..Self::empty(DeliveryState::TimedOut)
        }
    }

    pub fn with_apns_id(mut self, apns_id: Option<String>) -> Self {
        self.apns_id = apns_id;
        self
    }

    /// Terminal state: accepted, rejected, timed out or transport failed.
    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Whether the gateway answered at all.
    pub fn is_dispatched(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_accepted(&self) -> bool {
        self.state == DeliveryState::Accepted
    }

    pub fn is_timed_out(&self) -> bool {
        self.state == DeliveryState::TimedOut
    }

    pub fn http_status(&self) -> Option<u16> {
        self.status
    }

    /// `apns-id` echoed by the gateway
    pub fn apns_id(&self) -> Option<&str> {
        self.apns_id.as_deref()
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        self.rejection_reason
    }

    pub fn failure(&self) -> Option<&FailureBody> {
        self.failure.as_ref()
    }

    /// The gateway's own reason string, e.g. `BadDeviceToken`.
    pub fn specific_reason(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.reason.as_str())
    }

    pub fn hint(&self) -> Option<&RejectionHint> {
        self.hint.as_ref()
    }

    pub fn is_device_token_stale(&self) -> bool {
        matches!(self.hint, Some(RejectionHint::DeviceTokenStale { .. }))
    }

    /// True for a 403 whose body carried no timestamp.
    ///
    /// [`hint`](Self::hint) reports `RefreshCredentials` for any rejection
    /// without a timestamp, but only an authentication failure is fixed by
    /// re-signing the provider token or replacing the certificate.
    pub fn should_refresh_credentials(&self) -> bool {
        matches!(self.hint, Some(RejectionHint::RefreshCredentials))
            && self.rejection_reason == Some(RejectionReason::AuthenticationError)
    }

    pub fn raw_body(&self) -> Option<&str> {
        self.raw_body.as_deref()
    }

    /// Transport failure or timeout behind a non-dispatched outcome
    pub fn error(&self) -> Option<&ApnsError> {
        self.error.as_ref()
    }

    /// Set when a rejection body could not be parsed
    pub fn parse_error(&self) -> Option<&ApnsError> {
        self.parse_error.as_ref()
    }
}

impl fmt::Display for NotificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            DeliveryState::Accepted => write!(f, "accepted"),
            DeliveryState::Rejected => {
                let reason = self
                    .rejection_reason
                    .unwrap_or(RejectionReason::Unknown);
                write!(f, "rejected ({reason}")?;
                if let Some(status) = self.status {
                    write!(f, ", status {status}")?;
                }
                if let Some(specific) = self.specific_reason() {
                    write!(f, ", {specific}")?;
                }
                write!(f, ")")
            }
            state => match &self.error {
                Some(error) => write!(f, "{state}: {error}"),
                None => write!(f, "{state}"),
            },
        }
    }
}

/// Map a transport result into an outcome.
///
/// Never fails: an unreadable rejection body is recorded on the outcome and
/// the raw body stays available.
pub fn classify(
    status: Option<u16>,
    body: Option<&str>,
    transport_error: Option<ApnsError>,
) -> NotificationOutcome {
    if let Some(error) = transport_error {
        return NotificationOutcome {
            error: Some(error),
            ..NotificationOutcome::empty(DeliveryState::TransportFailed)
        };
    }

    let Some(status) = status else {
        return NotificationOutcome {
            error: Some(ApnsError::Transport(
                "no response received from gateway".to_string(),
            )),
            ..NotificationOutcome::empty(DeliveryState::TransportFailed)
        };
    };

    if status == 200 {
        return NotificationOutcome {
            status: Some(status),
            ..NotificationOutcome::empty(DeliveryState::Accepted)
        };
    }

    let mut outcome = NotificationOutcome {
        status: Some(status),
        rejection_reason: Some(RejectionReason::from_status(status)),
        raw_body: body.map(str::to_string),
        ..NotificationOutcome::empty(DeliveryState::Rejected)
    };

    match body.filter(|b| !b.trim().is_empty()) {
        Some(body) => match FailureBody::parse(body) {
            Ok(failure) => {
                outcome.hint = Some(match &failure.timestamp {
                    Some(since) => RejectionHint::DeviceTokenStale {
                        since: since.clone(),
                    },
                    None => RejectionHint::RefreshCredentials,
                });
                outcome.failure = Some(failure);
            }
            Err(e) => outcome.parse_error = Some(e),
        },
        None => {
            outcome.parse_error = Some(ApnsError::ResponseParse(format!(
                "status {status} response had no body"
            )));
        }
    }

    outcome
}

/// Classify a response received from the gateway.
pub fn classify_response(response: GatewayResponse) -> NotificationOutcome {
    let GatewayResponse {
        status,
        apns_id,
        body,
    } = response;
    classify(Some(status), body.as_deref(), None).with_apns_id(apns_id)
}
