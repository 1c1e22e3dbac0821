//! Builds gateway requests from notifications.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Url};

use crate::error::{ApnsError, Result};
use crate::notification::{Notification, HIGH_PRIORITY, LOW_PRIORITY};
use crate::token::TokenCache;

/// Request headers understood by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApnsHeader {
    Authorization,
    Id,
    Expiration,
    Priority,
    Topic,
    CollapseId,
}

impl ApnsHeader {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ApnsHeader::Authorization => "authorization",
            ApnsHeader::Id => "apns-id",
            ApnsHeader::Expiration => "apns-expiration",
            ApnsHeader::Priority => "apns-priority",
            ApnsHeader::Topic => "apns-topic",
            ApnsHeader::CollapseId => "apns-collapse-id",
        }
    }

    pub fn header_name(&self) -> HeaderName {
        match self {
            ApnsHeader::Authorization => AUTHORIZATION,
            other => HeaderName::from_static(other.as_str()),
        }
    }
}

/// A fully composed gateway request
#[derive(Debug, Clone)]
pub struct ApnsRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApnsRequest {
    pub fn header(&self, header: ApnsHeader) -> Option<&str> {
        self.headers
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
    }
}

/// Composes `POST /3/device/{token}` requests.
///
/// With a [`TokenCache`] attached every request carries a bearer token,
/// otherwise the TLS client identity authenticates the connection.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: Url,
    token_cache: Option<Arc<TokenCache>>,
}

impl RequestBuilder {
    pub fn new(base_url: Url, token_cache: Option<Arc<TokenCache>>) -> Self {
        Self {
            base_url,
            token_cache,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn uses_token_auth(&self) -> bool {
        self.token_cache.is_some()
    }

    pub fn build(&self, notification: &Notification) -> Result<ApnsRequest> {
        let url = self.device_url(notification.device_token())?;
        let mut headers = HeaderMap::new();

        if let Some(id) = notification.id() {
            insert(&mut headers, ApnsHeader::Id, &id.hyphenated().to_string())?;
        }
        if notification.expiration() >= 0 {
            insert(
                &mut headers,
                ApnsHeader::Expiration,
                &notification.expiration().to_string(),
            )?;
        }
        let priority = notification.priority();
        if priority == HIGH_PRIORITY || priority == LOW_PRIORITY {
            insert(&mut headers, ApnsHeader::Priority, &priority.to_string())?;
        }
        if let Some(topic) = notification.topic() {
            insert(&mut headers, ApnsHeader::Topic, topic)?;
        }
        if let Some(collapse_id) = notification.collapse_id() {
            insert(&mut headers, ApnsHeader::CollapseId, collapse_id)?;
        }
        if let Some(cache) = &self.token_cache {
            let token = cache.get_token()?;
            let mut value = HeaderValue::from_str(&format!("bearer {token}")).map_err(|e| {
                ApnsError::Credential(format!("provider token is not a valid header: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(ApnsHeader::Authorization.header_name(), value);
        }

        Ok(ApnsRequest {
            method: Method::POST,
            url,
            headers,
            body: notification.payload().to_vec(),
        })
    }

    fn device_url(&self, device_token: &str) -> Result<Url> {
        if device_token.is_empty() {
            return Err(ApnsError::Configuration("device token is empty".to_string()));
        }
        if !device_token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ApnsError::Configuration(format!(
                "device token contains characters not allowed in a URL path: {device_token}"
            )));
        }

        self.base_url
            .join(&format!("/3/device/{device_token}"))
            .map_err(|e| ApnsError::Configuration(format!("invalid device URL: {e}")))
    }
}

fn insert(headers: &mut HeaderMap, header: ApnsHeader, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value).map_err(|e| {
        ApnsError::Configuration(format!("invalid {} header value: {e}", header.as_str()))
    })?;
    headers.insert(header.header_name(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::EXPIRATION_IMMEDIATE;
    use crate::test_utils::test_signing_credential;
    use std::time::Duration;
    use uuid::Uuid;

    const DEVICE_TOKEN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn certificate_builder() -> RequestBuilder {
        RequestBuilder::new(Url::parse("https://api.sandbox.push.apple.com").unwrap(), None)
    }

    fn token_builder() -> RequestBuilder {
        let cache = TokenCache::new(test_signing_credential(), Duration::from_secs(1800));
        RequestBuilder::new(
            Url::parse("https://api.push.apple.com").unwrap(),
            Some(Arc::new(cache)),
        )
    }

    fn header_names(request: &ApnsRequest) -> Vec<String> {
        let mut names: Vec<String> = request.headers.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_path_and_method() {
        let request = certificate_builder()
            .build(&Notification::new(DEVICE_TOKEN, "{}"))
            .unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.url.as_str(),
            format!("https://api.sandbox.push.apple.com/3/device/{DEVICE_TOKEN}")
        );
    }

    #[test]
    fn test_expiration_omitted_for_sentinel() {
        let request = certificate_builder()
            .build(&Notification::new(DEVICE_TOKEN, "{}").with_expiration(-1))
            .unwrap();
        assert!(request.header(ApnsHeader::Expiration).is_none());
    }

    #[test]
    fn test_expiration_zero_is_sent() {
        let request = certificate_builder()
            .build(&Notification::new(DEVICE_TOKEN, "{}").with_expiration(EXPIRATION_IMMEDIATE))
            .unwrap();
        assert_eq!(request.header(ApnsHeader::Expiration), Some("0"));
    }

    #[test]
    fn test_priority_only_five_or_ten() {
        for priority in [-1, 0, 1, 4, 6, 9, 11, 100] {
            let request = certificate_builder()
                .build(&Notification::new(DEVICE_TOKEN, "{}").with_priority(priority))
                .unwrap();
            assert!(
                request.header(ApnsHeader::Priority).is_none(),
                "priority {priority} must not be sent"
            );
        }

        for priority in [5, 10] {
            let request = certificate_builder()
                .build(&Notification::new(DEVICE_TOKEN, "{}").with_priority(priority))
                .unwrap();
            assert_eq!(
                request.header(ApnsHeader::Priority),
                Some(priority.to_string().as_str())
            );
        }
    }

    #[test]
    fn test_full_header_set_with_certificate_auth() {
        let id = Uuid::new_v4();
        let notification = Notification::new(DEVICE_TOKEN, r#"{"aps":{"alert":"hello"}}"#)
            .with_id(id)
            .with_expiration(100)
            .with_priority(10)
            .with_topic("com.app")
            .with_collapse_id("c1");

        let request = certificate_builder().build(&notification).unwrap();

        assert_eq!(
            header_names(&request),
            vec![
                "apns-collapse-id",
                "apns-expiration",
                "apns-id",
                "apns-priority",
                "apns-topic"
            ]
        );
        assert_eq!(request.header(ApnsHeader::Id), Some(id.to_string().as_str()));
        assert_eq!(request.header(ApnsHeader::Expiration), Some("100"));
        assert_eq!(request.header(ApnsHeader::Priority), Some("10"));
        assert_eq!(request.header(ApnsHeader::Topic), Some("com.app"));
        assert_eq!(request.header(ApnsHeader::CollapseId), Some("c1"));
        assert_eq!(request.body, br#"{"aps":{"alert":"hello"}}"#.to_vec());
    }

    #[test]
    fn test_full_header_set_with_token_auth() {
        let notification = Notification::new(DEVICE_TOKEN, "{}")
            .with_random_id()
            .with_expiration(100)
            .with_priority(10)
            .with_topic("com.app")
            .with_collapse_id("c1");

        let request = token_builder().build(&notification).unwrap();

        assert_eq!(header_names(&request).len(), 6);
        let auth = request.header(ApnsHeader::Authorization).unwrap();
        assert!(auth.starts_with("bearer "));
        assert_eq!(auth.trim_start_matches("bearer ").split('.').count(), 3);
    }

    #[test]
    fn test_token_reused_across_requests() {
        let builder = token_builder();
        let first = builder.build(&Notification::new(DEVICE_TOKEN, "{}")).unwrap();
        let second = builder.build(&Notification::new(DEVICE_TOKEN, "{}")).unwrap();

        assert_eq!(
            first.header(ApnsHeader::Authorization),
            second.header(ApnsHeader::Authorization)
        );
    }

    #[test]
    fn test_rejects_unusable_device_tokens() {
        for token in ["", "abc/def", "abc def", "abc?x=1"] {
            let result = certificate_builder().build(&Notification::new(token, "{}"));
            assert!(
                matches!(result, Err(ApnsError::Configuration(_))),
                "token {token:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_invalid_topic_header() {
        let result = certificate_builder()
            .build(&Notification::new(DEVICE_TOKEN, "{}").with_topic("com.app\nInjected: 1"));
        assert!(matches!(result, Err(ApnsError::Configuration(_))));
    }

    #[test]
    fn test_base_url_with_port() {
        let builder = RequestBuilder::new(Url::parse("http://127.0.0.1:8443").unwrap(), None);
        let request = builder.build(&Notification::new("abc123", "{}")).unwrap();
        assert_eq!(request.url.as_str(), "http://127.0.0.1:8443/3/device/abc123");
    }
}
