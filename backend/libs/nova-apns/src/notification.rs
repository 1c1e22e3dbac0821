use uuid::Uuid;

/// Immediate delivery
pub const HIGH_PRIORITY: i32 = 10;
/// Power-efficient delivery
pub const LOW_PRIORITY: i32 = 5;

/// Expiration sentinel: do not send `apns-expiration` at all
pub const EXPIRATION_OMITTED: i64 = -1;
/// Expiration 0: the gateway neither stores nor retries the notification
pub const EXPIRATION_IMMEDIATE: i64 = 0;

/// A single push notification addressed to one device.
///
/// The payload is pre-built JSON and is sent verbatim; size limits are the
/// payload producer's concern. Values are fixed once built and a send only
/// ever borrows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    payload: Vec<u8>,
    device_token: String,
    id: Option<Uuid>,
    expiration: i64,
    priority: i32,
    topic: Option<String>,
    collapse_id: Option<String>,
}

impl Notification {
    pub fn new(device_token: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            device_token: device_token.into(),
            id: None,
            expiration: EXPIRATION_OMITTED,
            priority: HIGH_PRIORITY,
            topic: None,
            collapse_id: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Attach a fresh v4 id so the gateway echoes a known `apns-id`.
    pub fn with_random_id(self) -> Self {
        self.with_id(Uuid::new_v4())
    }

    /// Seconds since the epoch; `-1` omits the header, `0` means deliver once.
    pub fn with_expiration(mut self, expiration: i64) -> Self {
        self.expiration = expiration;
        self
    }

    /// Only 5 and 10 are forwarded to the gateway.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    /// First 8 characters of the device token, safe for logs.
    pub fn device_token_prefix(&self) -> String {
        self.device_token.chars().take(8).collect()
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn collapse_id(&self) -> Option<&str> {
        self.collapse_id.as_deref()
    }
}
