//! Event envelope routed by the bus.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An event that has been (or is about to be) published: a routing key, a
/// payload, and delivery metadata. Cloned once per matched consumer, so the
/// payload type must be `Clone` for fan-out.
#[derive(Debug, Clone)]
pub struct Event<T> {
    id: Uuid,
    key: String,
    payload: T,
    published_at: DateTime<Utc>,
    reply_to: Option<String>,
}

impl<T> Event<T> {
    pub fn new(key: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            payload,
            published_at: Utc::now(),
            reply_to: None,
        }
    }

    /// Set the key a responding consumer's result is re-notified under.
    #[must_use]
    pub fn with_reply_to(mut self, key: impl Into<String>) -> Self {
        self.reply_to = Some(key.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}
