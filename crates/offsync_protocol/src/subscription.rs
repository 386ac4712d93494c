//! Push-notification subscription records, keyed by session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a client session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Client keys of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Client public key (base64url).
    pub p256dh: String,
    /// Authentication secret (base64url).
    pub auth: String,
}

/// Subscription body as posted by a browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Optional expiration, milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    /// Client keys.
    pub keys: SubscriptionKeys,
}

/// A stored push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    /// Owning session.
    pub session_id: SessionId,
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Client keys.
    pub keys: SubscriptionKeys,
    /// Optional expiration, milliseconds since the epoch.
    #[serde(default)]
    pub expiration_time: Option<i64>,
    /// First registration time.
    pub created_at: DateTime<Utc>,
    /// Last registration time.
    pub updated_at: DateTime<Utc>,
}

impl PushSubscription {
    /// Builds a fresh subscription for `session_id`.
    #[must_use]
    pub fn new(session_id: SessionId, request: SubscriptionRequest, at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            endpoint: request.endpoint,
            keys: request.keys,
            expiration_time: request.expiration_time,
            created_at: at,
            updated_at: at,
        }
    }

    /// Replaces endpoint and keys, keeping the creation time.
    pub fn refresh(&mut self, request: SubscriptionRequest, at: DateTime<Utc>) {
        self.endpoint = request.endpoint;
        self.keys = request.keys;
        self.expiration_time = request.expiration_time;
        self.updated_at = at;
    }

    /// Returns true if the subscription carries an expiration in the past.
    #[must_use]
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expiration_time
            .is_some_and(|expires| expires <= at.timestamp_millis())
    }
}

/// Notification fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification title.
    #[serde(default = "default_title")]
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Optional icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

fn default_title() -> String {
    "Todo update".to_string()
}

impl NotificationPayload {
    /// Creates a payload with the default title.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            title: default_title(),
            body: body.into(),
            icon: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endpoint: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            endpoint: endpoint.to_string(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "pk".to_string(),
                auth: "secret".to_string(),
            },
        }
    }

    #[test]
    fn refresh_keeps_creation_time() {
        let created = crate::now();
        let mut sub = PushSubscription::new(SessionId::new("s1"), request("https://a"), created);
        let later = created + chrono::Duration::seconds(5);
        sub.refresh(request("https://b"), later);
        assert_eq!(sub.endpoint, "https://b");
        assert_eq!(sub.created_at, created);
        assert_eq!(sub.updated_at, later);
    }

    #[test]
    fn expiration() {
        let at = crate::now();
        let mut sub = PushSubscription::new(SessionId::new("s"), request("https://a"), at);
        assert!(!sub.is_expired(at));
        sub.expiration_time = Some(at.timestamp_millis() - 1);
        assert!(sub.is_expired(at));
    }

    #[test]
    fn browser_subscription_json() {
        let json = r#"{"endpoint":"https://push.example/abc","expirationTime":null,"keys":{"p256dh":"BNc","auth":"tBH"}}"#;
        let req: SubscriptionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.keys.auth, "tBH");
        assert!(req.expiration_time.is_none());
    }

    #[test]
    fn notify_body_defaults_title() {
        let payload: NotificationPayload = serde_json::from_str(r#"{"body":"hi"}"#).unwrap();
        assert_eq!(payload.title, "Todo update");
    }
}
