//! Messages exchanged with pages, and push payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::NotificationDefaults;
use crate::error::ServiceWorkerError;

/// Control messages a page may post to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting version without waiting for pages to close.
    SkipWaiting,
    /// Add these URLs to the current shell cache.
    CacheUrls {
        #[serde(default)]
        urls: Vec<String>,
    },
}

const KNOWN_TYPES: [&str; 2] = ["SKIP_WAITING", "CACHE_URLS"];

impl ControlMessage {
    /// Parse message data.
    ///
    /// `null` and messages of unknown type yield `Ok(None)`; a known type
    /// with a malformed body is an error.
    pub fn parse(data: &Value) -> Result<Option<Self>, ServiceWorkerError> {
        let Some(kind) = data.get("type").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !KNOWN_TYPES.contains(&kind) {
            return Ok(None);
        }
        serde_json::from_value(data.clone())
            .map(Some)
            .map_err(|e| ServiceWorkerError::InvalidMessage(format!("{kind}: {e}")))
    }
}

/// Messages the worker posts to pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Connectivity is back; flush locally queued submissions.
    SyncPending,
}

/// Push message data. Both fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
}

/// A user-visible notification requested by a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

impl Notification {
    /// Fill in whatever the payload leaves out from the defaults.
    pub fn from_payload(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
        Self {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_skip_waiting() {
        let msg = ControlMessage::parse(&json!({ "type": "SKIP_WAITING" })).unwrap();
        assert_eq!(msg, Some(ControlMessage::SkipWaiting));
    }

    #[test]
    fn test_parse_cache_urls() {
        let msg = ControlMessage::parse(&json!({
            "type": "CACHE_URLS",
            "urls": ["./reports.html", "https://cdn.example.net/chart.js"]
        }))
        .unwrap();
        assert_eq!(
            msg,
            Some(ControlMessage::CacheUrls {
                urls: vec![
                    "./reports.html".to_string(),
                    "https://cdn.example.net/chart.js".to_string()
                ]
            })
        );
    }

    #[test]
    fn test_parse_cache_urls_without_list() {
        let msg = ControlMessage::parse(&json!({ "type": "CACHE_URLS" })).unwrap();
        assert_eq!(msg, Some(ControlMessage::CacheUrls { urls: vec![] }));
    }

    #[test]
    fn test_parse_ignores_null_and_unknown() {
        assert_eq!(ControlMessage::parse(&Value::Null).unwrap(), None);
        assert_eq!(ControlMessage::parse(&json!("hello")).unwrap(), None);
        assert_eq!(ControlMessage::parse(&json!({ "type": "PING" })).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_malformed_known_type() {
        let err = ControlMessage::parse(&json!({ "type": "CACHE_URLS", "urls": "index.html" }));
        assert!(matches!(err, Err(ServiceWorkerError::InvalidMessage(_))));
    }

    #[test]
    fn test_worker_message_wire_shape() {
        let value = serde_json::to_value(WorkerMessage::SyncPending).unwrap();
        assert_eq!(value, json!({ "type": "SYNC_PENDING" }));
    }

    #[test]
    fn test_notification_defaults() {
        let defaults = NotificationDefaults::default();
        let payload: PushPayload = serde_json::from_value(json!({ "body": "Class starts" })).unwrap();
        let notification = Notification::from_payload(payload, &defaults);

        assert_eq!(notification.title, "CR Attendance");
        assert_eq!(notification.body, "Class starts");
        assert_eq!(notification.icon, "./manifest.json");
    }
}
