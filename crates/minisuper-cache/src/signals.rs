//! Messages in and out of the worker.
//!
//! Clients post [`WorkerMessage`]s in; the worker broadcasts
//! [`ClientSignal`]s out. Both serialize as `{"type": "SCREAMING_CASE", ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;

/// Sync tag registered by the app for "sync when back online".
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";
/// Periodic sync tag.
pub const PERIODIC_SYNC_TAG: &str = "sync-data";

pub const NOTIFICATION_TITLE: &str = "Minisupermercado";
pub const DEFAULT_PUSH_BODY: &str = "Nueva notificación del minisupermercado";

/// Posted to the worker by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    SkipWaiting,
    ClearCache,
}

impl WorkerMessage {
    pub fn parse(raw: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Broadcast to every client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientSignal {
    /// Run a sync cycle now (connectivity came back).
    BackgroundSync { message: String },
    /// Periodic wake-up; run a sync cycle.
    PeriodicSync { message: String },
    Notification(Notification),
    OpenWindow { url: String },
}

impl ClientSignal {
    pub fn background_sync() -> Self {
        ClientSignal::BackgroundSync {
            message: "Performing background sync...".to_string(),
        }
    }

    pub fn periodic_sync() -> Self {
        ClientSignal::PeriodicSync {
            message: "Periodic sync completed".to_string(),
        }
    }

    /// True for the signals that should start a sync cycle.
    pub fn requests_sync(&self) -> bool {
        matches!(
            self,
            ClientSignal::BackgroundSync { .. } | ClientSignal::PeriodicSync { .. }
        )
    }
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Unix epoch milliseconds.
    pub date_of_arrival: i64,
    pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Action id that opens the dashboard.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses.
pub const ACTION_CLOSE: &str = "close";

impl Notification {
    /// Builds the notification for a push payload; an empty or missing
    /// payload gets the default body.
    pub fn from_push(payload: Option<&str>, arrived_at: DateTime<Utc>) -> Self {
        let body = payload
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(DEFAULT_PUSH_BODY);
        let action = |action: &str, title: &str| NotificationAction {
            action: action.to_string(),
            title: title.to_string(),
            icon: "/icons/icon-72x72.png".to_string(),
        };

        Notification {
            title: NOTIFICATION_TITLE.to_string(),
            body: body.to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
            data: NotificationData {
                date_of_arrival: arrived_at.timestamp_millis(),
                primary_key: 1,
            },
            actions: vec![
                action(ACTION_EXPLORE, "Ver detalles"),
                action(ACTION_CLOSE, "Cerrar"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_parsing() {
        assert_eq!(
            WorkerMessage::parse(r#"{"type":"SKIP_WAITING"}"#).unwrap(),
            WorkerMessage::SkipWaiting
        );
        assert_eq!(
            WorkerMessage::parse(r#"{"type":"CLEAR_CACHE"}"#).unwrap(),
            WorkerMessage::ClearCache
        );
        assert!(WorkerMessage::parse(r#"{"type":"RELOAD"}"#).is_err());
        assert!(WorkerMessage::parse("not json").is_err());
    }

    #[test]
    fn test_signal_wire_shape() {
        let json = serde_json::to_value(ClientSignal::background_sync()).unwrap();
        assert_eq!(json["type"], "BACKGROUND_SYNC");
        assert_eq!(json["message"], "Performing background sync...");

        let open = serde_json::to_value(ClientSignal::OpenWindow { url: "/".into() }).unwrap();
        assert_eq!(open["type"], "OPEN_WINDOW");

        assert!(ClientSignal::periodic_sync().requests_sync());
        assert!(!ClientSignal::OpenWindow { url: "/".into() }.requests_sync());
    }

    #[test]
    fn test_push_notification_shape() {
        let arrived = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let custom = Notification::from_push(Some("Stock bajo: BEB001"), arrived);
        assert_eq!(custom.title, "Minisupermercado");
        assert_eq!(custom.body, "Stock bajo: BEB001");
        assert_eq!(custom.vibrate, vec![100, 50, 100]);
        assert_eq!(custom.data.date_of_arrival, arrived.timestamp_millis());
        assert_eq!(custom.actions.len(), 2);

        let json = serde_json::to_value(ClientSignal::Notification(custom)).unwrap();
        assert_eq!(json["type"], "NOTIFICATION");
        assert_eq!(json["data"]["primaryKey"], 1);

        assert_eq!(Notification::from_push(None, arrived).body, DEFAULT_PUSH_BODY);
        assert_eq!(Notification::from_push(Some("  "), arrived).body, DEFAULT_PUSH_BODY);
    }
}
