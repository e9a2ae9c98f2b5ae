//! # stay-notify-log
//! Writes booking events to the application log instead of delivering them.
//! Stands in for an email or chat notifier in development and single-node setups.

use async_trait::async_trait;
use log::{info, Level};
use serde_json::Value;
use stay_core::models::BookingEvent;
use stay_core::traits::Notifier;

pub struct LogNotifier {
    /// Log target, so operators can route notifications separately (e.g., "stay::notify")
    target: String,
    level: Level,
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new("stay::notify")
    }
}

impl LogNotifier {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            level: Level::Info,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// One line per event: `booking_created booking=... property=... status=...`
    fn render(event: BookingEvent, payload: &Value) -> String {
        let field = |key: &str| match payload.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "-".to_string(),
            Some(other) => other.to_string(),
        };

        let mut line = format!(
            "{event} booking={} property={} guest={} host={} stay={}..{} status={}",
            field("bookingId"),
            field("propertyId"),
            field("guestId"),
            field("hostId"),
            field("checkIn"),
            field("checkOut"),
            field("status"),
        );
        if let Some(Value::String(reason)) = payload.get("reason") {
            line.push_str(&format!(" reason={reason:?}"));
        }
        line
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: BookingEvent, payload: Value) -> anyhow::Result<()> {
        if !payload.is_object() {
            anyhow::bail!("{event} payload must be a JSON object");
        }
        log::log!(target: &self.target, self.level, "{}", Self::render(event, &payload));
        Ok(())
    }
}

/// Logged once at startup so it is obvious nothing leaves the process.
pub fn announce() {
    info!("notifications are written to the log only");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_includes_identifiers_and_reason() {
        let payload = json!({
            "bookingId": "0192-abc",
            "propertyId": "cottage",
            "guestId": "g1",
            "hostId": "h1",
            "checkIn": "2024-12-15",
            "checkOut": "2024-12-18",
            "status": "rejected",
            "total": 648_00,
            "reason": "owner stay",
        });
        let line = LogNotifier::render(BookingEvent::BookingRejected, &payload);
        assert_eq!(
            line,
            "booking_rejected booking=0192-abc property=cottage guest=g1 host=h1 \
             stay=2024-12-15..2024-12-18 status=rejected reason=\"owner stay\""
        );
    }

    #[test]
    fn render_tolerates_missing_fields() {
        let line = LogNotifier::render(BookingEvent::BookingCreated, &json!({ "status": null }));
        assert!(line.starts_with("booking_created booking=- "));
        assert!(!line.contains("reason"));
    }

    #[tokio::test]
    async fn notify_rejects_non_object_payloads() {
        let notifier = LogNotifier::default().with_level(Level::Debug);
        assert!(notifier.notify(BookingEvent::BookingCreated, json!({})).await.is_ok());
        assert!(notifier.notify(BookingEvent::BookingCreated, json!("oops")).await.is_err());
    }
}
