//! Notification dispatcher
//!
//! Turns engine events into transient, user-visible notifications and
//! relays every [`EngineEvent`] to subscribers over a broadcast channel.
//! Notifications stack in creation order and disappear after their display
//! duration or when closed. The poor-air-quality confirmation popup is kept
//! separately and must be acknowledged (or times out).

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::models::{EngineEvent, NotificationEvent, Severity, SoundCue};

/// Default visible lifetime of a notification
pub const DEFAULT_DISPLAY_MS: u64 = 5_000;

/// How long the air quality popup waits for acknowledgment
pub const AIR_QUALITY_POPUP_MS: u64 = 5_000;

/// Default broadcast buffer per subscriber
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Pending confirmation popup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirQualityPopup {
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

pub struct NotificationDispatcher {
    events: broadcast::Sender<EngineEvent>,
    next_id: u64,
    display_ms: u64,
    /// Oldest first; index is the stack position
    visible: Vec<NotificationEvent>,
    popup: Option<AirQualityPopup>,
}

impl NotificationDispatcher {
    pub fn new(channel_capacity: usize, display_ms: u64) -> Self {
        let (events, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            events,
            next_id: 0,
            display_ms,
            visible: Vec::new(),
            popup: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Send an event to every subscriber
    pub fn publish(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    /// Show a notification and publish it
    pub fn notify(&mut self, title: &str, message: &str, severity: Severity, now: DateTime<Utc>) -> NotificationEvent {
        self.prune(now);

        let notification = NotificationEvent {
            id: self.next_id,
            title: title.to_string(),
            message: message.to_string(),
            severity,
            created_at: now,
            duration_ms: self.display_ms,
        };
        self.next_id += 1;

        info!(
            notification_id = notification.id,
            title = %notification.title,
            severity = ?severity,
            "Notification"
        );

        self.visible.push(notification.clone());
        self.publish(EngineEvent::Notification(notification.clone()));
        notification
    }

    pub fn sound(&self, cue: SoundCue) {
        self.publish(EngineEvent::SoundCue(cue));
    }

    /// Raise (or refresh) the poor air quality confirmation popup
    pub fn show_air_quality_popup(&mut self, message: &str, now: DateTime<Utc>) -> AirQualityPopup {
        let popup = AirQualityPopup {
            message: message.to_string(),
            expires_at: now + Duration::milliseconds(AIR_QUALITY_POPUP_MS as i64),
        };
        self.popup = Some(popup.clone());
        self.publish(EngineEvent::AirQualityPopup {
            message: popup.message.clone(),
            expires_at: popup.expires_at,
        });
        popup
    }

    /// User confirmed the popup. Returns false when none was showing.
    pub fn acknowledge_popup(&mut self) -> bool {
        if self.popup.take().is_some() {
            self.publish(EngineEvent::AirQualityPopupClosed);
            true
        } else {
            false
        }
    }

    /// Close one notification. Unknown ids are a no-op.
    pub fn close(&mut self, id: u64) -> bool {
        let before = self.visible.len();
        self.visible.retain(|n| n.id != id);
        let closed = self.visible.len() != before;
        if closed {
            self.publish(EngineEvent::NotificationDismissed { id });
        }
        closed
    }

    /// Drop expired notifications and an expired popup. Returns the ids removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Vec<u64> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .visible
            .drain(..)
            .partition(|n| now >= n.created_at + Duration::milliseconds(n.duration_ms as i64));
        self.visible = kept;

        let ids: Vec<u64> = expired.iter().map(|n| n.id).collect();
        for id in &ids {
            self.publish(EngineEvent::NotificationDismissed { id: *id });
        }

        if self.popup.as_ref().is_some_and(|p| now >= p.expires_at) {
            self.popup = None;
            self.publish(EngineEvent::AirQualityPopupClosed);
        }

        ids
    }

    pub fn visible(&self) -> &[NotificationEvent] {
        &self.visible
    }

    pub fn popup(&self) -> Option<&AirQualityPopup> {
        self.popup.as_ref()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, DEFAULT_DISPLAY_MS)
    }
}
