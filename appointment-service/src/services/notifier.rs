//! Fire-and-forget appointment notifications.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    Canceled,
    Reminder24h,
    Reminder2h,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Created => "created",
            NotificationKind::Canceled => "canceled",
            NotificationKind::Reminder24h => "reminder_24h",
            NotificationKind::Reminder2h => "reminder_2h",
        }
    }
}

/// Delivery is not awaited; implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, appointment_id: Uuid);
}

/// Writes notifications to the log; the default when no delivery channel is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NotificationKind, appointment_id: Uuid) {
        info!(
            kind = kind.as_str(),
            appointment_id = %appointment_id,
            "Appointment notification dispatched"
        );
    }
}

/// Forwards notifications to a channel consumed by a delivery worker.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(NotificationKind, Uuid)>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(NotificationKind, Uuid)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, kind: NotificationKind, appointment_id: Uuid) {
        if self.tx.send((kind, appointment_id)).is_err() {
            warn!(
                kind = kind.as_str(),
                appointment_id = %appointment_id,
                "Notification receiver dropped"
            );
        }
    }
}
