use crate::types::{SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// What happened to a session, from the recipient's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    Booked,
    Approved,
    Rejected,
    Cancelled { refunded: bool },
    Completed,
    NoShow { refunded: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub recipient: UserId,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub kind: SessionEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(recipient: UserId, session_id: SessionId, kind: SessionEventKind) -> Self {
        Self {
            recipient,
            session_id,
            kind,
            occurred_at: Utc::now(),
        }
    }
}

/// Outbound notification fan-out. Delivery is a log line here; a real
/// transport would subscribe to the sink. Tests attach a sink to observe
/// exactly which events a lifecycle transition produced.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    sink: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn dispatch(&self, event: SessionEvent) {
        info!(
            recipient = %event.recipient,
            session_id = %event.session_id,
            kind = ?event.kind,
            "session notification"
        );
        if let Some(sink) = &self.sink {
            // A closed sink just means nobody is listening anymore.
            let _ = sink.send(event);
        }
    }

    /// Notify both parties of a session transition.
    pub fn dispatch_to_both(&self, customer: UserId, trainer: UserId, session_id: SessionId, kind: SessionEventKind) {
        self.dispatch(SessionEvent::new(customer, session_id, kind));
        self.dispatch(SessionEvent::new(trainer, session_id, kind));
    }
}
