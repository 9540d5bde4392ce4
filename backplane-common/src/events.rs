//! Event types broadcast from the job/worker substrate for SSE consumers.
//!
//! A `broadcast`-backed bus of a serializable, tagged event enum covering job and
//! clip lifecycle transitions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events broadcast as jobs and clips move through their lifecycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackplaneEvent {
    /// A job was leased by a worker.
    JobClaimed {
        job_id: i64,
        job_type: String,
        worker_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A job's progress was updated while `processing`.
    JobProgress {
        job_id: i64,
        progress: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A job reached a terminal state.
    JobFinished {
        job_id: i64,
        status: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// A clip changed status (pending/processing/ready/failed).
    ClipStatusChanged {
        clip_id: Uuid,
        status: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl BackplaneEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BackplaneEvent::JobClaimed { .. } => "JobClaimed",
            BackplaneEvent::JobProgress { .. } => "JobProgress",
            BackplaneEvent::JobFinished { .. } => "JobFinished",
            BackplaneEvent::ClipStatusChanged { .. } => "ClipStatusChanged",
        }
    }
}

/// Shared broadcast bus for SSE fan-out. Cloning is cheap (it shares the sender).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BackplaneEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Errors (no subscribers) are not a failure condition.
    pub fn publish(&self, event: BackplaneEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackplaneEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(BackplaneEvent::JobProgress {
            job_id: 1,
            progress: 50,
            timestamp: chrono::Utc::now(),
        });
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(BackplaneEvent::JobClaimed {
            job_id: 7,
            job_type: "waveform".to_string(),
            worker_id: "worker-1".to_string(),
            timestamp: chrono::Utc::now(),
        });
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.event_type(), "JobClaimed");
    }
}
