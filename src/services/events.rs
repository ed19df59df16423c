//! Event system for reputation operations
//!
//! Broadcast bus notifying listeners about votes, score updates and index
//! maintenance. Advisory only: events drive audit logging and UI refresh,
//! never correctness - a lagged subscriber just misses events.

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Which calculation depth produced a reputation update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationMode {
    Instant,
    Windowed,
    Full,
}

/// Events emitted by the services
#[derive(Debug, Clone)]
pub enum ReputationEvent {
    UserCreated {
        user_id: String,
        handle: String,
    },
    TagCreated {
        tag_id: String,
        handle: String,
    },
    VoteRecorded {
        vote_id: String,
        voter_id: String,
        tag_id: String,
        target_id: String,
        value: i64,
        weight: f64,
    },
    ReputationUpdated {
        user_id: String,
        tag_id: String,
        effective_reputation: f64,
        has_voting_power: bool,
        mode: CalculationMode,
    },
    BootstrapRewardGranted {
        user_id: String,
        tag_id: String,
        reward: f64,
    },
    HandleReindexed {
        entity_id: String,
        old_handle: String,
        new_handle: String,
    },
}

/// Broadcast bus for reputation events
pub struct EventBus {
    sender: broadcast::Sender<ReputationEvent>,
}

impl EventBus {
    /// Create a bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit to all subscribers; send errors (no subscribers) are ignored
    pub fn emit(&self, event: ReputationEvent) {
        trace!(event = ?event, "Emitting reputation event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReputationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that logs every event on the bus. Requires a
/// running tokio runtime; the task ends when the bus is dropped.
pub fn spawn_logging_listener(bus: &EventBus) {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed = missed, "Event log listener lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Log interesting events at debug level
pub fn log_event(event: &ReputationEvent) {
    match event {
        ReputationEvent::VoteRecorded {
            voter_id,
            tag_id,
            target_id,
            value,
            ..
        } => {
            debug!(voter = %voter_id, tag = %tag_id, target = %target_id, value = value, "Vote recorded");
        }
        ReputationEvent::ReputationUpdated {
            user_id,
            tag_id,
            effective_reputation,
            mode,
            ..
        } => {
            debug!(user = %user_id, tag = %tag_id, effective = effective_reputation, mode = ?mode, "Reputation updated");
        }
        ReputationEvent::HandleReindexed {
            entity_id,
            old_handle,
            new_handle,
        } => {
            debug!(entity = %entity_id, old = %old_handle, new = %new_handle, "Handle reindexed");
        }
        _ => {
            trace!(event = ?event, "Reputation event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(ReputationEvent::BootstrapRewardGranted {
            user_id: "u".into(),
            tag_id: "t".into(),
            reward: 5.0,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            ReputationEvent::BootstrapRewardGranted { reward, .. } => assert_eq!(reward, 5.0),
            _ => panic!("wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_logging_listener_subscribes() {
        let bus = EventBus::new();
        spawn_logging_listener(&bus);
        assert_eq!(bus.subscriber_count(), 1);

        // Emitting with only the listener attached must not error
        bus.emit(ReputationEvent::TagCreated {
            tag_id: "t".into(),
            handle: "observed".into(),
        });
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(ReputationEvent::UserCreated {
            user_id: "u".into(),
            handle: "alice".into(),
        });
    }
}
