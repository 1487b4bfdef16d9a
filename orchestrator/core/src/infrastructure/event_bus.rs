// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels for observers
// (log streaming, the CLI, tests). Events are not persisted.

use crate::domain::events::{
    ChainEvent, EscalationEvent, GuardEvent, LessonEvent, LockEvent, PromotionEvent,
};
use crate::domain::execution::ExecutionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Chain(ChainEvent),
    Guard(GuardEvent),
    Lesson(LessonEvent),
    Escalation(EscalationEvent),
    Promotion(PromotionEvent),
    Lock(LockEvent),
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity bounds how many events are buffered before slow receivers lag
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_chain_event(&self, event: ChainEvent) {
        self.publish(DomainEvent::Chain(event));
    }

    pub fn publish_guard_event(&self, event: GuardEvent) {
        self.publish(DomainEvent::Guard(event));
    }

    pub fn publish_lesson_event(&self, event: LessonEvent) {
        self.publish(DomainEvent::Lesson(event));
    }

    pub fn publish_escalation_event(&self, event: EscalationEvent) {
        self.publish(DomainEvent::Escalation(event));
    }

    pub fn publish_promotion_event(&self, event: PromotionEvent) {
        self.publish(DomainEvent::Promotion(event));
    }

    pub fn publish_lock_event(&self, event: LockEvent) {
        self.publish(DomainEvent::Lock(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() errs only when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Chain events for a single execution
    pub fn subscribe_execution(&self, execution_id: ExecutionId) -> ExecutionEventReceiver {
        ExecutionEventReceiver {
            receiver: self.sender.subscribe(),
            execution_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

pub struct ExecutionEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    execution_id: ExecutionId,
}

impl ExecutionEventReceiver {
    /// Next chain event for this execution; other events are skipped
    pub async fn recv(&mut self) -> Result<ChainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Chain(chain_event) = event {
                if chain_event.execution_id() == Some(self.execution_id) {
                    return Ok(chain_event);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_lock_event(LockEvent::Relocked { relocked_at: Utc::now() });

        match receiver.recv().await.unwrap() {
            DomainEvent::Lock(LockEvent::Relocked { .. }) => {}
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execution_event_filtering() {
        let event_bus = EventBus::new(10);
        let execution_id = ExecutionId::new();
        let mut receiver = event_bus.subscribe_execution(execution_id);

        event_bus.publish_chain_event(ChainEvent::ExecutionStarted {
            execution_id: ExecutionId::new(),
            chain_name: "other".to_string(),
            triggered_by: "test".to_string(),
            started_at: Utc::now(),
        });
        event_bus.publish_guard_event(GuardEvent::DegradedMode {
            action: "x".to_string(),
            error: "down".to_string(),
            occurred_at: Utc::now(),
        });
        event_bus.publish_chain_event(ChainEvent::ExecutionCancelled {
            execution_id,
            cancelled_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            ChainEvent::ExecutionCancelled { execution_id: id, .. } => assert_eq!(id, execution_id),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_lock_event(LockEvent::Expired { expired_at: Utc::now() });

        assert!(receiver1.recv().await.is_ok());
        assert!(receiver2.recv().await.is_ok());
    }

    #[test]
    fn test_try_recv_empty() {
        let event_bus = EventBus::new(4);
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }
}
