//! Hub Service - drains seat events and broadcasts to sessions
//!
//! Single consumer of the seat-event queue. Producers push while holding
//! the function lock, so queue order is the per-function event order and a
//! single drain task preserves it all the way to every session's buffer.

use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::connection::SessionManager;
use super::messages::SeatEvent;

pub struct HubService {
    manager: Arc<SessionManager>,
    seat_events: Arc<ArrayQueue<SeatEvent>>,
}

impl HubService {
    pub fn new(manager: Arc<SessionManager>, seat_events: Arc<ArrayQueue<SeatEvent>>) -> Self {
        Self {
            manager,
            seat_events,
        }
    }

    /// Drain currently queued events; returns how many were broadcast.
    pub fn drain_once(&self) -> usize {
        let mut count = 0;
        while let Some(event) = self.seat_events.pop() {
            let function = event.function();
            let (message, exclude) = event.to_broadcast();
            self.manager.broadcast(function, &message, exclude);
            count += 1;
            if count >= 1000 {
                break;
            }
        }
        count
    }

    /// Run the broadcast loop forever.
    pub async fn run(self) {
        let mut tick = interval(Duration::from_millis(5));
        tracing::info!("Hub service started - draining seat events");
        loop {
            tick.tick().await;
            self.drain_once();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::SeatCode;
    use crate::realtime::messages::WsMessage;
    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_queue_order_is_broadcast_order() {
        let manager = Arc::new(SessionManager::new());
        let queue = Arc::new(ArrayQueue::new(16));
        let service = HubService::new(manager.clone(), queue.clone());

        let function = Uuid::new_v4();
        let observer = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(16);
        manager.register(function, observer, tx);

        let seat = SeatCode::parse("A7").unwrap();
        queue
            .push(SeatEvent::Held {
                function,
                user: actor,
                seats: vec![seat],
                expires_at: Utc::now(),
            })
            .unwrap();
        queue
            .push(SeatEvent::Released {
                function,
                user: actor,
                seats: vec![seat],
            })
            .unwrap();

        assert_eq!(service.drain_once(), 2);
        assert!(matches!(rx.try_recv().unwrap(), WsMessage::SeatHeld { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            WsMessage::SeatReleased { .. }
        ));
    }

    #[tokio::test]
    async fn test_actor_sessions_are_excluded_from_hold_broadcast() {
        let manager = Arc::new(SessionManager::new());
        let queue = Arc::new(ArrayQueue::new(16));
        let service = HubService::new(manager.clone(), queue.clone());

        let function = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(16);
        manager.register(function, actor, tx);

        queue
            .push(SeatEvent::Held {
                function,
                user: actor,
                seats: vec![SeatCode::parse("A1").unwrap()],
                expires_at: Utc::now(),
            })
            .unwrap();
        service.drain_once();
        // The actor got selection_confirmed directly; no echo of seat_held
        assert!(rx.try_recv().is_err());

        // But sale_confirmed goes to everyone, buyer included
        queue
            .push(SeatEvent::SaleConfirmed {
                function,
                user: actor,
                seats: vec![SeatCode::parse("A1").unwrap()],
                transaction: Uuid::new_v4(),
            })
            .unwrap();
        service.drain_once();
        assert!(matches!(
            rx.try_recv().unwrap(),
            WsMessage::SaleConfirmed { .. }
        ));
    }
}
