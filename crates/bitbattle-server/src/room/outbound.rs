//! Per-socket outbound queue.
//!
//! The room actor pushes frames here and a per-socket writer task drains
//! them, so one slow socket never stalls its siblings. The queue is bounded:
//! on overflow the oldest droppable frame (`code_change`) is evicted first;
//! if a critical frame cannot be queued the socket is marked for
//! force-close instead, because critical frames must never be lost.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use bitbattle_shared::ServerEvent;

#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    capacity: usize,
}

struct Inner {
    frames: VecDeque<ServerEvent>,
    closed: bool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                frames: VecDeque::new(),
                closed: false,
            })),
            notify: Arc::new(Notify::new()),
            capacity: capacity.max(1),
        }
    }

    /// Queue a frame. Returns `false` when the socket is (now) dead: either
    /// it was already closed, or a critical frame overflowed the queue and
    /// the socket must be force-closed.
    pub async fn push(&self, event: ServerEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return false;
        }

        if inner.frames.len() >= self.capacity {
            if let Some(index) = inner.frames.iter().position(|f| !f.is_critical()) {
                inner.frames.remove(index);
            } else if event.is_critical() {
                inner.closed = true;
                drop(inner);
                self.notify.notify_one();
                return false;
            } else {
                // Queue full of critical frames; shedding the incoming
                // code_change is the allowed loss.
                return true;
            }
        }

        inner.frames.push_back(event);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Next frame to write, or `None` once the queue is closed.
    pub async fn pop(&self) -> Option<ServerEvent> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return None;
                }
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_change(n: usize) -> ServerEvent {
        ServerEvent::CodeChange {
            username: "alice".into(),
            code: format!("v{n}"),
            timestamp: n as i64,
        }
    }

    #[tokio::test]
    async fn frames_drain_in_order() {
        let queue = OutboundQueue::new(8);
        assert!(queue.push(code_change(1)).await);
        assert!(queue.push(ServerEvent::GameStart {}).await);

        match queue.pop().await {
            Some(ServerEvent::CodeChange { code, .. }) => assert_eq!(code, "v1"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(queue.pop().await, Some(ServerEvent::GameStart {})));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_code_change_first() {
        let queue = OutboundQueue::new(2);
        assert!(queue.push(code_change(1)).await);
        assert!(queue.push(code_change(2)).await);
        // Full; the critical frame evicts the oldest code_change.
        assert!(queue.push(ServerEvent::GameStart {}).await);

        match queue.pop().await {
            Some(ServerEvent::CodeChange { code, .. }) => assert_eq!(code, "v2"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(queue.pop().await, Some(ServerEvent::GameStart {})));
    }

    #[tokio::test]
    async fn critical_overflow_force_closes() {
        let queue = OutboundQueue::new(1);
        assert!(queue.push(ServerEvent::GameStart {}).await);
        // No droppable frame in the queue: the socket has to go.
        assert!(
            !queue
                .push(ServerEvent::UserLeft {
                    username: "a".into()
                })
                .await
        );
        assert_eq!(queue.pop().await.map(|f| f.to_json()), None);
        // Once closed, further pushes are refused.
        assert!(!queue.push(ServerEvent::GameStart {}).await);
    }

    #[tokio::test]
    async fn incoming_code_change_is_shed_when_only_criticals_queued() {
        let queue = OutboundQueue::new(1);
        assert!(queue.push(ServerEvent::GameStart {}).await);
        // Dropped silently; the socket stays alive.
        assert!(queue.push(code_change(9)).await);
        assert!(matches!(queue.pop().await, Some(ServerEvent::GameStart {})));
    }

    #[tokio::test]
    async fn close_wakes_pending_pop() {
        let queue = OutboundQueue::new(4);
        let waiter = queue.clone();
        let handle = tokio::spawn(async move { waiter.pop().await });
        tokio::task::yield_now().await;
        queue.close().await;
        assert!(handle.await.unwrap().is_none());
    }
}
