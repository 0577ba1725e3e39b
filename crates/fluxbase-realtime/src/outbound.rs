//! Per-connection outbound buffer with drop-oldest backpressure.
//!
//! A slow WebSocket peer must never stall the fan-out path: `send`
//! always returns immediately, evicting the oldest broadcast frame when
//! the buffer is full. Control frames (acks, errors, pongs) are only
//! evicted when no broadcast frame is left to drop.

use fluxbase_core::protocol::ServerFrame;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

struct Shared {
    queue: Mutex<VecDeque<ServerFrame>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// Sender half, held by the registry.
#[derive(Clone)]
pub struct Outbound {
    shared: Arc<Shared>,
}

/// Receiver half, held by the connection's writer task.
pub struct OutboundReceiver {
    shared: Arc<Shared>,
}

pub fn channel(capacity: usize) -> (Outbound, OutboundReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        notify: Notify::new(),
        capacity: capacity.max(1),
        closed: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
    });
    (
        Outbound {
            shared: Arc::clone(&shared),
        },
        OutboundReceiver { shared },
    )
}

impl Outbound {
    /// Enqueue a frame, evicting the oldest broadcast frame if the
    /// buffer is full. Never blocks.
    pub fn send(&self, frame: ServerFrame) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock().expect("outbound lock poisoned");
            if queue.len() >= self.shared.capacity {
                let evict_at = queue
                    .iter()
                    .position(|f| matches!(f, ServerFrame::Broadcast { .. }))
                    .unwrap_or(0);
                queue.remove(evict_at);
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    tracing::warn!(dropped, "slow websocket peer; dropping oldest frames");
                }
            }
            queue.push_back(frame);
        }
        self.shared.notify.notify_one();
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl OutboundReceiver {
    /// Next frame, or `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        loop {
            {
                let mut queue = self.shared.queue.lock().expect("outbound lock poisoned");
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broadcast(n: i64) -> ServerFrame {
        ServerFrame::Broadcast {
            channel: "broadcast:test".into(),
            payload: json!(n),
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut rx) = channel(8);
        tx.send(broadcast(1));
        tx.send(broadcast(2));
        assert_eq!(rx.recv().await, Some(broadcast(1)));
        assert_eq!(rx.recv().await, Some(broadcast(2)));
    }

    #[tokio::test]
    async fn full_buffer_drops_oldest_broadcast() {
        let (tx, mut rx) = channel(2);
        tx.send(broadcast(1));
        tx.send(broadcast(2));
        tx.send(broadcast(3));
        assert_eq!(tx.dropped_frames(), 1);
        assert_eq!(rx.recv().await, Some(broadcast(2)));
        assert_eq!(rx.recv().await, Some(broadcast(3)));
    }

    #[tokio::test]
    async fn control_frames_survive_broadcast_pressure() {
        let (tx, mut rx) = channel(2);
        tx.send(ServerFrame::ack("table:public.todos"));
        tx.send(broadcast(1));
        tx.send(broadcast(2));
        // The broadcast was evicted, not the ack.
        assert_eq!(rx.recv().await, Some(ServerFrame::ack("table:public.todos")));
        assert_eq!(rx.recv().await, Some(broadcast(2)));
    }

    #[tokio::test]
    async fn close_ends_the_stream_after_drain() {
        let (tx, mut rx) = channel(4);
        tx.send(broadcast(1));
        tx.close();
        assert_eq!(rx.recv().await, Some(broadcast(1)));
        assert_eq!(rx.recv().await, None);
    }
}
