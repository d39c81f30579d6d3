//! Per-client connection state shared between the dispatcher and the
//! connection's writer task.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ember_core::ConnectionId;
use tokio::sync::mpsc;

/// A connected WebSocket client.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    /// Outbound queue drained by the writer task.
    tx: mpsc::Sender<Arc<String>>,
    pub connected_at: Instant,
    open: AtomicBool,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, remote_addr: SocketAddr, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            remote_addr,
            tx,
            connected_at: Instant::now(),
            open: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame without waiting.
    ///
    /// Returns `false` if the connection is closed or its queue is full; the
    /// message is dropped and counted.
    pub fn send(&self, message: Arc<String>) -> bool {
        if !self.is_open() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Whether sends can still reach the writer task.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    /// Stop accepting sends. Called when the socket closes.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::connection;
    use super::*;

    #[test]
    fn new_connection_is_open() {
        let (conn, _rx) = connection("c1", 8);
        assert_eq!(conn.id.as_str(), "c1");
        assert!(conn.is_open());
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = connection("c1", 8);
        assert!(conn.send(Arc::new("hello".into())));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.as_str(), "hello");
    }

    #[test]
    fn send_to_dropped_receiver_fails() {
        let (conn, rx) = connection("c2", 8);
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_full_queue_drops() {
        let (conn, _rx) = connection("c3", 1);
        assert!(conn.send(Arc::new("msg1".into())));
        assert!(!conn.send(Arc::new("msg2".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn mark_closed_rejects_sends() {
        let (conn, mut rx) = connection("c4", 8);
        conn.mark_closed();
        assert!(!conn.is_open());
        assert!(!conn.send(Arc::new("late".into())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (conn, mut rx) = connection("c5", 8);
        for i in 0..5 {
            assert!(conn.send(Arc::new(format!("msg_{i}"))));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().as_str(), format!("msg_{i}"));
        }
    }

    #[test]
    fn age_increases() {
        let (conn, _rx) = connection("c6", 1);
        let a = conn.age();
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.age() > a);
    }
}
