// SPDX-License-Identifier: MIT

//! Per-connection outbound queue: a bounded channel of reference-counted
//! byte buffers. `broadcast` builds one `Arc<[u8]>` and clones the
//! reference into every recipient's queue rather than copying the bytes
//! per-connection. A full queue marks the connection closing rather than
//! blocking the sender.

use std::sync::Arc;

use tokio::sync::mpsc;

/// Default cap on a connection's outbound queue.
pub const OUTBOUND_QUEUE_CAP: usize = 4096;

#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Arc<[u8]>>,
}

pub struct OutboundReceiver {
    rx: mpsc::Receiver<Arc<[u8]>>,
}

/// Create a bounded outbound channel pair for one connection.
pub fn channel(cap: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(cap.max(1));
    (OutboundSender { tx }, OutboundReceiver { rx })
}

impl OutboundSender {
    /// Enqueue a buffer. Returns `false` if the queue is full (caller must
    /// mark the connection closing).
    pub fn push(&self, buf: Arc<[u8]>) -> bool {
        self.tx.try_send(buf).is_ok()
    }

    pub fn push_owned(&self, bytes: Vec<u8>) -> bool {
        self.push(Arc::from(bytes.into_boxed_slice()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<Arc<[u8]>> {
        self.rx.recv().await
    }

    /// Drain every buffer currently queued without waiting for more, for
    /// synchronous drain-on-teardown when `drain` is set.
    pub fn drain_ready(&mut self) -> Vec<Arc<[u8]>> {
        let mut out = Vec::new();
        while let Ok(buf) = self.rx.try_recv() {
            out.push(buf);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_recv_round_trips() {
        let (tx, mut rx) = channel(4);
        assert!(tx.push_owned(b"hello".to_vec()));
        let got = rx.recv().await.unwrap();
        assert_eq!(&*got, b"hello");
    }

    #[tokio::test]
    async fn full_queue_rejects_further_pushes() {
        let (tx, _rx) = channel(1);
        assert!(tx.push_owned(b"a".to_vec()));
        assert!(!tx.push_owned(b"b".to_vec()));
    }

    #[tokio::test]
    async fn broadcast_clones_the_same_allocation() {
        let (tx1, mut rx1) = channel(4);
        let (tx2, mut rx2) = channel(4);
        let shared: Arc<[u8]> = Arc::from(b"broadcast".to_vec().into_boxed_slice());
        tx1.push(Arc::clone(&shared));
        tx2.push(Arc::clone(&shared));

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &shared));
        assert!(Arc::ptr_eq(&b, &shared));
    }
}
