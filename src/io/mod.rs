// src/io/mod.rs
//
// Transport seams and adapters.
//
// The dispatch engine only sees `Publisher`; the bridge feeds frames from the CAN
// reader and drains the egress queue into a `FrameSink`. SocketCAN is Linux only;
// other platforms get a stub that fails to open.

pub mod mqtt;
pub mod socketcan;

pub use mqtt::{MqttCommand, MqttConfig, MqttPublisher};

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::TransportError;
use crate::rvc::{format_dgn, OutboundFrame, PAYLOAD_LEN};

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Seams
// ============================================================================

/// Publish side of the message bus. Must not block the dispatch loop.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;
}

/// Write side of the CAN bus.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, arbitration_id: u32, data: &[u8; PAYLOAD_LEN]) -> Result<(), TransportError>;
}

// ============================================================================
// Egress queue
// ============================================================================

/// Producer handle for the bounded CAN egress queue. Submission waits at most
/// `timeout` for room, then drops the frame.
#[derive(Clone, Debug)]
pub struct EgressQueue {
    tx: mpsc::Sender<OutboundFrame>,
    timeout: Duration,
}

pub fn egress_channel(
    capacity: usize,
    timeout: Duration,
) -> (EgressQueue, mpsc::Receiver<OutboundFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EgressQueue { tx, timeout }, rx)
}

impl EgressQueue {
    pub async fn submit(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        match self.tx.send_timeout(frame, self.timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(frame)) => Err(TransportError::EgressFull(frame.dgn)),
            Err(SendTimeoutError::Closed(_)) => Err(TransportError::EgressClosed),
        }
    }

    /// Submit every frame in order, logging and dropping the ones that fail.
    pub async fn submit_all(&self, frames: Vec<OutboundFrame>) -> usize {
        let mut sent = 0;
        for frame in frames {
            let dgn = format_dgn(frame.dgn);
            match self.submit(frame).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(dgn = %dgn, error = %e, "dropped outbound frame"),
            }
        }
        sent
    }
}

/// Drain the egress queue into `sink` until every producer is gone.
pub async fn run_egress(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut sink: Box<dyn FrameSink>,
    source_address: u8,
    default_priority: u8,
) {
    while let Some(frame) = rx.recv().await {
        let id = frame.arbitration_id(default_priority, source_address);
        match sink.send(id, &frame.data).await {
            Ok(()) => tracing::debug!(
                id = %format!("{:08X}", id),
                data = %hex::encode_upper(frame.data),
                "sent"
            ),
            Err(e) => tracing::warn!(dgn = %format_dgn(frame.dgn), error = %e, "CAN send failed"),
        }
    }
    tracing::debug!("egress queue closed");
}

// ============================================================================
// Test doubles
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Publisher that records every publish, or rejects them all when failing.
    #[derive(Default)]
    pub struct RecordingPublisher {
        messages: Mutex<Vec<(String, Vec<u8>, bool)>>,
        failing: AtomicBool,
    }

    impl RecordingPublisher {
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::Relaxed);
        }

        pub fn messages(&self) -> Vec<(String, String, bool)> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|(t, p, r)| (t.clone(), String::from_utf8_lossy(p).into_owned(), *r))
                .collect()
        }

        pub fn payloads(&self, topic: &str) -> Vec<String> {
            self.messages()
                .into_iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, p, _)| p)
                .collect()
        }

        pub fn last(&self, topic: &str) -> Option<String> {
            self.payloads(topic).pop()
        }

        pub fn clear(&self) {
            self.messages.lock().unwrap().clear();
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(TransportError::Publish {
                    topic: topic.to_string(),
                    reason: "offline".to_string(),
                });
            }
            self.messages
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec(), retain));
            Ok(())
        }
    }

    /// Frame sink that records arbitration ids and payloads.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub frames: Arc<Mutex<Vec<(u32, [u8; PAYLOAD_LEN])>>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&mut self, arbitration_id: u32, data: &[u8; PAYLOAD_LEN]) -> Result<(), TransportError> {
            self.frames.lock().unwrap().push((arbitration_id, *data));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[tokio::test]
    async fn test_egress_preserves_order_and_builds_ids() {
        let (queue, rx) = egress_channel(8, Duration::from_millis(50));
        let sink = RecordingSink::default();
        let frames = sink.frames.clone();
        let task = tokio::spawn(run_egress(rx, Box::new(sink), 0x82, 6));

        let sent = queue
            .submit_all(vec![
                OutboundFrame::new(0x1FEDB, [1; 8]),
                OutboundFrame::new(0x1FEDB, [2; 8]),
                OutboundFrame::new(0x0EAFF, [3; 8]).with_priority(3),
            ])
            .await;
        assert_eq!(sent, 3);
        drop(queue);
        task.await.unwrap();

        let frames = frames.lock().unwrap().clone();
        assert_eq!(
            frames,
            vec![
                (0x19FEDB82, [1; 8]),
                (0x19FEDB82, [2; 8]),
                (0x0CEAFF82, [3; 8]),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_egress_drops_after_timeout() {
        let (queue, mut rx) = egress_channel(1, Duration::from_millis(20));
        queue.submit(OutboundFrame::new(0x1FEDB, [0; 8])).await.unwrap();
        let err = queue
            .submit(OutboundFrame::new(0x1FEDB, [1; 8]))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::EgressFull(0x1FEDB));
        // The queued frame is untouched.
        assert_eq!(rx.recv().await.unwrap().data, [0; 8]);
    }

    #[tokio::test]
    async fn test_closed_egress() {
        let (queue, rx) = egress_channel(1, Duration::from_millis(20));
        drop(rx);
        let err = queue
            .submit(OutboundFrame::new(0x1FEDB, [0; 8]))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::EgressClosed);
    }
}
