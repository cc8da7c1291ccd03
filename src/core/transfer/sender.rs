//! Sender half: stop-and-wait transmission with bounded retransmits.

use super::{OutgoingFile, TransferEngine, chunk_count, chunk_percentage};
use crate::core::error::TransferError;
use crate::core::events::{SessionEvent, notify_app};
use crate::core::protocol::{FileId, WireMessage};
use crate::utils::sos::SignalOfStop;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// State of one outbound transfer.
pub(super) struct OutboundTransfer {
    /// The single segment currently waiting for its ack.
    awaiting: Option<(u32, oneshot::Sender<()>)>,
    pub(super) stop: SignalOfStop,
}

impl TransferEngine {
    /// Send a whole file and wait for every chunk to be acknowledged.
    ///
    /// Transfers with different ids run concurrently; one id may only be in
    /// flight once.
    pub async fn send_file(&self, file: OutgoingFile) -> Result<(), TransferError> {
        let stop = SignalOfStop::new();
        {
            let mut map = self.outbound.write().await;
            if map.contains_key(&file.id) {
                return Err(TransferError::DuplicateTransfer(file.id));
            }
            map.insert(
                file.id.clone(),
                OutboundTransfer {
                    awaiting: None,
                    stop: stop.clone(),
                },
            );
        }

        let result = self.transmit(&file, &stop).await;
        {
            // The id may already belong to a newer transfer if this one was cancelled.
            let mut map = self.outbound.write().await;
            if map.get(&file.id).is_some_and(|t| t.stop.same_as(&stop)) {
                map.remove(&file.id);
            }
        }

        match &result {
            Ok(()) => {
                info!(
                    event = "file_send_complete",
                    file_id = %file.id,
                    filename = %file.name,
                    bytes = file.data.len(),
                );
                notify_app(
                    &self.app_tx,
                    SessionEvent::SendComplete {
                        file_id: file.id.clone(),
                        name: file.name.clone(),
                    },
                );
            }
            Err(e) => {
                warn!(event = "file_send_failed", file_id = %file.id, error = %e);
                notify_app(
                    &self.app_tx,
                    SessionEvent::TransferFailed {
                        file_id: file.id.clone(),
                        reason: e.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn transmit(&self, file: &OutgoingFile, stop: &SignalOfStop) -> Result<(), TransferError> {
        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = chunk_count(file.data.len(), chunk_size);

        self.outbox
            .send(&WireMessage::FileStart {
                id: file.id.clone(),
                name: file.name.clone(),
                size: file.data.len() as u64,
            })
            .await?;

        info!(
            event = "file_send_start",
            file_id = %file.id,
            filename = %file.name,
            bytes = file.data.len(),
            total_chunks,
        );

        for (index, window) in file.data.chunks(chunk_size).enumerate() {
            let segment = index as u32;
            let chunk = WireMessage::Chunk {
                file_id: file.id.clone(),
                chunk: window.to_vec(),
                percentage: chunk_percentage(segment, total_chunks),
                segment,
            };
            self.send_until_acked(&file.id, segment, &chunk, stop).await?;

            notify_app(
                &self.app_tx,
                SessionEvent::SendProgress {
                    file_id: file.id.clone(),
                    name: file.name.clone(),
                    sent_chunks: segment + 1,
                    total_chunks,
                },
            );
        }

        if stop.cancelled() {
            return Err(TransferError::Cancelled(file.id.clone()));
        }
        self.outbox
            .send(&WireMessage::FileEnd {
                file_id: file.id.clone(),
                filename: file.name.clone(),
            })
            .await
    }

    async fn send_until_acked(
        &self,
        file_id: &FileId,
        segment: u32,
        chunk: &WireMessage,
        stop: &SignalOfStop,
    ) -> Result<(), TransferError> {
        let mut retransmits = 0;
        loop {
            // Arm before sending so a fast ack cannot be missed.
            let ack = self.arm_ack_slot(file_id, segment).await?;
            self.outbox.send(chunk).await?;

            match stop.select(timeout(self.config.ack_timeout, ack)).await {
                None | Some(Ok(Err(_))) => return Err(TransferError::Cancelled(file_id.clone())),
                Some(Ok(Ok(()))) => return Ok(()),
                Some(Err(_)) if retransmits >= self.config.max_retransmits => {
                    return Err(TransferError::Stalled {
                        file_id: file_id.clone(),
                        segment,
                    });
                }
                Some(Err(_)) => {
                    retransmits += 1;
                    warn!(
                        event = "chunk_ack_timeout",
                        file_id = %file_id,
                        segment,
                        retransmits,
                        "Retransmitting unacknowledged chunk"
                    );
                }
            }
        }
    }

    async fn arm_ack_slot(
        &self,
        file_id: &FileId,
        segment: u32,
    ) -> Result<oneshot::Receiver<()>, TransferError> {
        let (tx, rx) = oneshot::channel();
        let mut map = self.outbound.write().await;
        let transfer = map
            .get_mut(file_id)
            .ok_or_else(|| TransferError::Cancelled(file_id.clone()))?;
        transfer.awaiting = Some((segment, tx));
        Ok(rx)
    }

    /// Fulfil the awaiting slot if `segment` is the one in flight.
    /// Stale, duplicate and unknown acks are ignored.
    pub async fn handle_ack(&self, file_id: &FileId, segment: u32) {
        let mut map = self.outbound.write().await;
        let Some(transfer) = map.get_mut(file_id) else {
            debug!(event = "ack_unknown_transfer", file_id = %file_id, segment);
            return;
        };
        match transfer.awaiting.take() {
            Some((awaited, tx)) if awaited == segment => {
                let _ = tx.send(());
            }
            other => {
                debug!(event = "ack_ignored", file_id = %file_id, segment);
                transfer.awaiting = other;
            }
        }
    }

    /// Stop an outbound transfer. Returns `false` if it was not in flight.
    pub async fn cancel_outbound(&self, file_id: &FileId) -> bool {
        match self.outbound.write().await.remove(file_id) {
            Some(transfer) => {
                transfer.stop.cancel();
                info!(event = "file_send_cancelled", file_id = %file_id);
                true
            }
            None => false,
        }
    }

    pub async fn outbound_ids(&self) -> Vec<FileId> {
        self.outbound.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::link::Outbox;
    use crate::core::protocol::decode;
    use crate::core::transfer::TransferConfig;
    use crate::core::transport::loopback::RecordingChannel;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn engine(config: TransferConfig) -> (Arc<TransferEngine>, mpsc::UnboundedReceiver<String>) {
        let (channel, sent) = RecordingChannel::new();
        let outbox = Arc::new(Outbox::new());
        outbox.attach(channel).await;
        (Arc::new(TransferEngine::new(outbox, config, None)), sent)
    }

    async fn next_frame(sent: &mut mpsc::UnboundedReceiver<String>) -> WireMessage {
        let text = tokio::time::timeout(Duration::from_secs(2), sent.recv())
            .await
            .expect("frame in time")
            .expect("channel open");
        decode(&text).unwrap().unwrap()
    }

    async fn assert_quiet(sent: &mut mpsc::UnboundedReceiver<String>) {
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sent.try_recv().is_err(), "sender must wait for the ack");
    }

    #[tokio::test]
    async fn forty_thousand_bytes_in_three_acked_chunks() {
        let (engine, mut sent) = engine(TransferConfig::default()).await;
        let file = OutgoingFile::new("data.bin", vec![7u8; 40_000]);
        let id = file.id.clone();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_file(file).await })
        };

        match next_frame(&mut sent).await {
            WireMessage::FileStart { id: got, name, size } => {
                assert_eq!(got, id);
                assert_eq!(name, "data.bin");
                assert_eq!(size, 40_000);
            }
            other => panic!("expected file-start, got {other:?}"),
        }

        let expected = [(16384usize, 0u32), (16384, 33), (7232, 66)];
        for (segment, (len, pct)) in expected.into_iter().enumerate() {
            match next_frame(&mut sent).await {
                WireMessage::Chunk {
                    chunk,
                    percentage,
                    segment: got,
                    ..
                } => {
                    assert_eq!(got, segment as u32);
                    assert_eq!(chunk.len(), len);
                    assert_eq!(percentage, pct);
                }
                other => panic!("expected chunk, got {other:?}"),
            }
            assert_quiet(&mut sent).await;
            engine.handle_ack(&id, segment as u32).await;
        }

        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::FileEnd { .. }
        ));
        task.await.unwrap().unwrap();
        assert!(engine.outbound_ids().await.is_empty());
    }

    #[tokio::test]
    async fn zero_byte_file_sends_start_then_end() {
        let (engine, mut sent) = engine(TransferConfig::default()).await;
        engine
            .send_file(OutgoingFile::new("empty", Vec::new()))
            .await
            .unwrap();
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::FileStart { size: 0, .. }
        ));
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::FileEnd { .. }
        ));
    }

    #[tokio::test]
    async fn duplicate_and_stale_acks_have_no_effect() {
        let config = TransferConfig {
            chunk_size: 4,
            ..Default::default()
        };
        let (engine, mut sent) = engine(config).await;
        let file = OutgoingFile::new("f", b"abcdefgh".to_vec());
        let id = file.id.clone();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_file(file).await })
        };

        next_frame(&mut sent).await;
        next_frame(&mut sent).await;
        engine.handle_ack(&id, 0).await;
        engine.handle_ack(&id, 0).await;
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::Chunk { segment: 1, .. }
        ));
        // A late duplicate of ack 0 must not release segment 1.
        engine.handle_ack(&id, 0).await;
        assert_quiet(&mut sent).await;

        engine.handle_ack(&id, 1).await;
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::FileEnd { .. }
        ));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_ack_retransmits_then_stalls() {
        let config = TransferConfig {
            chunk_size: 4,
            ack_timeout: Duration::from_millis(20),
            max_retransmits: 2,
        };
        let (engine, mut sent) = engine(config).await;
        let file = OutgoingFile::new("f", b"abc".to_vec());
        let id = file.id.clone();

        let err = engine.send_file(file).await.unwrap_err();
        assert!(matches!(err, TransferError::Stalled { segment: 0, .. }));

        let mut chunks = 0;
        while let Ok(text) = sent.try_recv() {
            if let Some(WireMessage::Chunk { segment, .. }) = decode(&text).unwrap() {
                assert_eq!(segment, 0);
                chunks += 1;
            }
        }
        assert_eq!(chunks, 3);
        assert!(!engine.outbound_ids().await.contains(&id));
    }

    #[tokio::test]
    async fn retransmitted_chunk_completes_when_acked() {
        let config = TransferConfig {
            chunk_size: 4,
            ack_timeout: Duration::from_millis(20),
            max_retransmits: 5,
        };
        let (engine, mut sent) = engine(config).await;
        let file = OutgoingFile::new("f", b"abc".to_vec());
        let id = file.id.clone();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_file(file).await })
        };

        next_frame(&mut sent).await;
        next_frame(&mut sent).await;
        // First copy "lost": wait for the retransmission, then ack it.
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::Chunk { segment: 0, .. }
        ));
        engine.handle_ack(&id, 0).await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_and_duplicate_ids() {
        let (engine, mut sent) = engine(TransferConfig::default()).await;
        let file = OutgoingFile::new("f", vec![1u8; 10]);
        let id = file.id.clone();
        let task = {
            let engine = engine.clone();
            let file = file.clone();
            tokio::spawn(async move { engine.send_file(file).await })
        };
        next_frame(&mut sent).await;
        next_frame(&mut sent).await;

        let dup = engine.send_file(file).await.unwrap_err();
        assert!(matches!(dup, TransferError::DuplicateTransfer(_)));

        assert!(engine.cancel_outbound(&id).await);
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::Cancelled(_)));
        assert!(!engine.cancel_outbound(&id).await);
    }

    #[tokio::test]
    async fn cancelled_send_does_not_evict_a_restart_with_the_same_id() {
        let (engine, mut sent) = engine(TransferConfig::default()).await;
        let file = OutgoingFile::new("f", vec![1u8; 10]);
        let id = file.id.clone();
        let first = {
            let engine = engine.clone();
            let file = file.clone();
            tokio::spawn(async move { engine.send_file(file).await })
        };
        next_frame(&mut sent).await;
        next_frame(&mut sent).await;
        assert!(engine.cancel_outbound(&id).await);

        // Start the replacement before the cancelled task gets to run again.
        let second = engine.send_file(file);
        tokio::pin!(second);
        tokio::select! {
            biased;
            res = &mut second => panic!("restart finished without an ack: {res:?}"),
            frame = next_frame(&mut sent) => {
                assert!(matches!(frame, WireMessage::FileStart { .. }));
            }
        }

        let err = first.await.unwrap().unwrap_err();
        assert!(matches!(err, TransferError::Cancelled(_)));
        assert_eq!(engine.outbound_ids().await, vec![id.clone()]);

        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::Chunk { segment: 0, .. }
        ));
        engine.handle_ack(&id, 0).await;
        second.await.unwrap();
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::FileEnd { .. }
        ));
    }

    #[tokio::test]
    async fn transfers_with_different_ids_are_acked_independently() {
        let config = TransferConfig {
            chunk_size: 4,
            ..Default::default()
        };
        let (engine, mut sent) = engine(config).await;
        let a = OutgoingFile::new("a", b"aaaaAAAA".to_vec());
        let b = OutgoingFile::new("b", b"bbbbBBBB".to_vec());
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        let spawn_send = |file: OutgoingFile| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.send_file(file).await })
        };

        let task_a = spawn_send(a);
        assert!(matches!(next_frame(&mut sent).await, WireMessage::FileStart { .. }));
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::Chunk { segment: 0, .. }
        ));
        let task_b = spawn_send(b);
        assert!(matches!(next_frame(&mut sent).await, WireMessage::FileStart { .. }));
        assert!(matches!(
            next_frame(&mut sent).await,
            WireMessage::Chunk { segment: 0, .. }
        ));

        // Acking A releases only A's next segment; B keeps waiting.
        engine.handle_ack(&a_id, 0).await;
        match next_frame(&mut sent).await {
            WireMessage::Chunk { file_id, segment, .. } => {
                assert_eq!((file_id, segment), (a_id.clone(), 1));
            }
            other => panic!("expected A's second chunk, got {other:?}"),
        }
        assert_quiet(&mut sent).await;

        // An ack for B does not complete A.
        engine.handle_ack(&b_id, 0).await;
        match next_frame(&mut sent).await {
            WireMessage::Chunk { file_id, segment, .. } => {
                assert_eq!((file_id, segment), (b_id.clone(), 1));
            }
            other => panic!("expected B's second chunk, got {other:?}"),
        }
        assert_quiet(&mut sent).await;

        engine.handle_ack(&a_id, 1).await;
        match next_frame(&mut sent).await {
            WireMessage::FileEnd { file_id, .. } => assert_eq!(file_id, a_id),
            other => panic!("expected A's file-end, got {other:?}"),
        }
        engine.handle_ack(&b_id, 1).await;
        match next_frame(&mut sent).await {
            WireMessage::FileEnd { file_id, .. } => assert_eq!(file_id, b_id),
            other => panic!("expected B's file-end, got {other:?}"),
        }
        task_a.await.unwrap().unwrap();
        task_b.await.unwrap().unwrap();
    }
}
