//! Ranging producer: polls the most recent depth capture

use super::samples::{DepthMap, Sample};
use super::Delivery;
use async_trait::async_trait;
use sensorlink_core_interface::{Producer, ProducerError, Reading, ReadingCallback, ReadingKind};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Default poll interval (50 Hz)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Producer that re-delivers the latest captured depth map at a fixed rate
///
/// The depth pipeline calls [`capture`](Self::capture) whenever a frame
/// arrives; the map is serialized at capture time. Polling begins one
/// interval after `start`. While nothing has been captured each poll
/// delivers `NoData`.
pub struct RangingProducer {
    latest: watch::Sender<Option<Reading>>,
    interval: Duration,
    running: Mutex<Option<Delivery>>,
}

impl RangingProducer {
    pub fn new(interval: Duration) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest,
            interval: interval.max(Duration::from_millis(1)),
            running: Mutex::new(None),
        }
    }

    /// Store a depth map as the latest capture
    pub fn capture(&self, map: &DepthMap) -> Result<(), ProducerError> {
        let reading = map.to_reading()?;
        self.latest.send_replace(Some(reading));
        Ok(())
    }

    /// Forget the latest capture
    pub fn clear(&self) {
        self.latest.send_replace(None);
    }

    pub fn latest(&self) -> Option<Reading> {
        self.latest.borrow().clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Default for RangingProducer {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[async_trait]
impl Producer for RangingProducer {
    fn kind(&self) -> ReadingKind {
        ReadingKind::Ranging
    }

    async fn start(&self, on_reading: ReadingCallback) -> Result<(), ProducerError> {
        let latest = self.latest.subscribe();
        let interval = self.interval;

        let delivery = Delivery::spawn(move |gate| async move {
            // First poll one interval after start
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let result = latest
                    .borrow()
                    .clone()
                    .ok_or(ProducerError::NoData(ReadingKind::Ranging));
                if !gate.deliver(&on_reading, result) {
                    break;
                }
            }
        });

        let previous = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(delivery);
        if let Some(previous) = previous {
            previous.halt();
        }

        debug!(interval_ms = interval.as_millis() as u64, "Ranging producer started");
        Ok(())
    }

    async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(delivery) = running {
            delivery.halt();
            debug!("Ranging producer stopped");
        }
    }
}

impl Drop for RangingProducer {
    fn drop(&mut self) {
        if let Some(delivery) = self
            .running
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            delivery.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn collector() -> (
        ReadingCallback,
        mpsc::UnboundedReceiver<Result<Reading, ProducerError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ReadingCallback = Arc::new(move |result| {
            let _ = tx.send(result);
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn test_no_capture_delivers_no_data() {
        let producer = RangingProducer::default();
        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.unwrap_err(), ProducerError::NoData(ReadingKind::Ranging));
        producer.stop().await;
    }

    #[tokio::test]
    async fn test_latest_capture_is_redelivered() {
        let producer = RangingProducer::new(Duration::from_millis(5));
        producer.capture(&DepthMap::zeros(2, 2).unwrap()).unwrap();

        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();

        for _ in 0..3 {
            let reading = rx.recv().await.unwrap().unwrap();
            assert_eq!(reading.payload().as_ref(), &[0u8; 16]);
        }
        producer.stop().await;
    }

    #[tokio::test]
    async fn test_capture_during_first_interval_is_relayed() {
        let producer = RangingProducer::new(Duration::from_millis(200));
        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();
        producer.capture(&DepthMap::zeros(2, 1).unwrap()).unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 8);
        producer.stop().await;
    }

    #[tokio::test]
    async fn test_capture_replaces_previous() {
        let producer = RangingProducer::default();
        producer.capture(&DepthMap::zeros(1, 1).unwrap()).unwrap();
        producer
            .capture(&DepthMap::new(1, 2, vec![1.0, 2.0]).unwrap())
            .unwrap();

        assert_eq!(producer.latest().unwrap().len(), 8);
        producer.clear();
        assert!(producer.latest().is_none());
    }

    #[tokio::test]
    async fn test_stop_silences_delivery() {
        let producer = RangingProducer::new(Duration::from_millis(1));
        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();
        assert!(producer.is_running());
        rx.recv().await.unwrap().unwrap_err();

        producer.stop().await;
        assert!(!producer.is_running());

        // Drain anything queued before stop, then expect the channel to close
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {}
        assert!(!matches!(
            tokio::time::timeout(Duration::from_millis(20), rx.recv()).await,
            Ok(Some(_))
        ));
    }
}
