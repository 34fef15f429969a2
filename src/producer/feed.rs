//! Push-driven producers
//!
//! Platform sensor callbacks push samples into a [`SampleFeed`]; every started
//! [`FeedProducer`] subscription serializes and forwards them.

use super::samples::{ImageFrame, LocationFix, MotionSample, Sample};
use super::Delivery;
use async_trait::async_trait;
use sensorlink_core_interface::{Producer, ProducerError, ReadingCallback, ReadingKind};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Authorization state of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Granted,
    /// User refused access
    Denied,
    /// Blocked by policy (parental controls, MDM)
    Restricted,
    /// No such sensor on this device
    Unavailable,
}

impl Access {
    fn check(&self, kind: ReadingKind) -> Result<(), ProducerError> {
        match self {
            Access::Granted => Ok(()),
            Access::Denied | Access::Restricted => Err(ProducerError::AuthorizationDenied(kind)),
            Access::Unavailable => Err(ProducerError::Unavailable(kind)),
        }
    }
}

type FeedItem<S> = Result<S, ProducerError>;

/// Sending half used by the sensor integration
#[derive(Debug)]
pub struct SampleFeed<S> {
    tx: broadcast::Sender<FeedItem<S>>,
}

impl<S> Clone for SampleFeed<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Sample> SampleFeed<S> {
    /// Push a sample. Returns the number of running subscriptions that will see it.
    pub fn push(&self, sample: S) -> usize {
        self.tx.send(Ok(sample)).unwrap_or(0)
    }

    /// Report a sensor failure to running subscriptions
    pub fn fail(&self, error: ProducerError) -> usize {
        self.tx.send(Err(error)).unwrap_or(0)
    }
}

/// Producer over a [`SampleFeed`]
///
/// Samples pushed while the producer is stopped are dropped. Setting the
/// access gate to denied or restricted while running delivers
/// `AuthorizationDenied` to the running subscription.
///
/// The callback runs on the delivery task; it must not call `stop` on the same
/// producer.
pub struct FeedProducer<S: Sample> {
    tx: broadcast::Sender<FeedItem<S>>,
    access: Mutex<Access>,
    running: Mutex<Option<Delivery>>,
}

/// Location producer (pretty JSON `{latitude, longitude}`)
pub type LocationProducer = FeedProducer<LocationFix>;

/// Motion producer (pretty JSON `{acceleration, gyroscope}`)
pub type MotionProducer = FeedProducer<MotionSample>;

/// Camera producer (JPEG bytes)
pub type ImageryProducer = FeedProducer<ImageFrame>;

impl<S: Sample> FeedProducer<S> {
    /// Create a producer and its feed. `capacity` bounds how far a slow
    /// subscription may fall behind before samples are skipped.
    pub fn new(capacity: usize) -> (Self, SampleFeed<S>) {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let feed = SampleFeed { tx: tx.clone() };
        (
            Self {
                tx,
                access: Mutex::new(Access::Granted),
                running: Mutex::new(None),
            },
            feed,
        )
    }

    pub fn feed(&self) -> SampleFeed<S> {
        SampleFeed {
            tx: self.tx.clone(),
        }
    }

    pub fn access(&self) -> Access {
        *self.access.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_access(&self, access: Access) {
        let previous = std::mem::replace(
            &mut *self.access.lock().unwrap_or_else(|e| e.into_inner()),
            access,
        );
        if previous == access {
            return;
        }
        debug!(kind = %S::KIND, ?previous, current = ?access, "Sensor access changed");

        if let Err(e) = access.check(S::KIND) {
            if self.is_running() {
                let _ = self.tx.send(Err(e));
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

#[async_trait]
impl<S: Sample> Producer for FeedProducer<S> {
    fn kind(&self) -> ReadingKind {
        S::KIND
    }

    async fn start(&self, on_reading: ReadingCallback) -> Result<(), ProducerError> {
        self.access().check(S::KIND)?;

        let rx = self.tx.subscribe();
        let delivery = Delivery::spawn(move |gate| async move {
            let mut rx = rx;
            loop {
                let item = match rx.recv().await {
                    Ok(item) => item,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(kind = %S::KIND, skipped, "Subscription lagging, samples skipped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let result = item.and_then(|sample| sample.to_reading());
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

        debug!(kind = %S::KIND, "Producer started");
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
            debug!(kind = %S::KIND, "Producer stopped");
        }
    }
}

impl<S: Sample> Drop for FeedProducer<S> {
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

/// Shared handle form used when wiring producers into an orchestrator
pub fn shared<S: Sample>(capacity: usize) -> (Arc<FeedProducer<S>>, SampleFeed<S>) {
    let (producer, feed) = FeedProducer::new(capacity);
    (Arc::new(producer), feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_core_interface::Reading;
    use std::time::Duration;
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
    async fn test_pushed_sample_is_delivered() {
        let (producer, feed) = LocationProducer::new(8);
        let (callback, mut rx) = collector();

        producer.start(callback).await.unwrap();
        assert_eq!(feed.push(LocationFix::new(1.0, 2.0)), 1);

        let reading = rx.recv().await.unwrap().unwrap();
        assert_eq!(reading.kind(), ReadingKind::Location);
        producer.stop().await;
    }

    #[tokio::test]
    async fn test_samples_before_start_are_dropped() {
        let (producer, feed) = MotionProducer::new(8);
        assert_eq!(feed.push(MotionSample::default()), 0);

        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();
        feed.push(MotionSample::new([1.0, 0.0, 0.0], [0.0, 0.0, 0.0]));

        let reading = rx.recv().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(reading.payload()).unwrap();
        assert_eq!(value["acceleration"]["x"], 1.0);
    }

    #[tokio::test]
    async fn test_denied_access_fails_start() {
        let (producer, _feed) = LocationProducer::new(8);
        producer.set_access(Access::Denied);
        let (callback, _rx) = collector();

        let err = producer.start(callback).await.unwrap_err();
        assert_eq!(err, ProducerError::AuthorizationDenied(ReadingKind::Location));
        assert!(!producer.is_running());
    }

    #[tokio::test]
    async fn test_unavailable_sensor() {
        let (producer, _feed) = ImageryProducer::new(8);
        producer.set_access(Access::Unavailable);
        let (callback, _rx) = collector();

        let err = producer.start(callback).await.unwrap_err();
        assert_eq!(err, ProducerError::Unavailable(ReadingKind::Imagery));
    }

    #[tokio::test]
    async fn test_revoking_access_while_running_delivers_denial() {
        let (producer, _feed) = LocationProducer::new(8);
        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();

        producer.set_access(Access::Restricted);

        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err, ProducerError::AuthorizationDenied(ReadingKind::Location));
    }

    #[tokio::test]
    async fn test_no_delivery_after_stop() {
        let (producer, feed) = MotionProducer::new(8);
        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();
        producer.stop().await;
        producer.stop().await;

        feed.push(MotionSample::default());
        let late = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        // Either the channel closed (task dropped its callback) or nothing arrived
        assert!(!matches!(late, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_restart_replaces_subscription() {
        let (producer, feed) = MotionProducer::new(8);
        let (first, mut first_rx) = collector();
        let (second, mut second_rx) = collector();

        producer.start(first).await.unwrap();
        producer.start(second).await.unwrap();
        feed.push(MotionSample::default());

        assert!(second_rx.recv().await.unwrap().is_ok());
        let stale = tokio::time::timeout(Duration::from_millis(50), first_rx.recv()).await;
        assert!(!matches!(stale, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_feed_failure_is_forwarded() {
        let (producer, feed) = shared::<LocationFix>(4);
        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();

        feed.fail(ProducerError::Other("gps reset".to_string()));
        assert_eq!(
            rx.recv().await.unwrap().unwrap_err(),
            ProducerError::Other("gps reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalid_sample_reported_as_error() {
        let (producer, feed) = LocationProducer::new(4);
        let (callback, mut rx) = collector();
        producer.start(callback).await.unwrap();

        feed.push(LocationFix::new(500.0, 0.0));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(ProducerError::InvalidData(_))
        ));
    }
}
