//! Synthetic sensors for running without device hardware

use super::feed::{self, ImageryProducer, LocationProducer, MotionProducer, SampleFeed};
use super::ranging::RangingProducer;
use super::samples::{DepthMap, ImageFrame, LocationFix, MotionSample, Vector3};
use crate::config::RelayConfig;
use crate::orchestrator::ProducerSet;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const LOCATION_PERIOD: Duration = Duration::from_secs(1);
const MOTION_PERIOD: Duration = Duration::from_millis(20);
const DEPTH_PERIOD: Duration = Duration::from_millis(100);
const IMAGERY_PERIOD: Duration = Duration::from_millis(200);

const DEPTH_WIDTH: usize = 16;
const DEPTH_HEIGHT: usize = 12;

/// Smallest well-formed JPEG envelope (SOI .. EOI) with a marker byte between
static FAKE_JPEG: [u8; 6] = [0xFF, 0xD8, 0xFF, 0xFE, 0xFF, 0xD9];

/// A full set of producers driven by background tasks generating plausible samples
pub struct SimulatedSensors {
    pub location: Arc<LocationProducer>,
    pub motion: Arc<MotionProducer>,
    pub ranging: Arc<RangingProducer>,
    pub imagery: Arc<ImageryProducer>,
    feeders: Vec<JoinHandle<()>>,
}

impl SimulatedSensors {
    /// Start feeding synthetic samples around `origin` (latitude, longitude)
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(config: &RelayConfig, origin: (f64, f64)) -> Self {
        let (location, location_feed) = feed::shared::<LocationFix>(16);
        let (motion, motion_feed) = feed::shared::<MotionSample>(256);
        let (imagery, imagery_feed) = feed::shared::<ImageFrame>(16);
        let ranging = Arc::new(RangingProducer::new(config.ranging_poll_interval()));

        let feeders = vec![
            tokio::spawn(feed_location(location_feed, origin)),
            tokio::spawn(feed_motion(motion_feed)),
            tokio::spawn(feed_depth(Arc::clone(&ranging))),
            tokio::spawn(feed_imagery(imagery_feed)),
        ];

        debug!(
            latitude = origin.0,
            longitude = origin.1,
            "Simulated sensors running"
        );

        Self {
            location,
            motion,
            ranging,
            imagery,
            feeders,
        }
    }

    /// Producers wired for an orchestrator, imagery included
    pub fn producer_set(&self) -> ProducerSet {
        ProducerSet::new(
            self.location.clone(),
            self.motion.clone(),
            self.ranging.clone(),
        )
        .with_imagery(self.imagery.clone())
    }
}

impl Drop for SimulatedSensors {
    fn drop(&mut self) {
        for feeder in &self.feeders {
            feeder.abort();
        }
    }
}

fn jitter(spread: f64) -> f64 {
    rand::rng().random_range(-spread..spread)
}

async fn feed_location(feed: SampleFeed<LocationFix>, origin: (f64, f64)) {
    let mut ticker = tokio::time::interval(LOCATION_PERIOD);
    loop {
        ticker.tick().await;
        let fix = LocationFix::new(
            (origin.0 + jitter(1e-4)).clamp(-90.0, 90.0),
            (origin.1 + jitter(1e-4)).clamp(-180.0, 180.0),
        );
        feed.push(fix);
    }
}

async fn feed_motion(feed: SampleFeed<MotionSample>) {
    let mut ticker = tokio::time::interval(MOTION_PERIOD);
    loop {
        ticker.tick().await;
        let sample = MotionSample {
            acceleration: Vector3::new(jitter(0.05), jitter(0.05), -1.0 + jitter(0.05)),
            gyroscope: Vector3::new(jitter(0.01), jitter(0.01), jitter(0.01)),
        };
        feed.push(sample);
    }
}

async fn feed_depth(ranging: Arc<RangingProducer>) {
    let mut ticker = tokio::time::interval(DEPTH_PERIOD);
    loop {
        ticker.tick().await;
        let depths = (0..DEPTH_WIDTH * DEPTH_HEIGHT)
            .map(|_| (1.5 + jitter(0.25)) as f32)
            .collect();
        let captured = DepthMap::new(DEPTH_WIDTH, DEPTH_HEIGHT, depths)
            .and_then(|map| ranging.capture(&map));
        if let Err(e) = captured {
            warn!("Simulated depth capture failed: {}", e);
        }
    }
}

async fn feed_imagery(feed: SampleFeed<ImageFrame>) {
    let mut ticker = tokio::time::interval(IMAGERY_PERIOD);
    loop {
        ticker.tick().await;
        feed.push(ImageFrame::new(&FAKE_JPEG[..]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_core_interface::{Producer, ReadingCallback, ReadingKind};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_simulated_location_delivers() {
        let sensors = SimulatedSensors::spawn(&RelayConfig::default(), (52.52, 13.40));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback: ReadingCallback = Arc::new(move |result| {
            let _ = tx.send(result);
        });

        sensors.location.start(callback).await.unwrap();
        let reading = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        sensors.location.stop().await;

        let fix: LocationFix = serde_json::from_slice(reading.payload()).unwrap();
        assert!((fix.latitude - 52.52).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_producer_set_includes_imagery() {
        let sensors = SimulatedSensors::spawn(&RelayConfig::default(), (0.0, 0.0));
        let set: ProducerSet = sensors.producer_set();
        assert!(set.get(ReadingKind::Imagery).is_some());
        assert_eq!(
            set.get(ReadingKind::Ranging).map(|p| p.kind()),
            Some(ReadingKind::Ranging)
        );
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            assert!(jitter(0.5).abs() < 0.5);
        }
    }
}
