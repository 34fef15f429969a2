//! Producer adapters
//!
//! Concrete `Producer` implementations bridging sample sources to the relay:
//!
//! - [`FeedProducer`]: push-driven sensors (location, motion, imagery) fed
//!   through a [`SampleFeed`] and gated by an [`Access`] authorization state
//! - [`RangingProducer`]: re-delivers the most recent captured depth map on a
//!   fixed poll interval
//! - [`SimulatedSensors`]: synthetic feeds for running without hardware

pub mod feed;
pub mod ranging;
pub mod samples;
pub mod simulated;

pub use feed::{Access, FeedProducer, ImageryProducer, LocationProducer, MotionProducer, SampleFeed};
pub use ranging::RangingProducer;
pub use samples::{DepthMap, ImageFrame, LocationFix, MotionSample, Sample, Vector3};
pub use simulated::SimulatedSensors;

use sensorlink_core_interface::{ProducerError, Reading, ReadingCallback};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// A running delivery task plus the flag that silences its callback
///
/// The flag is checked under its lock for every delivery, so once `halt`
/// returns the callback has fired for the last time.
pub(crate) struct Delivery {
    task: JoinHandle<()>,
    alive: Arc<Mutex<bool>>,
}

impl Delivery {
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(DeliveryGate) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let alive = Arc::new(Mutex::new(true));
        let gate = DeliveryGate {
            alive: Arc::clone(&alive),
        };
        Self {
            task: tokio::spawn(run(gate)),
            alive,
        }
    }

    pub(crate) fn halt(self) {
        *self.alive.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.task.abort();
    }
}

/// Task-side half of a [`Delivery`]
pub(crate) struct DeliveryGate {
    alive: Arc<Mutex<bool>>,
}

impl DeliveryGate {
    /// Invoke the callback unless the delivery was halted. Returns false once halted.
    pub(crate) fn deliver(
        &self,
        on_reading: &ReadingCallback,
        result: Result<Reading, ProducerError>,
    ) -> bool {
        let alive = self.alive.lock().unwrap_or_else(|e| e.into_inner());
        if !*alive {
            return false;
        }
        on_reading(result);
        true
    }
}
