//! Test doubles for driving the orchestrator without sensors

use async_trait::async_trait;
use bytes::Bytes;
use sensorlink_core_interface::{
    Producer, ProducerError, Reading, ReadingBroadcaster, ReadingCallback, ReadingKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// What a [`ScriptedProducer`] does when started
#[derive(Debug, Clone)]
pub enum Script {
    /// Deliver one reading with this payload from within `start`
    Emit(Bytes),
    /// Deliver this error through the callback
    Fail(ProducerError),
    /// Return this error from `start`
    Reject(ProducerError),
    /// Start successfully and never deliver
    Hang,
}

/// A producer that follows a fixed script and counts its lifecycle calls
pub struct ScriptedProducer {
    kind: ReadingKind,
    script: Script,
    starts: AtomicUsize,
    stops: AtomicUsize,
    running: Mutex<Option<ReadingCallback>>,
    started: Notify,
}

impl ScriptedProducer {
    pub fn new(kind: ReadingKind, script: Script) -> Self {
        Self {
            kind,
            script,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            running: Mutex::new(None),
            started: Notify::new(),
        }
    }

    pub fn emitting(kind: ReadingKind, payload: &[u8]) -> Self {
        Self::new(kind, Script::Emit(Bytes::copy_from_slice(payload)))
    }

    pub fn failing(kind: ReadingKind, error: ProducerError) -> Self {
        Self::new(kind, Script::Fail(error))
    }

    pub fn rejecting(kind: ReadingKind, error: ProducerError) -> Self {
        Self::new(kind, Script::Reject(error))
    }

    pub fn hanging(kind: ReadingKind) -> Self {
        Self::new(kind, Script::Hang)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Resolve once `start` has been called (immediately if it already was)
    pub async fn wait_started(&self) {
        if self.start_count() > 0 {
            return;
        }
        self.started.notified().await;
    }

    /// Deliver an extra reading to the running subscription. Returns false when stopped.
    pub fn emit(&self, payload: &[u8]) -> bool {
        let callback = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match callback {
            Some(callback) => {
                callback(Reading::new(self.kind, Bytes::copy_from_slice(payload)));
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Producer for ScriptedProducer {
    fn kind(&self) -> ReadingKind {
        self.kind
    }

    async fn start(&self, on_reading: ReadingCallback) -> Result<(), ProducerError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        if let Script::Reject(error) = &self.script {
            return Err(error.clone());
        }
        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = Some(on_reading.clone());

        match &self.script {
            Script::Emit(payload) => on_reading(Reading::new(self.kind, payload.clone())),
            Script::Fail(error) => on_reading(Err(error.clone())),
            Script::Reject(_) | Script::Hang => {}
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Broadcaster that keeps everything published to it
#[derive(Default)]
pub struct RecordingBroadcaster {
    readings: Mutex<Vec<Reading>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn kinds(&self) -> Vec<ReadingKind> {
        self.readings().iter().map(Reading::kind).collect()
    }
}

impl ReadingBroadcaster for RecordingBroadcaster {
    fn publish(&self, reading: &Reading) {
        self.readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reading.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scripted_emit_and_counters() {
        let producer = ScriptedProducer::emitting(ReadingKind::Motion, b"{}");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        let callback: ReadingCallback = Arc::new(move |r| {
            assert!(r.is_ok());
            seen_cb.fetch_add(1, Ordering::SeqCst);
        });

        producer.start(callback).await.unwrap();
        producer.wait_started().await;
        assert!(producer.emit(b"[]"));
        producer.stop().await;
        assert!(!producer.emit(b"[]"));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(producer.start_count(), 1);
        assert_eq!(producer.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_rejecting_producer() {
        let producer = ScriptedProducer::rejecting(
            ReadingKind::Location,
            ProducerError::AuthorizationDenied(ReadingKind::Location),
        );
        let callback: ReadingCallback = Arc::new(|_| panic!("no delivery expected"));
        assert!(producer.start(callback).await.is_err());
        assert!(!producer.is_running());
    }

    #[test]
    fn test_recording_broadcaster() {
        let broadcaster = RecordingBroadcaster::new();
        broadcaster.publish(&Reading::new(ReadingKind::Ranging, &b"\0"[..]).unwrap());
        assert_eq!(broadcaster.kinds(), vec![ReadingKind::Ranging]);
    }
}
