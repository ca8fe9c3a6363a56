//! Seam for the external telemetry producer.
//!
//! Samples arrive by callback on a fixed topic. Delivery order and
//! durability are not assumed; only the newest sample by source timestamp
//! is retained.

use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Topic the view layer subscribes to.
pub const TELEMETRY_TOPIC: &str = "Valve";

/// One delivered sample with the producer's timestamp attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub source_timestamp_ms: i64,
    pub payload: Value,
}

/// Producer-side metadata accompanying a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    /// `false` for lifecycle notifications that carry no data.
    pub valid_data: bool,
    pub source_timestamp_ms: i64,
}

pub type SampleCallback = Box<dyn Fn(Sample) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    BlankTopic,
}

impl Display for TelemetryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTopic => f.write_str("telemetry topic must not be blank"),
        }
    }
}

impl Error for TelemetryError {}

/// Anything that can deliver samples for a topic.
pub trait SampleSource {
    fn subscribe(&self, topic: &str, callback: SampleCallback) -> Result<(), TelemetryError>;
}

/// In-process producer, used by tests and local runs.
///
/// Callbacks run on the publishing thread while the subscriber table is
/// locked; they must not subscribe.
#[derive(Default)]
pub struct LocalSampleSource {
    subscribers: Mutex<HashMap<String, Vec<SampleCallback>>>,
}

impl LocalSampleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` to every subscriber of `topic`.
    ///
    /// Returns how many callbacks ran; samples without valid data reach
    /// nobody.
    pub fn publish(&self, topic: &str, info: SampleInfo, payload: Value) -> usize {
        if !info.valid_data {
            debug!("event=telemetry_publish module=telemetry status=skipped topic={topic}");
            return 0;
        }

        let subscribers = lock(&self.subscribers);
        let Some(callbacks) = subscribers.get(topic) else {
            return 0;
        };
        for callback in callbacks {
            callback(Sample {
                source_timestamp_ms: info.source_timestamp_ms,
                payload: payload.clone(),
            });
        }
        callbacks.len()
    }
}

impl SampleSource for LocalSampleSource {
    fn subscribe(&self, topic: &str, callback: SampleCallback) -> Result<(), TelemetryError> {
        if topic.trim().is_empty() {
            return Err(TelemetryError::BlankTopic);
        }
        lock(&self.subscribers)
            .entry(topic.to_string())
            .or_default()
            .push(callback);
        debug!("event=telemetry_subscribe module=telemetry status=ok topic={topic}");
        Ok(())
    }
}

/// Shared slot holding the newest sample seen.
#[derive(Clone, Default)]
pub struct LatestSample {
    slot: Arc<Mutex<Option<Sample>>>,
}

impl LatestSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `sample` unless a newer one is already held.
    ///
    /// Returns whether the sample was kept.
    pub fn observe(&self, sample: Sample) -> bool {
        let mut slot = lock(&self.slot);
        let newer = slot
            .as_ref()
            .map_or(true, |held| sample.source_timestamp_ms >= held.source_timestamp_ms);
        if newer {
            *slot = Some(sample);
        }
        newer
    }

    pub fn latest(&self) -> Option<Sample> {
        lock(&self.slot).clone()
    }

    /// Callback feeding this slot, for `SampleSource::subscribe`.
    pub fn callback(&self) -> SampleCallback {
        let latest = self.clone();
        Box::new(move |sample| {
            latest.observe(sample);
        })
    }
}

// A panicking callback must not wedge the slot for later samples.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{
        LatestSample, LocalSampleSource, Sample, SampleInfo, SampleSource, TelemetryError,
        TELEMETRY_TOPIC,
    };
    use serde_json::json;

    fn info(valid_data: bool, source_timestamp_ms: i64) -> SampleInfo {
        SampleInfo {
            valid_data,
            source_timestamp_ms,
        }
    }

    #[test]
    fn latest_sample_ignores_older_arrivals() {
        let latest = LatestSample::new();
        assert!(latest.observe(Sample {
            source_timestamp_ms: 20,
            payload: json!({"pressure": 2}),
        }));
        assert!(!latest.observe(Sample {
            source_timestamp_ms: 10,
            payload: json!({"pressure": 1}),
        }));

        let held = latest.latest().unwrap();
        assert_eq!(held.source_timestamp_ms, 20);
        assert_eq!(held.payload, json!({"pressure": 2}));
    }

    #[test]
    fn local_source_delivers_only_valid_samples_on_subscribed_topic() {
        let source = LocalSampleSource::new();
        let latest = LatestSample::new();
        source
            .subscribe(TELEMETRY_TOPIC, latest.callback())
            .unwrap();

        assert_eq!(source.publish(TELEMETRY_TOPIC, info(false, 5), json!({})), 0);
        assert!(latest.latest().is_none());

        assert_eq!(source.publish("Pump", info(true, 6), json!({})), 0);
        assert_eq!(
            source.publish(TELEMETRY_TOPIC, info(true, 7), json!({"open": true})),
            1
        );
        assert_eq!(latest.latest().unwrap().source_timestamp_ms, 7);
    }

    #[test]
    fn subscribe_rejects_blank_topic() {
        let source = LocalSampleSource::new();
        let result = source.subscribe(" ", LatestSample::new().callback());
        assert_eq!(result, Err(TelemetryError::BlankTopic));
    }
}
