//! Metrics Recorder (C3): bounded ring buffer of named time-series samples.

use crate::types::{MetricSample, Value};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct MetricsRecorder {
    capacity: usize,
    series: RwLock<HashMap<String, VecDeque<MetricSample>>>,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            series: RwLock::new(HashMap::new()),
        })
    }

    pub async fn record(&self, name: impl Into<String>, value: f64, metadata: HashMap<String, Value>) {
        let name = name.into();
        let sample = MetricSample {
            timestamp: Utc::now(),
            value,
            metadata,
        };
        let mut series = self.series.write().await;
        let buf = series.entry(name).or_insert_with(VecDeque::new);
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(sample);
    }

    /// Newest-first, optionally restricted to samples within `window` of now
    /// and then truncated to the last `limit` samples.
    pub async fn get(&self, name: &str, window: Option<chrono::Duration>, limit: Option<usize>) -> Vec<MetricSample> {
        let series = self.series.read().await;
        match series.get(name) {
            Some(buf) => {
                let mut samples: Vec<MetricSample> = buf.iter().cloned().collect();
                samples.reverse();
                if let Some(window) = window {
                    let cutoff = Utc::now() - window;
                    samples.retain(|s| s.timestamp >= cutoff);
                }
                if let Some(limit) = limit {
                    samples.truncate(limit);
                }
                samples
            }
            None => Vec::new(),
        }
    }

    pub async fn last(&self, name: &str) -> Option<MetricSample> {
        let series = self.series.read().await;
        series.get(name).and_then(|buf| buf.back().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_buffer_evicts_oldest() {
        let recorder = MetricsRecorder::new(3);
        for i in 0..5 {
            recorder.record("depth", i as f64, HashMap::new()).await;
        }
        let samples = recorder.get("depth", None, None).await;
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].value, 4.0);
        assert_eq!(samples[2].value, 2.0);
    }

    #[tokio::test]
    async fn last_returns_most_recent() {
        let recorder = MetricsRecorder::new(10);
        recorder.record("latency", 1.0, HashMap::new()).await;
        recorder.record("latency", 2.0, HashMap::new()).await;
        let last = recorder.last("latency").await.unwrap();
        assert_eq!(last.value, 2.0);
    }

    #[tokio::test]
    async fn unknown_metric_returns_empty() {
        let recorder = MetricsRecorder::new(10);
        assert!(recorder.get("missing", None, None).await.is_empty());
        assert!(recorder.last("missing").await.is_none());
    }

    #[tokio::test]
    async fn window_restricts_to_recent_samples() {
        let recorder = MetricsRecorder::new(10);
        recorder.record("latency", 1.0, HashMap::new()).await;
        recorder.record("latency", 2.0, HashMap::new()).await;
        let samples = recorder.get("latency", Some(chrono::Duration::hours(1)), None).await;
        assert_eq!(samples.len(), 2);
    }
}
