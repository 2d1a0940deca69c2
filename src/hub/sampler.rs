// Reservoir sampler
//
// Keeps one uniformly-sampled record per interval for subscribers that
// request cadenced delivery instead of every record.

use rand::Rng;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Interval-based reservoir sampler of size one.
///
/// Each observed record replaces the held sample with probability `1/count`.
/// When the interval elapses the sample is flushed, annotated with a
/// `sample_count` field carrying the number of records observed since the
/// previous flush.
#[derive(Debug)]
pub struct Sampler {
    interval: Duration,
    sample: Option<Vec<u8>>,
    count: u64,
    last_sent: Instant,
}

impl Sampler {
    /// Create a sampler flushing every `interval_ms` milliseconds
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            sample: None,
            count: 0,
            last_sent: Instant::now(),
        }
    }

    /// Observe a record; returns a flushed sample when the interval is due
    pub fn add(&mut self, msg: Vec<u8>) -> Option<Vec<u8>> {
        self.count += 1;

        if rand::thread_rng().gen_range(0..self.count) == 0 {
            self.sample = Some(msg);
        }

        if self.last_sent.elapsed() >= self.interval {
            return self.flush();
        }

        None
    }

    /// Flush the pending sample if the interval is due (for quiet streams)
    pub fn check(&mut self) -> Option<Vec<u8>> {
        if self.last_sent.elapsed() >= self.interval && self.count > 0 {
            return self.flush();
        }

        None
    }

    fn flush(&mut self) -> Option<Vec<u8>> {
        let sample = self.sample.take()?;

        let mut data: Map<String, Value> = serde_json::from_slice(&sample).ok()?;
        data.insert("sample_count".to_string(), Value::from(self.count));

        let mut result = serde_json::to_vec(&Value::Object(data)).ok()?;
        result.push(b'\n');

        self.count = 0;
        self.last_sent = Instant::now();

        Some(result)
    }
}
