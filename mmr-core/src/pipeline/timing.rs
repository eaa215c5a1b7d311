use serde::{Serialize, Serializer, ser::SerializeStruct};
use std::time::{Duration, Instant};

/// Wall-clock time spent computing descriptors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorTiming {
    elapsed: Duration,
    descriptors: usize,
}

impl DescriptorTiming {
    pub fn new(elapsed: Duration, descriptors: usize) -> Self {
        Self {
            elapsed,
            descriptors,
        }
    }

    /// Times `f`, which yields `count` descriptors on success. Failed calls
    /// are not recorded.
    pub fn time<T, E>(&mut self, count: usize, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let started = Instant::now();
        let value = f()?;
        self.record(started.elapsed(), count);
        Ok(value)
    }

    pub fn record(&mut self, elapsed: Duration, descriptors: usize) {
        self.elapsed += elapsed;
        self.descriptors += descriptors;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn descriptors(&self) -> usize {
        self.descriptors
    }

    /// Descriptors per second; `None` when no time was measured.
    pub fn throughput(&self) -> Option<f64> {
        if self.elapsed.is_zero() {
            return None;
        }
        Some(self.descriptors as f64 / self.elapsed.as_secs_f64())
    }
}

impl Serialize for DescriptorTiming {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DescriptorTiming", 3)?;
        state.serialize_field("elapsed_ms", &millis(self.elapsed))?;
        state.serialize_field("descriptors", &self.descriptors)?;
        state.serialize_field("throughput", &self.throughput())?;
        state.end()
    }
}

/// Wall-clock time of the stages around the descriptor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub init: Duration,
    pub crop: Duration,
    pub classify: Duration,
}

impl Serialize for StageTimings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StageTimings", 3)?;
        state.serialize_field("init_ms", &millis(self.init))?;
        state.serialize_field("crop_ms", &millis(self.crop))?;
        state.serialize_field("classify_ms", &millis(self.classify))?;
        state.end()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
