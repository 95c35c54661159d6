//! Randomized timing and row-id ranges used by scenario tuning.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// An inclusive range of durations a scenario samples from.
///
/// A range with `min == max` is a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    #[serde(rename = "min_ms", with = "serde_millis")]
    pub min: Duration,
    #[serde(rename = "max_ms", with = "serde_millis")]
    pub max: Duration,
}

impl DurationRange {
    pub const fn secs(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max),
        }
    }

    pub const fn millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.min >= self.max
    }

    /// Pick a duration uniformly from the range.
    ///
    /// An inverted range (`min > max`) is treated as fixed at `min`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.is_fixed() {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rng.gen_range(min..=max))
    }

    /// Sample using the thread-local generator.
    pub fn pick(&self) -> Duration {
        self.sample(&mut rand::thread_rng())
    }
}

/// An inclusive range of `users.id` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub first: i32,
    pub last: i32,
}

impl IdRange {
    pub const fn new(first: i32, last: i32) -> Self {
        Self { first, last }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        if self.last <= self.first {
            return self.first;
        }
        rng.gen_range(self.first..=self.last)
    }

    pub fn pick(&self) -> i32 {
        self.sample(&mut rand::thread_rng())
    }
}

/// Serialization helper for Duration as whole milliseconds
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_duration_range_samples_within_bounds() {
        let range = DurationRange::secs(5, 14);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let d = range.sample(&mut rng);
            assert!(d >= range.min && d <= range.max, "{d:?} out of range");
        }
    }

    #[test]
    fn test_fixed_and_inverted_ranges() {
        let mut rng = StdRng::seed_from_u64(1);
        let fixed = DurationRange::secs(30, 30);
        assert!(fixed.is_fixed());
        assert_eq!(fixed.sample(&mut rng), Duration::from_secs(30));

        let inverted = DurationRange::secs(10, 2);
        assert_eq!(inverted.sample(&mut rng), Duration::from_secs(10));
    }

    #[test]
    fn test_id_range_hits_every_hot_row() {
        let hot = IdRange::new(1, 10);
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = [false; 10];
        for _ in 0..500 {
            let id = hot.sample(&mut rng);
            assert!((hot.first..=hot.last).contains(&id));
            seen[(id - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_duration_range_json_shape() {
        let range = DurationRange::millis(500, 2000);
        let json = serde_json::to_value(range).unwrap();
        assert_eq!(json, serde_json::json!({ "min_ms": 500, "max_ms": 2000 }));
        let back: DurationRange = serde_json::from_value(json).unwrap();
        assert_eq!(back, range);
    }
}
