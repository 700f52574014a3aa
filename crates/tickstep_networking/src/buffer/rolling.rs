//! # Rolling Standard Deviation
//!
//! Mean and population standard deviation over the last `N` samples.

/// Fixed-size circular window of samples.
///
/// Mean and deviation are recomputed from the window on every query; windows
/// are small and this keeps the numbers free of accumulated drift.
#[derive(Clone, Debug)]
pub struct RollingStandardDeviation {
    samples: Vec<f64>,
    capacity: usize,
    cursor: usize,
}

impl RollingStandardDeviation {
    /// Creates a window holding up to `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window must hold at least one sample");
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Adds a sample, evicting the oldest once the window is full.
    pub fn insert(&mut self, value: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.cursor] = value;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Mean of the window; 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Population standard deviation of the window; 0 when empty.
    #[must_use]
    pub fn standard_deviation(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .samples
            .iter()
            .map(|sample| (sample - mean) * (sample - mean))
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }

    /// Number of samples in the window.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true before the first sample.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut rolling = RollingStandardDeviation::new(3);
        for value in [0.0, 0.0, 0.0, 2.0, 4.0, 6.0] {
            rolling.insert(value);
        }
        assert_eq!(rolling.len(), 3);
        assert!((rolling.mean() - 4.0).abs() < 1e-9);
        assert!((rolling.standard_deviation() - 1.632_993).abs() < 1e-5);
    }

    #[test]
    fn test_empty_window() {
        let rolling = RollingStandardDeviation::new(4);
        assert!(rolling.is_empty());
        assert!(rolling.mean().abs() < f64::EPSILON);
        assert!(rolling.standard_deviation().abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_window() {
        let mut rolling = RollingStandardDeviation::new(8);
        rolling.insert(1.0);
        rolling.insert(3.0);
        assert!((rolling.mean() - 2.0).abs() < 1e-9);
        assert!((rolling.standard_deviation() - 1.0).abs() < 1e-9);
    }
}
