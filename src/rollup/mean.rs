//! Running statistics
//!
//! [`ArithmeticMean`] keeps an incremental mean using `mean += (x - mean) / n`,
//! which avoids the error growth of summing a long stream before dividing.
//! [`Accumulator`] pairs it with min/max tracking and is what the pipeline,
//! the summary queries and each downsampling bucket fold into.

/// Incremental arithmetic mean
#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticMean {
    mean: f64,
    count: u64,
}

impl ArithmeticMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    /// Current mean, NaN if nothing was added
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Min, max and running mean over a stream of points
#[derive(Debug, Clone, Copy)]
pub struct Accumulator {
    min: f64,
    max: f64,
    mean: ArithmeticMean,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            min: f64::NAN,
            max: f64::NAN,
            mean: ArithmeticMean::new(),
        }
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a raw value
    pub fn add_value(&mut self, value: f64) {
        self.add_aggregate(value, value, value);
    }

    /// Fold an already aggregated point
    ///
    /// The average feeds the running mean as a single observation, so folding
    /// aggregates yields an average of averages.
    pub fn add_aggregate(&mut self, avg: f64, min: f64, max: f64) {
        if self.mean.count() == 0 {
            self.min = min;
            self.max = max;
        } else {
            if min < self.min {
                self.min = min;
            }
            if max > self.max {
                self.max = max;
            }
        }
        self.mean.add(avg);
    }

    pub fn is_empty(&self) -> bool {
        self.mean.count() == 0
    }

    pub fn count(&self) -> u64 {
        self.mean.count()
    }

    /// NaN when empty
    pub fn min(&self) -> f64 {
        self.min
    }

    /// NaN when empty
    pub fn max(&self) -> f64 {
        self.max
    }

    /// NaN when empty
    pub fn avg(&self) -> f64 {
        self.mean.mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mean_is_nan() {
        let mean = ArithmeticMean::new();
        assert!(mean.mean().is_nan());
        assert_eq!(mean.count(), 0);
    }

    #[test]
    fn test_mean_matches_naive() {
        let values: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.37).sin() * 100.0).collect();

        let mut mean = ArithmeticMean::new();
        for v in &values {
            mean.add(*v);
        }

        let naive = values.iter().sum::<f64>() / values.len() as f64;
        assert!((mean.mean() - naive).abs() < 1e-9);
        assert_eq!(mean.count(), 1000);
    }

    #[test]
    fn test_mean_stays_stable_for_large_offsets() {
        let mut mean = ArithmeticMean::new();
        for i in 0..100_000 {
            mean.add(1e9 + (i % 3) as f64);
        }
        assert!((mean.mean() - (1e9 + 1.0)).abs() < 1e-3);
    }

    #[test]
    fn test_accumulator_raw_values() {
        let mut acc = Accumulator::new();
        assert!(acc.is_empty());
        assert!(acc.min().is_nan() && acc.max().is_nan() && acc.avg().is_nan());

        for v in [10.0, 20.0, 30.0] {
            acc.add_value(v);
        }
        assert_eq!(acc.min(), 10.0);
        assert_eq!(acc.max(), 30.0);
        assert_eq!(acc.avg(), 20.0);
        assert_eq!(acc.count(), 3);
    }

    #[test]
    fn test_accumulator_widens_both_bounds_from_one_point() {
        let mut acc = Accumulator::new();
        acc.add_aggregate(5.0, 4.0, 6.0);
        acc.add_aggregate(5.0, 1.0, 9.0);
        assert_eq!(acc.min(), 1.0);
        assert_eq!(acc.max(), 9.0);
    }

    #[test]
    fn test_accumulator_average_of_averages() {
        let mut acc = Accumulator::new();
        acc.add_aggregate(2.0, 1.0, 3.0);
        acc.add_aggregate(4.0, 4.0, 4.0);
        assert_eq!(acc.avg(), 3.0);
    }
}
