//! https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance#Parallel_algorithm

use super::StreamingMetric;
use num_traits::ToPrimitive;

/// Combine two separate means and M2s into a single mean and M2. `M2` is the sum of squared deviations from the mean. The weights `w_a` and `w_b` are counts for unweighted streams and sums of weights otherwise.
pub fn merge_mean_m2(
	w_a: f64,
	mean_a: f64,
	m2_a: f64,
	w_b: f64,
	mean_b: f64,
	m2_b: f64,
) -> (f64, f64) {
	if w_a == 0.0 {
		return (mean_b, m2_b);
	}
	if w_b == 0.0 {
		return (mean_a, m2_a);
	}
	let w = w_a + w_b;
	let delta = mean_b - mean_a;
	(
		mean_a + delta * (w_b / w),
		m2_a + m2_b + delta * delta * (w_a * w_b / w),
	)
}

pub fn m2_to_variance(m2: f64, n: u64) -> f64 {
	m2 / n.to_f64().unwrap()
}

/// `MeanVariance` computes the mean and population variance of a stream with Welford's update. Partial results computed on different threads are combined with [`merge_mean_m2`](fn.merge_mean_m2.html).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeanVariance {
	n: u64,
	mean: f64,
	m2: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeanVarianceOutput {
	pub n: u64,
	pub mean: f64,
	pub variance: f64,
}

impl MeanVarianceOutput {
	pub fn std(&self) -> f64 {
		self.variance.sqrt()
	}
}

impl StreamingMetric<'_> for MeanVariance {
	type Input = f64;
	type Output = Option<MeanVarianceOutput>;

	fn update(&mut self, value: f64) {
		self.n += 1;
		let delta = value - self.mean;
		self.mean += delta / self.n.to_f64().unwrap();
		self.m2 += delta * (value - self.mean);
	}

	fn merge(&mut self, other: Self) {
		let (mean, m2) = merge_mean_m2(
			self.n.to_f64().unwrap(),
			self.mean,
			self.m2,
			other.n.to_f64().unwrap(),
			other.mean,
			other.m2,
		);
		self.n += other.n;
		self.mean = mean;
		self.m2 = m2;
	}

	fn finalize(self) -> Self::Output {
		if self.n == 0 {
			return None;
		}
		Some(MeanVarianceOutput {
			n: self.n,
			mean: self.mean,
			variance: m2_to_variance(self.m2, self.n),
		})
	}
}

#[test]
fn test_merge_matches_single_stream() {
	let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
	let mut left = MeanVariance::default();
	let mut right = MeanVariance::default();
	for value in &values[0..3] {
		left.update(*value);
	}
	for value in &values[3..] {
		right.update(*value);
	}
	left.merge(right);
	let output = left.finalize().unwrap();
	assert_eq!(output.n, 8);
	assert!((output.mean - 5.0).abs() < 1e-12);
	assert!((output.variance - 4.0).abs() < 1e-12);
	assert!((output.std() - 2.0).abs() < 1e-12);
}

#[test]
fn test_constant_stream_has_zero_m2() {
	let mut metric = MeanVariance::default();
	for _ in 0..5 {
		metric.update(0.1);
	}
	let mut other = MeanVariance::default();
	other.update(0.1);
	metric.merge(other);
	assert_eq!(metric.finalize().unwrap().variance, 0.0);
}
