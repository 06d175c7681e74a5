use super::{mean::Mean, StreamingMetric};

/// Scores a regression tree on the rows it held out of bag, and the forest on its averaged out-of-bag predictions. Each input is a `(prediction, label)` pair. `finalize` returns `None` if no pair was seen.
#[derive(Clone, Debug, Default)]
pub struct MeanSquaredError(Mean);

impl MeanSquaredError {
	pub fn new() -> Self {
		Self::default()
	}
}

impl StreamingMetric<'_> for MeanSquaredError {
	type Input = (f64, f64);
	type Output = Option<f64>;

	fn update(&mut self, (prediction, label): (f64, f64)) {
		self.0.update((label - prediction).powi(2))
	}

	fn merge(&mut self, other: Self) {
		self.0.merge(other.0)
	}

	fn finalize(self) -> Self::Output {
		self.0.finalize()
	}
}

#[test]
fn test_mean_squared_error() {
	let mut left = MeanSquaredError::new();
	left.update((1.0, 2.0));
	let mut right = MeanSquaredError::new();
	right.update((3.0, 0.0));
	left.merge(right);
	assert_eq!(left.finalize(), Some(5.0));
	assert_eq!(MeanSquaredError::new().finalize(), None);
}
