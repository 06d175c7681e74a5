use super::{mean::Mean, StreamingMetric};

/// The fraction of `(predicted class, label)` pairs that agree. A classification tree's out-of-bag error is one minus its accuracy on the rows it held out of bag.
#[derive(Clone, Debug, Default)]
pub struct Accuracy(Mean);

impl Accuracy {
	pub fn new() -> Self {
		Self::default()
	}
}

impl StreamingMetric<'_> for Accuracy {
	type Input = (usize, usize);
	type Output = Option<f64>;

	fn update(&mut self, (prediction, label): (usize, usize)) {
		self.0.update(if prediction == label { 1.0 } else { 0.0 })
	}

	fn merge(&mut self, other: Self) {
		self.0.merge(other.0)
	}

	fn finalize(self) -> Option<f64> {
		self.0.finalize()
	}
}

#[test]
fn test_accuracy() {
	let mut accuracy = Accuracy::new();
	for (prediction, label) in [(0, 0), (1, 0), (1, 1), (2, 2)].iter() {
		accuracy.update((*prediction, *label));
	}
	assert_eq!(accuracy.finalize(), Some(0.75));
}
