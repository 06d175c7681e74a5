/*!
This crate defines the [`StreamingMetric`](trait.StreamingMetric.html) trait and the handful of concrete metrics the forest trainer needs: [`MeanSquaredError`](struct.MeanSquaredError.html) and [`Accuracy`](struct.Accuracy.html) for out-of-bag error, and [`MeanVariance`](struct.MeanVariance.html) for statistics that are aggregated across trees.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod accuracy;
mod mean;
mod mean_squared_error;
mod mean_variance;

pub use self::accuracy::Accuracy;
pub use self::mean::Mean;
pub use self::mean_squared_error::MeanSquaredError;
pub use self::mean_variance::{m2_to_variance, merge_mean_m2, MeanVariance, MeanVarianceOutput};

/**
A `StreamingMetric` is fed its input one value at a time with `update()` and produces its result with `finalize()`. Two metrics that saw disjoint parts of the input combine with `merge()`.

Training feeds out-of-bag predictions to these metrics one tree at a time, so every metric here can be updated without holding on to its inputs.

```
use canopy_metrics::StreamingMetric;

#[derive(Default)]
struct Count(u64);

impl StreamingMetric<'_> for Count {
	type Input = f64;
	type Output = u64;
	fn update(&mut self, _: f64) {
		self.0 += 1;
	}
	fn merge(&mut self, other: Count) {
		self.0 += other.0;
	}
	fn finalize(self) -> u64 {
		self.0
	}
}

let mut count = Count::default();
count.update(1.0);
count.merge(Count(2));
assert_eq!(count.finalize(), 3);
```

The lifetime `'a` lets an `Input` borrow from the caller.
*/
pub trait StreamingMetric<'a> {
	type Input;
	type Output;
	fn update(&mut self, input: Self::Input);
	fn merge(&mut self, other: Self);
	fn finalize(self) -> Self::Output;
}
