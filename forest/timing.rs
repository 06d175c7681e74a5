use num_traits::ToPrimitive;
use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};

/// Wall time spent in each phase of training. Phases that run on several threads at once add up the time of every thread, so they can exceed `total`.
#[derive(Debug, Default)]
pub struct Timing {
	pub compute_binning_instructions: PhaseDuration,
	pub compute_binned_features: PhaseDuration,
	pub sample: PhaseDuration,
	pub compute_node_stats: PhaseDuration,
	pub compute_bin_stats: PhaseDuration,
	pub choose_best_split: PhaseDuration,
	pub rearrange_examples_index: PhaseDuration,
	pub compute_oob: PhaseDuration,
	pub total: PhaseDuration,
}

impl Timing {
	pub fn new() -> Timing {
		Timing::default()
	}
}

/// Nanoseconds, added to atomically from any thread.
#[derive(Default)]
pub struct PhaseDuration(AtomicU64);

impl PhaseDuration {
	pub fn get(&self) -> Duration {
		Duration::from_nanos(self.0.load(Ordering::Relaxed))
	}

	pub fn inc(&self, duration: Duration) {
		let nanos = duration.as_nanos().to_u64().unwrap_or(u64::MAX);
		self.0.fetch_add(nanos, Ordering::Relaxed);
	}
}

impl std::fmt::Debug for PhaseDuration {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}", self.get())
	}
}
