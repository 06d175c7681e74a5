use canopy_thread_pool::ThreadPoolBuildError;
use thiserror::Error;

/// Every way a training run can fail. No partial model is ever returned alongside an error.
#[derive(Debug, Error)]
pub enum TrainError {
	/// An option was out of range, or the options do not fit the data they were paired with.
	#[error("invalid options: {reason}")]
	InvalidOptions { reason: String },
	/// The training data itself cannot be used, for example a feature value is NaN or a label is out of range.
	#[error("invalid input: {reason}")]
	InvalidInput { reason: String },
	/// Sampling `fraction` of `n_rows` rows selects no rows at all.
	#[error("sampling a fraction of {fraction} of {n_rows} rows selects no rows")]
	DegenerateSample { n_rows: usize, fraction: f32 },
	/// The kill chip was activated before training finished.
	#[error("training was cancelled")]
	Cancelled,
	/// A per-tree buffer could not be allocated.
	#[error("failed to allocate {bytes} bytes")]
	AllocationFailed { bytes: usize },
	#[error(transparent)]
	ThreadPool(#[from] ThreadPoolBuildError),
}

impl TrainError {
	pub(crate) fn invalid_options(reason: impl Into<String>) -> TrainError {
		TrainError::InvalidOptions {
			reason: reason.into(),
		}
	}

	pub(crate) fn invalid_input(reason: impl Into<String>) -> TrainError {
		TrainError::InvalidInput {
			reason: reason.into(),
		}
	}
}

/// Allocate a zero-initialized buffer of `len` elements, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone + Default>(len: usize) -> Result<Vec<T>, TrainError> {
	let mut buffer = Vec::new();
	buffer
		.try_reserve_exact(len)
		.map_err(|_| TrainError::AllocationFailed {
			bytes: len.saturating_mul(std::mem::size_of::<T>()),
		})?;
	buffer.resize(len, T::default());
	Ok(buffer)
}
