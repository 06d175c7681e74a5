/*!
This crate holds the small amount of glue that sits between the training code and [rayon](https://docs.rs/rayon). Training never touches rayon's global pool directly. Instead, the caller describes the pool it wants with [`ThreadPoolOptions`](struct.ThreadPoolOptions.html), and training runs inside it with [`ThreadPoolOptions::install`](struct.ThreadPoolOptions.html#method.install).
*/

#![allow(clippy::tabs_in_doc_comments)]

use thiserror::Error;

/**
Zip any number of parallel iterators together, the way `itertools::izip!` zips serial ones.

```
use canopy_thread_pool::pzip;
use rayon::prelude::*;

let a = vec![1, 2, 3];
let mut b = vec![0; 3];
pzip!(&a, &mut b).for_each(|(a, b)| *b = a * 2);
assert_eq!(b, vec![2, 4, 6]);
```
*/
#[macro_export]
macro_rules! pzip {
	($($e:expr),* $(,)*) => {
		rayon::iter::IntoParallelIterator::into_par_iter(($($e,)*))
	};
}

/// These options describe the thread pool a training run executes in.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ThreadPoolOptions {
	/// The number of worker threads. If this is `None`, rayon chooses, which is usually the number of logical cores.
	pub n_threads: Option<usize>,
}

/// An error type indicating that the thread pool could not be created.
#[derive(Debug, Error)]
#[error("failed to build the thread pool: {0}")]
pub struct ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError);

impl ThreadPoolOptions {
	/// Use exactly `n_threads` worker threads.
	pub fn with_n_threads(n_threads: usize) -> Self {
		Self {
			n_threads: Some(n_threads),
		}
	}

	/// Build a dedicated rayon thread pool from these options.
	pub fn build(&self) -> Result<rayon::ThreadPool, ThreadPoolBuildError> {
		let mut builder = rayon::ThreadPoolBuilder::new()
			.thread_name(|thread_index| format!("canopy-worker-{}", thread_index));
		if let Some(n_threads) = self.n_threads {
			builder = builder.num_threads(n_threads);
		}
		Ok(builder.build()?)
	}

	/// Build the pool and run `f` inside it. Every rayon call made by `f` executes on the pool's threads.
	pub fn install<F, R>(&self, f: F) -> Result<R, ThreadPoolBuildError>
	where
		F: FnOnce() -> R + Send,
		R: Send,
	{
		let pool = self.build()?;
		Ok(pool.install(f))
	}
}

#[test]
fn test_install_uses_requested_thread_count() {
	let n_threads = ThreadPoolOptions::with_n_threads(3)
		.install(rayon::current_num_threads)
		.unwrap();
	assert_eq!(n_threads, 3);
}
