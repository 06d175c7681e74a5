/*!
This crate provides two small atomics-based types that are shared between the thread that starts a training run and the worker threads doing the work:

1. [`ProgressCounter`](struct.ProgressCounter.html) lets the workers report how far along they are.
2. [`KillChip`](struct.KillChip.html) lets the caller ask the workers to stop.
*/

#![allow(clippy::tabs_in_doc_comments)]

use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc,
};

/**
A `ProgressCounter` counts finished units of work, such as binned columns or grown trees, toward a known total. Workers on any thread call [`inc`](#method.inc), and the caller reads [`get`](#method.get) whenever it wants to redraw its progress display. Clones share the same count.

```
use canopy_progress::ProgressCounter;
use rayon::prelude::*;

let progress_counter = ProgressCounter::new(8);
(0..8).into_par_iter().for_each(|_| {
	progress_counter.inc(1);
});
assert_eq!(progress_counter.get(), progress_counter.total());
```
*/
#[derive(Clone, Debug)]
pub struct ProgressCounter {
	done: Arc<AtomicU64>,
	total: u64,
}

impl ProgressCounter {
	/// Start a counter at zero that finishes at `total`.
	pub fn new(total: u64) -> ProgressCounter {
		ProgressCounter {
			done: Arc::new(AtomicU64::new(0)),
			total,
		}
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	/// The number of units finished so far.
	pub fn get(&self) -> u64 {
		self.done.load(Ordering::Relaxed)
	}

	/// Record that `n` more units are finished.
	pub fn inc(&self, n: u64) {
		self.done.fetch_add(n, Ordering::Relaxed);
	}
}

/**
A `KillChip` is a cooperative cancellation flag. The caller keeps one clone and hands another to the training run. Training polls [`is_activated`](#method.is_activated) between units of work, before every tree and every level of a tree, and stops as soon as it sees the chip was activated.

```
use canopy_progress::KillChip;

let kill_chip = KillChip::default();
let worker_chip = kill_chip.clone();
assert!(!worker_chip.is_activated());
kill_chip.activate();
assert!(worker_chip.is_activated());
```
*/
#[derive(Clone, Debug, Default)]
pub struct KillChip(Arc<AtomicBool>);

impl KillChip {
	/// Ask every holder of this chip to stop.
	pub fn activate(&self) {
		self.0.store(true, Ordering::Release);
	}
	/// Check whether `activate` has been called on any clone of this chip.
	pub fn is_activated(&self) -> bool {
		self.0.load(Ordering::Acquire)
	}
}
