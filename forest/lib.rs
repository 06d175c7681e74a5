/*!
This crate trains random forests for regression and classification. Training is histogram based: every feature is first binned into at most `max_bins` bins plus an overflow bin for values above the largest training value, and each tree is then grown one level at a time, with every node of a level choosing its split from per-bin statistics instead of from sorted feature values. All work runs on a [rayon](https://docs.rs/rayon) thread pool, and for a given seed the trained forest is the same no matter how many threads the pool has.

For an example of regression and classification, see `benchmarks/main.rs`.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod classifier;
mod criterion;
mod error;
mod options;
mod regressor;
#[cfg(feature = "timing")]
mod timing;
mod train;
mod tree;

pub use self::classifier::{ClassificationLeaf, Classifier};
pub use self::error::TrainError;
pub use self::options::{
	BinningStrategy, ClassImpurity, ResultsToCompute, TrainContext, TrainOptions,
	VariableImportance,
};
pub use self::regressor::Regressor;
pub use self::tree::{BranchNode, LeafNode, Node, Tree};
pub use canopy_progress::{KillChip, ProgressCounter};
pub use canopy_thread_pool::ThreadPoolOptions;

/// This enum reports the training progress. `Initializing` counts the features binned, twice per feature, and `Training` counts the trees grown.
#[derive(Debug)]
pub enum TrainProgress {
	Initializing(ProgressCounter),
	Training(ProgressCounter),
}
