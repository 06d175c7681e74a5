use crate::{TrainError, TrainProgress};
use canopy_progress::KillChip;
use canopy_thread_pool::ThreadPoolOptions;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// These are the options passed to `Regressor::train` and `Classifier::train`. Options that are `None` are filled in with a default that depends on the task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
	/// The number of trees in the forest.
	pub n_trees: usize,
	/// Each tree is trained on `round(observations_per_tree_fraction * n_rows)` sampled rows.
	pub observations_per_tree_fraction: f32,
	/// The number of features drawn as split candidates at each node. Defaults to `floor(sqrt(n_features))` for classification and `n_features / 3` for regression, and never less than one.
	pub features_per_node: Option<usize>,
	/// Nodes at this depth become leaves. The root has depth 0. Zero means the depth is unlimited.
	pub max_tree_depth: usize,
	/// A split is only valid if each child receives at least this many rows. Defaults to 5 for regression and 1 for classification.
	pub min_observations_in_leaf_node: Option<usize>,
	/// Nodes with fewer rows than this become leaves.
	pub min_observations_in_split_node: usize,
	/// Nodes whose impurity is at or below this value become leaves.
	pub impurity_threshold: f64,
	/// A split is only taken if its impurity decrease is strictly greater than this value.
	pub min_impurity_decrease_in_split_node: f64,
	/// The seed of the random number generator. Two runs with the same seed, data, and options produce identical forests regardless of the number of threads.
	pub seed: u64,
	/// If true, each tree's rows are drawn with replacement. Otherwise they are drawn without replacement.
	pub bootstrap: bool,
	pub variable_importance: VariableImportance,
	pub results_to_compute: ResultsToCompute,
	/// If true, trees are grown in blocks of as many trees as there are threads, so only one block of per-tree buffers is alive at a time.
	pub memory_saving_mode: bool,
	/// The maximum number of bins per feature, including the overflow bin.
	pub max_bins: usize,
	/// When binning by quantiles, a bin is not closed until it holds at least this many rows.
	pub min_bin_size: usize,
	pub binning_strategy: BinningStrategy,
	/// The impurity used by classification. Regression always uses variance.
	pub class_impurity: ClassImpurity,
}

impl Default for TrainOptions {
	fn default() -> Self {
		Self {
			n_trees: 100,
			observations_per_tree_fraction: 1.0,
			features_per_node: None,
			max_tree_depth: 0,
			min_observations_in_leaf_node: None,
			min_observations_in_split_node: 2,
			impurity_threshold: 0.0,
			min_impurity_decrease_in_split_node: 0.0,
			seed: 777,
			bootstrap: true,
			variable_importance: VariableImportance::None,
			results_to_compute: ResultsToCompute::default(),
			memory_saving_mode: false,
			max_bins: 256,
			min_bin_size: 5,
			binning_strategy: BinningStrategy::Quantiles,
			class_impurity: ClassImpurity::Gini,
		}
	}
}

/// This enum selects which variable importance, if any, is computed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableImportance {
	None,
	/// Mean decrease in impurity, the impurity decreases of each feature's splits weighted by the fraction of rows reaching the split, averaged over trees.
	Mdi,
	/// Mean decrease in accuracy, the mean over trees of the increase in out-of-bag error when the feature's values are shuffled.
	MdaRaw,
	/// `MdaRaw` divided by the standard deviation of the per-tree increases.
	MdaScaled,
}

impl VariableImportance {
	pub fn is_mda(self) -> bool {
		matches!(self, VariableImportance::MdaRaw | VariableImportance::MdaScaled)
	}
}

/// Optional results of a training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsToCompute {
	pub oob_error: bool,
	pub oob_error_per_observation: bool,
}

/// How bin boundaries are placed when a feature has more distinct values than `max_bins`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinningStrategy {
	/// Each bin holds roughly the same number of rows.
	Quantiles,
	/// Bins have equal width between the minimum and maximum value.
	Averages,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassImpurity {
	Gini,
	Entropy,
}

/// The per-run environment of a training run, as opposed to the `TrainOptions` that shape the model.
#[derive(Default)]
pub struct TrainContext<'a> {
	pub thread_pool: ThreadPoolOptions,
	/// Activating this chip from another thread makes training return `TrainError::Cancelled` at the next tree or level boundary.
	pub kill_chip: Option<&'a KillChip>,
	pub update_progress: Option<&'a mut (dyn FnMut(TrainProgress) + Send)>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Task {
	Regression,
	Classification,
}

/// `TrainOptions` after task defaults are applied and every value is checked against the data.
#[derive(Clone, Debug)]
pub struct ResolvedOptions {
	pub n_trees: usize,
	pub n_rows_per_tree: usize,
	pub bootstrap: bool,
	pub features_per_node: usize,
	pub max_tree_depth: Option<usize>,
	pub min_observations_in_leaf_node: usize,
	pub min_observations_in_split_node: usize,
	pub impurity_threshold: f64,
	pub min_impurity_decrease_in_split_node: f64,
	pub seed: u64,
	pub variable_importance: VariableImportance,
	pub compute_oob_error: bool,
	pub compute_oob_error_per_observation: bool,
	pub memory_saving_mode: bool,
	pub max_bins: usize,
	pub min_bin_size: usize,
	pub binning_strategy: BinningStrategy,
	pub class_impurity: ClassImpurity,
}

impl ResolvedOptions {
	/// True if training needs each tree's out-of-bag predictions.
	pub fn needs_oob(&self) -> bool {
		self.compute_oob_error
			|| self.compute_oob_error_per_observation
			|| self.variable_importance.is_mda()
	}
}

impl TrainOptions {
	pub(crate) fn resolve(
		&self,
		task: Task,
		n_rows: usize,
		n_features: usize,
	) -> Result<ResolvedOptions, TrainError> {
		if self.n_trees == 0 {
			return Err(TrainError::invalid_options("n_trees must be at least 1"));
		}
		let fraction = self.observations_per_tree_fraction;
		if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
			return Err(TrainError::invalid_options(format!(
				"observations_per_tree_fraction must be in [0, 1], got {}",
				fraction
			)));
		}
		let n_rows_per_tree = (fraction.to_f64().unwrap() * n_rows.to_f64().unwrap())
			.round()
			.to_usize()
			.unwrap();
		if n_rows_per_tree == 0 {
			return Err(TrainError::DegenerateSample { n_rows, fraction });
		}
		let default_features_per_node = match task {
			Task::Regression => n_features / 3,
			Task::Classification => n_features.to_f64().unwrap().sqrt().floor().to_usize().unwrap(),
		};
		let features_per_node = self
			.features_per_node
			.unwrap_or_else(|| default_features_per_node.max(1));
		if features_per_node == 0 || features_per_node > n_features {
			return Err(TrainError::invalid_options(format!(
				"features_per_node must be in [1, {}], got {}",
				n_features, features_per_node
			)));
		}
		let min_observations_in_leaf_node =
			self.min_observations_in_leaf_node.unwrap_or(match task {
				Task::Regression => 5,
				Task::Classification => 1,
			});
		if min_observations_in_leaf_node == 0 {
			return Err(TrainError::invalid_options(
				"min_observations_in_leaf_node must be at least 1",
			));
		}
		// Every value bin and the overflow bin must fit in a u16 bin index.
		if !(2..=usize::from(u16::MAX)).contains(&self.max_bins) {
			return Err(TrainError::invalid_options(format!(
				"max_bins must be in [2, 65535], got {}",
				self.max_bins
			)));
		}
		if self.min_bin_size == 0 {
			return Err(TrainError::invalid_options("min_bin_size must be at least 1"));
		}
		if !(self.impurity_threshold >= 0.0) {
			return Err(TrainError::invalid_options(
				"impurity_threshold must be non-negative",
			));
		}
		if !(self.min_impurity_decrease_in_split_node >= 0.0) {
			return Err(TrainError::invalid_options(
				"min_impurity_decrease_in_split_node must be non-negative",
			));
		}
		if !self.bootstrap && self.variable_importance.is_mda() && n_rows_per_tree == n_rows {
			return Err(TrainError::invalid_options(
				"permutation importance needs out-of-bag rows, so it requires bootstrap or observations_per_tree_fraction < 1",
			));
		}
		Ok(ResolvedOptions {
			n_trees: self.n_trees,
			n_rows_per_tree,
			bootstrap: self.bootstrap,
			features_per_node,
			max_tree_depth: if self.max_tree_depth == 0 {
				None
			} else {
				Some(self.max_tree_depth)
			},
			min_observations_in_leaf_node,
			min_observations_in_split_node: self.min_observations_in_split_node,
			impurity_threshold: self.impurity_threshold,
			min_impurity_decrease_in_split_node: self.min_impurity_decrease_in_split_node,
			seed: self.seed,
			variable_importance: self.variable_importance,
			compute_oob_error: self.results_to_compute.oob_error,
			compute_oob_error_per_observation: self.results_to_compute.oob_error_per_observation,
			memory_saving_mode: self.memory_saving_mode,
			max_bins: self.max_bins,
			min_bin_size: self.min_bin_size,
			binning_strategy: self.binning_strategy,
			class_impurity: self.class_impurity,
		})
	}
}

#[test]
fn test_task_defaults() {
	let options = TrainOptions::default();
	let regression = options.resolve(Task::Regression, 100, 10).unwrap();
	assert_eq!(regression.features_per_node, 3);
	assert_eq!(regression.min_observations_in_leaf_node, 5);
	let classification = options
		.resolve(Task::Classification, 100, 10)
		.unwrap();
	assert_eq!(classification.features_per_node, 3);
	assert_eq!(classification.min_observations_in_leaf_node, 1);
	let one_feature = options.resolve(Task::Regression, 100, 1).unwrap();
	assert_eq!(one_feature.features_per_node, 1);
}

#[test]
fn test_zero_fraction_is_a_degenerate_sample() {
	let options = TrainOptions {
		observations_per_tree_fraction: 0.0,
		..Default::default()
	};
	let error = options.resolve(Task::Regression, 100, 4).unwrap_err();
	assert!(matches!(
		error,
		TrainError::DegenerateSample { n_rows: 100, .. }
	));
}

#[test]
fn test_out_of_range_options() {
	let options = TrainOptions {
		features_per_node: Some(5),
		..Default::default()
	};
	assert!(matches!(
		options.resolve(Task::Regression, 100, 4),
		Err(TrainError::InvalidOptions { .. })
	));
	let options = TrainOptions {
		max_bins: 1,
		..Default::default()
	};
	assert!(matches!(
		options.resolve(Task::Regression, 100, 4),
		Err(TrainError::InvalidOptions { .. })
	));
	let options = TrainOptions {
		observations_per_tree_fraction: 1.5,
		..Default::default()
	};
	assert!(matches!(
		options.resolve(Task::Regression, 100, 4),
		Err(TrainError::InvalidOptions { .. })
	));
}
