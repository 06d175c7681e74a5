#[cfg(feature = "timing")]
use crate::timing::Timing;
use self::{
	binning::{compute_binned_features, compute_binning_instructions},
	grow::{grow_tree, GrowTreeInput, GrowTreeOutput},
	oob::{compute_oob_leaves, compute_permutation_increases, OobAccumulator},
	sampling::{sample, tree_rngs},
};
use crate::{
	criterion::Criterion, options::ResolvedOptions, tree::Tree, TrainError, TrainProgress,
	VariableImportance,
};
use canopy_metrics::{MeanVariance, StreamingMetric};
use canopy_progress::{KillChip, ProgressCounter};
use itertools::izip;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

pub mod bin_stats;
pub mod binning;
pub mod grow;
pub mod oob;
pub mod partition;
pub mod sampling;
pub mod split;

/// This is the return type of the common `train` function.
#[derive(Debug)]
pub struct TrainOutput<L> {
	pub trees: Vec<Tree<L>>,
	pub variable_importances: Option<Vec<f32>>,
	pub oob_error: Option<f32>,
	pub oob_error_per_observation: Option<Vec<f32>>,
}

/// Everything a single tree contributes to the forest's results.
struct TreeOutput<L> {
	grow_tree_output: GrowTreeOutput<L>,
	oob_leaves: Vec<(usize, usize)>,
	permutation_increases: Option<Vec<f64>>,
}

/// Check the shapes and values of the training data shared by every task.
pub fn validate_input(
	features: ArrayView2<f32>,
	n_labels: usize,
	weights: Option<ArrayView1<f32>>,
) -> Result<(), TrainError> {
	let (n_rows, n_features) = features.dim();
	if n_rows == 0 {
		return Err(TrainError::invalid_input("there are no training rows"));
	}
	if n_features == 0 {
		return Err(TrainError::invalid_input("there are no features"));
	}
	if n_labels != n_rows {
		return Err(TrainError::invalid_input(format!(
			"there are {} rows of features but {} labels",
			n_rows, n_labels
		)));
	}
	if let Some((row, column)) = features
		.indexed_iter()
		.find(|(_, value)| !value.is_finite())
		.map(|(index, _)| index)
	{
		return Err(TrainError::invalid_input(format!(
			"the feature value at row {} column {} is not finite",
			row, column
		)));
	}
	if let Some(weights) = weights {
		if weights.len() != n_rows {
			return Err(TrainError::invalid_input(format!(
				"there are {} rows of features but {} weights",
				n_rows,
				weights.len()
			)));
		}
		if weights
			.iter()
			.any(|weight| !weight.is_finite() || *weight < 0.0)
		{
			return Err(TrainError::invalid_input(
				"weights must be finite and non-negative",
			));
		}
		if weights.iter().all(|weight| *weight == 0.0) {
			return Err(TrainError::invalid_input("every weight is zero"));
		}
	}
	Ok(())
}

/// To avoid code duplication, this shared `train` function is called by `Regressor::train` and `Classifier::train`. It must run inside the thread pool the caller asked for.
pub fn train<C: Criterion>(
	criterion: &C,
	features: ArrayView2<f32>,
	options: &ResolvedOptions,
	kill_chip: Option<&KillChip>,
	update_progress: &mut dyn FnMut(TrainProgress),
) -> Result<TrainOutput<C::Leaf>, TrainError> {
	#[cfg(feature = "timing")]
	let timing = Timing::new();
	#[cfg(feature = "timing")]
	let start_total = std::time::Instant::now();

	let (n_rows, n_features) = features.dim();
	log::info!(
		"training {} trees on {} rows and {} features with {} threads",
		options.n_trees,
		n_rows,
		n_features,
		rayon::current_num_threads()
	);

	// Determine how to bin each feature, then bin every value.
	let progress_counter = ProgressCounter::new((2 * n_features).to_u64().unwrap());
	update_progress(TrainProgress::Initializing(progress_counter.clone()));
	#[cfg(feature = "timing")]
	let start = std::time::Instant::now();
	let binning_instructions =
		compute_binning_instructions(features, options, &|| progress_counter.inc(1));
	#[cfg(feature = "timing")]
	timing.compute_binning_instructions.inc(start.elapsed());
	#[cfg(feature = "timing")]
	let start = std::time::Instant::now();
	let binned_features =
		compute_binned_features(features, &binning_instructions, &|| progress_counter.inc(1));
	#[cfg(feature = "timing")]
	timing.compute_binned_features.inc(start.elapsed());
	log::debug!(
		"binned features into at most {} bins each",
		binning_instructions
			.iter()
			.map(|binning_instruction| binning_instruction.n_bins())
			.max()
			.unwrap_or(0)
	);

	let grow_tree_input = GrowTreeInput {
		criterion,
		binned_features: &binned_features,
		binning_instructions: &binning_instructions,
		options,
		kill_chip,
		#[cfg(feature = "timing")]
		timing: &timing,
	};
	let mut oob_accumulator =
		if options.compute_oob_error || options.compute_oob_error_per_observation {
			Some(OobAccumulator::new(criterion, n_rows)?)
		} else {
			None
		};
	let mut impurity_decreases = vec![0.0; n_features];
	let mut permutation_increases = vec![MeanVariance::default(); n_features];
	let mut trees = Vec::with_capacity(options.n_trees);

	// Every tree draws from its own stream, so the forest does not depend on which thread grows which tree.
	let mut rngs = tree_rngs(options.seed, options.n_trees);
	let progress_counter = ProgressCounter::new(options.n_trees.to_u64().unwrap());
	update_progress(TrainProgress::Training(progress_counter.clone()));
	let n_trees_per_block = if options.memory_saving_mode {
		rayon::current_num_threads()
	} else {
		options.n_trees
	};
	for rngs in rngs.chunks_mut(n_trees_per_block) {
		if is_cancelled(kill_chip) {
			log::warn!("training was cancelled after {} trees", trees.len());
			return Err(TrainError::Cancelled);
		}
		// Grow the block's trees in parallel. Every tree is joined before an error is returned.
		let tree_outputs: Vec<Result<TreeOutput<C::Leaf>, TrainError>> = rngs
			.par_iter_mut()
			.map(|rng| {
				let tree_output = train_tree(&grow_tree_input, n_rows, rng);
				progress_counter.inc(1);
				tree_output
			})
			.collect();
		// Fold the trees into the forest in tree order.
		for tree_output in tree_outputs {
			let TreeOutput {
				grow_tree_output,
				oob_leaves,
				permutation_increases: tree_permutation_increases,
			} = tree_output.map_err(|error| {
				if let TrainError::Cancelled = error {
					log::warn!("training was cancelled while growing trees");
				}
				error
			})?;
			for (total, value) in izip!(
				impurity_decreases.iter_mut(),
				grow_tree_output.impurity_decreases.iter()
			) {
				*total += value;
			}
			if let Some(oob_accumulator) = oob_accumulator.as_mut() {
				oob_accumulator.add_tree(criterion, &grow_tree_output.tree, &oob_leaves);
			}
			if let Some(tree_permutation_increases) = tree_permutation_increases {
				for (metric, increase) in
					izip!(permutation_increases.iter_mut(), tree_permutation_increases)
				{
					metric.update(increase);
				}
			}
			trees.push(grow_tree_output.tree);
		}
		log::debug!("grew {} of {} trees", trees.len(), options.n_trees);
	}

	let n_trees = trees.len().to_f64().unwrap();
	let variable_importances = match options.variable_importance {
		VariableImportance::None => None,
		VariableImportance::Mdi => Some(
			impurity_decreases
				.iter()
				.map(|total| (total / n_trees).to_f32().unwrap())
				.collect(),
		),
		VariableImportance::MdaRaw | VariableImportance::MdaScaled => Some(
			permutation_increases
				.into_iter()
				.map(|metric| {
					let importance = match metric.finalize() {
						None => 0.0,
						Some(output) => match options.variable_importance {
							VariableImportance::MdaScaled => {
								let std = output.std();
								if std > 0.0 {
									output.mean / std
								} else {
									0.0
								}
							}
							_ => output.mean,
						},
					};
					importance.to_f32().unwrap()
				})
				.collect(),
		),
	};
	let (oob_error, oob_error_per_observation) = match oob_accumulator {
		Some(oob_accumulator) => {
			let output = oob_accumulator.finalize(criterion);
			(
				if options.compute_oob_error {
					output.oob_error
				} else {
					None
				},
				if options.compute_oob_error_per_observation {
					Some(output.oob_error_per_observation)
				} else {
					None
				},
			)
		}
		None => (None, None),
	};
	if let Some(oob_error) = oob_error {
		log::info!("out-of-bag error {}", oob_error);
	}
	log::info!(
		"trained {} trees with {} leaves on average",
		trees.len(),
		trees.iter().map(|tree| tree.n_leaves()).sum::<usize>() / trees.len()
	);

	#[cfg(feature = "timing")]
	{
		timing.total.inc(start_total.elapsed());
		log::info!("{:?}", timing);
	}

	Ok(TrainOutput {
		trees,
		variable_importances,
		oob_error,
		oob_error_per_observation,
	})
}

fn is_cancelled(kill_chip: Option<&KillChip>) -> bool {
	kill_chip
		.map(|kill_chip| kill_chip.is_activated())
		.unwrap_or(false)
}

/// Sample a tree's rows, grow it, and compute its out-of-bag results.
fn train_tree<C: Criterion>(
	input: &GrowTreeInput<C>,
	n_rows: usize,
	rng: &mut Xoshiro256PlusPlus,
) -> Result<TreeOutput<C::Leaf>, TrainError> {
	if is_cancelled(input.kill_chip) {
		return Err(TrainError::Cancelled);
	}
	let options = input.options;
	#[cfg(feature = "timing")]
	let start = std::time::Instant::now();
	let mut sample = sample(n_rows, options.n_rows_per_tree, options.bootstrap, rng)?;
	#[cfg(feature = "timing")]
	input.timing.sample.inc(start.elapsed());
	let grow_tree_output = grow_tree(input, &mut sample.examples_index, rng)?;
	if !options.needs_oob() {
		return Ok(TreeOutput {
			grow_tree_output,
			oob_leaves: Vec::new(),
			permutation_increases: None,
		});
	}
	#[cfg(feature = "timing")]
	let start = std::time::Instant::now();
	let oob_leaves = compute_oob_leaves(
		&grow_tree_output.tree,
		input.binned_features,
		&sample.oob_examples(),
	);
	let permutation_increases = if options.variable_importance.is_mda() {
		compute_permutation_increases(
			input.criterion,
			&grow_tree_output.tree,
			input.binned_features,
			&oob_leaves,
			rng,
		)
	} else {
		None
	};
	#[cfg(feature = "timing")]
	input.timing.compute_oob.inc(start.elapsed());
	Ok(TreeOutput {
		grow_tree_output,
		oob_leaves,
		permutation_increases,
	})
}

#[test]
fn test_validate_input() {
	let features = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]);
	assert!(validate_input(features.view(), 2, None).is_ok());
	assert!(matches!(
		validate_input(features.view(), 3, None),
		Err(TrainError::InvalidInput { .. })
	));
	let weights = arr1(&[1.0f32, -1.0]);
	assert!(matches!(
		validate_input(features.view(), 2, Some(weights.view())),
		Err(TrainError::InvalidInput { .. })
	));
	let features = arr2(&[[1.0f32, std::f32::NAN], [3.0, 4.0]]);
	let error = validate_input(features.view(), 2, None).unwrap_err();
	insta::assert_snapshot!(error.to_string(), @"invalid input: the feature value at row 0 column 1 is not finite");
}
