use super::{
	bin_stats::{BinStats, NodeStats},
	binning::BinningInstruction,
};
use crate::{criterion::Criterion, options::ResolvedOptions};
use itertools::izip;
use num_traits::ToPrimitive;
use rayon::prelude::*;

/// A split sends the rows whose bin for `feature_index` is at most `bin_index` to the left child. Equivalently, it sends the rows whose value is at most `split_value` to the left child.
#[derive(Clone, Debug, PartialEq)]
pub struct Split {
	pub feature_index: usize,
	pub bin_index: usize,
	pub split_value: f32,
	pub impurity_decrease: f64,
	pub left_n_examples: usize,
	pub right_n_examples: usize,
}

/// Decide whether a node must be a leaf before looking at any histogram.
pub fn is_leaf_without_scan(node_stats: &NodeStats, depth: usize, options: &ResolvedOptions) -> bool {
	let max_depth_reached = options
		.max_tree_depth
		.map(|max_tree_depth| depth >= max_tree_depth)
		.unwrap_or(false);
	max_depth_reached
		|| node_stats.n_examples < options.min_observations_in_split_node
		|| node_stats.n_examples < 2 * options.min_observations_in_leaf_node
		|| node_stats.impurity <= options.impurity_threshold
}

/**
Choose the split with the largest impurity decrease among every boundary between two bins of every candidate feature. Empty bins are not boundaries. A split is only valid if each child receives at least `min_observations_in_leaf_node` rows, and it is only returned if its decrease is strictly greater than `min_impurity_decrease_in_split_node`.

Ties go to the lowest feature index, then to the lowest bin index.
*/
pub fn choose_best_split<C: Criterion>(
	criterion: &C,
	bin_stats: &BinStats,
	binning_instructions: &[BinningInstruction],
	node_stats: &NodeStats,
	options: &ResolvedOptions,
) -> Option<Split> {
	let best_split_for_each_feature: Vec<Option<Split>> = bin_stats
		.feature_indexes
		.par_iter()
		.enumerate()
		.map(|(position, feature_index)| {
			choose_best_split_for_feature(
				criterion,
				bin_stats,
				position,
				*feature_index,
				&binning_instructions[*feature_index],
				node_stats,
				options,
			)
		})
		.collect();
	let mut best_split: Option<Split> = None;
	for split in best_split_for_each_feature.into_iter().flatten() {
		if best_split
			.as_ref()
			.map(|best_split| split.impurity_decrease > best_split.impurity_decrease)
			.unwrap_or(true)
		{
			best_split = Some(split);
		}
	}
	best_split.filter(|split| {
		split.impurity_decrease > options.min_impurity_decrease_in_split_node
	})
}

fn choose_best_split_for_feature<C: Criterion>(
	criterion: &C,
	bin_stats: &BinStats,
	position: usize,
	feature_index: usize,
	binning_instruction: &BinningInstruction,
	node_stats: &NodeStats,
	options: &ResolvedOptions,
) -> Option<Split> {
	let min_observations_in_leaf_node = options.min_observations_in_leaf_node;
	let mut left = vec![0.0; bin_stats.stride];
	let mut right = vec![0.0; bin_stats.stride - 1];
	let mut best_split: Option<Split> = None;
	// Sending every row left is not a split, so the overflow bin is never a boundary.
	for bin_index in 0..bin_stats.n_bins(position) - 1 {
		let bin = bin_stats.bin(position, bin_index);
		if bin[0] == 0.0 {
			continue;
		}
		for (left, value) in izip!(left.iter_mut(), bin) {
			*left += value;
		}
		let left_n_examples = left[0].to_usize().unwrap();
		let right_n_examples = node_stats.n_examples - left_n_examples;
		if left_n_examples < min_observations_in_leaf_node {
			continue;
		}
		if right_n_examples < min_observations_in_leaf_node {
			break;
		}
		for (right, parent, left) in izip!(right.iter_mut(), &node_stats.stats, &left[1..]) {
			*right = parent - left;
		}
		let impurity_decrease = criterion.impurity_decrease(&node_stats.stats, &left[1..], &right);
		let is_best = best_split
			.as_ref()
			.map(|best_split| impurity_decrease > best_split.impurity_decrease)
			.unwrap_or(true);
		if is_best {
			best_split = Some(Split {
				feature_index,
				bin_index,
				split_value: binning_instruction.thresholds[bin_index],
				impurity_decrease,
				left_n_examples,
				right_n_examples,
			});
		}
	}
	best_split
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		criterion::{ClassificationCriterion, RegressionCriterion},
		options::Task,
		train::{
			bin_stats::{compute_bin_stats, compute_node_stats},
			binning::{compute_binned_features, compute_binning_instructions},
		},
		ClassImpurity, TrainOptions,
	};
	use ndarray::prelude::*;

	fn resolve(options: TrainOptions) -> ResolvedOptions {
		options.resolve(Task::Regression, 100, 3).unwrap()
	}

	#[test]
	fn test_best_split_dominates_every_candidate() {
		let features = Array2::from_shape_fn((60, 3), |(i, j)| {
			((i * (j + 3) * 17) % 23).to_f32().unwrap()
		});
		let labels = Array1::from_shape_fn(60, |i| {
			features[(i, 1)] * 0.3 + ((i * 13) % 5).to_f32().unwrap()
		});
		let criterion = RegressionCriterion {
			labels: labels.view(),
			weights: None,
		};
		let options = resolve(TrainOptions {
			min_observations_in_leaf_node: Some(3),
			..Default::default()
		});
		let binning_instructions = compute_binning_instructions(features.view(), &options, &|| {});
		let binned_features =
			compute_binned_features(features.view(), &binning_instructions, &|| {});
		let examples_index: Vec<usize> = (0..60).collect();
		let node_stats = compute_node_stats(&criterion, &examples_index);
		let bin_stats = compute_bin_stats(
			&criterion,
			&binned_features,
			&binning_instructions,
			vec![0, 1, 2],
			&examples_index,
		);
		let best_split = choose_best_split(
			&criterion,
			&bin_stats,
			&binning_instructions,
			&node_stats,
			&options,
		)
		.unwrap();
		// Enumerate every threshold of every feature directly from the rows.
		for feature_index in 0..3 {
			for threshold in binning_instructions[feature_index].thresholds.iter() {
				let mut left = vec![0.0; 3];
				let mut right = vec![0.0; 3];
				let mut left_n_examples = 0;
				for example_index in 0..60 {
					if features[(example_index, feature_index)] <= *threshold {
						criterion.accumulate(&mut left, example_index);
						left_n_examples += 1;
					} else {
						criterion.accumulate(&mut right, example_index);
					}
				}
				if left_n_examples < 3 || 60 - left_n_examples < 3 {
					continue;
				}
				let impurity_decrease =
					criterion.impurity_decrease(&node_stats.stats, &left, &right);
				assert!(best_split.impurity_decrease >= impurity_decrease - 1e-9);
			}
		}
	}

	#[test]
	fn test_perfect_class_split() {
		let features = arr2(&[[1.0f32, 5.0], [2.0, 5.0], [3.0, 5.0], [4.0, 5.0]]);
		let labels = arr1(&[0usize, 0, 1, 1]);
		let criterion = ClassificationCriterion {
			labels: labels.view(),
			weights: None,
			n_classes: 2,
			class_impurity: ClassImpurity::Gini,
		};
		let options = TrainOptions::default()
			.resolve(Task::Classification, 4, 2)
			.unwrap();
		let binning_instructions = compute_binning_instructions(features.view(), &options, &|| {});
		let binned_features =
			compute_binned_features(features.view(), &binning_instructions, &|| {});
		let examples_index = vec![0, 1, 2, 3];
		let node_stats = compute_node_stats(&criterion, &examples_index);
		let bin_stats = compute_bin_stats(
			&criterion,
			&binned_features,
			&binning_instructions,
			vec![0, 1],
			&examples_index,
		);
		let split = choose_best_split(
			&criterion,
			&bin_stats,
			&binning_instructions,
			&node_stats,
			&options,
		)
		.unwrap();
		assert_eq!(
			split,
			Split {
				feature_index: 0,
				bin_index: 1,
				split_value: 2.0,
				impurity_decrease: 0.5,
				left_n_examples: 2,
				right_n_examples: 2,
			}
		);
	}

	#[test]
	fn test_min_impurity_decrease_is_strict() {
		let features = arr2(&[[1.0f32], [2.0], [3.0], [4.0]]);
		let labels = arr1(&[0usize, 0, 1, 1]);
		let criterion = ClassificationCriterion {
			labels: labels.view(),
			weights: None,
			n_classes: 2,
			class_impurity: ClassImpurity::Gini,
		};
		let options = TrainOptions {
			min_impurity_decrease_in_split_node: 0.5,
			..Default::default()
		}
		.resolve(Task::Classification, 4, 1)
		.unwrap();
		let binning_instructions = compute_binning_instructions(features.view(), &options, &|| {});
		let binned_features =
			compute_binned_features(features.view(), &binning_instructions, &|| {});
		let examples_index = vec![0, 1, 2, 3];
		let node_stats = compute_node_stats(&criterion, &examples_index);
		let bin_stats = compute_bin_stats(
			&criterion,
			&binned_features,
			&binning_instructions,
			vec![0],
			&examples_index,
		);
		assert_eq!(
			choose_best_split(
				&criterion,
				&bin_stats,
				&binning_instructions,
				&node_stats,
				&options
			),
			None
		);
	}

	#[test]
	fn test_leaf_checks() {
		let options = resolve(TrainOptions {
			max_tree_depth: 2,
			..Default::default()
		});
		let node_stats = |n_examples, impurity| NodeStats {
			n_examples,
			stats: vec![],
			impurity,
		};
		assert!(!is_leaf_without_scan(&node_stats(20, 1.0), 1, &options));
		assert!(is_leaf_without_scan(&node_stats(20, 1.0), 2, &options));
		assert!(is_leaf_without_scan(&node_stats(20, 0.0), 0, &options));
		// Regression puts at least 5 rows in each leaf by default.
		assert!(is_leaf_without_scan(&node_stats(9, 1.0), 0, &options));
		assert!(!is_leaf_without_scan(&node_stats(10, 1.0), 0, &options));
	}
}
