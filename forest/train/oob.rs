use super::binning::BinnedFeatures;
use crate::{criterion::Criterion, error::try_alloc, tree::Node, tree::Tree, TrainError};
use canopy_metrics::{Mean, StreamingMetric};
use num_traits::ToPrimitive;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

/// The leaf each out-of-bag row of a tree lands in, as `(example_index, leaf node index)` pairs.
pub fn compute_oob_leaves<L>(
	tree: &Tree<L>,
	binned_features: &BinnedFeatures,
	oob_examples: &[usize],
) -> Vec<(usize, usize)> {
	oob_examples
		.iter()
		.map(|example_index| {
			(
				*example_index,
				tree.leaf_index_binned(binned_features, *example_index),
			)
		})
		.collect()
}

/**
Compute how much a tree's out-of-bag error grows when each feature's values are shuffled among the tree's out-of-bag rows. Returns `None` if the tree has no out-of-bag rows.

A feature the tree never splits on cannot change any prediction, so its increase is zero and its values are not shuffled.
*/
pub fn compute_permutation_increases<C: Criterion>(
	criterion: &C,
	tree: &Tree<C::Leaf>,
	binned_features: &BinnedFeatures,
	oob_leaves: &[(usize, usize)],
	rng: &mut Xoshiro256PlusPlus,
) -> Option<Vec<f64>> {
	let baseline_loss = criterion.oob_loss(
		oob_leaves
			.iter()
			.map(|(example_index, node_index)| (*example_index, tree.leaf_value(*node_index))),
	)?;
	let n_features = binned_features.columns.len();
	let mut used_features = vec![false; n_features];
	for node in tree.nodes.iter() {
		if let Node::Branch(branch) = node {
			used_features[branch.feature_index] = true;
		}
	}
	let increases = (0..n_features)
		.map(|feature_index| {
			if !used_features[feature_index] {
				return 0.0;
			}
			let column = &binned_features.columns[feature_index];
			let mut permuted_bins: Vec<usize> = oob_leaves
				.iter()
				.map(|(example_index, _)| column.get(*example_index))
				.collect();
			permuted_bins.shuffle(rng);
			let permuted_loss = criterion.oob_loss(oob_leaves.iter().zip(permuted_bins.iter()).map(
				|((example_index, _), permuted_bin)| {
					let leaf_index = tree.leaf_index_with(|branch| {
						let bin = if branch.feature_index == feature_index {
							*permuted_bin
						} else {
							binned_features.columns[branch.feature_index].get(*example_index)
						};
						bin <= branch.bin_index
					});
					(*example_index, tree.leaf_value(leaf_index))
				},
			));
			permuted_loss.unwrap_or(baseline_loss) - baseline_loss
		})
		.collect();
	Some(increases)
}

/// Accumulates every tree's out-of-bag predictions for every row. Trees must be added in tree order for the result to be reproducible.
pub struct OobAccumulator {
	n_lanes: usize,
	/// (n_rows, n_lanes)
	lanes: Vec<f64>,
}

/// The out-of-bag error of the forest and of each row. Rows that no tree held out of bag have an error of NaN and are left out of the forest's error.
#[derive(Debug)]
pub struct OobError {
	pub oob_error: Option<f32>,
	pub oob_error_per_observation: Vec<f32>,
}

impl OobAccumulator {
	pub fn new<C: Criterion>(criterion: &C, n_rows: usize) -> Result<OobAccumulator, TrainError> {
		let n_lanes = criterion.n_oob_lanes();
		Ok(OobAccumulator {
			n_lanes,
			lanes: try_alloc(n_rows * n_lanes)?,
		})
	}

	pub fn add_tree<C: Criterion>(
		&mut self,
		criterion: &C,
		tree: &Tree<C::Leaf>,
		oob_leaves: &[(usize, usize)],
	) {
		for (example_index, node_index) in oob_leaves {
			let lanes =
				&mut self.lanes[example_index * self.n_lanes..(example_index + 1) * self.n_lanes];
			criterion.accumulate_oob(lanes, tree.leaf_value(*node_index));
		}
	}

	pub fn finalize<C: Criterion>(self, criterion: &C) -> OobError {
		let mut mean = Mean::default();
		let oob_error_per_observation = self
			.lanes
			.chunks(self.n_lanes)
			.enumerate()
			.map(
				|(example_index, lanes)| match criterion.oob_observation_error(lanes, example_index) {
					Some(error) => {
						mean.update(error);
						error.to_f32().unwrap()
					}
					None => std::f32::NAN,
				},
			)
			.collect();
		OobError {
			oob_error: mean.finalize().map(|oob_error| oob_error.to_f32().unwrap()),
			oob_error_per_observation,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		criterion::RegressionCriterion,
		train::binning::BinnedFeaturesColumn,
		tree::{BranchNode, LeafNode},
	};
	use ndarray::prelude::*;
	use rand_xoshiro::rand_core::SeedableRng;

	fn stump() -> Tree<f32> {
		Tree {
			nodes: vec![
				Node::Branch(BranchNode {
					left_child_index: 1,
					right_child_index: 2,
					feature_index: 0,
					split_value: 0.0,
					bin_index: 0,
					impurity: 1.0,
					impurity_decrease: 1.0,
					examples_fraction: 1.0,
				}),
				Node::Leaf(LeafNode {
					value: 0.0,
					impurity: 0.0,
					examples_fraction: 0.5,
				}),
				Node::Leaf(LeafNode {
					value: 1.0,
					impurity: 0.0,
					examples_fraction: 0.5,
				}),
			],
		}
	}

	#[test]
	fn test_oob_error_skips_rows_never_out_of_bag() {
		let labels = arr1(&[0.0f32, 1.0, 1.0]);
		let criterion = RegressionCriterion {
			labels: labels.view(),
			weights: None,
		};
		let binned_features = BinnedFeatures {
			columns: vec![BinnedFeaturesColumn::U8(vec![0, 1, 0])],
		};
		let tree = stump();
		let mut accumulator = OobAccumulator::new(&criterion, 3).unwrap();
		let oob_leaves = compute_oob_leaves(&tree, &binned_features, &[0, 2]);
		assert_eq!(oob_leaves, vec![(0, 1), (2, 1)]);
		accumulator.add_tree(&criterion, &tree, &oob_leaves);
		let output = accumulator.finalize(&criterion);
		assert_eq!(output.oob_error, Some(0.5));
		assert_eq!(output.oob_error_per_observation[0], 0.0);
		assert!(output.oob_error_per_observation[1].is_nan());
		assert_eq!(output.oob_error_per_observation[2], 1.0);
	}

	#[test]
	fn test_permuting_an_unused_feature_changes_nothing() {
		let n_rows = 40;
		let labels = Array1::from_shape_fn(n_rows, |i| if i % 2 == 0 { 0.0f32 } else { 1.0 });
		let criterion = RegressionCriterion {
			labels: labels.view(),
			weights: None,
		};
		let binned_features = BinnedFeatures {
			columns: vec![
				BinnedFeaturesColumn::U8((0..n_rows).map(|i| (i % 2).to_u8().unwrap()).collect()),
				BinnedFeaturesColumn::U8((0..n_rows).map(|i| (i % 5).to_u8().unwrap()).collect()),
			],
		};
		let tree = stump();
		let oob_examples: Vec<usize> = (0..n_rows).collect();
		let oob_leaves = compute_oob_leaves(&tree, &binned_features, &oob_examples);
		let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
		let increases =
			compute_permutation_increases(&criterion, &tree, &binned_features, &oob_leaves, &mut rng)
				.unwrap();
		// The stump predicts every row exactly, so shuffling the feature it splits on can only hurt.
		assert!(increases[0] > 0.0);
		assert_eq!(increases[1], 0.0);
		assert_eq!(
			compute_permutation_increases(&criterion, &tree, &binned_features, &[], &mut rng),
			None
		);
	}
}
