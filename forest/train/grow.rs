#[cfg(feature = "timing")]
use crate::timing::Timing;
use super::{
	bin_stats::{compute_bin_stats, compute_node_stats, NodeStats},
	binning::{BinnedFeatures, BinningInstruction},
	partition::{rearrange_examples_index, split_ranges_mut},
	sampling::choose_features,
	split::{choose_best_split, is_leaf_without_scan, Split},
};
use crate::{
	criterion::Criterion,
	error::try_alloc,
	options::ResolvedOptions,
	tree::{BranchNode, LeafNode, Node, Tree},
	TrainError,
};
use canopy_progress::KillChip;
use canopy_thread_pool::pzip;
use itertools::izip;
use num_traits::ToPrimitive;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use std::ops::Range;

/// Everything `grow_tree` reads that is shared by all trees in the forest.
pub struct GrowTreeInput<'a, C> {
	pub criterion: &'a C,
	pub binned_features: &'a BinnedFeatures,
	pub binning_instructions: &'a [BinningInstruction],
	pub options: &'a ResolvedOptions,
	pub kill_chip: Option<&'a KillChip>,
	#[cfg(feature = "timing")]
	pub timing: &'a Timing,
}

#[derive(Debug)]
pub struct GrowTreeOutput<L> {
	pub tree: Tree<L>,
	/// For each feature, the impurity decreases of the splits on it, each weighted by the fraction of the tree's rows that reached the split.
	pub impurity_decreases: Vec<f64>,
}

/// A node of the tree being grown. Its rows are `examples_index[examples_index_range]`.
struct TrainNode<L> {
	examples_index_range: Range<usize>,
	depth: usize,
	impurity: f64,
	state: TrainNodeState<L>,
}

enum TrainNodeState<L> {
	Active,
	Branch {
		split: Split,
		left_child_index: usize,
		right_child_index: usize,
	},
	Leaf(L),
}

impl<L> TrainNode<L> {
	fn new(examples_index_range: Range<usize>, depth: usize) -> TrainNode<L> {
		TrainNode {
			examples_index_range,
			depth,
			impurity: 0.0,
			state: TrainNodeState::Active,
		}
	}
}

/**
Grow a tree one level at a time. Each level goes through four phases, and every phase but the second runs the level's nodes in parallel:

1. Compute the totals of every active node.
2. In node order, decide which nodes must be leaves and draw the candidate features of the rest from `rng`.
3. Build the histograms of the candidate features and choose each node's best split.
4. Append the children of the nodes that split to the node list, then stably partition each split node's rows in place.

`examples_index` holds the tree's rows. When this function returns, the rows of every leaf are contiguous.
*/
pub fn grow_tree<C: Criterion>(
	input: &GrowTreeInput<C>,
	examples_index: &mut [usize],
	rng: &mut Xoshiro256PlusPlus,
) -> Result<GrowTreeOutput<C::Leaf>, TrainError> {
	let GrowTreeInput {
		criterion,
		binned_features,
		binning_instructions,
		options,
		kill_chip,
		..
	} = *input;
	let n_examples = examples_index.len();
	let n_features = binned_features.columns.len();
	let mut examples_index_scratch: Vec<usize> = try_alloc(n_examples)?;
	let mut nodes: Vec<TrainNode<C::Leaf>> = vec![TrainNode::new(0..n_examples, 0)];
	let mut impurity_decreases = vec![0.0; n_features];
	let mut active_node_indexes = vec![0];
	while !active_node_indexes.is_empty() {
		if kill_chip
			.map(|kill_chip| kill_chip.is_activated())
			.unwrap_or(false)
		{
			return Err(TrainError::Cancelled);
		}
		log::trace!(
			"growing level {} with {} nodes",
			nodes[active_node_indexes[0]].depth,
			active_node_indexes.len()
		);

		// Compute the totals of every active node.
		#[cfg(feature = "timing")]
		let start = std::time::Instant::now();
		let node_stats: Vec<NodeStats> = {
			let examples_index: &[usize] = examples_index;
			let nodes = &nodes;
			active_node_indexes
				.par_iter()
				.map(|node_index| {
					let range = nodes[*node_index].examples_index_range.clone();
					compute_node_stats(criterion, &examples_index[range])
				})
				.collect()
		};
		#[cfg(feature = "timing")]
		input.timing.compute_node_stats.inc(start.elapsed());

		// Draw the candidate features of the nodes that may split. This is the only place a level consumes randomness, and it does so in node order.
		let candidate_feature_indexes: Vec<Option<Vec<usize>>> =
			izip!(&active_node_indexes, &node_stats)
				.map(|(node_index, node_stats)| {
					if is_leaf_without_scan(node_stats, nodes[*node_index].depth, options) {
						None
					} else {
						Some(choose_features(n_features, options.features_per_node, rng))
					}
				})
				.collect();

		// Build the histograms and choose the best split of each node.
		let splits: Vec<Option<Split>> = {
			let examples_index: &[usize] = examples_index;
			let nodes = &nodes;
			pzip!(&active_node_indexes, &node_stats, candidate_feature_indexes)
				.map(|(node_index, node_stats, feature_indexes)| {
					let feature_indexes = feature_indexes?;
					let range = nodes[*node_index].examples_index_range.clone();
					#[cfg(feature = "timing")]
					let start = std::time::Instant::now();
					let bin_stats = compute_bin_stats(
						criterion,
						binned_features,
						binning_instructions,
						feature_indexes,
						&examples_index[range],
					);
					#[cfg(feature = "timing")]
					input.timing.compute_bin_stats.inc(start.elapsed());
					#[cfg(feature = "timing")]
					let start = std::time::Instant::now();
					let split = choose_best_split(
						criterion,
						&bin_stats,
						binning_instructions,
						node_stats,
						options,
					);
					#[cfg(feature = "timing")]
					input.timing.choose_best_split.inc(start.elapsed());
					split
				})
				.collect()
		};

		// Turn each active node into a branch or a leaf. Children are appended in the order of their parents, which keeps the node list in breadth-first order and the children's row ranges ascending.
		let mut next_active_node_indexes = Vec::new();
		let mut partitions: Vec<(Range<usize>, usize, usize, usize)> = Vec::new();
		for (node_index, node_stats, split) in izip!(&active_node_indexes, node_stats, splits) {
			let node_index = *node_index;
			let range = nodes[node_index].examples_index_range.clone();
			let depth = nodes[node_index].depth;
			nodes[node_index].impurity = node_stats.impurity;
			let split = match split {
				Some(split) => split,
				None => {
					nodes[node_index].state = TrainNodeState::Leaf(criterion.leaf(&node_stats.stats));
					continue;
				}
			};
			let left_range = range.start..range.start + split.left_n_examples;
			let right_range = left_range.end..range.end;
			let left_child_index = nodes.len();
			nodes.push(TrainNode::new(left_range, depth + 1));
			let right_child_index = nodes.len();
			nodes.push(TrainNode::new(right_range, depth + 1));
			next_active_node_indexes.push(left_child_index);
			next_active_node_indexes.push(right_child_index);
			impurity_decreases[split.feature_index] += split.impurity_decrease
				* node_stats.n_examples.to_f64().unwrap()
				/ n_examples.to_f64().unwrap();
			partitions.push((
				range,
				split.feature_index,
				split.bin_index,
				split.left_n_examples,
			));
			nodes[node_index].state = TrainNodeState::Branch {
				split,
				left_child_index,
				right_child_index,
			};
		}

		// Partition the rows of every node that split. The nodes' ranges are disjoint, so each is rearranged by its own task.
		#[cfg(feature = "timing")]
		let start = std::time::Instant::now();
		let ranges: Vec<Range<usize>> = partitions.iter().map(|partition| partition.0.clone()).collect();
		let examples_index_slices = split_ranges_mut(&mut *examples_index, ranges.clone());
		let examples_index_scratch_slices = split_ranges_mut(&mut examples_index_scratch, ranges);
		pzip!(examples_index_slices, examples_index_scratch_slices, &partitions).for_each(
			|(examples_index, examples_index_scratch, partition)| {
				let (_, feature_index, bin_index, left_n_examples) = partition;
				let n_left = rearrange_examples_index(
					binned_features,
					*feature_index,
					*bin_index,
					examples_index,
					examples_index_scratch,
				);
				debug_assert_eq!(n_left, *left_n_examples);
			},
		);
		#[cfg(feature = "timing")]
		input.timing.rearrange_examples_index.inc(start.elapsed());

		active_node_indexes = next_active_node_indexes;
	}

	let n_examples = n_examples.to_f32().unwrap();
	let nodes = nodes
		.into_iter()
		.map(|node| {
			let examples_fraction =
				(node.examples_index_range.end - node.examples_index_range.start).to_f32().unwrap()
					/ n_examples;
			let impurity = node.impurity.to_f32().unwrap();
			match node.state {
				TrainNodeState::Branch {
					split,
					left_child_index,
					right_child_index,
				} => Node::Branch(BranchNode {
					left_child_index,
					right_child_index,
					feature_index: split.feature_index,
					split_value: split.split_value,
					bin_index: split.bin_index,
					impurity,
					impurity_decrease: split.impurity_decrease.to_f32().unwrap(),
					examples_fraction,
				}),
				TrainNodeState::Leaf(value) => Node::Leaf(LeafNode {
					value,
					impurity,
					examples_fraction,
				}),
				TrainNodeState::Active => unreachable!(),
			}
		})
		.collect();
	Ok(GrowTreeOutput {
		tree: Tree { nodes },
		impurity_decreases,
	})
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		criterion::RegressionCriterion,
		options::Task,
		train::binning::{compute_binned_features, compute_binning_instructions},
		TrainOptions,
	};
	use ndarray::prelude::*;
	use rand_xoshiro::rand_core::SeedableRng;

	struct Fixture {
		features: Array2<f32>,
		labels: Array1<f32>,
		options: ResolvedOptions,
	}

	impl Fixture {
		fn new(n_rows: usize, labels: impl Fn(usize) -> f32, options: TrainOptions) -> Fixture {
			let features = Array2::from_shape_fn((n_rows, 3), |(i, j)| {
				((i * (2 * j + 5) * 37) % 101).to_f32().unwrap()
			});
			let labels = Array1::from_shape_fn(n_rows, labels);
			let options = options.resolve(Task::Regression, n_rows, 3).unwrap();
			Fixture {
				features,
				labels,
				options,
			}
		}

		fn grow(
			&self,
			examples_index: &mut [usize],
			kill_chip: Option<&KillChip>,
		) -> Result<(GrowTreeOutput<f32>, BinnedFeatures), TrainError> {
			let binning_instructions =
				compute_binning_instructions(self.features.view(), &self.options, &|| {});
			let binned_features =
				compute_binned_features(self.features.view(), &binning_instructions, &|| {});
			let criterion = RegressionCriterion {
				labels: self.labels.view(),
				weights: None,
			};
			#[cfg(feature = "timing")]
			let timing = Timing::new();
			let input = GrowTreeInput {
				criterion: &criterion,
				binned_features: &binned_features,
				binning_instructions: &binning_instructions,
				options: &self.options,
				kill_chip,
				#[cfg(feature = "timing")]
				timing: &timing,
			};
			let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
			let output = grow_tree(&input, examples_index, &mut rng)?;
			Ok((output, binned_features))
		}
	}

	#[test]
	fn test_rows_are_conserved() {
		let fixture = Fixture::new(
			500,
			|i| (i % 17).to_f32().unwrap(),
			TrainOptions {
				features_per_node: Some(3),
				..Default::default()
			},
		);
		// Duplicated rows, as in a bootstrap sample.
		let mut examples_index: Vec<usize> = (0..500).chain(0..100).collect();
		examples_index.sort_unstable();
		let mut expected = examples_index.clone();
		let (output, binned_features) = fixture.grow(&mut examples_index, None).unwrap();
		let tree = &output.tree;
		// The rows are a permutation of the sample.
		let mut rows = examples_index.clone();
		rows.sort_unstable();
		expected.sort_unstable();
		assert_eq!(rows, expected);
		// The rows of each leaf are contiguous, and their count matches the leaf's fraction.
		let leaf_indexes: Vec<usize> = examples_index
			.iter()
			.map(|example_index| tree.leaf_index_binned(&binned_features, *example_index))
			.collect();
		let n_runs = 1 + leaf_indexes
			.windows(2)
			.filter(|window| window[0] != window[1])
			.count();
		assert_eq!(n_runs, tree.n_leaves());
		for (node_index, node) in tree.nodes.iter().enumerate() {
			if let Node::Leaf(leaf) = node {
				let n_rows = leaf_indexes.iter().filter(|leaf_index| **leaf_index == node_index).count();
				assert!(n_rows >= 5);
				let fraction = n_rows.to_f32().unwrap() / 600.0;
				assert!((leaf.examples_fraction - fraction).abs() < 1e-6);
			}
		}
		// Children always come after their parents.
		for (node_index, node) in tree.nodes.iter().enumerate() {
			if let Node::Branch(branch) = node {
				assert!(branch.left_child_index > node_index);
				assert_eq!(branch.right_child_index, branch.left_child_index + 1);
			}
		}
	}

	#[test]
	fn test_constant_labels_grow_a_single_leaf() {
		let fixture = Fixture::new(200, |_| 4.25, TrainOptions::default());
		let mut examples_index: Vec<usize> = (0..200).collect();
		let (output, _) = fixture.grow(&mut examples_index, None).unwrap();
		assert_eq!(
			output.tree.nodes,
			vec![Node::Leaf(LeafNode {
				value: 4.25,
				impurity: 0.0,
				examples_fraction: 1.0,
			})]
		);
		assert!(output.impurity_decreases.iter().all(|value| *value == 0.0));
	}

	#[test]
	fn test_max_tree_depth() {
		let fixture = Fixture::new(
			300,
			|i| i.to_f32().unwrap(),
			TrainOptions {
				max_tree_depth: 2,
				min_observations_in_leaf_node: Some(1),
				..Default::default()
			},
		);
		let mut examples_index: Vec<usize> = (0..300).collect();
		let (output, _) = fixture.grow(&mut examples_index, None).unwrap();
		assert_eq!(output.tree.depth(), 2);
		assert_eq!(output.tree.n_leaves(), 4);
	}

	#[test]
	fn test_cancelled_before_the_first_level() {
		let fixture = Fixture::new(100, |i| i.to_f32().unwrap(), TrainOptions::default());
		let kill_chip = KillChip::default();
		kill_chip.activate();
		let mut examples_index: Vec<usize> = (0..100).collect();
		assert!(matches!(
			fixture.grow(&mut examples_index, Some(&kill_chip)),
			Err(TrainError::Cancelled)
		));
	}
}
