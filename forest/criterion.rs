/*!
A `Criterion` is everything training needs to know about the task: which statistics to accumulate per bin, how to turn them into an impurity and a leaf value, and how to score out-of-bag predictions. Regression and classification share every other line of the training code.
*/

use crate::{classifier::ClassificationLeaf, ClassImpurity};
use canopy_metrics::{merge_mean_m2, Accuracy, MeanSquaredError, StreamingMetric};
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use std::fmt::Debug;

/// Nodes with more rows than this compute their impurity in parallel, one block of this many rows per task.
pub const NODE_IMPURITY_BLOCK_SIZE: usize = 16384;

/// Regression impurity decreases smaller than this fraction of the magnitude of the terms they are computed from are treated as zero.
const IMPURITY_DECREASE_RELATIVE_TOLERANCE: f64 = 16.0 * std::f64::EPSILON;

pub trait Criterion: Sync {
	type Leaf: Clone + Debug + Send + Sync;

	/// The number of statistics accumulated per bin, not counting the row count.
	fn n_stats(&self) -> usize;

	/// Add the statistics of the row `example_index` to `stats`.
	fn accumulate(&self, stats: &mut [f64], example_index: usize);

	/// The total weight of the rows summarized by `stats`.
	fn weight(&self, stats: &[f64]) -> f64;

	fn impurity(&self, stats: &[f64]) -> f64;

	/// The impurity of a node computed from its rows rather than its summed statistics. A node whose rows all have the same response must get exactly zero.
	fn node_impurity(&self, _examples_index: &[usize], stats: &[f64]) -> f64 {
		self.impurity(stats)
	}

	/// The decrease in impurity from replacing `parent` with `left` and `right`, each weighted by its share of the parent's weight.
	fn impurity_decrease(&self, parent: &[f64], left: &[f64], right: &[f64]) -> f64 {
		let parent_weight = self.weight(parent);
		let left_weight = self.weight(left);
		let right_weight = self.weight(right);
		self.impurity(parent)
			- (left_weight / parent_weight) * self.impurity(left)
			- (right_weight / parent_weight) * self.impurity(right)
	}

	fn leaf(&self, stats: &[f64]) -> Self::Leaf;

	/// The number of values accumulated per row across the trees that hold the row out of bag.
	fn n_oob_lanes(&self) -> usize;

	fn accumulate_oob(&self, lanes: &mut [f64], leaf: &Self::Leaf);

	/// The out-of-bag error of a single row, or `None` if no tree held the row out of bag.
	fn oob_observation_error(&self, lanes: &[f64], example_index: usize) -> Option<f64>;

	/// The error of one tree's predictions for `(example_index, leaf)` pairs, mean squared error for regression and misclassification rate for classification.
	fn oob_loss<'a>(&self, predictions: impl Iterator<Item = (usize, &'a Self::Leaf)>) -> Option<f64>
	where
		Self::Leaf: 'a;
}

fn example_weight(weights: Option<ArrayView1<f32>>, example_index: usize) -> f64 {
	weights
		.map(|weights| weights[example_index].to_f64().unwrap())
		.unwrap_or(1.0)
}

/// Regression splits minimize the weighted variance of the labels. The statistics are the sums of weights, weighted labels, and weighted squared labels.
pub struct RegressionCriterion<'a> {
	pub labels: ArrayView1<'a, f32>,
	pub weights: Option<ArrayView1<'a, f32>>,
}

impl<'a> Criterion for RegressionCriterion<'a> {
	type Leaf = f32;

	fn n_stats(&self) -> usize {
		3
	}

	#[inline]
	fn accumulate(&self, stats: &mut [f64], example_index: usize) {
		let weight = example_weight(self.weights, example_index);
		let label = self.labels[example_index].to_f64().unwrap();
		stats[0] += weight;
		stats[1] += weight * label;
		stats[2] += weight * label * label;
	}

	fn weight(&self, stats: &[f64]) -> f64 {
		stats[0]
	}

	fn impurity(&self, stats: &[f64]) -> f64 {
		let weight = stats[0];
		if weight <= 0.0 {
			return 0.0;
		}
		((stats[2] - stats[1] * stats[1] / weight) / weight).max(0.0)
	}

	/// Welford's update keeps the sum of squared deviations of identical labels at exactly zero, which the sums of squares do not.
	fn node_impurity(&self, examples_index: &[usize], _stats: &[f64]) -> f64 {
		let partials: Vec<(f64, f64, f64)> = examples_index
			.par_chunks(NODE_IMPURITY_BLOCK_SIZE)
			.map(|examples_index| {
				let mut weight_sum = 0.0;
				let mut mean = 0.0;
				let mut m2 = 0.0;
				for example_index in examples_index {
					let weight = example_weight(self.weights, *example_index);
					if weight == 0.0 {
						continue;
					}
					let label = self.labels[*example_index].to_f64().unwrap();
					weight_sum += weight;
					let delta = label - mean;
					mean += delta * (weight / weight_sum);
					m2 += weight * delta * (label - mean);
				}
				(weight_sum, mean, m2)
			})
			.collect();
		let (weight, _, m2) = partials.into_iter().fold(
			(0.0, 0.0, 0.0),
			|(weight_a, mean_a, m2_a), (weight_b, mean_b, m2_b)| {
				let (mean, m2) = merge_mean_m2(weight_a, mean_a, m2_a, weight_b, mean_b, m2_b);
				(weight_a + weight_b, mean, m2)
			},
		);
		if weight <= 0.0 {
			0.0
		} else {
			m2 / weight
		}
	}

	/// The sums of squared labels cancel out of the variance decrease, so it is computed from the weights and weighted label sums alone. Differences within rounding error of the three terms are reported as zero, so a split whose children have the parent's mean never beats `min_impurity_decrease_in_split_node`.
	fn impurity_decrease(&self, parent: &[f64], left: &[f64], right: &[f64]) -> f64 {
		let parent_weight = parent[0];
		if left[0] <= 0.0 || right[0] <= 0.0 {
			return 0.0;
		}
		let left_term = left[1] * left[1] / left[0];
		let right_term = right[1] * right[1] / right[0];
		let parent_term = parent[1] * parent[1] / parent_weight;
		let difference = left_term + right_term - parent_term;
		let tolerance =
			IMPURITY_DECREASE_RELATIVE_TOLERANCE * (left_term + right_term + parent_term);
		if difference <= tolerance {
			return 0.0;
		}
		difference / parent_weight
	}

	fn leaf(&self, stats: &[f64]) -> f32 {
		if stats[0] <= 0.0 {
			return 0.0;
		}
		(stats[1] / stats[0]).to_f32().unwrap()
	}

	fn n_oob_lanes(&self) -> usize {
		2
	}

	fn accumulate_oob(&self, lanes: &mut [f64], leaf: &f32) {
		lanes[0] += leaf.to_f64().unwrap();
		lanes[1] += 1.0;
	}

	fn oob_observation_error(&self, lanes: &[f64], example_index: usize) -> Option<f64> {
		if lanes[1] == 0.0 {
			return None;
		}
		let prediction = lanes[0] / lanes[1];
		let label = self.labels[example_index].to_f64().unwrap();
		Some((prediction - label).powi(2))
	}

	fn oob_loss<'b>(&self, predictions: impl Iterator<Item = (usize, &'b f32)>) -> Option<f64> {
		let mut mean_squared_error = MeanSquaredError::new();
		for (example_index, prediction) in predictions {
			mean_squared_error.update((
				prediction.to_f64().unwrap(),
				self.labels[example_index].to_f64().unwrap(),
			));
		}
		mean_squared_error.finalize()
	}
}

/// Classification splits minimize the Gini impurity or the entropy of the class distribution. The statistics are the sums of weights of each class.
pub struct ClassificationCriterion<'a> {
	pub labels: ArrayView1<'a, usize>,
	pub weights: Option<ArrayView1<'a, f32>>,
	pub n_classes: usize,
	pub class_impurity: ClassImpurity,
}

/// The index of the largest value. Ties go to the lowest index.
fn argmax(values: &[f64]) -> usize {
	let mut best = 0;
	for (index, value) in values.iter().enumerate() {
		if *value > values[best] {
			best = index;
		}
	}
	best
}

impl<'a> Criterion for ClassificationCriterion<'a> {
	type Leaf = ClassificationLeaf;

	fn n_stats(&self) -> usize {
		self.n_classes
	}

	#[inline]
	fn accumulate(&self, stats: &mut [f64], example_index: usize) {
		stats[self.labels[example_index]] += example_weight(self.weights, example_index);
	}

	fn weight(&self, stats: &[f64]) -> f64 {
		stats.iter().sum()
	}

	fn impurity(&self, stats: &[f64]) -> f64 {
		let weight = self.weight(stats);
		if weight <= 0.0 {
			return 0.0;
		}
		match self.class_impurity {
			ClassImpurity::Gini => {
				1.0 - stats
					.iter()
					.map(|class_weight| (class_weight / weight).powi(2))
					.sum::<f64>()
			}
			ClassImpurity::Entropy => -stats
				.iter()
				.filter(|class_weight| **class_weight > 0.0)
				.map(|class_weight| {
					let probability = class_weight / weight;
					probability * probability.ln()
				})
				.sum::<f64>(),
		}
	}

	fn leaf(&self, stats: &[f64]) -> ClassificationLeaf {
		let weight = self.weight(stats);
		let probabilities = stats
			.iter()
			.map(|class_weight| {
				if weight > 0.0 {
					(class_weight / weight).to_f32().unwrap()
				} else {
					0.0
				}
			})
			.collect();
		ClassificationLeaf {
			class: argmax(stats),
			probabilities,
		}
	}

	fn n_oob_lanes(&self) -> usize {
		self.n_classes + 1
	}

	fn accumulate_oob(&self, lanes: &mut [f64], leaf: &ClassificationLeaf) {
		lanes[leaf.class] += 1.0;
		lanes[self.n_classes] += 1.0;
	}

	fn oob_observation_error(&self, lanes: &[f64], example_index: usize) -> Option<f64> {
		if lanes[self.n_classes] == 0.0 {
			return None;
		}
		let prediction = argmax(&lanes[..self.n_classes]);
		Some(if prediction == self.labels[example_index] {
			0.0
		} else {
			1.0
		})
	}

	fn oob_loss<'b>(
		&self,
		predictions: impl Iterator<Item = (usize, &'b ClassificationLeaf)>,
	) -> Option<f64> {
		let mut accuracy = Accuracy::new();
		for (example_index, leaf) in predictions {
			accuracy.update((leaf.class, self.labels[example_index]));
		}
		accuracy.finalize().map(|accuracy| 1.0 - accuracy)
	}
}

#[test]
fn test_constant_labels_have_zero_node_impurity() {
	let labels = Array1::from_elem(40_000, 0.1f32);
	let criterion = RegressionCriterion {
		labels: labels.view(),
		weights: None,
	};
	let examples_index: Vec<usize> = (0..labels.len()).collect();
	let mut stats = vec![0.0; 3];
	for example_index in examples_index.iter() {
		criterion.accumulate(&mut stats, *example_index);
	}
	assert_eq!(criterion.node_impurity(&examples_index, &stats), 0.0);
}

#[test]
fn test_variance_decrease_matches_weighted_impurities() {
	let labels = arr1(&[1.0f32, 2.0, 3.0, 10.0, 11.0]);
	let criterion = RegressionCriterion {
		labels: labels.view(),
		weights: None,
	};
	let stats = |examples: &[usize]| {
		let mut stats = vec![0.0; 3];
		for example_index in examples {
			criterion.accumulate(&mut stats, *example_index);
		}
		stats
	};
	let parent = stats(&[0, 1, 2, 3, 4]);
	let left = stats(&[0, 1, 2]);
	let right = stats(&[3, 4]);
	let expected = criterion.impurity(&parent)
		- 0.6 * criterion.impurity(&left)
		- 0.4 * criterion.impurity(&right);
	let decrease = criterion.impurity_decrease(&parent, &left, &right);
	assert!((decrease - expected).abs() < 1e-9);
	assert!(decrease > 0.0);
}

#[test]
fn test_children_with_the_parent_mean_do_not_decrease_impurity() {
	let labels = arr1(&[0.3f32]);
	let criterion = RegressionCriterion {
		labels: labels.view(),
		weights: None,
	};
	let left = [1.0, 0.3, 0.09];
	let right = [2.0, 0.6, 0.18];
	let parent = [3.0, 0.3 + 0.6, 0.09 + 0.18];
	assert_eq!(criterion.impurity_decrease(&parent, &left, &right), 0.0);
	let left = [2.0, 0.2, 0.1];
	let right = [5.0, 0.5, 0.3];
	let parent = [7.0, 0.2 + 0.5, 0.1 + 0.3];
	assert_eq!(criterion.impurity_decrease(&parent, &left, &right), 0.0);
}

#[test]
fn test_class_impurities() {
	let labels = arr1(&[0usize, 0, 1, 1]);
	let gini = ClassificationCriterion {
		labels: labels.view(),
		weights: None,
		n_classes: 2,
		class_impurity: ClassImpurity::Gini,
	};
	assert_eq!(gini.impurity(&[2.0, 2.0]), 0.5);
	assert_eq!(gini.impurity(&[4.0, 0.0]), 0.0);
	assert_eq!(gini.impurity_decrease(&[2.0, 2.0], &[2.0, 0.0], &[0.0, 2.0]), 0.5);
	let entropy = ClassificationCriterion {
		class_impurity: ClassImpurity::Entropy,
		..gini
	};
	assert!((entropy.impurity(&[2.0, 2.0]) - std::f64::consts::LN_2).abs() < 1e-12);
	assert_eq!(entropy.impurity(&[0.0, 3.0]), 0.0);
}

#[test]
fn test_classification_leaf_breaks_ties_toward_lowest_class() {
	let labels = arr1(&[0usize, 1, 2]);
	let criterion = ClassificationCriterion {
		labels: labels.view(),
		weights: None,
		n_classes: 3,
		class_impurity: ClassImpurity::Gini,
	};
	let leaf = criterion.leaf(&[1.0, 3.0, 3.0]);
	assert_eq!(leaf.class, 1);
	for (probability, expected) in leaf.probabilities.iter().zip([1.0, 3.0, 3.0].iter()) {
		assert!((probability - expected / 7.0).abs() < 1e-6);
	}
}

#[test]
fn test_weights_scale_statistics() {
	let labels = arr1(&[1.0f32, 3.0]);
	let weights = arr1(&[3.0f32, 1.0]);
	let criterion = RegressionCriterion {
		labels: labels.view(),
		weights: Some(weights.view()),
	};
	let mut stats = vec![0.0; 3];
	criterion.accumulate(&mut stats, 0);
	criterion.accumulate(&mut stats, 1);
	assert_eq!(criterion.leaf(&stats), 1.5);
	assert!((criterion.node_impurity(&[0, 1], &stats) - 0.75).abs() < 1e-12);
}
