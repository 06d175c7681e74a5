use crate::{
	criterion::ClassificationCriterion,
	options::Task,
	train::{train, validate_input, TrainOutput},
	TrainContext, TrainError, TrainOptions, TrainProgress, Tree,
};
use canopy_thread_pool::pzip;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// `Classifier`s predict which of `n_classes` classes a row belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classifier {
	pub n_classes: usize,
	/// The trees for this model. Each tree votes for the majority class of the leaf a row lands in.
	pub trees: Vec<Tree<ClassificationLeaf>>,
	pub n_features: usize,
	/// One importance per feature, if `TrainOptions::variable_importance` asked for them.
	pub variable_importances: Option<Vec<f32>>,
	/// The fraction of rows whose out-of-bag majority vote is wrong.
	pub oob_error: Option<f32>,
	/// 1 for rows whose out-of-bag majority vote is wrong, 0 for rows whose vote is right, and NaN for rows no tree held out of bag.
	pub oob_error_per_observation: Option<Vec<f32>>,
}

/// The value of a classification leaf.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationLeaf {
	/// The class with the largest weight in the leaf. Ties go to the lowest class.
	pub class: usize,
	/// The weighted fraction of the leaf's rows in each class.
	pub probabilities: Vec<f32>,
}

impl Classifier {
	/// Train a classifier. Every label must be less than `n_classes`.
	pub fn train<'a>(
		features: ArrayView2<f32>,
		labels: ArrayView1<'a, usize>,
		n_classes: usize,
		weights: Option<ArrayView1<'a, f32>>,
		options: &TrainOptions,
		context: TrainContext,
	) -> Result<Classifier, TrainError> {
		validate_input(features, labels.len(), weights)?;
		if n_classes < 2 {
			return Err(TrainError::invalid_options(format!(
				"n_classes must be at least 2, got {}",
				n_classes
			)));
		}
		if let Some(label) = labels.iter().find(|label| **label >= n_classes) {
			return Err(TrainError::invalid_input(format!(
				"the label {} is not less than n_classes = {}",
				label, n_classes
			)));
		}
		let (n_rows, n_features) = features.dim();
		let options = options.resolve(Task::Classification, n_rows, n_features)?;
		let criterion = ClassificationCriterion {
			labels,
			weights,
			n_classes,
			class_impurity: options.class_impurity,
		};
		let TrainContext {
			thread_pool,
			kill_chip,
			update_progress,
		} = context;
		let mut ignore_progress = |_: TrainProgress| {};
		let update_progress: &mut (dyn FnMut(TrainProgress) + Send) = match update_progress {
			Some(update_progress) => update_progress,
			None => &mut ignore_progress,
		};
		let TrainOutput {
			trees,
			variable_importances,
			oob_error,
			oob_error_per_observation,
		} = thread_pool.install(|| {
			train(&criterion, features, &options, kill_chip, update_progress)
		})??;
		Ok(Classifier {
			n_classes,
			trees,
			n_features,
			variable_importances,
			oob_error,
			oob_error_per_observation,
		})
	}

	/// Write the mean of the trees' leaf probabilities for each row to `probabilities`, which must have shape (n_rows, n_classes).
	pub fn predict_probabilities(
		&self,
		features: ArrayView2<f32>,
		mut probabilities: ArrayViewMut2<f32>,
	) {
		let n_trees = self.trees.len().to_f32().unwrap();
		pzip!(
			features.axis_iter(Axis(0)),
			probabilities.axis_iter_mut(Axis(0))
		)
		.for_each(|(features, mut probabilities)| {
			let features = features.to_vec();
			probabilities.fill(0.0);
			for tree in self.trees.iter() {
				let leaf = tree.predict(&features);
				for (probability, leaf_probability) in
					probabilities.iter_mut().zip(leaf.probabilities.iter())
				{
					*probability += leaf_probability;
				}
			}
			probabilities.mapv_inplace(|probability| probability / n_trees);
		});
	}

	/// Predict the class with the most tree votes for each row. Ties go to the lowest class.
	pub fn predict(&self, features: ArrayView2<f32>) -> Array1<usize> {
		let mut classes = Array1::zeros(features.nrows());
		pzip!(features.axis_iter(Axis(0)), classes.axis_iter_mut(Axis(0))).for_each(
			|(features, mut class)| {
				let features = features.to_vec();
				let mut votes = vec![0usize; self.n_classes];
				for tree in self.trees.iter() {
					votes[tree.predict(&features).class] += 1;
				}
				let mut best = 0;
				for (candidate, n_votes) in votes.iter().enumerate() {
					if *n_votes > votes[best] {
						best = candidate;
					}
				}
				class[()] = best;
			},
		);
		classes
	}
}
