use crate::{
	criterion::RegressionCriterion,
	options::Task,
	train::{train, validate_input, TrainOutput},
	TrainContext, TrainError, TrainOptions, TrainProgress, Tree,
};
use canopy_thread_pool::pzip;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// `Regressor`s predict continuous target values, for example the selling price of a home.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Regressor {
	/// The trees for this model. The prediction is the mean of the trees' predictions.
	pub trees: Vec<Tree<f32>>,
	pub n_features: usize,
	/// One importance per feature, if `TrainOptions::variable_importance` asked for them.
	pub variable_importances: Option<Vec<f32>>,
	/// The mean squared error of the out-of-bag predictions.
	pub oob_error: Option<f32>,
	/// The squared error of each row's out-of-bag prediction, NaN for rows no tree held out of bag.
	pub oob_error_per_observation: Option<Vec<f32>>,
}

impl Regressor {
	/// Train a regressor.
	pub fn train<'a>(
		features: ArrayView2<f32>,
		labels: ArrayView1<'a, f32>,
		weights: Option<ArrayView1<'a, f32>>,
		options: &TrainOptions,
		context: TrainContext,
	) -> Result<Regressor, TrainError> {
		validate_input(features, labels.len(), weights)?;
		if labels.iter().any(|label| !label.is_finite()) {
			return Err(TrainError::invalid_input("labels must be finite"));
		}
		let (n_rows, n_features) = features.dim();
		let options = options.resolve(Task::Regression, n_rows, n_features)?;
		let criterion = RegressionCriterion { labels, weights };
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
		Ok(Regressor {
			trees,
			n_features,
			variable_importances,
			oob_error,
			oob_error_per_observation,
		})
	}

	/// Make predictions.
	pub fn predict(&self, features: ArrayView2<f32>, mut predictions: ArrayViewMut1<f32>) {
		let n_trees = self.trees.len().to_f32().unwrap();
		pzip!(features.axis_iter(Axis(0)), predictions.axis_iter_mut(Axis(0))).for_each(
			|(features, mut prediction)| {
				let features = features.to_vec();
				let sum: f32 = self.trees.iter().map(|tree| *tree.predict(&features)).sum();
				prediction[()] = sum / n_trees;
			},
		);
	}
}
