use anyhow::{Context, Result};
use canopy_forest::{Classifier, Regressor, ThreadPoolOptions, TrainContext, TrainOptions};
use canopy_metrics::{Accuracy, MeanSquaredError, StreamingMetric};
use clap::Parser;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::Rng;
use rand_xoshiro::{rand_core::SeedableRng, Xoshiro256PlusPlus};
use serde_json::json;
use std::path::PathBuf;

/// Train a forest on synthetic data and report its test error and training time as JSON.
#[derive(Parser, Debug)]
#[clap(name = "canopy_forest_benchmark")]
struct Args {
	#[clap(long, value_enum, default_value = "regression")]
	task: BenchmarkTask,
	#[clap(long, default_value = "100000")]
	n_rows: usize,
	#[clap(long, default_value = "10")]
	n_features: usize,
	#[clap(long)]
	n_threads: Option<usize>,
	/// A JSON file of `TrainOptions`. Fields that are left out keep their defaults.
	#[clap(long)]
	options: Option<PathBuf>,
	#[clap(long, default_value = "0")]
	data_seed: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BenchmarkTask {
	Regression,
	Classification,
}

fn main() -> Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let args = Args::parse();
	anyhow::ensure!(
		args.n_features >= 5,
		"the synthetic data needs at least 5 features"
	);
	let options: TrainOptions = match &args.options {
		Some(path) => {
			let options = std::fs::read_to_string(path)
				.with_context(|| format!("failed to read {}", path.display()))?;
			serde_json::from_str(&options)
				.with_context(|| format!("failed to parse {}", path.display()))?
		}
		None => TrainOptions::default(),
	};

	// Generate the data. Four fifths of the rows are used for training and the rest for testing.
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(args.data_seed);
	let n_rows_train = args.n_rows * 4 / 5;
	let features = Array2::from_shape_fn((args.n_rows, args.n_features), |_| rng.gen::<f32>());
	let responses = Array1::from_shape_fn(args.n_rows, |i| {
		friedman(features.row(i)) + rng.gen_range(-1.0..1.0)
	});
	let features_train = features.slice(s![..n_rows_train, ..]);
	let features_test = features.slice(s![n_rows_train.., ..]);

	let context = TrainContext {
		thread_pool: ThreadPoolOptions {
			n_threads: args.n_threads,
		},
		..Default::default()
	};
	let start = std::time::Instant::now();
	let output = match args.task {
		BenchmarkTask::Regression => {
			let labels = responses.slice(s![..n_rows_train]);
			let model = Regressor::train(features_train, labels, None, &options, context)?;
			let duration = start.elapsed();
			let mut predictions = Array1::zeros(features_test.nrows());
			model.predict(features_test, predictions.view_mut());
			let mut mean_squared_error = MeanSquaredError::new();
			for (prediction, label) in predictions.iter().zip(responses.slice(s![n_rows_train..])) {
				mean_squared_error.update((
					prediction.to_f64().unwrap(),
					label.to_f64().unwrap(),
				));
			}
			json!({
				"task": "regression",
				"duration_secs": duration.as_secs_f64(),
				"mse": mean_squared_error.finalize(),
				"oob_error": model.oob_error,
				"variable_importances": model.variable_importances,
			})
		}
		BenchmarkTask::Classification => {
			// Threshold the response into three classes of roughly equal size.
			let labels: Array1<usize> = responses.mapv(|response| {
				if response < 11.0 {
					0
				} else if response < 17.0 {
					1
				} else {
					2
				}
			});
			let model = Classifier::train(
				features_train,
				labels.slice(s![..n_rows_train]),
				3,
				None,
				&options,
				context,
			)?;
			let duration = start.elapsed();
			let predictions = model.predict(features_test);
			let mut accuracy = Accuracy::new();
			for (prediction, label) in predictions.iter().zip(labels.slice(s![n_rows_train..])) {
				accuracy.update((*prediction, *label));
			}
			json!({
				"task": "classification",
				"duration_secs": duration.as_secs_f64(),
				"accuracy": accuracy.finalize(),
				"oob_error": model.oob_error,
				"variable_importances": model.variable_importances,
			})
		}
	};
	println!("{}", output);
	Ok(())
}

/// Friedman's first regression problem. Only the first five features matter.
fn friedman(x: ArrayView1<f32>) -> f32 {
	10.0 * (std::f32::consts::PI * x[0] * x[1]).sin()
		+ 20.0 * (x[2] - 0.5).powi(2)
		+ 10.0 * x[3]
		+ 5.0 * x[4]
}
