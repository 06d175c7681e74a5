use canopy_forest::{
	Classifier, KillChip, Node, Regressor, ResultsToCompute, ThreadPoolOptions, TrainContext,
	TrainError, TrainOptions, TrainProgress, VariableImportance,
};
use ndarray::prelude::*;
use num_traits::ToPrimitive;

/// Rows of three features in [0, 1) from a fixed linear congruential sequence, so the tests do not depend on any random number generator.
fn synthetic_features(n_rows: usize) -> Array2<f32> {
	let mut state: u64 = 12345;
	Array2::from_shape_fn((n_rows, 3), |_| {
		state = state
			.wrapping_mul(6364136223846793005)
			.wrapping_add(1442695040888963407);
		((state >> 40).to_f64().unwrap() / (1u64 << 24).to_f64().unwrap())
			.to_f32()
			.unwrap()
	})
}

fn context(n_threads: usize) -> TrainContext<'static> {
	TrainContext {
		thread_pool: ThreadPoolOptions::with_n_threads(n_threads),
		..Default::default()
	}
}

#[test]
fn test_single_tree_memorizes_distinct_values() {
	let features = Array2::from_shape_fn((10, 1), |(i, _)| (i + 1).to_f32().unwrap());
	let labels = features.column(0).to_owned();
	let options = TrainOptions {
		n_trees: 1,
		bootstrap: false,
		observations_per_tree_fraction: 1.0,
		min_observations_in_leaf_node: Some(1),
		features_per_node: Some(1),
		max_bins: 10,
		..Default::default()
	};
	let model =
		Regressor::train(features.view(), labels.view(), None, &options, context(2)).unwrap();
	let tree = &model.trees[0];
	assert_eq!(tree.n_leaves(), 10);
	let mut leaf_values: Vec<f32> = tree
		.nodes
		.iter()
		.filter_map(|node| match node {
			Node::Leaf(leaf) => Some(leaf.value),
			Node::Branch(_) => None,
		})
		.collect();
	leaf_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
	assert_eq!(leaf_values, labels.to_vec());
	let mut predictions = Array1::zeros(10);
	model.predict(features.view(), predictions.view_mut());
	assert_eq!(predictions, labels);
}

#[test]
fn test_identical_responses_grow_single_leaf_trees() {
	let features = synthetic_features(200);
	let labels = Array1::from_elem(200, 3.5f32);
	let options = TrainOptions {
		n_trees: 5,
		..Default::default()
	};
	let model =
		Regressor::train(features.view(), labels.view(), None, &options, context(2)).unwrap();
	assert_eq!(model.trees.len(), 5);
	for tree in model.trees.iter() {
		assert_eq!(tree.nodes.len(), 1);
		match &tree.nodes[0] {
			Node::Leaf(leaf) => {
				assert_eq!(leaf.value, 3.5);
				assert_eq!(leaf.impurity, 0.0);
			}
			Node::Branch(_) => panic!("expected a leaf"),
		}
	}
}

#[test]
fn test_zero_fraction_fails_before_training() {
	let features = synthetic_features(50);
	let labels = Array1::zeros(50);
	let options = TrainOptions {
		observations_per_tree_fraction: 0.0,
		..Default::default()
	};
	let mut progress_reported = false;
	let mut update_progress = |_: TrainProgress| progress_reported = true;
	let result = Regressor::train(
		features.view(),
		labels.view(),
		None,
		&options,
		TrainContext {
			update_progress: Some(&mut update_progress),
			..Default::default()
		},
	);
	assert!(matches!(
		result,
		Err(TrainError::DegenerateSample { n_rows: 50, .. })
	));
	assert!(!progress_reported);
}

#[test]
fn test_forest_does_not_depend_on_thread_count() {
	let n_rows = 40_000;
	let features = synthetic_features(n_rows);
	let labels = features.map_axis(Axis(1), |row| row[0] * 4.0 + (row[1] * 10.0).sin() + row[2]);
	let options = TrainOptions {
		n_trees: 4,
		max_tree_depth: 6,
		seed: 42,
		variable_importance: VariableImportance::MdaScaled,
		results_to_compute: ResultsToCompute {
			oob_error: true,
			oob_error_per_observation: true,
		},
		..Default::default()
	};
	let train = |n_threads| {
		let model = Regressor::train(
			features.view(),
			labels.view(),
			None,
			&options,
			context(n_threads),
		)
		.unwrap();
		serde_json::to_string(&model).unwrap()
	};
	assert_eq!(train(1), train(4));
}

#[test]
fn test_classifier_does_not_depend_on_thread_count() {
	let n_rows = 20_000;
	let features = synthetic_features(n_rows);
	let labels = features.map_axis(Axis(1), |row| {
		if row[0] + row[1] < 0.7 {
			0usize
		} else if row[2] < 0.5 {
			1
		} else {
			2
		}
	});
	let options = TrainOptions {
		n_trees: 6,
		max_tree_depth: 8,
		variable_importance: VariableImportance::Mdi,
		results_to_compute: ResultsToCompute {
			oob_error: true,
			oob_error_per_observation: false,
		},
		..Default::default()
	};
	let train = |n_threads| {
		let model = Classifier::train(
			features.view(),
			labels.view(),
			3,
			None,
			&options,
			context(n_threads),
		)
		.unwrap();
		serde_json::to_string(&model).unwrap()
	};
	assert_eq!(train(1), train(3));
}

#[test]
fn test_memory_saving_mode_grows_the_same_forest() {
	let features = synthetic_features(1000);
	let labels = features.map_axis(Axis(1), |row| row[1] * 2.0 - row[2]);
	let options = TrainOptions {
		n_trees: 7,
		results_to_compute: ResultsToCompute {
			oob_error: true,
			oob_error_per_observation: true,
		},
		variable_importance: VariableImportance::Mdi,
		..Default::default()
	};
	let model =
		Regressor::train(features.view(), labels.view(), None, &options, context(2)).unwrap();
	let memory_saving_options = TrainOptions {
		memory_saving_mode: true,
		..options.clone()
	};
	let memory_saving_model = Regressor::train(
		features.view(),
		labels.view(),
		None,
		&memory_saving_options,
		context(2),
	)
	.unwrap();
	assert_eq!(
		serde_json::to_string(&model).unwrap(),
		serde_json::to_string(&memory_saving_model).unwrap()
	);
}

#[test]
fn test_classifier_separates_classes() {
	let features = Array2::from_shape_fn((100, 2), |(i, j)| (i * (j + 1)).to_f32().unwrap());
	let labels = Array1::from_shape_fn(100, |i| if i < 50 { 0 } else { 1 });
	let options = TrainOptions {
		n_trees: 3,
		bootstrap: false,
		results_to_compute: ResultsToCompute {
			oob_error: true,
			oob_error_per_observation: false,
		},
		..Default::default()
	};
	let model = Classifier::train(
		features.view(),
		labels.view(),
		2,
		None,
		&options,
		context(2),
	)
	.unwrap();
	assert_eq!(model.predict(features.view()), labels);
	let mut probabilities = Array2::zeros((100, 2));
	model.predict_probabilities(features.view(), probabilities.view_mut());
	assert_eq!(probabilities.row(0).to_vec(), vec![1.0, 0.0]);
	assert_eq!(probabilities.row(99).to_vec(), vec![0.0, 1.0]);
	// Without bootstrap every row is in every tree, so no row is ever out of bag.
	assert_eq!(model.oob_error, None);
}

#[test]
fn test_two_bin_feature_grows_a_single_split() {
	let features = Array2::from_shape_fn((8, 1), |(i, _)| (i % 2).to_f32().unwrap());
	let labels = Array1::from_shape_fn(8, |i| i % 2);
	let options = TrainOptions {
		n_trees: 1,
		bootstrap: false,
		..Default::default()
	};
	let model = Classifier::train(
		features.view(),
		labels.view(),
		2,
		None,
		&options,
		context(2),
	)
	.unwrap();
	let tree = &model.trees[0];
	assert_eq!(tree.nodes.len(), 3);
	match &tree.nodes[0] {
		Node::Branch(branch) => {
			assert_eq!(branch.feature_index, 0);
			assert_eq!(branch.split_value, 0.0);
			assert_eq!(branch.impurity_decrease, 0.5);
		}
		Node::Leaf(_) => panic!("expected the root to split"),
	}
	for node in tree.nodes[1..].iter() {
		match node {
			Node::Leaf(leaf) => assert_eq!(leaf.impurity, 0.0),
			Node::Branch(_) => panic!("expected a leaf"),
		}
	}
	assert_eq!(model.predict(features.view()), labels);
}

#[test]
fn test_oob_error_and_importances() {
	let features = synthetic_features(2000);
	let labels = features.map_axis(Axis(1), |row| if row[1] < 0.5 { 0usize } else { 1 });
	let options = TrainOptions {
		n_trees: 40,
		features_per_node: Some(3),
		variable_importance: VariableImportance::MdaRaw,
		results_to_compute: ResultsToCompute {
			oob_error: true,
			oob_error_per_observation: true,
		},
		..Default::default()
	};
	let model = Classifier::train(
		features.view(),
		labels.view(),
		2,
		None,
		&options,
		context(4),
	)
	.unwrap();
	assert!(model.oob_error.unwrap() < 0.05);
	let oob_error_per_observation = model.oob_error_per_observation.unwrap();
	assert_eq!(oob_error_per_observation.len(), 2000);
	// With 40 bootstrapped trees, every row is out of bag for some tree.
	assert!(oob_error_per_observation
		.iter()
		.all(|error| *error == 0.0 || *error == 1.0));
	let importances = model.variable_importances.unwrap();
	assert!(importances[1] > importances[0]);
	assert!(importances[1] > importances[2]);
}

#[test]
fn test_mdi_ranks_the_signal_feature_first() {
	let features = synthetic_features(1000);
	let labels = features.column(2).mapv(|value| value * 10.0);
	let options = TrainOptions {
		n_trees: 10,
		features_per_node: Some(3),
		variable_importance: VariableImportance::Mdi,
		..Default::default()
	};
	let model =
		Regressor::train(features.view(), labels.view(), None, &options, context(2)).unwrap();
	let importances = model.variable_importances.unwrap();
	assert_eq!(importances.len(), 3);
	assert!(importances[2] > 10.0 * importances[0]);
	assert!(importances[2] > 10.0 * importances[1]);
}

#[test]
fn test_zero_weight_rows_do_not_move_leaf_values() {
	let features = Array2::from_elem((3, 1), 1.0f32);
	let labels = arr1(&[1.0f32, 2.0, 100.0]);
	let weights = arr1(&[1.0f32, 1.0, 0.0]);
	let options = TrainOptions {
		n_trees: 1,
		bootstrap: false,
		..Default::default()
	};
	let model = Regressor::train(
		features.view(),
		labels.view(),
		Some(weights.view()),
		&options,
		context(1),
	)
	.unwrap();
	match &model.trees[0].nodes[0] {
		Node::Leaf(leaf) => assert_eq!(leaf.value, 1.5),
		Node::Branch(_) => panic!("expected a leaf"),
	}
}

#[test]
fn test_cancellation() {
	let features = synthetic_features(500);
	let labels = features.column(0).to_owned();
	let options = TrainOptions::default();

	// A chip activated before training starts.
	let kill_chip = KillChip::default();
	kill_chip.activate();
	let result = Regressor::train(
		features.view(),
		labels.view(),
		None,
		&options,
		TrainContext {
			kill_chip: Some(&kill_chip),
			..Default::default()
		},
	);
	assert!(matches!(result, Err(TrainError::Cancelled)));

	// A chip activated once tree growth has started.
	let kill_chip = KillChip::default();
	let worker_kill_chip = kill_chip.clone();
	let mut update_progress = move |progress: TrainProgress| {
		if let TrainProgress::Training(_) = progress {
			worker_kill_chip.activate();
		}
	};
	let result = Regressor::train(
		features.view(),
		labels.view(),
		None,
		&options,
		TrainContext {
			kill_chip: Some(&kill_chip),
			update_progress: Some(&mut update_progress),
			..Default::default()
		},
	);
	assert!(matches!(result, Err(TrainError::Cancelled)));
}

#[test]
fn test_progress_reaches_the_number_of_trees() {
	let features = synthetic_features(300);
	let labels = features.column(1).to_owned();
	let options = TrainOptions {
		n_trees: 9,
		..Default::default()
	};
	let mut progress_counters = Vec::new();
	let mut update_progress = |progress: TrainProgress| progress_counters.push(progress);
	Regressor::train(
		features.view(),
		labels.view(),
		None,
		&options,
		TrainContext {
			update_progress: Some(&mut update_progress),
			..Default::default()
		},
	)
	.unwrap();
	assert_eq!(progress_counters.len(), 2);
	match &progress_counters[1] {
		TrainProgress::Training(progress_counter) => {
			assert_eq!(progress_counter.total(), 9);
			assert_eq!(progress_counter.get(), 9);
		}
		TrainProgress::Initializing(_) => panic!("expected the training progress"),
	}
}

#[test]
fn test_invalid_labels() {
	let features = synthetic_features(10);
	let labels = Array1::from_elem(10, 2usize);
	let result = Classifier::train(
		features.view(),
		labels.view(),
		2,
		None,
		&TrainOptions::default(),
		TrainContext::default(),
	);
	let error = result.unwrap_err();
	insta::assert_snapshot!(error.to_string(), @"invalid input: the label 2 is not less than n_classes = 2");
}

#[test]
fn test_options_from_partial_json() {
	let options: TrainOptions =
		serde_json::from_str(r#"{"n_trees": 3, "variable_importance": "mda_scaled"}"#).unwrap();
	assert_eq!(
		options,
		TrainOptions {
			n_trees: 3,
			variable_importance: VariableImportance::MdaScaled,
			..Default::default()
		}
	);
	insta::assert_snapshot!(serde_json::to_string_pretty(&TrainOptions::default()).unwrap(), @r###"
	{
	  "n_trees": 100,
	  "observations_per_tree_fraction": 1.0,
	  "features_per_node": null,
	  "max_tree_depth": 0,
	  "min_observations_in_leaf_node": null,
	  "min_observations_in_split_node": 2,
	  "impurity_threshold": 0.0,
	  "min_impurity_decrease_in_split_node": 0.0,
	  "seed": 777,
	  "bootstrap": true,
	  "variable_importance": "none",
	  "results_to_compute": {
	    "oob_error": false,
	    "oob_error_per_observation": false
	  },
	  "memory_saving_mode": false,
	  "max_bins": 256,
	  "min_bin_size": 5,
	  "binning_strategy": "quantiles",
	  "class_impurity": "gini"
	}
	"###);
}
