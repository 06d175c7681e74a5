use crate::{error::try_alloc, TrainError};
use rand::Rng;
use rand_xoshiro::{rand_core::SeedableRng, Xoshiro256PlusPlus};

/// The rows a single tree is trained on.
#[derive(Debug)]
pub struct Sample {
	/// The selected row indexes in ascending order. A row drawn k times appears k times.
	pub examples_index: Vec<usize>,
	/// `oob_mask[i]` is true if row `i` was never drawn.
	pub oob_mask: Vec<bool>,
}

impl Sample {
	/// The out-of-bag rows in ascending order.
	pub fn oob_examples(&self) -> Vec<usize> {
		self.oob_mask
			.iter()
			.enumerate()
			.filter_map(|(example_index, is_oob)| if *is_oob { Some(example_index) } else { None })
			.collect()
	}
}

/// Draw `n_selected` of `n_rows` rows, with replacement if `bootstrap` is true and without replacement otherwise.
pub fn sample(
	n_rows: usize,
	n_selected: usize,
	bootstrap: bool,
	rng: &mut Xoshiro256PlusPlus,
) -> Result<Sample, TrainError> {
	if n_selected == 0 {
		return Err(TrainError::DegenerateSample {
			n_rows,
			fraction: 0.0,
		});
	}
	let mut counts: Vec<u32> = try_alloc(n_rows)?;
	if bootstrap {
		for _ in 0..n_selected {
			counts[rng.gen_range(0..n_rows)] += 1;
		}
	} else {
		for example_index in rand::seq::index::sample(rng, n_rows, n_selected).iter() {
			counts[example_index] = 1;
		}
	}
	let mut examples_index: Vec<usize> = try_alloc(n_selected)?;
	let mut position = 0;
	for (example_index, count) in counts.iter().enumerate() {
		for _ in 0..*count {
			examples_index[position] = example_index;
			position += 1;
		}
	}
	let oob_mask = counts.iter().map(|count| *count == 0).collect();
	Ok(Sample {
		examples_index,
		oob_mask,
	})
}

/// Draw `n_candidates` distinct feature indexes out of `n_features`, returned in ascending order.
pub fn choose_features(
	n_features: usize,
	n_candidates: usize,
	rng: &mut Xoshiro256PlusPlus,
) -> Vec<usize> {
	if n_candidates >= n_features {
		return (0..n_features).collect();
	}
	let mut feature_indexes = rand::seq::index::sample(rng, n_features, n_candidates).into_vec();
	feature_indexes.sort_unstable();
	feature_indexes
}

/// Create one random number generator per tree. Each tree's generator starts 2^128 steps after the previous tree's, so the trees' streams never overlap and do not depend on which thread grows which tree.
pub fn tree_rngs(seed: u64, n_trees: usize) -> Vec<Xoshiro256PlusPlus> {
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
	(0..n_trees)
		.map(|_| {
			let tree_rng = rng.clone();
			rng.jump();
			tree_rng
		})
		.collect()
}

#[test]
fn test_bootstrap_sample() {
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
	let sample = sample(100, 100, true, &mut rng).unwrap();
	assert_eq!(sample.examples_index.len(), 100);
	assert!(sample
		.examples_index
		.windows(2)
		.all(|window| window[0] <= window[1]));
	// Rows are out-of-bag exactly when they were never selected.
	for example_index in 0..100 {
		let selected = sample.examples_index.contains(&example_index);
		assert_eq!(sample.oob_mask[example_index], !selected);
	}
	let n_oob = sample.oob_mask.iter().filter(|is_oob| **is_oob).count();
	assert!(n_oob > 0 && n_oob < 100);
}

#[test]
fn test_sampling_without_replacement() {
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
	let sample = sample(10, 10, false, &mut rng).unwrap();
	assert_eq!(sample.examples_index, (0..10).collect::<Vec<_>>());
	assert!(sample.oob_mask.iter().all(|is_oob| !is_oob));
	let sample = self::sample(10, 4, false, &mut rng).unwrap();
	assert_eq!(sample.examples_index.len(), 4);
	assert_eq!(sample.oob_examples().len(), 6);
}

#[test]
fn test_empty_sample_is_an_error() {
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
	assert!(matches!(
		sample(10, 0, true, &mut rng),
		Err(TrainError::DegenerateSample { n_rows: 10, .. })
	));
}

#[test]
fn test_tree_oob_sets_are_reproducible() {
	let oob_sets = |seed| -> Vec<Vec<usize>> {
		tree_rngs(seed, 3)
			.iter_mut()
			.map(|rng| sample(10, 10, true, rng).unwrap().oob_examples())
			.collect()
	};
	let first = oob_sets(42);
	let second = oob_sets(42);
	assert_eq!(first, second);
	// Every tree has its own stream.
	assert!(first[0] != first[1] || first[1] != first[2]);
	// Each set is the complement of that tree's selected rows.
	let mut rng = tree_rngs(42, 3).remove(1);
	let sample = sample(10, 10, true, &mut rng).unwrap();
	for example_index in first[1].iter() {
		assert!(!sample.examples_index.contains(example_index));
	}
}

#[test]
fn test_half_sample_oob_rows_complement_drawn_rows() {
	use crate::{options::Task, TrainOptions};
	use std::collections::BTreeSet;
	let options = TrainOptions {
		n_trees: 1,
		observations_per_tree_fraction: 0.5,
		..Default::default()
	}
	.resolve(Task::Regression, 20, 1)
	.unwrap();
	assert_eq!(options.n_rows_per_tree, 10);
	assert!(options.bootstrap);
	let mut rng = tree_rngs(options.seed, options.n_trees).remove(0);
	let sample = sample(20, options.n_rows_per_tree, options.bootstrap, &mut rng).unwrap();
	assert_eq!(sample.examples_index.len(), 10);
	let drawn: BTreeSet<usize> = sample.examples_index.iter().copied().collect();
	let oob: BTreeSet<usize> = sample.oob_examples().into_iter().collect();
	assert!(drawn.is_disjoint(&oob));
	let all: BTreeSet<usize> = drawn.union(&oob).copied().collect();
	assert_eq!(all, (0..20).collect::<BTreeSet<usize>>());
	assert!(oob.len() >= 10);
}

#[test]
fn test_choose_features() {
	let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
	assert_eq!(choose_features(4, 4, &mut rng), vec![0, 1, 2, 3]);
	let feature_indexes = choose_features(10, 3, &mut rng);
	assert_eq!(feature_indexes.len(), 3);
	assert!(feature_indexes
		.windows(2)
		.all(|window| window[0] < window[1]));
}
