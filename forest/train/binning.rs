use crate::{options::ResolvedOptions, BinningStrategy};
use itertools::Itertools;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;

/*
This struct specifies how to bin a feature. Feature values are binned by comparing them with a set of strictly increasing thresholds, and bins are closed on the right. For example, given the thresholds `[0.5, 1.5, 2]`, the bins will be:
0. (-infinity, 0.5]
1. (0.5, 1.5]
2. (1.5, 2]
3. (2, infinity)

The last bin is the overflow bin. Every training value is at most the last threshold, so the overflow bin is only ever reached by values seen at prediction time.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct BinningInstruction {
	pub thresholds: Vec<f32>,
}

impl BinningInstruction {
	/// The number of bins, including the overflow bin.
	pub fn n_bins(&self) -> usize {
		self.thresholds.len() + 1
	}

	/// The index of the bin `value` falls into, the index of the first threshold greater than or equal to `value`.
	pub fn bin_index(&self, value: f32) -> usize {
		self.thresholds.partition_point(|threshold| *threshold < value)
	}
}

/// Compute the binning instructions for each column in `features`.
pub fn compute_binning_instructions(
	features: ArrayView2<f32>,
	options: &ResolvedOptions,
	progress: &(dyn Fn() + Sync),
) -> Vec<BinningInstruction> {
	(0..features.ncols())
		.into_par_iter()
		.map(|feature_index| {
			let binning_instruction =
				compute_binning_instruction_for_feature(features.column(feature_index), options);
			progress();
			binning_instruction
		})
		.collect()
}

fn compute_binning_instruction_for_feature(
	column: ArrayView1<f32>,
	options: &ResolvedOptions,
) -> BinningInstruction {
	// Create a histogram of the distinct values in the column.
	let mut values: Vec<f32> = column.iter().cloned().collect();
	values.sort_unstable_by(|a, b| a.total_cmp(b));
	let histogram: Vec<(f32, usize)> = values
		.into_iter()
		.dedup_with_count()
		.map(|(count, value)| (value, count))
		.collect();
	// If there are few enough distinct values, each one gets its own bin and binning is lossless. The overflow bin does not count toward `max_bins`.
	let max_valid_bins = options.max_bins;
	let thresholds = if histogram.len() <= max_valid_bins {
		histogram.iter().map(|(value, _)| *value).collect()
	} else {
		match options.binning_strategy {
			BinningStrategy::Quantiles => compute_quantile_thresholds(
				&histogram,
				column.len(),
				max_valid_bins,
				options.min_bin_size,
			),
			BinningStrategy::Averages => compute_equal_width_thresholds(&histogram, max_valid_bins),
		}
	};
	BinningInstruction { thresholds }
}

/// Greedily close a bin at the first distinct value that brings its count to `max(n_values / max_valid_bins, min_bin_size)`. A trailing bin smaller than `min_bin_size` is merged into the previous bin.
fn compute_quantile_thresholds(
	histogram: &[(f32, usize)],
	n_values: usize,
	max_valid_bins: usize,
	min_bin_size: usize,
) -> Vec<f32> {
	let target_bin_size = (n_values.to_f64().unwrap() / max_valid_bins.to_f64().unwrap())
		.max(min_bin_size.to_f64().unwrap());
	let mut thresholds = Vec::new();
	let mut current_bin_size = 0;
	for (value, count) in histogram.iter() {
		current_bin_size += count;
		if current_bin_size.to_f64().unwrap() >= target_bin_size {
			thresholds.push(*value);
			current_bin_size = 0;
		}
	}
	let max_value = histogram.last().map(|(value, _)| *value).unwrap();
	if current_bin_size > 0 {
		match thresholds.last_mut() {
			Some(last) if current_bin_size < min_bin_size => *last = max_value,
			_ => thresholds.push(max_value),
		}
	}
	if thresholds.len() > max_valid_bins {
		thresholds.truncate(max_valid_bins);
		if let Some(last) = thresholds.last_mut() {
			*last = max_value;
		}
	}
	thresholds
}

/// Split `[min, max]` into `max_valid_bins` intervals of equal width and drop the thresholds of intervals no value falls into.
fn compute_equal_width_thresholds(histogram: &[(f32, usize)], max_valid_bins: usize) -> Vec<f32> {
	let min_value = histogram.first().unwrap().0.to_f64().unwrap();
	let max_value = histogram.last().unwrap().0;
	let width = (max_value.to_f64().unwrap() - min_value) / max_valid_bins.to_f64().unwrap();
	let candidates: Vec<f32> = (1..max_valid_bins)
		.map(|i| (min_value + width * i.to_f64().unwrap()).to_f32().unwrap())
		.chain(std::iter::once(max_value))
		.dedup()
		.collect();
	let mut occupied = vec![false; candidates.len()];
	for (value, _) in histogram.iter() {
		let bin_index = candidates.partition_point(|threshold| threshold < value);
		occupied[bin_index] = true;
	}
	candidates
		.into_iter()
		.zip(occupied)
		.filter_map(|(threshold, occupied)| if occupied { Some(threshold) } else { None })
		.collect()
}

/// The binned features are stored column major. Columns with at most 256 bins, counting the overflow bin, are stored with one byte per row.
#[derive(Debug)]
pub struct BinnedFeatures {
	pub columns: Vec<BinnedFeaturesColumn>,
}

#[derive(Debug)]
pub enum BinnedFeaturesColumn {
	U8(Vec<u8>),
	U16(Vec<u16>),
}

impl BinnedFeaturesColumn {
	#[inline]
	pub fn get(&self, example_index: usize) -> usize {
		match self {
			BinnedFeaturesColumn::U8(values) => usize::from(values[example_index]),
			BinnedFeaturesColumn::U16(values) => usize::from(values[example_index]),
		}
	}
}

/// Bin every value of `features` with the binning instruction for its column.
pub fn compute_binned_features(
	features: ArrayView2<f32>,
	binning_instructions: &[BinningInstruction],
	progress: &(dyn Fn() + Sync),
) -> BinnedFeatures {
	let columns = binning_instructions
		.par_iter()
		.enumerate()
		.map(|(feature_index, binning_instruction)| {
			let column = features.column(feature_index);
			let column = if binning_instruction.n_bins() <= 256 {
				BinnedFeaturesColumn::U8(
					column
						.iter()
						.map(|value| binning_instruction.bin_index(*value).to_u8().unwrap())
						.collect(),
				)
			} else {
				BinnedFeaturesColumn::U16(
					column
						.iter()
						.map(|value| binning_instruction.bin_index(*value).to_u16().unwrap())
						.collect(),
				)
			};
			progress();
			column
		})
		.collect();
	BinnedFeatures { columns }
}

#[cfg(test)]
fn test_options(max_bins: usize, binning_strategy: BinningStrategy) -> ResolvedOptions {
	let options = crate::TrainOptions {
		max_bins,
		min_bin_size: 1,
		binning_strategy,
		..Default::default()
	};
	options
		.resolve(crate::options::Task::Regression, 100, 3)
		.unwrap()
}

#[test]
fn test_lossless_binning_round_trips() {
	let values = arr2(&[[3.0f32], [-1.0], [3.0], [0.5], [7.25], [0.5]]);
	let options = test_options(256, BinningStrategy::Quantiles);
	let binning_instructions = compute_binning_instructions(values.view(), &options, &|| {});
	assert_eq!(binning_instructions[0].thresholds, vec![-1.0, 0.5, 3.0, 7.25]);
	let binned_features = compute_binned_features(values.view(), &binning_instructions, &|| {});
	for (example_index, value) in values.column(0).iter().enumerate() {
		let bin_index = binned_features.columns[0].get(example_index);
		assert_eq!(binning_instructions[0].thresholds[bin_index], *value);
	}
}

#[test]
fn test_max_bins_distinct_values_are_lossless() {
	let values = Array2::from_shape_fn((30, 1), |(i, _)| (i % 10 + 1).to_f32().unwrap());
	let mut options = test_options(10, BinningStrategy::Quantiles);
	options.min_bin_size = 5;
	let binning_instructions = compute_binning_instructions(values.view(), &options, &|| {});
	let expected: Vec<f32> = (1..=10).map(|value| value.to_f32().unwrap()).collect();
	assert_eq!(binning_instructions[0].thresholds, expected);
	let binned_features = compute_binned_features(values.view(), &binning_instructions, &|| {});
	for (example_index, value) in values.column(0).iter().enumerate() {
		let bin_index = binned_features.columns[0].get(example_index);
		assert_eq!(binning_instructions[0].thresholds[bin_index], *value);
	}
}

#[test]
fn test_bins_are_right_closed() {
	let binning_instruction = BinningInstruction {
		thresholds: vec![0.5, 1.5, 2.0],
	};
	assert_eq!(binning_instruction.bin_index(-10.0), 0);
	assert_eq!(binning_instruction.bin_index(0.5), 0);
	assert_eq!(binning_instruction.bin_index(0.6), 1);
	assert_eq!(binning_instruction.bin_index(2.0), 2);
	assert_eq!(binning_instruction.bin_index(2.1), 3);
	assert_eq!(binning_instruction.n_bins(), 4);
}

#[test]
fn test_constant_column_has_a_single_bin() {
	let values = Array2::from_elem((50, 1), 4.0f32);
	let options = test_options(256, BinningStrategy::Quantiles);
	let binning_instructions = compute_binning_instructions(values.view(), &options, &|| {});
	assert_eq!(binning_instructions[0].thresholds, vec![4.0]);
}

#[test]
fn test_quantile_bins_respect_max_bins() {
	let values = Array2::from_shape_fn((1000, 1), |(i, _)| i.to_f32().unwrap());
	let options = test_options(16, BinningStrategy::Quantiles);
	let binning_instructions = compute_binning_instructions(values.view(), &options, &|| {});
	let binning_instruction = &binning_instructions[0];
	assert!(binning_instruction.thresholds.len() <= 16);
	assert_eq!(*binning_instruction.thresholds.last().unwrap(), 999.0);
	assert!(binning_instruction
		.thresholds
		.iter()
		.tuple_windows()
		.all(|(a, b)| a < b));
	// Every training value lands in a non-overflow bin.
	let binned_features = compute_binned_features(values.view(), &binning_instructions, &|| {});
	for example_index in 0..1000 {
		assert!(binned_features.columns[0].get(example_index) < binning_instruction.n_bins() - 1);
	}
}

#[test]
fn test_quantile_bins_hold_min_bin_size_rows() {
	let histogram: Vec<(f32, usize)> = (0..10).map(|i| (i.to_f32().unwrap(), 1)).collect();
	let thresholds = compute_quantile_thresholds(&histogram, 10, 8, 3);
	assert_eq!(thresholds, vec![2.0, 5.0, 9.0]);
}

#[test]
fn test_equal_width_bins_drop_empty_intervals() {
	let histogram = vec![(0.0f32, 3), (0.1, 1), (9.9, 2), (10.0, 1)];
	let thresholds = compute_equal_width_thresholds(&histogram, 3);
	assert_eq!(thresholds.len(), 2);
	assert_eq!(*thresholds.last().unwrap(), 10.0);
	let bin_index = |value: f32| thresholds.partition_point(|threshold| *threshold < value);
	assert_eq!(bin_index(0.0), bin_index(0.1));
	assert_eq!(bin_index(9.9), bin_index(10.0));
	assert_ne!(bin_index(0.1), bin_index(9.9));
}

#[test]
fn test_wide_columns_use_two_bytes() {
	let values = Array2::from_shape_fn((600, 1), |(i, _)| i.to_f32().unwrap());
	let options = test_options(1024, BinningStrategy::Quantiles);
	let binning_instructions = compute_binning_instructions(values.view(), &options, &|| {});
	let binned_features = compute_binned_features(values.view(), &binning_instructions, &|| {});
	assert!(matches!(
		binned_features.columns[0],
		BinnedFeaturesColumn::U16(_)
	));
	assert_eq!(binned_features.columns[0].get(599), 599);
}
