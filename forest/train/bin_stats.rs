use super::binning::{BinnedFeatures, BinnedFeaturesColumn, BinningInstruction};
use crate::criterion::Criterion;
use itertools::izip;
use rayon::prelude::*;

/// Nodes with more rows than this build their histograms in parallel, as one partial histogram per block of this many rows. The partials are then summed in block order, so the result is the same for any number of threads.
pub const BIN_STATS_BLOCK_SIZE: usize = 16384;

/// The totals of a node.
#[derive(Clone, Debug)]
pub struct NodeStats {
	pub n_examples: usize,
	/// The criterion's statistics summed over the node's rows.
	pub stats: Vec<f64>,
	pub impurity: f64,
}

/// Sum the statistics of the rows in `examples_index`.
pub fn compute_node_stats<C: Criterion>(criterion: &C, examples_index: &[usize]) -> NodeStats {
	let n_stats = criterion.n_stats();
	let partials: Vec<Vec<f64>> = examples_index
		.par_chunks(BIN_STATS_BLOCK_SIZE)
		.map(|examples_index| {
			let mut stats = vec![0.0; n_stats];
			for example_index in examples_index {
				criterion.accumulate(&mut stats, *example_index);
			}
			stats
		})
		.collect();
	let mut stats = vec![0.0; n_stats];
	for partial in partials {
		for (stat, partial_stat) in izip!(stats.iter_mut(), partial) {
			*stat += partial_stat;
		}
	}
	let impurity = criterion.node_impurity(examples_index, &stats);
	NodeStats {
		n_examples: examples_index.len(),
		stats,
		impurity,
	}
}

/**
This struct holds the histograms of a node, one per candidate feature. Each bin holds `stride` lanes: the number of rows in the bin, followed by the criterion's statistics summed over those rows.
*/
#[derive(Clone, Debug)]
pub struct BinStats {
	/// The candidate features in ascending order.
	pub feature_indexes: Vec<usize>,
	pub stride: usize,
	/// (n_candidate_features, n_bins * stride)
	pub entries: Vec<Vec<f64>>,
}

impl BinStats {
	fn new(
		feature_indexes: Vec<usize>,
		binning_instructions: &[BinningInstruction],
		stride: usize,
	) -> BinStats {
		let entries = feature_indexes
			.iter()
			.map(|feature_index| vec![0.0; binning_instructions[*feature_index].n_bins() * stride])
			.collect();
		BinStats {
			feature_indexes,
			stride,
			entries,
		}
	}

	pub fn n_bins(&self, position: usize) -> usize {
		self.entries[position].len() / self.stride
	}

	/// The lanes of bin `bin_index` of the feature at `position` in `feature_indexes`.
	pub fn bin(&self, position: usize, bin_index: usize) -> &[f64] {
		&self.entries[position][bin_index * self.stride..(bin_index + 1) * self.stride]
	}
}

/// Build the histograms of the candidate features `feature_indexes` over the rows `examples_index`.
pub fn compute_bin_stats<C: Criterion>(
	criterion: &C,
	binned_features: &BinnedFeatures,
	binning_instructions: &[BinningInstruction],
	feature_indexes: Vec<usize>,
	examples_index: &[usize],
) -> BinStats {
	let stride = 1 + criterion.n_stats();
	let mut bin_stats = BinStats::new(feature_indexes, binning_instructions, stride);
	if examples_index.len() <= BIN_STATS_BLOCK_SIZE {
		let feature_indexes = &bin_stats.feature_indexes;
		bin_stats
			.entries
			.par_iter_mut()
			.zip(feature_indexes.par_iter())
			.for_each(|(entry, feature_index)| {
				compute_bin_stats_for_feature(
					criterion,
					&binned_features.columns[*feature_index],
					examples_index,
					entry,
					stride,
				);
			});
		return bin_stats;
	}
	// Compute a partial histogram for each block.
	let partials: Vec<BinStats> = examples_index
		.par_chunks(BIN_STATS_BLOCK_SIZE)
		.map(|examples_index| {
			let mut partial = BinStats::new(
				bin_stats.feature_indexes.clone(),
				binning_instructions,
				stride,
			);
			for (entry, feature_index) in izip!(&mut partial.entries, &partial.feature_indexes) {
				compute_bin_stats_for_feature(
					criterion,
					&binned_features.columns[*feature_index],
					examples_index,
					entry,
					stride,
				);
			}
			partial
		})
		.collect();
	// Sum the partials in block order. Each feature is summed by its own task.
	bin_stats
		.entries
		.par_iter_mut()
		.enumerate()
		.for_each(|(position, entry)| {
			for partial in partials.iter() {
				for (value, partial_value) in izip!(entry.iter_mut(), &partial.entries[position]) {
					*value += partial_value;
				}
			}
		});
	bin_stats
}

fn compute_bin_stats_for_feature<C: Criterion>(
	criterion: &C,
	column: &BinnedFeaturesColumn,
	examples_index: &[usize],
	entry: &mut [f64],
	stride: usize,
) {
	match column {
		BinnedFeaturesColumn::U8(values) => {
			compute_bin_stats_for_feature_inner(criterion, values, examples_index, entry, stride)
		}
		BinnedFeaturesColumn::U16(values) => {
			compute_bin_stats_for_feature_inner(criterion, values, examples_index, entry, stride)
		}
	}
}

fn compute_bin_stats_for_feature_inner<C, T>(
	criterion: &C,
	values: &[T],
	examples_index: &[usize],
	entry: &mut [f64],
	stride: usize,
) where
	C: Criterion,
	T: Copy + Into<usize>,
{
	for example_index in examples_index {
		let bin_index: usize = values[*example_index].into();
		let lanes = &mut entry[bin_index * stride..(bin_index + 1) * stride];
		lanes[0] += 1.0;
		criterion.accumulate(&mut lanes[1..], *example_index);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::criterion::{ClassificationCriterion, RegressionCriterion};
	use crate::ClassImpurity;
	use ndarray::prelude::*;
	use num_traits::ToPrimitive;

	fn binned_fixture(n_rows: usize) -> (BinnedFeatures, Vec<BinningInstruction>) {
		let columns = vec![
			BinnedFeaturesColumn::U8((0..n_rows).map(|i| (i % 7).to_u8().unwrap()).collect()),
			BinnedFeaturesColumn::U16((0..n_rows).map(|i| ((i * 31) % 300).to_u16().unwrap()).collect()),
		];
		let binning_instructions = vec![
			BinningInstruction {
				thresholds: (0..7).map(|i| i.to_f32().unwrap()).collect(),
			},
			BinningInstruction {
				thresholds: (0..300).map(|i| i.to_f32().unwrap()).collect(),
			},
		];
		(BinnedFeatures { columns }, binning_instructions)
	}

	#[test]
	fn test_histograms_conserve_rows_and_statistics() {
		let n_rows = BIN_STATS_BLOCK_SIZE * 2 + 100;
		let (binned_features, binning_instructions) = binned_fixture(n_rows);
		let labels = Array1::from_shape_fn(n_rows, |i| (i % 11).to_f32().unwrap() * 0.5);
		let criterion = RegressionCriterion {
			labels: labels.view(),
			weights: None,
		};
		// Every other row, so the node is not contiguous.
		let examples_index: Vec<usize> = (0..n_rows).step_by(2).collect();
		let node_stats = compute_node_stats(&criterion, &examples_index);
		let bin_stats = compute_bin_stats(
			&criterion,
			&binned_features,
			&binning_instructions,
			vec![0, 1],
			&examples_index,
		);
		for position in 0..2 {
			let mut totals = vec![0.0; bin_stats.stride];
			for bin_index in 0..bin_stats.n_bins(position) {
				for (total, value) in izip!(totals.iter_mut(), bin_stats.bin(position, bin_index)) {
					*total += value;
				}
			}
			assert_eq!(totals[0], examples_index.len().to_f64().unwrap());
			for (total, expected) in izip!(&totals[1..], &node_stats.stats) {
				assert!((total - expected).abs() <= 1e-9 * expected.abs().max(1.0));
			}
		}
		// The overflow bin never receives training rows.
		let overflow = bin_stats.n_bins(0) - 1;
		assert_eq!(bin_stats.bin(0, overflow)[0], 0.0);
	}

	#[test]
	fn test_blocked_histograms_match_a_single_pass() {
		let n_rows = BIN_STATS_BLOCK_SIZE * 3;
		let (binned_features, binning_instructions) = binned_fixture(n_rows);
		let labels = Array1::from_shape_fn(n_rows, |i| i % 3);
		let criterion = ClassificationCriterion {
			labels: labels.view(),
			weights: None,
			n_classes: 3,
			class_impurity: ClassImpurity::Gini,
		};
		let examples_index: Vec<usize> = (0..n_rows).collect();
		let blocked = compute_bin_stats(
			&criterion,
			&binned_features,
			&binning_instructions,
			vec![0, 1],
			&examples_index,
		);
		let mut expected = BinStats::new(vec![0, 1], &binning_instructions, blocked.stride);
		for (entry, feature_index) in izip!(&mut expected.entries, &[0usize, 1]) {
			compute_bin_stats_for_feature(
				&criterion,
				&binned_features.columns[*feature_index],
				&examples_index,
				entry,
				expected.stride,
			);
		}
		assert_eq!(blocked.entries, expected.entries);
	}

	#[test]
	fn test_node_stats() {
		let labels = arr1(&[0usize, 1, 1, 2, 1]);
		let criterion = ClassificationCriterion {
			labels: labels.view(),
			weights: None,
			n_classes: 3,
			class_impurity: ClassImpurity::Gini,
		};
		let node_stats = compute_node_stats(&criterion, &[1, 2, 4]);
		assert_eq!(node_stats.n_examples, 3);
		assert_eq!(node_stats.stats, vec![0.0, 3.0, 0.0]);
		assert_eq!(node_stats.impurity, 0.0);
	}
}
