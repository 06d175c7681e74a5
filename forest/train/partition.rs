use super::binning::{BinnedFeatures, BinnedFeaturesColumn};
use canopy_thread_pool::pzip;
use rayon::prelude::*;
use std::ops::Range;

/// Slices longer than this are partitioned in parallel, one block of this many items per task. The block size never depends on the number of threads, so the result does not either.
pub const PARTITION_BLOCK_SIZE: usize = 16384;

/**
Stably partition `items` so that every item for which `goes_left` returns true comes before every item for which it returns false, and return the number of items that went left. `scratch` must be as long as `items`.

Large slices are partitioned in two passes. First, each block partitions itself into its own region of `scratch`, lefts followed by rights. Then the block counts are prefix summed into a destination for each block's lefts and rights, and each block copies its two runs back into `items`. Both passes run one task per block.
*/
pub fn stable_partition<T, F>(items: &mut [T], scratch: &mut [T], goes_left: F) -> usize
where
	T: Copy + Send + Sync,
	F: Fn(&T) -> bool + Sync,
{
	debug_assert_eq!(items.len(), scratch.len());
	if items.len() <= PARTITION_BLOCK_SIZE {
		let (n_left, n_right) = partition_block(items, scratch, &goes_left);
		items.copy_within(0..n_right, n_left);
		items[..n_left].copy_from_slice(&scratch[..n_left]);
		return n_left;
	}
	// Partition each block into scratch.
	let counts: Vec<(usize, usize)> = pzip!(
		items.par_chunks_mut(PARTITION_BLOCK_SIZE),
		scratch.par_chunks_mut(PARTITION_BLOCK_SIZE),
	)
	.map(|(items, scratch)| {
		let (n_left, n_right) = partition_block(items, scratch, &goes_left);
		scratch[n_left..n_left + n_right].copy_from_slice(&items[..n_right]);
		(n_left, n_right)
	})
	.collect();
	// The lefts of block i start at the sum of the left counts of the blocks before it, and the rights start after all of the lefts.
	let n_left_total: usize = counts.iter().map(|(n_left, _)| n_left).sum();
	let (mut lefts, mut rights) = items.split_at_mut(n_left_total);
	let destinations: Vec<(&mut [T], &mut [T])> = counts
		.iter()
		.map(|(n_left, n_right)| {
			let (left, rest) = std::mem::take(&mut lefts).split_at_mut(*n_left);
			lefts = rest;
			let (right, rest) = std::mem::take(&mut rights).split_at_mut(*n_right);
			rights = rest;
			(left, right)
		})
		.collect();
	pzip!(
		destinations,
		scratch.par_chunks(PARTITION_BLOCK_SIZE),
		&counts,
	)
	.for_each(|((left, right), scratch, (n_left, n_right))| {
		left.copy_from_slice(&scratch[..*n_left]);
		right.copy_from_slice(&scratch[*n_left..*n_left + *n_right]);
	});
	n_left_total
}

/// Write the lefts of `items` to the front of `scratch` and compact the rights to the front of `items`, preserving order within each.
fn partition_block<T, F>(items: &mut [T], scratch: &mut [T], goes_left: &F) -> (usize, usize)
where
	T: Copy,
	F: Fn(&T) -> bool,
{
	let mut n_left = 0;
	let mut n_right = 0;
	for i in 0..items.len() {
		let item = items[i];
		if goes_left(&item) {
			scratch[n_left] = item;
			n_left += 1;
		} else {
			items[n_right] = item;
			n_right += 1;
		}
	}
	(n_left, n_right)
}

/// Rearrange the rows of a node so the rows whose bin for `feature_index` is at most `bin_index` come first. Returns the number of rows that went left.
pub fn rearrange_examples_index(
	binned_features: &BinnedFeatures,
	feature_index: usize,
	bin_index: usize,
	examples_index: &mut [usize],
	examples_index_scratch: &mut [usize],
) -> usize {
	match &binned_features.columns[feature_index] {
		BinnedFeaturesColumn::U8(values) => {
			stable_partition(examples_index, examples_index_scratch, |example_index| {
				usize::from(values[*example_index]) <= bin_index
			})
		}
		BinnedFeaturesColumn::U16(values) => {
			stable_partition(examples_index, examples_index_scratch, |example_index| {
				usize::from(values[*example_index]) <= bin_index
			})
		}
	}
}

/// Split `slice` into disjoint mutable subslices, one per range. The ranges must be ascending and must not overlap.
pub fn split_ranges_mut<'a, T>(
	mut slice: &'a mut [T],
	ranges: impl IntoIterator<Item = Range<usize>>,
) -> Vec<&'a mut [T]> {
	let mut offset = 0;
	let mut subslices = Vec::new();
	for range in ranges {
		let (_, rest) = std::mem::take(&mut slice).split_at_mut(range.start - offset);
		let (subslice, rest) = rest.split_at_mut(range.end - range.start);
		subslices.push(subslice);
		slice = rest;
		offset = range.end;
	}
	subslices
}

#[test]
fn test_small_partition_is_stable() {
	let mut items = vec![5, 2, 8, 1, 9, 4, 7];
	let mut scratch = vec![0; items.len()];
	let n_left = stable_partition(&mut items, &mut scratch, |item| item % 2 == 0);
	assert_eq!(n_left, 3);
	assert_eq!(items, vec![2, 8, 4, 5, 1, 9, 7]);
}

#[test]
fn test_blocked_partition_matches_serial() {
	let n = PARTITION_BLOCK_SIZE * 3 + 17;
	let goes_left = |item: &usize| (item * 7919) % 13 < 5;
	let mut items: Vec<usize> = (0..n).rev().collect();
	let expected: Vec<usize> = items
		.iter()
		.copied()
		.filter(goes_left)
		.chain(items.iter().copied().filter(|item| !goes_left(item)))
		.collect();
	let mut scratch = vec![0; n];
	let n_left = stable_partition(&mut items, &mut scratch, goes_left);
	assert_eq!(n_left, expected.iter().filter(|item| goes_left(*item)).count());
	assert_eq!(items, expected);
}

#[test]
fn test_partition_everything_one_side() {
	let mut items: Vec<usize> = (0..PARTITION_BLOCK_SIZE * 2 + 1).collect();
	let expected = items.clone();
	let mut scratch = vec![0; items.len()];
	assert_eq!(stable_partition(&mut items, &mut scratch, |_| true), expected.len());
	assert_eq!(items, expected);
	assert_eq!(stable_partition(&mut items, &mut scratch, |_| false), 0);
	assert_eq!(items, expected);
}

#[test]
fn test_split_ranges_mut() {
	let mut items: Vec<usize> = (0..10).collect();
	let subslices = split_ranges_mut(&mut items, vec![1..3, 3..4, 7..10]);
	assert_eq!(subslices.len(), 3);
	assert_eq!(subslices[0], &[1, 2]);
	assert_eq!(subslices[1], &[3]);
	assert_eq!(subslices[2], &[7, 8, 9]);
}
