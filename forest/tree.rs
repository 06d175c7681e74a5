use crate::train::binning::BinnedFeatures;
use serde::{Deserialize, Serialize};

/// Trees are stored as a `Vec` of `Node`s in breadth-first order, so the root is at index 0 and every node comes after its parent. Each branch holds the indexes of its two children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree<L> {
	pub nodes: Vec<Node<L>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node<L> {
	Branch(BranchNode),
	Leaf(LeafNode<L>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
	pub left_child_index: usize,
	pub right_child_index: usize,
	pub feature_index: usize,
	/// Rows whose value for `feature_index` is at most `split_value` go to the left child.
	pub split_value: f32,
	/// The same boundary expressed as a bin of the training binning.
	pub bin_index: usize,
	pub impurity: f32,
	pub impurity_decrease: f32,
	/// The fraction of the tree's training rows that passed through this node.
	pub examples_fraction: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafNode<L> {
	pub value: L,
	pub impurity: f32,
	pub examples_fraction: f32,
}

impl<L> Tree<L> {
	/// Make a prediction for a single row of features.
	pub fn predict(&self, features: &[f32]) -> &L {
		let leaf_index =
			self.leaf_index_with(|branch| features[branch.feature_index] <= branch.split_value);
		self.leaf_value(leaf_index)
	}

	/// Walk from the root to a leaf, going left wherever `goes_left` returns true, and return the leaf's node index.
	pub(crate) fn leaf_index_with(&self, goes_left: impl Fn(&BranchNode) -> bool) -> usize {
		let mut node_index = 0;
		loop {
			match &self.nodes[node_index] {
				Node::Branch(branch) => {
					node_index = if goes_left(branch) {
						branch.left_child_index
					} else {
						branch.right_child_index
					};
				}
				Node::Leaf(_) => return node_index,
			}
		}
	}

	/// Route a training row with its binned features.
	pub(crate) fn leaf_index_binned(&self, binned_features: &BinnedFeatures, example_index: usize) -> usize {
		self.leaf_index_with(|branch| {
			binned_features.columns[branch.feature_index].get(example_index) <= branch.bin_index
		})
	}

	pub(crate) fn leaf_value(&self, node_index: usize) -> &L {
		match &self.nodes[node_index] {
			Node::Leaf(leaf) => &leaf.value,
			Node::Branch(_) => unreachable!(),
		}
	}

	pub fn n_leaves(&self) -> usize {
		self.nodes
			.iter()
			.filter(|node| matches!(node, Node::Leaf(_)))
			.count()
	}

	/// The depth of the deepest leaf. A tree that is a single leaf has depth 0.
	pub fn depth(&self) -> usize {
		let mut depths = vec![0; self.nodes.len()];
		for (node_index, node) in self.nodes.iter().enumerate() {
			if let Node::Branch(branch) = node {
				depths[branch.left_child_index] = depths[node_index] + 1;
				depths[branch.right_child_index] = depths[node_index] + 1;
			}
		}
		depths.into_iter().max().unwrap_or(0)
	}
}

#[test]
fn test_predict() {
	let tree = Tree {
		nodes: vec![
			Node::Branch(BranchNode {
				left_child_index: 1,
				right_child_index: 2,
				feature_index: 1,
				split_value: 0.5,
				bin_index: 0,
				impurity: 1.0,
				impurity_decrease: 0.5,
				examples_fraction: 1.0,
			}),
			Node::Leaf(LeafNode {
				value: -1.0f32,
				impurity: 0.0,
				examples_fraction: 0.5,
			}),
			Node::Leaf(LeafNode {
				value: 1.0,
				impurity: 0.0,
				examples_fraction: 0.5,
			}),
		],
	};
	assert_eq!(*tree.predict(&[9.0, 0.5]), -1.0);
	assert_eq!(*tree.predict(&[9.0, 0.6]), 1.0);
	assert_eq!(tree.n_leaves(), 2);
	assert_eq!(tree.depth(), 1);
}
