//! Test utilities for building trees of an exact shape from JSON fixtures.
//!
//! A fixture names the order and spells out every node:
//!
//! ```json
//! {
//!   "order": 4,
//!   "root": {
//!     "children": [
//!       { "runt": "aa", "child": { "values": [{ "key": "aa", "value": 1 }, { "key": "aaa", "value": 2 }] } },
//!       { "runt": "b",  "child": { "values": [{ "key": "b",  "value": 3 }, { "key": "bb",  "value": 4 }] } }
//!     ]
//!   }
//! }
//! ```
//!
//! Leaves are linked into the leaf list left to right. The loader only checks
//! what it needs to build a well-formed node graph (a known order, non-empty
//! internal nodes, leaves at one depth); runts and balance are left to
//! [`Tree::assert_invariants`] so that fixtures can describe broken trees too.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use serde::Deserialize;
use thiserror::Error;

use crate::latch::Latch;
use crate::node::{latch_of, InternalNode, LeafNode, Node, NodeLatch};
use crate::{check_order, Tree};

type FixtureNodeLatch = NodeLatch<String, u64>;

/// Errors raised while loading a fixture.
#[derive(Error, Debug)]
pub enum FixtureError {
	#[error("failed to read fixture: {0}")]
	Io(#[from] std::io::Error),

	#[error("malformed fixture: {0}")]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Tree(#[from] crate::Error),

	#[error("bad fixture shape: {0}")]
	Shape(&'static str),
}

#[derive(Deserialize, Debug)]
struct Edge {
	runt: String,
	child: FixtureNode,
}

#[derive(Deserialize, Debug)]
struct Value {
	key: String,
	value: u64,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum FixtureNode {
	Internal {
		children: Vec<Edge>,
	},
	Leaf {
		values: Vec<Value>,
	},
}

#[derive(Deserialize, Debug)]
struct SampleTree {
	order: usize,
	root: FixtureNode,
}

/// Returns the height of `node` and its number of entries.
fn measure(node: &FixtureNode) -> Result<(usize, usize), FixtureError> {
	match node {
		FixtureNode::Leaf {
			values,
		} => Ok((1, values.len())),
		FixtureNode::Internal {
			children,
		} => {
			let mut height = None;
			let mut len = 0;
			for edge in children {
				let (child_height, child_len) = measure(&edge.child)?;
				if height.is_some_and(|h| h != child_height) {
					return Err(FixtureError::Shape("leaves at different depths"));
				}
				height = Some(child_height);
				len += child_len;
			}
			match height {
				Some(h) => Ok((h + 1, len)),
				None => Err(FixtureError::Shape("internal node without children")),
			}
		}
	}
}

/// Allocates `node` and its subtree, collecting leaves in key order.
fn translate_node<'g>(
	node: FixtureNode,
	order: usize,
	leaves: &mut Vec<Shared<'g, FixtureNodeLatch>>,
	eg: &'g epoch::Guard,
) -> Shared<'g, FixtureNodeLatch> {
	match node {
		FixtureNode::Internal {
			children,
		} => {
			let mut internal = InternalNode {
				runts: Vec::with_capacity(order.max(children.len())),
				children: Vec::with_capacity(order.max(children.len())),
			};
			for edge in children {
				internal.runts.push(edge.runt);
				internal.children.push(Atomic::from(translate_node(edge.child, order, leaves, eg)));
			}
			Owned::new(Latch::new(Node::Internal(internal))).into_shared(eg)
		}
		FixtureNode::Leaf {
			values,
		} => {
			let mut leaf = LeafNode::new(order.max(values.len()));
			for value in values {
				leaf.runts.push(value.key);
				leaf.values.push(value.value);
			}
			let ptr = Owned::new(Latch::new(Node::Leaf(leaf))).into_shared(eg);
			leaves.push(ptr);
			ptr
		}
	}
}

/// Builds a tree from a fixture held in memory.
///
/// # Errors
///
/// Fails if the JSON is malformed, the order is invalid, or the node graph
/// cannot be a B+ tree (see the module docs).
pub fn tree_from_json(json: &str) -> Result<Tree<String, u64>, FixtureError> {
	build(serde_json::from_str(json)?)
}

/// Builds a tree from the fixture file at `path`.
///
/// # Errors
///
/// As [`tree_from_json`], plus I/O failures.
pub fn sample_tree<P: AsRef<Path>>(path: P) -> Result<Tree<String, u64>, FixtureError> {
	let file = File::open(path)?;
	build(serde_json::from_reader(BufReader::new(file))?)
}

fn build(sample: SampleTree) -> Result<Tree<String, u64>, FixtureError> {
	check_order(sample.order)?;
	let (height, len) = measure(&sample.root)?;

	// SAFETY: the nodes are private to this function until the tree owns them,
	// and nothing is retired through this guard.
	let eg = unsafe { epoch::unprotected() };
	let mut leaves = Vec::new();
	let root = translate_node(sample.root, sample.order, &mut leaves, eg);
	for pair in leaves.windows(2) {
		latch_of(pair[0]).exclusive().as_leaf().next.store(pair[1], Ordering::Relaxed);
	}
	Ok(Tree::from_parts(sample.order, root, height, len))
}
