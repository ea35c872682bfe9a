//! # Node Layer
//!
//! A node is either an [`InternalNode`] (runts plus child pointers) or a
//! [`LeafNode`] (runts plus values, and a link to the next leaf). Both keep their
//! runts in two parallel vectors, so `runts[i]` belongs to `children[i]` or
//! `values[i]`.
//!
//! ```text
//!            ┌───────────────────────────┐
//!            │ Internal  runts: [ 0, 30] │
//!            │           children: [*, *]│
//!            └─────────────┬────┬────────┘
//!                 ┌────────┘    └───────┐
//!                 ▼                     ▼
//!       ┌───────────────────┐   ┌───────────────┐
//!       │ Leaf [0, 10, 20]  │──►│ Leaf [30, 40] │──► null
//!       └───────────────────┘   └───────────────┘
//! ```
//!
//! For an internal node `runts[i]` is the smallest key anywhere below
//! `children[i]`. Each node sits behind its own [`Latch`]; every method here
//! assumes the caller holds the latch of every node it touches.
//!
//! Children are owned by their parent. `LeafNode::next` is not ownership: it
//! only exists so scans can walk the leaves in order, and it is rewired by
//! splits and absorptions while both leaves involved are locked.

use std::borrow::Borrow;
use std::fmt;
use std::mem;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::invariant_violation;
use crate::latch::{ExclusiveGuard, Latch};
use crate::search;

/// A node behind its latch, the unit the tree links together.
pub(crate) type NodeLatch<K, V> = Latch<Node<K, V>>;

/// A held node latch.
pub(crate) type NodeGuard<'a, K, V> = ExclusiveGuard<'a, Node<K, V>>;

/// Inline capacity for chains of held node guards.
pub(crate) const CHAIN_INLINE: usize = 8;

/// A chain of held lone children, deepest first.
///
/// With `order == 2` an internal node may have a single child. If that child
/// underflows there is no sibling to borrow from or merge with, so the repair is
/// postponed: the chain is handed up until some ancestor has a sibling, then
/// replayed downward. `chain.last()` is the lone child of the node the chain
/// hangs from, `chain[0]` is the node that actually underflowed.
pub(crate) type Stranded<'g, K, V> = SmallVec<[NodeGuard<'g, K, V>; CHAIN_INLINE]>;

/// Resolves a child or sibling pointer to its latch.
///
/// The caller must hold the latch of a node that links to `ptr` (or the root
/// latch) and keep `ptr`'s epoch pinned.
#[inline]
pub(crate) fn latch_of<'g, K, V>(ptr: Shared<'g, NodeLatch<K, V>>) -> &'g NodeLatch<K, V> {
	// SAFETY: nodes are only retired through `defer_destroy` after being unlinked
	// under their parent's latch, so a pointer read under a held latch stays valid
	// for as long as the epoch that produced `ptr` is pinned.
	match unsafe { ptr.as_ref() } {
		Some(latch) => latch,
		None => invariant_violation("null node pointer"),
	}
}

// ===========================================================================
// Node
// ===========================================================================

/// A node in the tree: either internal or leaf.
pub(crate) enum Node<K, V> {
	/// Routes searches to children.
	Internal(InternalNode<K, V>),
	/// Stores keys and values.
	Leaf(LeafNode<K, V>),
}

impl<K, V> Node<K, V> {
	/// Creates an empty leaf with room for `order` entries.
	pub(crate) fn empty_leaf(order: usize) -> Self {
		Node::Leaf(LeafNode::new(order))
	}

	#[inline]
	pub(crate) fn is_internal(&self) -> bool {
		matches!(self, Node::Internal(_))
	}

	/// Number of runts in the node.
	#[inline]
	pub(crate) fn count(&self) -> usize {
		self.runts().len()
	}

	#[inline]
	pub(crate) fn runts(&self) -> &[K] {
		match self {
			Node::Internal(internal) => &internal.runts,
			Node::Leaf(leaf) => &leaf.runts,
		}
	}

	/// The smallest key in the node's subtree.
	///
	/// # Panics
	///
	/// Panics if the node is empty.
	#[inline]
	pub(crate) fn smallest(&self) -> &K {
		match self.runts().first() {
			Some(key) => key,
			None => invariant_violation("smallest() on an empty node"),
		}
	}

	#[inline]
	pub(crate) fn as_leaf(&self) -> &LeafNode<K, V> {
		match self {
			Node::Leaf(leaf) => leaf,
			Node::Internal(_) => invariant_violation("as_leaf() on an internal node"),
		}
	}

	#[inline]
	pub(crate) fn as_leaf_mut(&mut self) -> &mut LeafNode<K, V> {
		match self {
			Node::Leaf(leaf) => leaf,
			Node::Internal(_) => invariant_violation("as_leaf_mut() on an internal node"),
		}
	}

	#[inline]
	pub(crate) fn as_internal(&self) -> &InternalNode<K, V> {
		match self {
			Node::Internal(internal) => internal,
			Node::Leaf(_) => invariant_violation("as_internal() on a leaf"),
		}
	}

	#[inline]
	pub(crate) fn as_internal_mut(&mut self) -> &mut InternalNode<K, V> {
		match self {
			Node::Internal(internal) => internal,
			Node::Leaf(_) => invariant_violation("as_internal_mut() on a leaf"),
		}
	}

	/// Returns `true` if removing one child could leave this root with a single child.
	#[inline]
	pub(crate) fn may_collapse(&self) -> bool {
		matches!(self, Node::Internal(internal) if internal.children.len() <= 2)
	}

	/// Splits the node in half if it holds `order` runts or more.
	///
	/// The upper half moves into a new right sibling of the same kind. For
	/// leaves the sibling is spliced into the leaf list right after `self`. The
	/// sibling comes back already locked, so nobody can see it half-linked; the
	/// caller must link it into the parent before letting the guard go.
	pub(crate) fn maybe_split<'g>(
		&mut self,
		order: usize,
		eg: &'g epoch::Guard,
	) -> Option<(Shared<'g, NodeLatch<K, V>>, NodeGuard<'g, K, V>)> {
		let count = self.count();
		if count < order {
			return None;
		}
		let at = count / 2;
		let sibling = match self {
			Node::Internal(internal) => Node::Internal(internal.split_off(at, order)),
			Node::Leaf(leaf) => Node::Leaf(leaf.split_off(at, order)),
		};
		let sibling_ptr = Owned::new(Latch::new(sibling)).into_shared(eg);
		let sibling_guard = latch_of(sibling_ptr).exclusive();
		if let Node::Leaf(leaf) = self {
			leaf.next.store(sibling_ptr, Ordering::Release);
		}
		trace!(internal = self.is_internal(), left = at, right = count - at, "split node");
		Some((sibling_ptr, sibling_guard))
	}

	/// Moves the first entry of `right` to the end of `self`.
	pub(crate) fn adopt_from_right(&mut self, right: &mut Node<K, V>) {
		if right.count() == 0 {
			invariant_violation("adopting from an empty right sibling");
		}
		match (self, right) {
			(Node::Internal(this), Node::Internal(right)) => {
				this.runts.push(right.runts.remove(0));
				this.children.push(right.children.remove(0));
			}
			(Node::Leaf(this), Node::Leaf(right)) => {
				this.runts.push(right.runts.remove(0));
				this.values.push(right.values.remove(0));
			}
			_ => invariant_violation("adopting across node kinds"),
		}
		trace!("adopted from right sibling");
	}

	/// Moves the last entry of `left` to the front of `self`.
	pub(crate) fn adopt_from_left(&mut self, left: &mut Node<K, V>) {
		match (self, left) {
			(Node::Internal(this), Node::Internal(left)) => {
				let (Some(runt), Some(child)) = (left.runts.pop(), left.children.pop()) else {
					invariant_violation("adopting from an empty left sibling");
				};
				this.runts.insert(0, runt);
				this.children.insert(0, child);
			}
			(Node::Leaf(this), Node::Leaf(left)) => {
				let (Some(runt), Some(value)) = (left.runts.pop(), left.values.pop()) else {
					invariant_violation("adopting from an empty left sibling");
				};
				this.runts.insert(0, runt);
				this.values.insert(0, value);
			}
			_ => invariant_violation("adopting across node kinds"),
		}
		trace!("adopted from left sibling");
	}

	/// Appends everything in `right` to `self`, leaving `right` an empty shell.
	///
	/// For leaves `right` must be `self`'s successor in the leaf list; `right_ptr`
	/// is its address and is checked against `self.next`.
	pub(crate) fn absorb_right(
		&mut self,
		right: &mut Node<K, V>,
		right_ptr: Shared<'_, NodeLatch<K, V>>,
		eg: &epoch::Guard,
	) {
		match (self, right) {
			(Node::Internal(this), Node::Internal(right)) => {
				this.runts.append(&mut right.runts);
				this.children.append(&mut right.children);
			}
			(Node::Leaf(this), Node::Leaf(right)) => {
				if this.next.load(Ordering::Relaxed, eg) != right_ptr {
					invariant_violation("absorbing a leaf that is not the next leaf");
				}
				this.runts.append(&mut right.runts);
				this.values.append(&mut right.values);
				this.next = mem::replace(&mut right.next, Atomic::null());
			}
			_ => invariant_violation("absorbing across node kinds"),
		}
		trace!("absorbed right sibling");
	}
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Node<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Node::Internal(internal) => internal.fmt(f),
			Node::Leaf(leaf) => leaf.fmt(f),
		}
	}
}

// ===========================================================================
// Leaf Node
// ===========================================================================

/// A leaf: sorted keys, their values, and the next leaf in key order.
pub(crate) struct LeafNode<K, V> {
	pub(crate) runts: Vec<K>,
	pub(crate) values: Vec<V>,
	/// Successor in the leaf list; null for the rightmost leaf.
	pub(crate) next: Atomic<NodeLatch<K, V>>,
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for LeafNode<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LeafNode").field("runts", &self.runts).field("values", &self.values).finish()
	}
}

impl<K, V> LeafNode<K, V> {
	pub(crate) fn new(order: usize) -> Self {
		LeafNode {
			runts: Vec::with_capacity(order),
			values: Vec::with_capacity(order),
			next: Atomic::null(),
		}
	}

	/// Moves entries `at..` into a new leaf that inherits `self`'s successor.
	fn split_off(&mut self, at: usize, order: usize) -> LeafNode<K, V> {
		let mut runts = Vec::with_capacity(order);
		runts.extend(self.runts.drain(at..));
		let mut values = Vec::with_capacity(order);
		values.extend(self.values.drain(at..));
		LeafNode {
			runts,
			values,
			next: mem::replace(&mut self.next, Atomic::null()),
		}
	}

	/// Returns the value stored for `key`.
	pub(crate) fn get<Q>(&self, key: &Q) -> Option<&V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		match search::ge_index(&self.runts, key) {
			(index, true) => Some(&self.values[index]),
			_ => None,
		}
	}

	/// Stores the value produced by `f` under `key`.
	///
	/// `f` sees the current value, if any. If it fails the leaf is left
	/// untouched. Returns the value that was replaced.
	pub(crate) fn upsert<F, E>(&mut self, key: K, f: F) -> Result<Option<V>, E>
	where
		K: Ord,
		F: FnOnce(Option<&V>) -> Result<V, E>,
	{
		// Ascending inserts land past the last runt.
		if self.runts.last().map_or(true, |last| *last < key) {
			let value = f(None)?;
			self.runts.push(key);
			self.values.push(value);
			return Ok(None);
		}
		match search::ge_index(&self.runts, &key) {
			(index, true) => {
				let value = f(Some(&self.values[index]))?;
				Ok(Some(mem::replace(&mut self.values[index], value)))
			}
			(index, false) => {
				let value = f(None)?;
				self.runts.insert(index, key);
				self.values.insert(index, value);
				Ok(None)
			}
		}
	}

	/// Removes `key`, shifting the tail left. Returns the removed value.
	pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		match search::ge_index(&self.runts, key) {
			(index, true) => {
				self.runts.remove(index);
				Some(self.values.remove(index))
			}
			_ => None,
		}
	}
}

// ===========================================================================
// Internal Node
// ===========================================================================

/// An internal node: `runts[i]` is the smallest key below `children[i]`.
pub(crate) struct InternalNode<K, V> {
	pub(crate) runts: Vec<K>,
	pub(crate) children: Vec<Atomic<NodeLatch<K, V>>>,
}

impl<K: fmt::Debug, V> fmt::Debug for InternalNode<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InternalNode")
			.field("runts", &self.runts)
			.field("children", &self.children.len())
			.finish()
	}
}

impl<K, V> InternalNode<K, V> {
	/// Creates a node over two subtrees, as a new root does.
	pub(crate) fn from_pair(
		order: usize,
		left: (K, Shared<'_, NodeLatch<K, V>>),
		right: (K, Shared<'_, NodeLatch<K, V>>),
	) -> Self {
		let mut runts = Vec::with_capacity(order);
		let mut children = Vec::with_capacity(order);
		runts.extend([left.0, right.0]);
		children.extend([Atomic::from(left.1), Atomic::from(right.1)]);
		InternalNode {
			runts,
			children,
		}
	}

	fn split_off(&mut self, at: usize, order: usize) -> InternalNode<K, V> {
		let mut runts = Vec::with_capacity(order);
		runts.extend(self.runts.drain(at..));
		let mut children = Vec::with_capacity(order);
		children.extend(self.children.drain(at..));
		InternalNode {
			runts,
			children,
		}
	}

	/// Picks the child whose subtree may contain `key`.
	#[inline]
	pub(crate) fn child_index<Q>(&self, key: &Q) -> usize
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		search::le_index(&self.runts, key)
	}

	#[inline]
	pub(crate) fn child_ptr<'g>(
		&self,
		slot: usize,
		eg: &'g epoch::Guard,
	) -> Shared<'g, NodeLatch<K, V>> {
		match self.children.get(slot) {
			Some(child) => child.load(Ordering::Acquire, eg),
			None => invariant_violation("child slot out of range"),
		}
	}

	#[inline]
	pub(crate) fn child<'g>(&self, slot: usize, eg: &'g epoch::Guard) -> &'g NodeLatch<K, V> {
		latch_of(self.child_ptr(slot, eg))
	}

	/// Links `child` in at `slot`, shifting later slots right.
	pub(crate) fn insert_child(&mut self, slot: usize, runt: K, child: Shared<'_, NodeLatch<K, V>>) {
		self.runts.insert(slot, runt);
		self.children.insert(slot, Atomic::from(child));
	}

	/// Unlinks the child at `slot` and returns it.
	pub(crate) fn remove_child<'g>(
		&mut self,
		slot: usize,
		eg: &'g epoch::Guard,
	) -> Shared<'g, NodeLatch<K, V>> {
		if slot >= self.children.len() {
			invariant_violation("child slot out of range");
		}
		self.runts.remove(slot);
		self.children.remove(slot).load(Ordering::Relaxed, eg)
	}

	/// Forgets all children, leaving an empty shell ready to be retired.
	pub(crate) fn clear(&mut self) {
		self.runts.clear();
		self.children.clear();
	}
}

impl<K: Clone, V> InternalNode<K, V> {
	/// Restores the child at `slot` after a delete somewhere below it.
	///
	/// `child` is the child's held latch and `below` its chain of stranded lone
	/// descendants (see [`Stranded`]). A child that kept at least `order / 2`
	/// runts only has its runt refreshed. Otherwise it adopts an entry from its
	/// right sibling, else from its left sibling; failing both, the left sibling
	/// absorbs it, or it absorbs its right sibling when it is the first child.
	///
	/// Returns the chain this node now strands, empty unless `child` needed help
	/// and is this node's only child.
	pub(crate) fn repair<'g>(
		&mut self,
		slot: usize,
		mut child: NodeGuard<'g, K, V>,
		mut below: Stranded<'g, K, V>,
		order: usize,
		eg: &'g epoch::Guard,
	) -> Stranded<'g, K, V> {
		let min = order / 2;
		if child.count() >= min && below.is_empty() {
			self.runts[slot] = child.smallest().clone();
			return below;
		}
		if self.children.len() == 1 {
			below.push(child);
			return below;
		}

		if slot + 1 < self.children.len() {
			let mut right = self.child(slot + 1, eg).exclusive();
			if right.count() > min {
				child.adopt_from_right(&mut right);
				self.runts[slot + 1] = right.smallest().clone();
				drop(right);
				return self.settle(slot, child, below, 0, order, eg);
			}
			if slot == 0 {
				let right_ptr = self.child_ptr(slot + 1, eg);
				child.absorb_right(&mut right, right_ptr, eg);
				drop(right);
				let retired = self.remove_child(slot + 1, eg);
				// SAFETY: the shell is unlinked from this node and from the leaf
				// list, and its latch was released above.
				unsafe { eg.defer_destroy(retired) };
				return self.settle(slot, child, below, 0, order, eg);
			}
		}

		// Sibling latches are taken left to right, as scans take them, so the
		// child and its stranded chain are given back while the left neighbour
		// is acquired. Holding this node keeps every other writer away from all
		// of them; scans may pass through the chain but change nothing.
		let depth = below.len();
		drop(below);
		let child_latch = child.unlock();
		let mut left = self.child(slot - 1, eg).exclusive();
		let mut child = child_latch.exclusive();
		let below = lone_chain(&child, depth, eg);
		if left.count() > min {
			child.adopt_from_left(&mut left);
			drop(left);
			return self.settle(slot, child, below, 1, order, eg);
		}
		let lone_slot = left.count();
		let child_ptr = self.child_ptr(slot, eg);
		left.absorb_right(&mut child, child_ptr, eg);
		drop(child);
		let retired = self.remove_child(slot, eg);
		// SAFETY: as above.
		unsafe { eg.defer_destroy(retired) };
		self.settle(slot - 1, left, below, lone_slot, order, eg)
	}

	/// Finishes a repair whose result lives in `host` at `slot`: replays the
	/// stranded chain inside `host` (its lone child now sits at `lone_slot`) and
	/// refreshes `host`'s runt.
	fn settle<'g>(
		&mut self,
		slot: usize,
		mut host: NodeGuard<'g, K, V>,
		mut below: Stranded<'g, K, V>,
		lone_slot: usize,
		order: usize,
		eg: &'g epoch::Guard,
	) -> Stranded<'g, K, V> {
		if let Some(lone) = below.pop() {
			let leftover = host.as_internal_mut().repair(lone_slot, lone, below, order, eg);
			if !leftover.is_empty() {
				invariant_violation("lone child still stranded after its parent gained a sibling");
			}
		}
		self.runts[slot] = host.smallest().clone();
		Stranded::new()
	}
}

/// Latches the `depth` lone descendants below `top`, top-down, and returns them
/// deepest first, the order of a [`Stranded`] chain.
fn lone_chain<'g, K, V>(top: &Node<K, V>, depth: usize, eg: &'g epoch::Guard) -> Stranded<'g, K, V> {
	let mut chain = Stranded::new();
	if depth == 0 {
		return chain;
	}
	let mut next = top.as_internal().child(0, eg);
	loop {
		let guard = next.exclusive();
		if chain.len() + 1 < depth {
			next = guard.as_internal().child(0, eg);
		}
		chain.push(guard);
		if chain.len() == depth {
			break;
		}
	}
	chain.reverse();
	chain
}
