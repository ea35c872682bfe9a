//! # Larch: A Lock-Coupled Concurrent B+ Tree
//!
//! This crate provides an ordered, in-memory key/value index shaped as a B+ tree
//! that many threads can read and write at once. Every node carries its own
//! exclusive latch and operations walk the tree with **pessimistic lock
//! coupling**.
//!
//! ## Design Overview
//!
//! ### Key Concepts
//!
//! **Lock Coupling**: An operation latches a child before releasing its parent,
//! so the child it picked cannot be split, merged or freed under it. Latches are
//! only ever taken top-down, and left to right among siblings, which rules out
//! deadlock.
//!
//! **Preemptive Splits**: A writer splits any full node it meets on the way
//! down. Splits therefore never propagate upward, and apart from a new minimum
//! (below) an insert only ever holds a parent, a child and the child's freshly
//! split sibling.
//!
//! **Runts**: Internal nodes route by the *smallest* key of each child's
//! subtree (its runt). A write whose key is smaller than everything in the
//! tree keeps the leftmost nodes it passes latched and lowers their runts once
//! the entry is stored, so a refused update leaves them untouched.
//!
//! **Merges on the way back up**: Whether a delete underflows a node depends on
//! whether the key was there at all, so deletes keep the path above the leaf
//! latched (up to the deepest node that cannot be affected) and repair
//! underfull nodes by adopting from a sibling or merging with one.
//!
//! ### Tree Structure
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │   Root Latch    │  <- Protects the root pointer
//!                    └────────┬────────┘
//!                             │
//!                             ▼
//!                    ┌─────────────────┐
//!                    │  Internal Node  │  <- runts[i] = smallest key under children[i]
//!                    │   runts: [K]    │
//!                    │ children: [ptr] │
//!                    └────────┬────────┘
//!                             │
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!        ┌──────────┐  ┌──────────┐  ┌──────────┐
//!        │   Leaf   │─►│   Leaf   │─►│   Leaf   │  <- Key/value pairs, linked for scans
//!        │ runts:[K]│  │ runts:[K]│  │ runts:[K]│
//!        │ vals:[V] │  │ vals:[V] │  │ vals:[V] │
//!        └──────────┘  └──────────┘  └──────────┘
//! ```
//!
//! ## Basic Usage
//!
//! ```
//! use larch::Tree;
//!
//! let tree = Tree::new(16).unwrap();
//!
//! tree.insert(3, "three");
//! tree.insert(1, "one");
//! assert_eq!(tree.insert(3, "THREE"), Some("three"));
//!
//! assert_eq!(tree.search(&3), Some("THREE"));
//! assert_eq!(tree.lookup(&1, |v| v.len()), Some(3));
//!
//! tree.update(2, |current| match current {
//!     Some(_) => "two again",
//!     None => "two",
//! });
//!
//! let pairs: Vec<_> = tree.new_scanner_all().into_pairs().collect();
//! assert_eq!(pairs, vec![(1, "one"), (2, "two"), (3, "THREE")]);
//!
//! assert_eq!(tree.delete(&1), Some("one"));
//! assert_eq!(tree.delete(&1), None);
//! ```
//!
//! ## Thread Safety
//!
//! The tree is `Send + Sync` for `Send` keys and values and can be shared via
//! `Arc<Tree<K, V>>`. Node memory is reclaimed with `crossbeam_epoch`, so a node
//! unlinked by one thread is only freed once no other thread can still reach it.
//!
//! Callbacks given to [`Tree::update`], [`Tree::try_update`] and
//! [`Tree::lookup`] run while a leaf latch is held. They must not call back into
//! the same tree, and neither may a thread that holds a live [`Cursor`].

// Guard-carrying tuples read better spelled out than aliased.
#![allow(clippy::type_complexity)]

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use smallvec::SmallVec;
use tracing::debug;

use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod error;
pub mod iter;
pub mod latch;
mod node;
mod search;
#[cfg(feature = "test-utils")]
pub mod util;

pub use error::{Error, Result};
pub use iter::{Cursor, Pairs};

use error::invariant_violation;
use latch::{ExclusiveGuard, Latch};
use node::{latch_of, InternalNode, Node, NodeGuard, NodeLatch, Stranded};

// ---------------------------------------------------------------------------
// Configuration Constants
// ---------------------------------------------------------------------------

/// Order used by [`Tree::default`].
///
/// Each node holds up to this many runts. A larger order gives a shallower tree
/// but longer shifts on every insert and delete.
pub const DEFAULT_ORDER: usize = 64;

/// Inline capacity of a delete's recorded descent path.
const PATH_INLINE: usize = 16;

/// The latched root pointer.
type RootGuard<'t, K, V> = ExclusiveGuard<'t, Atomic<NodeLatch<K, V>>>;

/// Leftmost ancestors held by a write whose key is a new minimum below them.
type Spine<'g, K, V> = SmallVec<[NodeGuard<'g, K, V>; PATH_INLINE]>;

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// A concurrent B+ tree mapping keys of type `K` to values of type `V`.
///
/// All operations take `&self`; share the tree between threads with an `Arc`.
pub struct Tree<K, V> {
	/// Latch over the root pointer; the parent of the root in every lock-coupled
	/// descent.
	root: Latch<Atomic<NodeLatch<K, V>>>,
	/// Maximum number of runts per node; a power of two, at least 2.
	order: usize,
	/// Number of levels; 1 while the root is a leaf.
	height: AtomicUsize,
	/// Number of entries.
	len: AtomicUsize,
}

impl<K: Clone + Ord, V> Default for Tree<K, V> {
	fn default() -> Self {
		Tree::with_valid_order(DEFAULT_ORDER)
	}
}

/// Checks that `order` is a power of two no smaller than 2.
pub(crate) fn check_order(order: usize) -> Result<()> {
	if order < 2 || !order.is_power_of_two() {
		return Err(Error::InvalidOrder {
			order,
		});
	}
	Ok(())
}

impl<K, V> Tree<K, V> {
	fn with_valid_order(order: usize) -> Self {
		Tree {
			root: Latch::new(Atomic::new(Latch::new(Node::empty_leaf(order)))),
			order,
			height: AtomicUsize::new(1),
			len: AtomicUsize::new(0),
		}
	}

	/// Assembles a tree around an already built node graph.
	#[cfg(feature = "test-utils")]
	pub(crate) fn from_parts(
		order: usize,
		root: Shared<'_, NodeLatch<K, V>>,
		height: usize,
		len: usize,
	) -> Self {
		Tree {
			root: Latch::new(Atomic::from(root)),
			order,
			height: AtomicUsize::new(height),
			len: AtomicUsize::new(len),
		}
	}

	/// Returns the order the tree was built with.
	#[inline]
	pub fn order(&self) -> usize {
		self.order
	}

	/// Returns the number of levels in the tree, counting the leaves.
	///
	/// A tree whose root is a leaf has height 1. Under concurrent writes the
	/// value may be stale by the time it is read.
	#[inline]
	pub fn height(&self) -> usize {
		self.height.load(Ordering::Relaxed)
	}

	/// Returns the number of entries in the tree.
	///
	/// Under concurrent writes the value may be stale by the time it is read.
	#[inline]
	pub fn len(&self) -> usize {
		self.len.load(Ordering::Relaxed)
	}

	/// Returns `true` if the tree holds no entries.
	#[inline]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Resolves the latched root pointer to the root node's latch.
	#[inline]
	fn root_node<'g>(root: &RootGuard<'_, K, V>, eg: &'g epoch::Guard) -> &'g NodeLatch<K, V> {
		latch_of(root.load(Ordering::Acquire, eg))
	}
}

impl<K: Clone + Ord, V> Tree<K, V> {
	/// Creates an empty tree whose nodes hold up to `order` runts.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidOrder`] unless `order` is a power of two no
	/// smaller than 2.
	///
	/// ```
	/// use larch::{Error, Tree};
	///
	/// assert!(Tree::<u64, ()>::new(32).is_ok());
	/// assert_eq!(Tree::<u64, ()>::new(12).unwrap_err(), Error::InvalidOrder { order: 12 });
	/// ```
	pub fn new(order: usize) -> Result<Self> {
		check_order(order)?;
		Ok(Tree::with_valid_order(order))
	}

	// -----------------------------------------------------------------------
	// Descent
	// -----------------------------------------------------------------------

	/// Latches the leaf whose key range covers `key`.
	pub(crate) fn find_leaf<'g, Q>(&self, key: &Q, eg: &'g epoch::Guard) -> NodeGuard<'g, K, V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		self.descend(eg, |internal| internal.child_index(key))
	}

	/// Latches the leftmost leaf.
	pub(crate) fn find_first_leaf<'g>(&self, eg: &'g epoch::Guard) -> NodeGuard<'g, K, V> {
		self.descend(eg, |_| 0)
	}

	/// Read-only lock-coupled descent, choosing each child with `choose`.
	fn descend<'g, F>(&self, eg: &'g epoch::Guard, mut choose: F) -> NodeGuard<'g, K, V>
	where
		F: FnMut(&InternalNode<K, V>) -> usize,
	{
		let tree_guard = self.root.exclusive();
		let mut guard = Self::root_node(&tree_guard, eg).exclusive();
		drop(tree_guard);
		loop {
			let child = match &*guard {
				Node::Leaf(_) => return guard,
				Node::Internal(internal) => internal.child(choose(internal), eg),
			};
			// The child is latched before the parent's guard is overwritten.
			guard = child.exclusive();
		}
	}

	/// Write descent: latches the leaf `key` belongs in, splitting every full
	/// node on the way so the leaf has room for one more entry.
	///
	/// A key below the leftmost runt of a node it passes through leaves that
	/// node latched in the returned spine, top-down. Their first runt must be
	/// lowered to `key` once the entry is stored, and left alone if it is not.
	fn find_leaf_for_write<'g>(
		&self,
		key: &K,
		eg: &'g epoch::Guard,
	) -> (NodeGuard<'g, K, V>, Spine<'g, K, V>) {
		let mut spine = Spine::new();
		let tree_guard = self.root.exclusive();
		let mut guard = Self::root_node(&tree_guard, eg).exclusive();
		if let Some((sibling_ptr, sibling)) = guard.maybe_split(self.order, eg) {
			guard = self.grow(&tree_guard, guard, sibling_ptr, sibling, key, &mut spine, eg);
		}
		drop(tree_guard);

		loop {
			if !guard.is_internal() {
				return (guard, spine);
			}
			let parent = guard.as_internal_mut();
			let mut slot = parent.child_index(key);
			let mut child = parent.child(slot, eg).exclusive();
			if let Some((sibling_ptr, sibling)) = child.maybe_split(self.order, eg) {
				parent.insert_child(slot + 1, sibling.smallest().clone(), sibling_ptr);
				if key >= sibling.smallest() {
					child = sibling;
					slot += 1;
				}
			}
			let lowers = slot == 0 && *key < parent.runts[0];
			// The child is latched before the parent's guard is given up.
			let parent = mem::replace(&mut guard, child);
			if lowers {
				spine.push(parent);
			}
		}
	}

	/// Installs a new root above a root that just split into `left` and `right`.
	///
	/// Returns the half `key` belongs in; the other half is released. If `key`
	/// is below both halves the new root is handed back latched in `spine`.
	#[allow(clippy::too_many_arguments)]
	fn grow<'g>(
		&self,
		tree_guard: &RootGuard<'_, K, V>,
		left: NodeGuard<'g, K, V>,
		right_ptr: Shared<'g, NodeLatch<K, V>>,
		right: NodeGuard<'g, K, V>,
		key: &K,
		spine: &mut Spine<'g, K, V>,
		eg: &'g epoch::Guard,
	) -> NodeGuard<'g, K, V> {
		let left_ptr = tree_guard.load(Ordering::Relaxed, eg);
		let root = InternalNode::from_pair(
			self.order,
			(left.smallest().clone(), left_ptr),
			(right.smallest().clone(), right_ptr),
		);
		let root_ptr = Owned::new(Latch::new(Node::Internal(root))).into_shared(eg);
		if key < left.smallest() {
			// Unpublished, so this never waits.
			spine.push(latch_of(root_ptr).exclusive());
		}
		tree_guard.store(root_ptr, Ordering::Release);
		let height = self.height.fetch_add(1, Ordering::Relaxed) + 1;
		debug!(height, order = self.order, "root split, tree grew a level");
		if key >= right.smallest() {
			right
		} else {
			left
		}
	}

	// -----------------------------------------------------------------------
	// Reads
	// -----------------------------------------------------------------------

	/// Calls `f` on the value stored for `key`, while its leaf is latched.
	///
	/// `f` must not access this tree.
	///
	/// ```
	/// let tree = larch::Tree::new(8).unwrap();
	/// tree.insert("k".to_string(), vec![1, 2, 3]);
	/// assert_eq!(tree.lookup("k", |v| v.len()), Some(3));
	/// assert_eq!(tree.lookup("missing", |v| v.len()), None);
	/// ```
	pub fn lookup<Q, R, F>(&self, key: &Q, f: F) -> Option<R>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
		F: FnOnce(&V) -> R,
	{
		let eg = epoch::pin();
		let leaf = self.find_leaf(key, &eg);
		leaf.as_leaf().get(key).map(f)
	}

	/// Returns a clone of the value stored for `key`.
	pub fn search<Q>(&self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
		V: Clone,
	{
		self.lookup(key, V::clone)
	}

	/// Returns `true` if the tree holds `key`.
	pub fn contains_key<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		self.lookup(key, |_| ()).is_some()
	}

	/// Returns a cursor positioned just before the first entry with a key `>= key`.
	pub fn new_scanner<Q>(&self, key: &Q) -> Cursor<'_, K, V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		let mut cursor = Cursor::new(self);
		cursor.seek(key);
		cursor
	}

	/// Returns a cursor positioned just before the smallest entry.
	pub fn new_scanner_all(&self) -> Cursor<'_, K, V> {
		let mut cursor = Cursor::new(self);
		cursor.seek_to_first();
		cursor
	}

	// -----------------------------------------------------------------------
	// Writes
	// -----------------------------------------------------------------------

	/// Inserts `value` under `key`, returning the value it replaced.
	pub fn insert(&self, key: K, value: V) -> Option<V> {
		match self.put(key, |_| Ok::<_, Infallible>(value)) {
			Ok(previous) => previous,
			Err(never) => match never {},
		}
	}

	/// Stores the value `f` computes from the current one.
	///
	/// `f` receives `Some(&current)` if `key` is present and `None` otherwise.
	/// It runs while the leaf is latched and must not access this tree.
	pub fn update<F>(&self, key: K, f: F)
	where
		F: FnOnce(Option<&V>) -> V,
	{
		match self.put(key, |current| Ok::<_, Infallible>(f(current))) {
			Ok(_) => {}
			Err(never) => match never {},
		}
	}

	/// Like [`update`](Tree::update), but `f` may refuse.
	///
	/// # Errors
	///
	/// Returns whatever error `f` returns; the tree is then left as it was.
	///
	/// ```
	/// let tree = larch::Tree::new(8).unwrap();
	/// tree.insert(1, 10u32);
	/// let bumped = tree.try_update(1, |v| v.copied().unwrap_or(0).checked_add(1).ok_or("overflow"));
	/// assert_eq!(bumped, Ok(()));
	/// assert_eq!(tree.search(&1), Some(11));
	///
	/// tree.insert(2, u32::MAX);
	/// let bumped = tree.try_update(2, |v| v.copied().unwrap_or(0).checked_add(1).ok_or("overflow"));
	/// assert_eq!(bumped, Err("overflow"));
	/// assert_eq!(tree.search(&2), Some(u32::MAX));
	/// ```
	pub fn try_update<F, E>(&self, key: K, f: F) -> std::result::Result<(), E>
	where
		F: FnOnce(Option<&V>) -> std::result::Result<V, E>,
	{
		self.put(key, f).map(|_| ())
	}

	fn put<F, E>(&self, key: K, f: F) -> std::result::Result<Option<V>, E>
	where
		F: FnOnce(Option<&V>) -> std::result::Result<V, E>,
	{
		let eg = epoch::pin();
		let (mut leaf, spine) = self.find_leaf_for_write(&key, &eg);
		let runt = (!spine.is_empty()).then(|| key.clone());
		let previous = leaf.as_leaf_mut().upsert(key, f)?;
		if let Some(runt) = runt {
			for mut ancestor in spine {
				ancestor.as_internal_mut().runts[0] = runt.clone();
			}
		}
		if previous.is_none() {
			self.len.fetch_add(1, Ordering::Relaxed);
		}
		Ok(previous)
	}

	/// Removes `key`, returning its value. Deleting an absent key is a no-op.
	pub fn delete<Q>(&self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		let eg = epoch::pin();
		let min = self.order / 2;

		let root_guard = self.root.exclusive();
		let mut node = Self::root_node(&root_guard, &eg).exclusive();
		// Only a root that can lose its second child needs replacing.
		let mut tree_guard = node.may_collapse().then_some(root_guard);

		let mut path: SmallVec<[(NodeGuard<'_, K, V>, usize); PATH_INLINE]> = SmallVec::new();
		while node.is_internal() {
			let parent = node.as_internal();
			let slot = parent.child_index(key);
			let child = parent.child(slot, &eg).exclusive();
			let runt: &Q = parent.runts[slot].borrow();
			let settled = child.count() > min && runt != key;
			path.push((node, slot));
			if settled {
				// Nothing above `child` can change.
				path.clear();
				tree_guard = None;
			}
			node = child;
		}

		let removed = node.as_leaf_mut().remove(key)?;
		self.len.fetch_sub(1, Ordering::Relaxed);

		let mut stranded = Stranded::new();
		while let Some((mut parent, slot)) = path.pop() {
			stranded = parent.as_internal_mut().repair(slot, node, stranded, self.order, &eg);
			node = parent;
		}
		match tree_guard {
			Some(tree_guard) => self.collapse(&tree_guard, node, stranded, &eg),
			None if !stranded.is_empty() => {
				invariant_violation("underfull node stranded below a released ancestor")
			}
			None => {}
		}
		Some(removed)
	}

	/// Replaces an internal root that has a single child by that child, as many
	/// times as needed.
	///
	/// `stranded` holds the latches of lone descendants still owed a repair;
	/// each of them becomes the root in turn.
	fn collapse<'g>(
		&self,
		tree_guard: &RootGuard<'_, K, V>,
		mut root: NodeGuard<'g, K, V>,
		mut stranded: Stranded<'g, K, V>,
		eg: &'g epoch::Guard,
	) {
		loop {
			let only_child = match &*root {
				Node::Internal(internal) if internal.children.len() == 1 => {
					internal.child_ptr(0, eg)
				}
				_ => break,
			};
			let child = match stranded.pop() {
				Some(child) => child,
				None => latch_of(only_child).exclusive(),
			};
			let retired = tree_guard.load(Ordering::Relaxed, eg);
			tree_guard.store(only_child, Ordering::Release);
			root.as_internal_mut().clear();
			drop(root);
			// SAFETY: the root pointer no longer leads to the old root and its
			// latch is released; in-flight readers are covered by their epochs.
			unsafe { eg.defer_destroy(retired) };
			let height = self.height.fetch_sub(1, Ordering::Relaxed) - 1;
			debug!(height, order = self.order, "root had a single child, tree shrank a level");
			root = child;
		}
		if !stranded.is_empty() {
			invariant_violation("stranded nodes below a root with several children");
		}
	}
}

impl<K, V> Drop for Tree<K, V> {
	fn drop(&mut self) {
		// SAFETY: `&mut self` proves no operation or cursor still borrows the
		// tree, so no other thread can reach the nodes freed here.
		unsafe {
			let eg = epoch::unprotected();
			let root = self.root.get_mut().load(Ordering::Relaxed, eg);
			free_subtree(root, eg);
		}
	}
}

/// Frees `ptr` and every node below it.
///
/// # Safety
///
/// The caller must own the subtree exclusively.
unsafe fn free_subtree<K, V>(ptr: Shared<'_, NodeLatch<K, V>>, eg: &epoch::Guard) {
	if ptr.is_null() {
		return;
	}
	// SAFETY: guaranteed by the caller.
	let mut owned = unsafe { ptr.into_owned() };
	if let Node::Internal(internal) = owned.get_mut() {
		for child in internal.children.drain(..) {
			// SAFETY: children are owned by exactly one parent.
			unsafe { free_subtree(child.load(Ordering::Relaxed, eg), eg) };
		}
	}
}

impl<K, V> fmt::Debug for Tree<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Tree")
			.field("order", &self.order)
			.field("height", &self.height())
			.field("len", &self.len())
			.finish()
	}
}

// ===========================================================================
// Test-Only Validation Module
// ===========================================================================

/// The shape of a tree: runts per node, without values.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot<K> {
	Internal {
		runts: Vec<K>,
		children: Vec<Snapshot<K>>,
	},
	Leaf {
		runts: Vec<K>,
	},
}

#[cfg(any(test, feature = "test-utils"))]
impl<K: Clone + Ord + fmt::Debug, V> Tree<K, V> {
	/// Validates all structural invariants, panicking with a diagnostic on the
	/// first violation.
	///
	/// Takes every latch in turn, so call it while no other thread uses the tree.
	///
	/// # Invariants Checked
	///
	/// 1. Sorted runts within every node, and a strictly ascending leaf list
	/// 2. Runt correctness: `runts[i]` is the smallest key under `children[i]`
	/// 3. Balance: non-root nodes hold `order / 2 ..= order` runts; an internal
	///    root has at least two children
	/// 4. Equal depth: every leaf sits at level `height - 1`
	/// 5. Size: the leaf list holds exactly `len()` entries
	pub fn assert_invariants(&self) {
		let eg = epoch::pin();
		let height = self.height();
		let tree_guard = self.root.exclusive();
		let root_ptr = tree_guard.load(Ordering::Acquire, &eg);
		let mut leaves = Vec::new();
		{
			let root = latch_of(root_ptr).exclusive();
			self.validate_node(&root, root_ptr, 0, height, &mut leaves, &eg);
		}

		let mut entries = 0;
		let mut last: Option<K> = None;
		for (i, &leaf_ptr) in leaves.iter().enumerate() {
			let guard = latch_of(leaf_ptr).exclusive();
			let leaf = guard.as_leaf();
			let next = leaf.next.load(Ordering::Acquire, &eg);
			let expected = leaves.get(i + 1).copied().unwrap_or(Shared::null());
			assert!(next == expected, "leaf {} does not link to leaf {}", i, i + 1);
			assert_eq!(leaf.runts.len(), leaf.values.len(), "leaf {} runts/values mismatch", i);
			if let (Some(prev), Some(first)) = (&last, leaf.runts.first()) {
				assert!(prev < first, "leaf list out of order: {:?} before {:?}", prev, first);
			}
			if let Some(k) = leaf.runts.last() {
				last = Some(k.clone());
			}
			entries += leaf.runts.len();
		}
		assert_eq!(entries, self.len(), "leaf list holds {} entries, len() is {}", entries, self.len());
	}

	/// Validates the subtree under `node` and returns its smallest key.
	fn validate_node<'g>(
		&self,
		node: &Node<K, V>,
		ptr: Shared<'g, NodeLatch<K, V>>,
		level: usize,
		height: usize,
		leaves: &mut Vec<Shared<'g, NodeLatch<K, V>>>,
		eg: &'g epoch::Guard,
	) -> Option<K> {
		let count = node.count();
		assert!(count <= self.order, "node at level {} holds {} > {} runts", level, count, self.order);
		if level > 0 {
			assert!(
				count >= self.order / 2,
				"node at level {} holds {} < {} runts",
				level,
				count,
				self.order / 2
			);
		}
		for pair in node.runts().windows(2) {
			assert!(pair[0] < pair[1], "runts not sorted: {:?} >= {:?}", pair[0], pair[1]);
		}

		match node {
			Node::Leaf(_) => {
				assert_eq!(level + 1, height, "leaf at level {} in a tree of height {}", level, height);
				leaves.push(ptr);
			}
			Node::Internal(internal) => {
				assert!(level + 1 < height, "internal node at leaf level {}", level);
				assert_eq!(internal.runts.len(), internal.children.len(), "runts/children mismatch");
				if level == 0 {
					assert!(internal.children.len() >= 2, "internal root with a single child");
				}
				for (slot, runt) in internal.runts.iter().enumerate() {
					let child_ptr = internal.child_ptr(slot, eg);
					let child = latch_of(child_ptr).exclusive();
					let smallest = self.validate_node(&child, child_ptr, level + 1, height, leaves, eg);
					assert_eq!(
						smallest.as_ref(),
						Some(runt),
						"runt {} at level {} is not the smallest key below it",
						slot,
						level
					);
				}
			}
		}
		node.runts().first().cloned()
	}

	/// Captures the runts of every node, top-down.
	pub fn snapshot(&self) -> Snapshot<K> {
		let eg = epoch::pin();
		let tree_guard = self.root.exclusive();
		let root = Self::root_node(&tree_guard, &eg).exclusive();
		Self::snapshot_node(&root, &eg)
	}

	fn snapshot_node(node: &Node<K, V>, eg: &epoch::Guard) -> Snapshot<K> {
		match node {
			Node::Leaf(leaf) => Snapshot::Leaf {
				runts: leaf.runts.clone(),
			},
			Node::Internal(internal) => Snapshot::Internal {
				runts: internal.runts.clone(),
				children: (0..internal.children.len())
					.map(|slot| Self::snapshot_node(&internal.child(slot, eg).exclusive(), eg))
					.collect(),
			},
		}
	}
}
