//! Scan cursors over the leaf list.
//!
//! A [`Cursor`] holds exactly one leaf latch and a slot index into that leaf.
//! [`Cursor::scan`] steps to the next entry, following the leaf's `next` link
//! when the current leaf runs out. The successor is latched before the current
//! leaf is released, so the leaf a cursor is about to enter cannot be absorbed
//! or freed in between.
//!
//! A scan that spans several leaves is not a snapshot: writers may change a
//! leaf the cursor has not reached yet, or one it has already left. Each leaf is
//! seen in a consistent state.
//!
//! While a cursor sits on a leaf, writers that need that leaf wait. Scan to the
//! end, drop the cursor, or call [`Cursor::close`] promptly.

use std::borrow::Borrow;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch};

use crate::node::{latch_of, NodeGuard};
use crate::{search, Tree};

/// A forward cursor over the entries of a [`Tree`], in key order.
///
/// Created by [`Tree::new_scanner`] and [`Tree::new_scanner_all`]. A new cursor
/// is positioned just before its first entry: call [`scan`](Cursor::scan) before
/// reading [`pair`](Cursor::pair).
///
/// For cloneable keys and values, [`into_pairs`](Cursor::into_pairs) turns the
/// cursor into an [`Iterator`] over owned `(K, V)` pairs.
///
/// ```
/// use larch::Tree;
///
/// let tree = Tree::new(4).unwrap();
/// for k in [5, 1, 3] {
///     tree.insert(k, k * 100);
/// }
///
/// let mut cursor = tree.new_scanner(&2);
/// while cursor.scan() {
///     let (k, v) = cursor.pair().unwrap();
///     assert_eq!(*v, *k * 100);
/// }
///
/// let keys: Vec<_> = tree.new_scanner_all().into_pairs().map(|(k, _)| k).collect();
/// assert_eq!(keys, vec![1, 3, 5]);
/// ```
pub struct Cursor<'t, K, V> {
	tree: &'t Tree<K, V>,
	// Dropped before `eg`: the latch goes before the epoch is unpinned.
	leaf: Option<NodeGuard<'t, K, V>>,
	/// Slot the next `scan` lands on.
	position: usize,
	/// Slot of the entry `pair` returns.
	current: Option<usize>,
	eg: epoch::Guard,
}

impl<'t, K: Clone + Ord, V> Cursor<'t, K, V> {
	pub(crate) fn new(tree: &'t Tree<K, V>) -> Cursor<'t, K, V> {
		Cursor {
			tree,
			leaf: None,
			position: 0,
			current: None,
			eg: epoch::pin(),
		}
	}

	#[inline]
	fn leaf_lt<'g>(guard: NodeGuard<'g, K, V>) -> NodeGuard<'t, K, V> {
		// SAFETY: the cursor keeps its epoch pinned for as long as it holds the
		// guard, so the leaf outlives the guard even though the borrow checker
		// only sees the guard's shorter epoch borrow.
		unsafe { std::mem::transmute(guard) }
	}

	/// Positions the cursor just before the first entry with a key `>= key`.
	pub(crate) fn seek<Q>(&mut self, key: &Q)
	where
		K: Borrow<Q>,
		Q: ?Sized + Ord,
	{
		// Never descend from the root while holding a leaf.
		self.leaf = None;
		let leaf = self.tree.find_leaf(key, &self.eg);
		self.position = search::ge_index(&leaf.as_leaf().runts, key).0;
		self.current = None;
		self.leaf = Some(Self::leaf_lt(leaf));
	}

	/// Positions the cursor just before the smallest entry in the tree.
	pub(crate) fn seek_to_first(&mut self) {
		self.leaf = None;
		let leaf = self.tree.find_first_leaf(&self.eg);
		self.position = 0;
		self.current = None;
		self.leaf = Some(Self::leaf_lt(leaf));
	}

	/// Advances to the next entry.
	///
	/// Returns `false` once the entries are exhausted; the leaf latch is released
	/// at that point and every later call also returns `false`.
	pub fn scan(&mut self) -> bool {
		loop {
			let Some(leaf) = self.leaf.as_ref() else {
				self.current = None;
				return false;
			};
			if self.position < leaf.count() {
				self.current = Some(self.position);
				self.position += 1;
				return true;
			}

			let next_ptr = leaf.as_leaf().next.load(Ordering::Acquire, &self.eg);
			if next_ptr.is_null() {
				self.leaf = None;
				self.current = None;
				return false;
			}
			let next = latch_of(next_ptr).exclusive();
			// Assigning drops the current guard only after `next` is held.
			self.leaf = Some(Self::leaf_lt(next));
			self.position = 0;
		}
	}

	/// The entry the last successful [`scan`](Cursor::scan) moved to.
	///
	/// Returns `None` before the first `scan` and after the cursor is exhausted.
	pub fn pair(&self) -> Option<(&K, &V)> {
		let leaf = self.leaf.as_ref()?.as_leaf();
		let index = self.current?;
		Some((&leaf.runts[index], &leaf.values[index]))
	}

	/// Releases the held leaf latch and ends the scan.
	///
	/// Dropping the cursor does the same.
	pub fn close(self) {}
}

impl<'t, K: Clone + Ord, V: Clone> Cursor<'t, K, V> {
	/// Turns the cursor into an iterator over cloned entries, starting with the
	/// entry the next [`scan`](Cursor::scan) would move to.
	pub fn into_pairs(self) -> Pairs<'t, K, V> {
		Pairs {
			cursor: self,
		}
	}
}

impl<'t, K: Clone + Ord, V: Clone> IntoIterator for Cursor<'t, K, V> {
	type Item = (K, V);
	type IntoIter = Pairs<'t, K, V>;

	fn into_iter(self) -> Pairs<'t, K, V> {
		self.into_pairs()
	}
}

/// Iterator over the cloned entries of a [`Cursor`].
///
/// Created by [`Cursor::into_pairs`]. Holds the cursor's leaf latch until it
/// is exhausted or dropped.
pub struct Pairs<'t, K, V> {
	cursor: Cursor<'t, K, V>,
}

impl<'t, K: Clone + Ord, V: Clone> Iterator for Pairs<'t, K, V> {
	type Item = (K, V);

	fn next(&mut self) -> Option<(K, V)> {
		if !self.cursor.scan() {
			return None;
		}
		self.cursor.pair().map(|(k, v)| (k.clone(), v.clone()))
	}
}
