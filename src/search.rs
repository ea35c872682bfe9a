//! Binary search over a node's sorted runts.
//!
//! Two inner loops are provided. Keys no wider than a machine word (integers,
//! pointers) compare with a single instruction, so two strict `<` tests per
//! step are cheapest. Wider or compound keys (strings, tuples) use a single
//! three-way [`Ord::cmp`] per step, which walks the key once instead of twice.
//! The choice is made from `size_of::<K>()` and is a constant for each
//! monomorphization, so the unused loop is compiled out.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::mem::size_of;

/// Returns `true` when keys of type `K` use the two-comparison search loop.
#[inline(always)]
pub(crate) const fn is_word_sized<K>() -> bool {
	size_of::<K>() <= size_of::<usize>()
}

/// Finds the position at which `key` belongs in `keys`.
///
/// Returns `(index, matched)`: `index` is the slot that keeps `keys` sorted if
/// `key` were inserted there, and `matched` is `true` iff `keys[index] == key`.
#[inline]
pub(crate) fn ge_index<K, Q>(keys: &[K], key: &Q) -> (usize, bool)
where
	K: Borrow<Q>,
	Q: ?Sized + Ord,
{
	if is_word_sized::<K>() {
		search_two_compare(keys, key)
	} else {
		search_three_way(keys, key)
	}
}

/// Finds the child slot whose subtree may contain `key`.
///
/// That is the greatest index with `keys[index] <= key`, clamped to `0` when
/// `key` sorts before every runt (or `keys` is empty). A key beyond the last
/// runt maps to the last slot.
#[inline]
pub(crate) fn le_index<K, Q>(keys: &[K], key: &Q) -> usize
where
	K: Borrow<Q>,
	Q: ?Sized + Ord,
{
	match ge_index(keys, key) {
		(index, true) => index,
		(0, false) => 0,
		(index, false) => index - 1,
	}
}

#[inline]
fn search_two_compare<K, Q>(keys: &[K], key: &Q) -> (usize, bool)
where
	K: Borrow<Q>,
	Q: ?Sized + Ord,
{
	let mut lo = 0;
	let mut hi = keys.len();
	while lo < hi {
		let mid = lo + (hi - lo) / 2;
		let probe: &Q = keys[mid].borrow();
		if probe < key {
			lo = mid + 1;
		} else if key < probe {
			hi = mid;
		} else {
			return (mid, true);
		}
	}
	(lo, false)
}

#[inline]
fn search_three_way<K, Q>(keys: &[K], key: &Q) -> (usize, bool)
where
	K: Borrow<Q>,
	Q: ?Sized + Ord,
{
	let mut lo = 0;
	let mut hi = keys.len();
	while lo < hi {
		let mid = lo + (hi - lo) / 2;
		match keys[mid].borrow().cmp(key) {
			Ordering::Less => lo = mid + 1,
			Ordering::Greater => hi = mid,
			Ordering::Equal => return (mid, true),
		}
	}
	(lo, false)
}
