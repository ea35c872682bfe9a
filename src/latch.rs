//! Exclusive node latches used for pessimistic lock coupling.
//!
//! Every node of the tree, and the tree's root pointer itself, sits behind a
//! [`Latch`]. A latch only offers exclusive access: readers and writers alike
//! take it, hold it while they pick the next node to visit, and let go of it only
//! once the next node's latch is theirs. That hand-over-hand discipline is
//! what keeps a descending operation from following a child pointer that a
//! concurrent writer is about to invalidate.
//!
//! The guard type, [`ExclusiveGuard`], remembers which latch it came from, so a
//! delete can briefly give a latch back and re-acquire it. Sibling latches at
//! the same level are then always taken left to right (see
//! [`ExclusiveGuard::unlock`]).

use parking_lot::{Mutex, MutexGuard};

/// An exclusive latch protecting a value of type `T`.
pub struct Latch<T> {
	lock: Mutex<T>,
}

impl<T> Latch<T> {
	/// Creates a new, unlocked latch.
	#[inline]
	pub fn new(data: T) -> Latch<T> {
		Latch {
			lock: Mutex::new(data),
		}
	}

	/// Locks this latch, blocking the thread until it can be acquired.
	///
	/// Returns an RAII guard which releases the latch when dropped.
	#[inline]
	pub fn exclusive(&self) -> ExclusiveGuard<'_, T> {
		ExclusiveGuard {
			latch: self,
			guard: self.lock.lock(),
		}
	}

	/// Returns `true` if some guard currently holds this latch.
	#[cfg(test)]
	pub(crate) fn is_locked(&self) -> bool {
		self.lock.is_locked()
	}

	/// Gives mutable access without locking; `&mut self` already proves exclusivity.
	#[inline]
	pub fn get_mut(&mut self) -> &mut T {
		self.lock.get_mut()
	}
}

/// RAII structure holding a [`Latch`] exclusively.
pub struct ExclusiveGuard<'a, T> {
	latch: &'a Latch<T>,
	guard: MutexGuard<'a, T>,
}

impl<'a, T> ExclusiveGuard<'a, T> {
	/// Releases the latch, handing back the latch itself so the caller can
	/// re-acquire it later.
	///
	/// Whatever was observed through the guard may be stale once it is
	/// re-acquired, unless the caller holds something that keeps writers away
	/// (for tree nodes: the parent's latch).
	#[inline]
	pub fn unlock(self) -> &'a Latch<T> {
		self.latch
	}
}

impl<'a, T> std::ops::Deref for ExclusiveGuard<'a, T> {
	type Target = T;

	#[inline]
	fn deref(&self) -> &T {
		&self.guard
	}
}

impl<'a, T> std::ops::DerefMut for ExclusiveGuard<'a, T> {
	#[inline]
	fn deref_mut(&mut self) -> &mut T {
		&mut self.guard
	}
}
