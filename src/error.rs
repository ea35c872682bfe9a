//! # Error Types for the Lock-Coupled B+ Tree
//!
//! The tree has exactly one recoverable failure: asking for a tree with an
//! unusable branching factor. Everything else is either a normal outcome
//! (a missing key is `None`, not an error) or a broken structural invariant.
//!
//! ## Error Taxonomy
//!
//! ```text
//! Tree::new(order)
//!      │
//!      ├── order is a power of two, >= 2 ──► Ok(Tree)
//!      │
//!      └── anything else ─────────────────► Err(Error::InvalidOrder { order })
//!
//! search / lookup ──► Option<V>         (absence is not an error)
//!
//! empty node asked for its smallest key,
//! adopting from an empty sibling,
//! absorbing a leaf that is not our successor ──► invariant_violation() ──► panic
//! ```
//!
//! Structural violations are never returned to callers: any call site able to
//! "handle" one would already be running on a corrupt tree.

use thiserror::Error;

/// Errors surfaced by the public API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// The requested branching factor cannot be used.
	///
	/// A tree's order must be a power of two and at least 2, so that a full
	/// node always splits into two halves of `order / 2` runts.
	#[error("invalid order {order}: must be a power of two no smaller than 2")]
	InvalidOrder {
		/// The rejected value.
		order: usize,
	},
}

/// A Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Reports a broken structural invariant and panics.
///
/// Reaching this means the tree is corrupt or the locking protocol has a bug.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn invariant_violation(what: &str) -> ! {
	tracing::error!(what, "structural invariant violated");
	panic!("structural invariant violated: {what}");
}
