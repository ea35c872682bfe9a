//! # Concurrency Tests for Larch B+ Tree
//!
//! Multi-threaded tests checking that concurrent readers, writers and scanners
//! leave the tree consistent and see linearizable per-key results.
//!
//! ## Test Categories
//!
//! - Basic concurrent tests: lower contention, always run
//! - Stress tests: higher contention, marked with `#[ignore]`; run with `cargo test -- --ignored`
//!
//! Set `RUST_LOG=larch=trace` to see structural changes as they happen.

use larch::Tree;
use rand::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Once};
use std::thread;

// ===========================================================================
// Helpers
// ===========================================================================

fn init_tracing() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.try_init();
	});
}

/// Spawns `threads` workers that start together and runs `f(thread_index)` on each.
fn run_threads<F>(threads: usize, f: F)
where
	F: Fn(usize) + Send + Sync + 'static,
{
	let f = Arc::new(f);
	let barrier = Arc::new(Barrier::new(threads));
	let handles: Vec<_> = (0..threads)
		.map(|t| {
			let f = Arc::clone(&f);
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				f(t)
			})
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}
}

// ===========================================================================
// Basic Concurrent Tests
// ===========================================================================

#[test]
fn concurrent_insert_disjoint_ranges() {
	init_tracing();
	let tree = Arc::new(Tree::<u64, u64>::new(8).unwrap());
	let per_thread = 5_000u64;

	let t = Arc::clone(&tree);
	run_threads(4, move |i| {
		let base = i as u64 * per_thread;
		for k in base..base + per_thread {
			assert_eq!(t.insert(k, k * 10), None);
		}
	});

	assert_eq!(tree.len(), 4 * per_thread as usize);
	tree.assert_invariants();
	for k in 0..4 * per_thread {
		assert_eq!(tree.search(&k), Some(k * 10));
	}
}

#[test]
fn concurrent_insert_interleaved_keys() {
	init_tracing();
	let tree = Arc::new(Tree::<u64, usize>::new(4).unwrap());
	let t = Arc::clone(&tree);
	run_threads(8, move |i| {
		for j in 0..2_000u64 {
			t.insert(j * 8 + i as u64, i);
		}
	});
	assert_eq!(tree.len(), 16_000);
	tree.assert_invariants();
	let keys: Vec<u64> = tree.new_scanner_all().into_pairs().map(|(k, _)| k).collect();
	assert_eq!(keys, (0..16_000).collect::<Vec<_>>());
}

#[test]
fn concurrent_delete_disjoint_ranges() {
	init_tracing();
	for order in [2, 4, 32] {
		let tree = Arc::new(Tree::<u32, u32>::new(order).unwrap());
		for k in 0..8_000 {
			tree.insert(k, k);
		}
		let t = Arc::clone(&tree);
		run_threads(4, move |i| {
			let base = i as u32 * 2_000;
			for k in base..base + 2_000 {
				assert_eq!(t.delete(&k), Some(k));
			}
		});
		assert!(tree.is_empty());
		assert_eq!(tree.height(), 1);
		tree.assert_invariants();
	}
}

#[test]
fn concurrent_mixed_same_keys() {
	init_tracing();
	let tree = Arc::new(Tree::<u32, u32>::new(4).unwrap());
	let t = Arc::clone(&tree);
	run_threads(6, move |i| {
		let mut rng = StdRng::seed_from_u64(i as u64);
		for _ in 0..20_000 {
			let k = rng.random_range(0..300);
			match rng.random_range(0..4) {
				0 | 1 => {
					t.insert(k, k);
				}
				2 => {
					t.delete(&k);
				}
				_ => {
					if let Some(v) = t.search(&k) {
						assert_eq!(v, k);
					}
				}
			}
		}
	});
	tree.assert_invariants();
	let count = tree.new_scanner_all().into_pairs().count();
	assert_eq!(count, tree.len());
}

#[test]
fn concurrent_counters_do_not_lose_updates() {
	init_tracing();
	let tree = Arc::new(Tree::<u8, u64>::new(2).unwrap());
	let t = Arc::clone(&tree);
	run_threads(8, move |_| {
		for i in 0..5_000u32 {
			t.update((i % 16) as u8, |v| v.copied().unwrap_or(0) + 1);
		}
	});
	let total: u64 = tree.new_scanner_all().into_pairs().map(|(_, v)| v).sum();
	assert_eq!(total, 8 * 5_000);
	tree.assert_invariants();
}

#[test]
fn scanners_see_sorted_keys_during_writes() {
	init_tracing();
	let tree = Arc::new(Tree::<u32, u32>::new(8).unwrap());
	for k in (0..10_000).step_by(2) {
		tree.insert(k, k);
	}
	let done = Arc::new(AtomicBool::new(false));
	let scans = Arc::new(AtomicUsize::new(0));

	let writers: Vec<_> = (0..2u32)
		.map(|w| {
			let tree = Arc::clone(&tree);
			thread::spawn(move || {
				let mut rng = StdRng::seed_from_u64(w as u64);
				for _ in 0..20_000 {
					let k = rng.random_range(0..10_000);
					if k % 2 == w {
						tree.insert(k, k);
					} else {
						tree.delete(&k);
					}
				}
			})
		})
		.collect();

	let scanners: Vec<_> = (0..2)
		.map(|_| {
			let tree = Arc::clone(&tree);
			let done = Arc::clone(&done);
			let scans = Arc::clone(&scans);
			thread::spawn(move || {
				while !done.load(Ordering::Relaxed) {
					let mut last = None;
					let mut cursor = tree.new_scanner_all();
					while cursor.scan() {
						let (&k, &v) = cursor.pair().unwrap();
						assert_eq!(k, v);
						assert!(last.map_or(true, |l| l < k), "{:?} then {}", last, k);
						last = Some(k);
					}
					scans.fetch_add(1, Ordering::Relaxed);
				}
			})
		})
		.collect();

	for handle in writers {
		handle.join().unwrap();
	}
	done.store(true, Ordering::Relaxed);
	for handle in scanners {
		handle.join().unwrap();
	}
	assert!(scans.load(Ordering::Relaxed) > 0);
	tree.assert_invariants();
}

#[test]
fn readers_never_see_torn_values() {
	init_tracing();
	let tree = Arc::new(Tree::<u32, (u32, u32)>::new(4).unwrap());
	for k in 0..1_000 {
		tree.insert(k, (k, k));
	}
	let t = Arc::clone(&tree);
	run_threads(4, move |i| {
		let mut rng = StdRng::seed_from_u64(100 + i as u64);
		for round in 0..10_000u32 {
			let k = rng.random_range(0..1_000);
			if i % 2 == 0 {
				t.insert(k, (round, round));
			} else if let Some((a, b)) = t.search(&k) {
				assert_eq!(a, b);
			}
		}
	});
	tree.assert_invariants();
}

// ===========================================================================
// Stress Tests
// ===========================================================================

#[test]
#[ignore]
fn stress_mixed_workload_all_orders() {
	init_tracing();
	for order in [2, 4, 8, 16, 32, 64] {
		let tree = Arc::new(Tree::<u64, u64>::new(order).unwrap());
		let t = Arc::clone(&tree);
		run_threads(16, move |i| {
			let mut rng = StdRng::seed_from_u64(order as u64 * 1_000 + i as u64);
			for _ in 0..100_000 {
				let k = rng.random_range(0..4_096);
				match rng.random_range(0..10) {
					0..=3 => {
						t.insert(k, k);
					}
					4..=6 => {
						t.delete(&k);
					}
					7 => {
						let _ = t.new_scanner(&k).into_pairs().take(32).count();
					}
					_ => {
						let _ = t.contains_key(&k);
					}
				}
			}
		});
		tree.assert_invariants();
	}
}
