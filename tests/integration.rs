//! # Integration Tests for Larch B+ Tree
//!
//! End-to-end scenarios driven through the public API only:
//! - Construction and order validation
//! - Single-leaf fill, root growth, left-edge runt maintenance
//! - Full insert/scan/search/delete round trips
//! - Scans starting at present and missing keys
//! - Update callbacks
//!
//! Structural checks go through `assert_invariants` and `snapshot`, which the
//! `test-utils` feature exposes.

use larch::{Error, Snapshot, Tree};
use rand::prelude::*;
use std::collections::BTreeMap;

fn leaf<K>(runts: Vec<K>) -> Snapshot<K> {
	Snapshot::Leaf {
		runts,
	}
}

// ===========================================================================
// Construction
// ===========================================================================

#[test]
fn construction_validates_order() {
	for order in [0usize, 1, 3, 11] {
		let err = Tree::<i64, i64>::new(order).unwrap_err();
		assert_eq!(err, Error::InvalidOrder { order });
		assert!(err.to_string().contains(&order.to_string()));
	}
	for order in [2usize, 4, 8, 16, 64] {
		let tree = Tree::<i64, i64>::new(order).unwrap();
		assert_eq!(tree.order(), order);
		assert!(tree.is_empty());
		tree.assert_invariants();
	}
}

#[test]
fn negative_order_does_not_reach_the_tree() {
	// A signed -1 has no unsigned form; the closest caller mistake is a wrapped value.
	let wrapped = (-1i64) as usize;
	assert!(matches!(Tree::<i64, i64>::new(wrapped), Err(Error::InvalidOrder { .. })));
}

// ===========================================================================
// Small Trees
// ===========================================================================

#[test]
fn single_leaf_fill_and_overwrite() {
	let tree = Tree::new(4).unwrap();
	for (k, v) in [(30, "thirty"), (10, "ten"), (30, "THIRTY"), (20, "twenty"), (40, "forty")] {
		tree.insert(k, v);
		assert_eq!(tree.height(), 1, "root stopped being a leaf after inserting {}", k);
	}
	let pairs: Vec<_> = tree.new_scanner_all().into_pairs().collect();
	assert_eq!(pairs, vec![(10, "ten"), (20, "twenty"), (30, "THIRTY"), (40, "forty")]);
}

#[test]
fn leaf_split_grows_root() {
	let tree = Tree::new(4).unwrap();
	for k in [10, 20, 30, 40] {
		tree.insert(k, k);
	}
	tree.insert(0, 0);
	assert_eq!(
		tree.snapshot(),
		Snapshot::Internal {
			runts: vec![0, 30],
			children: vec![leaf(vec![0, 10, 20]), leaf(vec![30, 40])],
		}
	);
	tree.assert_invariants();
}

#[test]
fn left_edge_runt_update_via_public_api() {
	// Same shape as the `left_edge.json` fixture, reached by inserts.
	let tree = Tree::new(4).unwrap();
	for key in ["aa", "aaa", "b", "bb"] {
		tree.insert(key.to_string(), 0u64);
	}
	tree.insert("ab".to_string(), 0);
	tree.delete("ab");
	assert_eq!(
		tree.snapshot(),
		Snapshot::Internal {
			runts: vec!["aa".to_string(), "b".to_string()],
			children: vec![
				leaf(vec!["aa".to_string(), "aaa".to_string()]),
				leaf(vec!["b".to_string(), "bb".to_string()]),
			],
		}
	);

	tree.insert("a".to_string(), 1);
	match tree.snapshot() {
		Snapshot::Internal {
			runts, ..
		} => assert_eq!(runts[0], "a"),
		other => panic!("expected an internal root, got {:?}", other),
	}
	tree.assert_invariants();
}

// ===========================================================================
// Full Round Trip
// ===========================================================================

fn round_trip(order: usize, n: u32, seed: u64) {
	let tree = Tree::new(order).unwrap();
	let mut rng = StdRng::seed_from_u64(seed);
	let mut keys: Vec<u32> = (0..n).collect();

	keys.shuffle(&mut rng);
	for &k in &keys {
		assert_eq!(tree.insert(k, k), None);
	}
	assert_eq!(tree.len(), n as usize);

	let mut expected = 0;
	let mut cursor = tree.new_scanner_all();
	while cursor.scan() {
		let (k, v) = cursor.pair().unwrap();
		assert_eq!((*k, *v), (expected, expected));
		expected += 1;
	}
	cursor.close();
	assert_eq!(expected, n);

	for k in 0..n {
		assert_eq!(tree.search(&k), Some(k), "missing key {}", k);
	}

	keys.shuffle(&mut rng);
	for &k in &keys {
		assert_eq!(tree.delete(&k), Some(k));
	}
	assert_eq!(tree.new_scanner_all().into_pairs().count(), 0);
	assert!(tree.is_empty());
	assert_eq!(tree.height(), 1);
	for k in [0, n / 2, n - 1, n] {
		assert_eq!(tree.delete(&k), None);
	}
	tree.assert_invariants();
}

#[test]
fn million_keys_insert_scan_delete_round_trip() {
	round_trip(32, 1 << 20, 0x5eed);
}

#[test]
fn round_trip_small_orders() {
	for order in [2, 4, 8] {
		round_trip(order, 5_000, order as u64);
	}
}

// ===========================================================================
// Scans
// ===========================================================================

#[test]
fn scan_from_missing_key() {
	let tree = Tree::new(16).unwrap();
	for k in (0..=14).filter(|&k| k != 13) {
		tree.insert(k, k);
	}
	let keys: Vec<_> = tree.new_scanner(&13).into_pairs().map(|(k, _)| k).collect();
	assert_eq!(keys, vec![14]);

	tree.insert(13, 13);
	let keys: Vec<_> = tree.new_scanner(&13).into_pairs().map(|(k, _)| k).collect();
	assert_eq!(keys, vec![13, 14]);
}

#[test]
fn scan_from_every_start_matches_range() {
	let tree = Tree::new(4).unwrap();
	let mut model = BTreeMap::new();
	for k in (0..400).step_by(3) {
		tree.insert(k, k * 2);
		model.insert(k, k * 2);
	}
	for start in -2..405 {
		let got: Vec<_> = tree.new_scanner(&start).into_pairs().collect();
		let want: Vec<_> = model.range(start..).map(|(k, v)| (*k, *v)).collect();
		assert_eq!(got, want, "scan from {}", start);
	}
}

#[test]
fn scan_with_string_keys_and_str_probe() {
	let tree = Tree::new(8).unwrap();
	for (i, word) in ["delta", "alpha", "echo", "charlie", "bravo"].iter().enumerate() {
		tree.insert(word.to_string(), i);
	}
	let keys: Vec<String> = tree.new_scanner("c").into_pairs().map(|(k, _)| k).collect();
	assert_eq!(keys, vec!["charlie", "delta", "echo"]);
	assert_eq!(tree.search("echo"), Some(2));
	assert!(tree.contains_key("bravo"));
	assert_eq!(tree.delete("bravo"), Some(4));
}

// ===========================================================================
// Update Callbacks
// ===========================================================================

#[test]
fn update_callback_sees_previous_value() {
	let tree = Tree::new(8).unwrap();
	tree.update(1, |current| {
		assert_eq!(current, None, "first call must see no value");
		"first".to_string()
	});
	tree.update(1, |current| {
		assert_eq!(current.map(String::as_str), Some("first"));
		"second".to_string()
	});
	assert_eq!(tree.search(&1), Some("second".to_string()));
}

#[test]
fn update_as_counter() {
	let tree = Tree::new(4).unwrap();
	for word in "the quick fox and the lazy dog and the end".split(' ') {
		tree.update(word, |count| count.copied().unwrap_or(0) + 1);
	}
	assert_eq!(tree.search(&"the"), Some(3));
	assert_eq!(tree.search(&"and"), Some(2));
	assert_eq!(tree.search(&"fox"), Some(1));
	assert_eq!(tree.len(), 7);
	tree.assert_invariants();
}

#[test]
fn try_update_error_leaves_tree_unchanged() {
	let tree = Tree::new(4).unwrap();
	for k in 0..50 {
		tree.insert(k, k);
	}
	let err = tree.try_update(25, |v| if v == Some(&25) { Err("refused") } else { Ok(0) });
	assert_eq!(err, Err("refused"));
	assert_eq!(tree.search(&25), Some(25));
	assert_eq!(tree.try_update(99, |_| Err::<i32, _>(())), Err(()));
	assert_eq!(tree.search(&99), None);
	assert_eq!(tree.len(), 50);
	tree.assert_invariants();
}

#[test]
fn failed_update_below_minimum_leaves_runts_alone() {
	let tree = Tree::new(4).unwrap();
	for k in 10..30 {
		tree.insert(k, k);
	}
	assert!(tree.height() >= 3);
	for refused in [1, 5, 9] {
		assert_eq!(tree.try_update(refused, |_| Err("no")), Err("no"));
		tree.assert_invariants();
	}
	let root_runts = match tree.snapshot() {
		Snapshot::Internal {
			runts, ..
		} => runts,
		other => panic!("expected an internal root, got {:?}", other),
	};
	assert_eq!(root_runts[0], 10);
	assert_eq!(tree.len(), 20);

	// Deleting the real minimum must still see it as the leftmost runt.
	assert_eq!(tree.delete(&10), Some(10));
	tree.assert_invariants();
	assert_eq!(tree.try_update(5, |_| Ok::<_, ()>(5)), Ok(()));
	tree.assert_invariants();
	let keys: Vec<i32> = tree.new_scanner_all().into_pairs().map(|(k, _)| k).take(3).collect();
	assert_eq!(keys, vec![5, 11, 12]);
}

// ===========================================================================
// Laws
// ===========================================================================

#[test]
fn last_insert_wins() {
	let tree = Tree::new(2).unwrap();
	for k in 0..100 {
		tree.insert(k, "v1");
		tree.insert(k, "v2");
	}
	assert!((0..100).all(|k| tree.search(&k) == Some("v2")));
	assert_eq!(tree.len(), 100);
}

#[test]
fn delete_is_idempotent() {
	let tree = Tree::new(4).unwrap();
	for k in 0..100 {
		tree.insert(k, ());
	}
	for k in (0..100).rev() {
		assert_eq!(tree.delete(&k), Some(()));
		assert_eq!(tree.delete(&k), None);
		tree.assert_invariants();
	}
}

#[test]
fn lookup_runs_closure_on_value() {
	let tree = Tree::new(4).unwrap();
	tree.insert(7, vec![1u8, 2, 3]);
	assert_eq!(tree.lookup(&7, |v| v.iter().map(|&b| b as u32).sum::<u32>()), Some(6));
	assert_eq!(tree.lookup(&8, |v| v.len()), None);
}
