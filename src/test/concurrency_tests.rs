//! Concurrent readers and writers sharing one store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use test_log::test;

use crate::btree::BTree;
use crate::comparator::NaturalOrder;
use crate::error::Error;
use crate::option::{BTreeOptions, Options};
use crate::store::{RecordManager, Store};

const STABLE_KEYS: u64 = 500;
const READERS: usize = 4;

fn value(i: u64) -> String {
	format!("value{i}")
}

// Keys below STABLE_KEYS are never touched by the writer.
fn seeded_tree(store: &Arc<Store>) -> BTree<u64, String> {
	let recman: Arc<dyn RecordManager> = store.clone();
	let opts = BTreeOptions {
		page_size: 8,
		..Default::default()
	};
	let tree = BTree::create(recman, NaturalOrder, opts).unwrap();
	for i in 0..STABLE_KEYS {
		tree.insert(i, &value(i), false).unwrap();
	}
	store.commit().unwrap();
	tree
}

#[test]
fn readers_run_alongside_a_writer() {
	let store = Arc::new(Store::memory(Options::default()).unwrap());
	let tree = seeded_tree(&store);
	let done = AtomicBool::new(false);

	thread::scope(|s| {
		for seed in 0..READERS as u64 {
			let tree = &tree;
			let done = &done;
			s.spawn(move || {
				let mut rng = StdRng::seed_from_u64(seed);
				let mut lookups = 0u64;
				while !done.load(Ordering::Acquire) || lookups < 1000 {
					let key = rng.gen_range(0..STABLE_KEYS);
					assert_eq!(tree.find(&key).unwrap(), Some(value(key)));
					lookups += 1;

					// A scan either sees ascending keys or is cut short by the writer.
					let mut last = None;
					for entry in tree.browse_from(&key, true).unwrap().take(50) {
						match entry {
							Ok((k, _)) => {
								assert!(last.map_or(true, |prev| prev < k));
								last = Some(k);
							}
							Err(Error::ConcurrentModification) => break,
							Err(err) => panic!("unexpected error while browsing: {err}"),
						}
					}
				}
			});
		}

		let tree = &tree;
		let done = &done;
		s.spawn(move || {
			let mut rng = StdRng::seed_from_u64(99);
			for _ in 0..3000 {
				let key = rng.gen_range(STABLE_KEYS..STABLE_KEYS + 400);
				if rng.gen_bool(0.6) {
					tree.insert(key, &value(key), true).unwrap();
				} else {
					tree.remove(&key).unwrap();
				}
			}
			done.store(true, Ordering::Release);
		});
	});

	store.commit().unwrap();
	let stats = tree.check().unwrap();
	assert_eq!(stats.entries, tree.size().unwrap());
	for i in 0..STABLE_KEYS {
		assert_eq!(tree.find(&i).unwrap(), Some(value(i)));
	}
}

#[test]
fn store_is_shared_between_threads() {
	let store = Arc::new(Store::memory(Options::default()).unwrap());
	let tree = seeded_tree(&store);

	let recids: Vec<Vec<u64>> = thread::scope(|s| {
		let handles: Vec<_> = (0..4u64)
			.map(|t| {
				let store = Arc::clone(&store);
				s.spawn(move || {
					(0..200u64)
						.map(|i| {
							let data = format!("thread{t}-record{i}").into_bytes();
							let recid = store.insert(&data).unwrap();
							assert_eq!(store.fetch(recid).unwrap(), Some(data));
							recid
						})
						.collect::<Vec<_>>()
				})
			})
			.collect();

		// Tree writes interleave with the raw record traffic above.
		for i in STABLE_KEYS..STABLE_KEYS + 300 {
			tree.insert(i, &value(i), false).unwrap();
		}
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});
	store.commit().unwrap();

	let mut all: Vec<u64> = recids.iter().flatten().copied().collect();
	all.sort_unstable();
	all.dedup();
	assert_eq!(all.len(), 800);
	for (t, ids) in recids.iter().enumerate() {
		for (i, recid) in ids.iter().enumerate() {
			let expected = format!("thread{t}-record{i}").into_bytes();
			assert_eq!(store.fetch(*recid).unwrap(), Some(expected));
		}
	}
	assert_eq!(tree.size().unwrap(), STABLE_KEYS + 300);
	tree.check().unwrap();
}
