use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use recordkv::{BTree, BTreeOptions, NaturalOrder, Options, RecordManager, Store};
use tempfile::TempDir;

const BENCH_SEED: u64 = 0x5EED_CAFE_DEAD_BEEF;

fn open_store(dir: &TempDir) -> Arc<dyn RecordManager> {
	Arc::new(Store::open(dir.path().join("bench.db"), Options::default()).unwrap())
}

fn new_tree(recman: Arc<dyn RecordManager>) -> BTree<Vec<u8>, Vec<u8>> {
	BTree::create(recman, NaturalOrder, BTreeOptions::default()).unwrap()
}

// Deterministic keys, random values.
fn generate_test_data(size: usize, key_size: usize, value_size: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
	let mut rng = StdRng::seed_from_u64(BENCH_SEED);
	(0..size)
		.map(|i| {
			let key = format!("{:0width$}", i, width = key_size).into_bytes();
			let value: Vec<u8> = (0..value_size).map(|_| rng.gen()).collect();
			(key, value)
		})
		.collect()
}

fn benchmark_insert_sequential(c: &mut Criterion) {
	let mut group = c.benchmark_group("btree_insert_sequential");

	for size in [100, 1000, 10000].iter() {
		group.throughput(Throughput::Elements(*size as u64));
		group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
			let data = generate_test_data(size, 16, 64);
			b.iter(|| {
				let temp_dir = TempDir::new().unwrap();
				let recman = open_store(&temp_dir);
				let tree = new_tree(recman.clone());
				for (key, value) in &data {
					tree.insert(black_box(key.clone()), black_box(value), true).unwrap();
				}
				recman.commit().unwrap();
			});
		});
	}

	group.finish();
}

fn benchmark_insert_random(c: &mut Criterion) {
	let mut group = c.benchmark_group("btree_insert_random");

	for size in [100, 1000, 10000].iter() {
		group.throughput(Throughput::Elements(*size as u64));
		group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
			let mut data = generate_test_data(size, 16, 64);
			data.shuffle(&mut StdRng::seed_from_u64(BENCH_SEED));
			b.iter(|| {
				let temp_dir = TempDir::new().unwrap();
				let recman = open_store(&temp_dir);
				let tree = new_tree(recman.clone());
				for (key, value) in &data {
					tree.insert(black_box(key.clone()), black_box(value), true).unwrap();
				}
				recman.commit().unwrap();
			});
		});
	}

	group.finish();
}

fn benchmark_remove_random(c: &mut Criterion) {
	let mut group = c.benchmark_group("btree_remove_random");

	for size in [100, 1000, 10000].iter() {
		group.throughput(Throughput::Elements(*size as u64));
		group.bench_with_input(BenchmarkId::new("remove", size), size, |b, &size| {
			let data = generate_test_data(size, 16, 64);
			let mut order: Vec<usize> = (0..size).collect();
			order.shuffle(&mut StdRng::seed_from_u64(BENCH_SEED));
			b.iter_with_setup(
				|| {
					let temp_dir = TempDir::new().unwrap();
					let recman = open_store(&temp_dir);
					let tree = new_tree(recman.clone());
					for (key, value) in &data {
						tree.insert(key.clone(), value, true).unwrap();
					}
					recman.commit().unwrap();
					(temp_dir, recman, tree)
				},
				|(_temp_dir, recman, tree)| {
					for &i in &order {
						tree.remove(black_box(&data[i].0)).unwrap();
					}
					recman.commit().unwrap();
				},
			);
		});
	}

	group.finish();
}

fn benchmark_find_and_browse(c: &mut Criterion) {
	let mut group = c.benchmark_group("btree_read");
	let size = 10000;
	let data = generate_test_data(size, 16, 64);
	let temp_dir = TempDir::new().unwrap();
	let recman = open_store(&temp_dir);
	let tree = new_tree(recman.clone());
	for (key, value) in &data {
		tree.insert(key.clone(), value, true).unwrap();
	}
	recman.commit().unwrap();

	group.throughput(Throughput::Elements(size as u64));
	group.bench_function("find", |b| {
		let mut rng = StdRng::seed_from_u64(BENCH_SEED);
		b.iter(|| {
			for _ in 0..size {
				let (key, _) = &data[rng.gen_range(0..size)];
				black_box(tree.find(key).unwrap());
			}
		});
	});
	group.bench_function("browse", |b| {
		b.iter(|| {
			let count = tree.browse().unwrap().map(|entry| entry.unwrap()).count();
			assert_eq!(black_box(count), size);
		});
	});

	group.finish();
}

criterion_group!(
	benches,
	benchmark_insert_sequential,
	benchmark_insert_random,
	benchmark_remove_random,
	benchmark_find_and_browse
);
criterion_main!(benches);
