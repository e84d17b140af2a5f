use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::btree::browser::Browser;
use crate::btree::node::{Node, Payload, Slot};
use crate::codec::{self, read_var, write_var, Codec};
use crate::comparator::{KeyComparator, NaturalOrder};
use crate::error::{Error, Result};
use crate::option::BTreeOptions;
use crate::store::RecordManager;

/// Root, height and entry count, persisted with the tree's names in the tree record.
#[derive(Clone, Copy, Debug, Default)]
struct TreeState {
	root: u64,
	height: usize,
	entries: u64,
}

struct InsertOutcome<K, V> {
	existing: Option<V>,
	// Node split off to the left of the visited node.
	overflow: Option<Node<K>>,
}

struct RemoveOutcome<V> {
	value: Option<V>,
	underflow: bool,
}

/// An ordered index of `K` to `V` whose nodes are records of a [`RecordManager`].
///
/// The tree takes part in the record manager's transactions: every change is staged until the
/// record manager commits, and a rollback undoes it. The tree state is read back from its
/// record at the start of every operation, so the handle stays valid across a rollback.
///
/// Lookups and cursors share a read lock, mutations take the write lock. Every mutation bumps
/// a modification counter, and a [`Browser`] created before it fails with
/// [`Error::ConcurrentModification`].
pub struct BTree<K, V, C = NaturalOrder> {
	recman: Arc<dyn RecordManager>,
	recid: u64,
	comparator: C,
	opts: BTreeOptions,
	lock: RwLock<()>,
	mod_count: AtomicU64,
	_types: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C> BTree<K, V, C>
where
	K: Codec + Clone,
	V: Codec,
	C: KeyComparator<K>,
{
	/// Creates an empty tree and stores its record.
	pub fn create(recman: Arc<dyn RecordManager>, comparator: C, opts: BTreeOptions) -> Result<Self> {
		opts.validate()?;
		let mut tree = Self {
			recman,
			recid: 0,
			comparator,
			opts,
			lock: RwLock::new(()),
			mod_count: AtomicU64::new(0),
			_types: PhantomData,
		};
		tree.recid = tree.recman.insert(&tree.encode_state(&TreeState::default()))?;
		log::debug!("created btree {} with page size {}", tree.recid, opts.page_size);
		Ok(tree)
	}

	/// Opens the tree stored in record `recid`.
	///
	/// The comparator and both codecs must carry the names the tree was created with.
	pub fn load(recman: Arc<dyn RecordManager>, recid: u64, comparator: C) -> Result<Self> {
		let bytes = recman.fetch(recid)?.ok_or(Error::InvalidRecid(recid))?;
		let mut input = bytes.as_slice();
		let _state = decode_state(&mut input)?;
		let opts = BTreeOptions {
			page_size: read_var::<u64>(&mut input)? as usize,
			lazy_value_threshold: read_var::<u64>(&mut input)? as usize,
		};
		opts.validate()?;
		let names = [
			("comparator", String::decode(&mut input)?, comparator.name().to_string()),
			("key codec", String::decode(&mut input)?, K::TYPE_NAME.to_string()),
			("value codec", String::decode(&mut input)?, V::TYPE_NAME.to_string()),
		];
		for (what, stored, given) in names {
			if stored != given {
				return Err(Error::InvalidArgument(format!(
					"btree {recid} was created with {what} {stored}, not {given}"
				)));
			}
		}
		Ok(Self {
			recman,
			recid,
			comparator,
			opts,
			lock: RwLock::new(()),
			mod_count: AtomicU64::new(0),
			_types: PhantomData,
		})
	}

	/// Recid of the tree record, to be kept in a root slot or named object.
	pub fn recid(&self) -> u64 {
		self.recid
	}

	pub fn options(&self) -> BTreeOptions {
		self.opts
	}

	/// Number of entries.
	pub fn size(&self) -> Result<u64> {
		let _guard = self.lock.read();
		Ok(self.read_state()?.entries)
	}

	/// Number of node levels, 0 for an empty tree.
	pub fn height(&self) -> Result<usize> {
		let _guard = self.lock.read();
		Ok(self.read_state()?.height)
	}

	/// Inserts an entry and returns the value previously stored under `key`.
	///
	/// If the key exists and `replace` is false, the tree is left unchanged and the existing
	/// value is returned.
	pub fn insert(&self, key: K, value: &V, replace: bool) -> Result<Option<V>> {
		let _guard = self.lock.write();
		let mut state = self.read_state()?;

		if state.root == 0 {
			let mut root = self.allocate_node(true)?;
			let n = self.opts.page_size;
			root.first = n - 2;
			root.slots[n - 2] = Slot {
				key: Some(key),
				payload: self.store_value(value)?,
			};
			self.save_node(&root)?;
			state = TreeState {
				root: root.recid,
				height: 1,
				entries: 1,
			};
			self.save_state(&state)?;
			self.mod_count.fetch_add(1, Ordering::AcqRel);
			return Ok(None);
		}

		let mut root = self.load_node(state.root)?;
		let outcome = self.insert_into(&mut root, state.height, key, value, replace)?;
		let mut changed = false;
		if let Some(overflow) = outcome.overflow {
			let n = self.opts.page_size;
			let mut top = self.allocate_node(false)?;
			top.first = n - 2;
			top.slots[n - 2] = Slot {
				key: overflow.largest_key().cloned(),
				payload: Payload::Child(overflow.recid),
			};
			top.slots[n - 1] = Slot {
				key: root.largest_key().cloned(),
				payload: Payload::Child(root.recid),
			};
			self.save_node(&top)?;
			state.root = top.recid;
			state.height += 1;
			changed = true;
			log::trace!("btree {} grew to height {}", self.recid, state.height);
		}
		if outcome.existing.is_none() {
			state.entries += 1;
			changed = true;
		}
		if changed {
			self.save_state(&state)?;
		}
		if changed || replace {
			self.mod_count.fetch_add(1, Ordering::AcqRel);
		}
		Ok(outcome.existing)
	}

	/// Removes `key` and returns its value, or None if it was not present.
	pub fn remove(&self, key: &K) -> Result<Option<V>> {
		let _guard = self.lock.write();
		let mut state = self.read_state()?;
		if state.root == 0 {
			return Ok(None);
		}

		let mut root = self.load_node(state.root)?;
		let outcome = self.remove_from(&mut root, state.height, key)?;
		let Some(value) = outcome.value else {
			return Ok(None);
		};
		if root.is_empty() {
			state.height -= 1;
			state.root = if state.height == 0 {
				0
			} else {
				root.child(self.opts.page_size - 1)?
			};
			self.recman.delete(root.recid)?;
			log::trace!("btree {} shrank to height {}", self.recid, state.height);
		}
		state.entries -= 1;
		self.save_state(&state)?;
		self.mod_count.fetch_add(1, Ordering::AcqRel);
		Ok(Some(value))
	}

	/// Returns the value stored under `key`.
	pub fn find(&self, key: &K) -> Result<Option<V>> {
		let _guard = self.lock.read();
		let state = self.read_state()?;
		let Some((leaf, index)) = self.descend(&state, key, true)? else {
			return Ok(None);
		};
		if !leaf.key_matches(index, key, &self.comparator) {
			return Ok(None);
		}
		self.load_value(&leaf.slots[index].payload).map(Some)
	}

	/// Returns the first entry whose key is greater than or equal to `key`.
	pub fn find_greater_or_equal(&self, key: &K) -> Result<Option<(K, V)>> {
		let _guard = self.lock.read();
		let state = self.read_state()?;
		let Some((leaf, index)) = self.descend(&state, key, true)? else {
			return Ok(None);
		};
		let slot = &leaf.slots[index];
		match &slot.key {
			None => Ok(None),
			Some(found) => Ok(Some((found.clone(), self.load_value(&slot.payload)?))),
		}
	}

	/// Returns a cursor positioned before the first entry.
	pub fn browse(&self) -> Result<Browser<'_, K, V, C>> {
		let _guard = self.lock.read();
		let state = self.read_state()?;
		let expected = self.modification_stamp();
		if state.root == 0 {
			return Ok(Browser::new(self, None, 0, expected));
		}
		let mut node = self.load_node(state.root)?;
		while !node.leaf {
			node = self.load_node(node.child(node.first)?)?;
		}
		let index = node.first;
		Ok(Browser::new(self, Some(node), index, expected))
	}

	/// Returns a cursor positioned before the first entry whose key is >= `key`, or > `key`
	/// when `inclusive` is false. Walking backwards from it yields the smaller keys.
	pub fn browse_from(&self, key: &K, inclusive: bool) -> Result<Browser<'_, K, V, C>> {
		let _guard = self.lock.read();
		let state = self.read_state()?;
		let expected = self.modification_stamp();
		Ok(match self.descend(&state, key, inclusive)? {
			Some((leaf, index)) => Browser::new(self, Some(leaf), index, expected),
			None => Browser::new(self, None, 0, expected),
		})
	}

	/// Deletes every node, every out-of-line value and the tree record.
	pub fn delete(self) -> Result<()> {
		let _guard = self.lock.write();
		let state = self.read_state()?;
		if state.root != 0 {
			self.delete_subtree(state.root, state.height)?;
		}
		self.recman.delete(self.recid)?;
		self.mod_count.fetch_add(1, Ordering::AcqRel);
		log::debug!("deleted btree {} with {} entries", self.recid, state.entries);
		Ok(())
	}

	pub(crate) fn page_size(&self) -> usize {
		self.opts.page_size
	}

	// Changes whenever this tree is mutated or the store rolls back.
	pub(crate) fn modification_stamp(&self) -> (u64, u64) {
		(self.mod_count.load(Ordering::Acquire), self.recman.rollback_count())
	}

	pub(crate) fn read_lock(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
		self.lock.read()
	}

	pub(crate) fn load_node(&self, recid: u64) -> Result<Node<K>> {
		let bytes = self
			.recman
			.fetch(recid)?
			.ok_or_else(|| Error::Corruption(format!("btree {} lost node {recid}", self.recid)))?;
		Node::decode(recid, self.opts.page_size, &bytes)
	}

	pub(crate) fn load_value(&self, payload: &Payload) -> Result<V> {
		match payload {
			Payload::Inline(bytes) => codec::from_bytes(bytes),
			Payload::External(recid) => {
				let bytes = self.recman.fetch(*recid)?.ok_or_else(|| {
					Error::Corruption(format!("btree {} lost value record {recid}", self.recid))
				})?;
				codec::from_bytes(&bytes)
			}
			other => Err(Error::Corruption(format!("{other:?} is not a value"))),
		}
	}

	fn store_value(&self, value: &V) -> Result<Payload> {
		let bytes = codec::to_bytes(value);
		if bytes.len() > self.opts.lazy_value_threshold {
			Ok(Payload::External(self.recman.insert(&bytes)?))
		} else {
			Ok(Payload::Inline(bytes))
		}
	}

	fn drop_value(&self, payload: &Payload) -> Result<()> {
		if let Payload::External(recid) = payload {
			self.recman.delete(*recid)?;
		}
		Ok(())
	}

	fn allocate_node(&self, leaf: bool) -> Result<Node<K>> {
		let recid = self.recman.insert(&[])?;
		Ok(Node::new(recid, leaf, self.opts.page_size))
	}

	fn save_node(&self, node: &Node<K>) -> Result<()> {
		self.recman.update(node.recid, &node.encode()?)
	}

	fn read_state(&self) -> Result<TreeState> {
		let bytes = self.recman.fetch(self.recid)?.ok_or(Error::InvalidRecid(self.recid))?;
		decode_state(&mut bytes.as_slice())
	}

	fn save_state(&self, state: &TreeState) -> Result<()> {
		self.recman.update(self.recid, &self.encode_state(state))
	}

	// [root][height][entries][page size][lazy value threshold] varints, then the comparator
	// and codec names.
	fn encode_state(&self, state: &TreeState) -> Vec<u8> {
		let mut out = Vec::new();
		write_var(&mut out, state.root);
		write_var(&mut out, state.height as u64);
		write_var(&mut out, state.entries);
		write_var(&mut out, self.opts.page_size as u64);
		write_var(&mut out, self.opts.lazy_value_threshold as u64);
		self.comparator.name().to_string().encode(&mut out);
		K::TYPE_NAME.to_string().encode(&mut out);
		V::TYPE_NAME.to_string().encode(&mut out);
		out
	}

	/// Walks from the root to the leaf that holds `key` or its successor.
	fn descend(&self, state: &TreeState, key: &K, inclusive: bool) -> Result<Option<(Node<K>, usize)>> {
		if state.root == 0 {
			return Ok(None);
		}
		let mut node = self.load_node(state.root)?;
		loop {
			let index = node.find_children(key, inclusive, &self.comparator);
			if node.leaf {
				return Ok(Some((node, index)));
			}
			node = self.load_node(node.child(index)?)?;
		}
	}

	fn insert_into(
		&self,
		node: &mut Node<K>,
		height: usize,
		key: K,
		value: &V,
		replace: bool,
	) -> Result<InsertOutcome<K, V>> {
		let index = node.find_children(&key, true, &self.comparator);
		let height = height - 1;

		let slot = if height == 0 {
			if node.key_matches(index, &key, &self.comparator) {
				let existing = self.load_value(&node.slots[index].payload)?;
				if replace {
					let payload = self.store_value(value)?;
					let old = std::mem::replace(&mut node.slots[index].payload, payload);
					self.drop_value(&old)?;
					self.save_node(node)?;
				}
				return Ok(InsertOutcome {
					existing: Some(existing),
					overflow: None,
				});
			}
			Slot {
				key: Some(key),
				payload: self.store_value(value)?,
			}
		} else {
			let mut child = self.load_node(node.child(index)?)?;
			let InsertOutcome {
				existing,
				overflow,
			} = self.insert_into(&mut child, height, key, value, replace)?;
			let Some(overflow) = overflow else {
				return Ok(InsertOutcome {
					existing,
					overflow: None,
				});
			};
			node.slots[index].key = child.largest_key().cloned();
			Slot {
				key: overflow.largest_key().cloned(),
				payload: Payload::Child(overflow.recid),
			}
		};

		if !node.is_full() {
			node.insert_slot(index - 1, slot);
			self.save_node(node)?;
			return Ok(InsertOutcome {
				existing: None,
				overflow: None,
			});
		}

		// Full: the lower half moves to a new node on the left.
		let half = self.opts.page_size / 2;
		let mut sibling = self.allocate_node(node.leaf)?;
		if index < half {
			Node::copy_slots(node, 0, &mut sibling, half, index);
			sibling.slots[half + index] = slot;
			Node::copy_slots(node, index, &mut sibling, half + index + 1, half - index - 1);
		} else {
			Node::copy_slots(node, 0, &mut sibling, half, half);
			node.move_slots(half, half - 1, index - half);
			node.slots[index - 1] = slot;
		}
		sibling.first = half;
		node.first = half - 1;
		node.clear_slots(0, half - 1);

		if node.leaf {
			sibling.prev = node.prev;
			sibling.next = node.recid;
			if node.prev != 0 {
				let mut prev = self.load_node(node.prev)?;
				prev.next = sibling.recid;
				self.save_node(&prev)?;
			}
			node.prev = sibling.recid;
		}
		self.save_node(node)?;
		self.save_node(&sibling)?;
		Ok(InsertOutcome {
			existing: None,
			overflow: Some(sibling),
		})
	}

	fn remove_from(&self, node: &mut Node<K>, height: usize, key: &K) -> Result<RemoveOutcome<V>> {
		let half = self.opts.page_size / 2;
		let index = node.find_children(key, true, &self.comparator);
		let height = height - 1;

		let value = if height == 0 {
			if !node.key_matches(index, key, &self.comparator) {
				return Ok(RemoveOutcome {
					value: None,
					underflow: false,
				});
			}
			let removed = node.remove_slot(index);
			let value = self.load_value(&removed.payload)?;
			self.drop_value(&removed.payload)?;
			value
		} else {
			let mut child = self.load_node(node.child(index)?)?;
			let outcome = self.remove_from(&mut child, height, key)?;
			let Some(value) = outcome.value else {
				return Ok(RemoveOutcome {
					value: None,
					underflow: false,
				});
			};
			node.slots[index].key = child.largest_key().cloned();
			if outcome.underflow {
				self.rebalance(node, index, child)?;
			}
			value
		};
		self.save_node(node)?;
		Ok(RemoveOutcome {
			value: Some(value),
			underflow: node.first > half,
		})
	}

	/// Refills the underflowing child at `index` from an adjacent sibling, or merges the two
	/// when the sibling has nothing to spare. `node` is saved by the caller.
	fn rebalance(&self, node: &mut Node<K>, index: usize, mut child: Node<K>) -> Result<()> {
		let n = self.opts.page_size;
		let half = n / 2;
		if child.first != half + 1 {
			return Err(Error::TreeInvariant(format!(
				"underflowing node {} starts at slot {}, expected {}",
				child.recid,
				child.first,
				half + 1
			)));
		}

		if index < n - 1 {
			// The greater sibling follows the child.
			let mut brother = self.load_node(node.child(index + 1)?)?;
			let bfirst = brother.first;
			if bfirst < half {
				let steal = (half - bfirst + 1) / 2;
				brother.first += steal;
				child.first -= steal;
				child.move_slots(half + 1, half + 1 - steal, half - 1);
				Node::copy_slots(&brother, bfirst, &mut child, 2 * half - steal, steal);
				brother.clear_slots(bfirst, steal);
				node.slots[index].key = child.largest_key().cloned();
				self.save_node(&brother)?;
				self.save_node(&child)?;
			} else {
				if bfirst != half {
					return Err(Error::TreeInvariant(format!(
						"sibling {} starts at slot {bfirst}, expected {half}",
						brother.recid
					)));
				}
				brother.first = 1;
				Node::copy_slots(&child, half + 1, &mut brother, 1, half - 1);
				node.remove_slot(index);
				if child.leaf {
					self.unlink_leaf(&child, &mut brother)?;
				}
				self.save_node(&brother)?;
				self.recman.delete(child.recid)?;
			}
		} else {
			// The child is the last one; merge with or borrow from the lesser sibling.
			let mut brother = self.load_node(node.child(index - 1)?)?;
			let bfirst = brother.first;
			if bfirst < half {
				let steal = (half - bfirst + 1) / 2;
				brother.first += steal;
				child.first -= steal;
				Node::copy_slots(&brother, 2 * half - steal, &mut child, half + 1 - steal, steal);
				brother.move_slots(bfirst, bfirst + steal, 2 * half - bfirst - steal);
				brother.clear_slots(bfirst, steal);
				node.slots[index - 1].key = brother.largest_key().cloned();
				self.save_node(&brother)?;
				self.save_node(&child)?;
			} else {
				if bfirst != half {
					return Err(Error::TreeInvariant(format!(
						"sibling {} starts at slot {bfirst}, expected {half}",
						brother.recid
					)));
				}
				child.first = 1;
				Node::copy_slots(&brother, half, &mut child, 1, half);
				node.remove_slot(index - 1);
				if brother.leaf {
					self.unlink_leaf(&brother, &mut child)?;
				}
				self.save_node(&child)?;
				self.recman.delete(brother.recid)?;
			}
		}
		Ok(())
	}

	/// Removes leaf `gone` from the leaf chain. Its entries went to `survivor`, the leaf that
	/// follows it.
	fn unlink_leaf(&self, gone: &Node<K>, survivor: &mut Node<K>) -> Result<()> {
		if gone.next != survivor.recid {
			return Err(Error::TreeInvariant(format!(
				"leaf {} is followed by {}, not by sibling {}",
				gone.recid, gone.next, survivor.recid
			)));
		}
		survivor.prev = gone.prev;
		if gone.prev != 0 {
			let mut outer = self.load_node(gone.prev)?;
			outer.next = survivor.recid;
			self.save_node(&outer)?;
		}
		Ok(())
	}

	fn delete_subtree(&self, recid: u64, height: usize) -> Result<()> {
		let node = self.load_node(recid)?;
		for slot in &node.slots[node.first..] {
			match slot.payload {
				Payload::Child(child) if height > 1 => self.delete_subtree(child, height - 1)?,
				Payload::External(value) => self.recman.delete(value)?,
				_ => {}
			}
		}
		self.recman.delete(recid)
	}
}

fn decode_state(input: &mut &[u8]) -> Result<TreeState> {
	Ok(TreeState {
		root: read_var(input)?,
		height: read_var::<u64>(input)? as usize,
		entries: read_var(input)?,
	})
}

#[cfg(test)]
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TreeStats {
	pub(crate) height: usize,
	pub(crate) nodes: usize,
	pub(crate) leaves: usize,
	pub(crate) entries: u64,
}

#[cfg(test)]
impl<K, V, C> BTree<K, V, C>
where
	K: Codec + Clone + std::fmt::Debug,
	V: Codec,
	C: KeyComparator<K>,
{
	/// Walks the whole tree and checks ordering, occupancy, separators and the leaf chain.
	pub(crate) fn check(&self) -> Result<TreeStats> {
		let _guard = self.lock.read();
		let state = self.read_state()?;
		let mut stats = TreeStats {
			height: state.height,
			..Default::default()
		};
		if state.root != 0 {
			let mut leaves = Vec::new();
			self.check_node(state.root, state.height, true, &mut stats, &mut leaves)?;
			for pair in leaves.windows(2) {
				let (left, right) = (&pair[0], &pair[1]);
				assert_eq!(left.1, right.0, "leaf {} next link", left.0);
				assert_eq!(right.2, left.0, "leaf {} prev link", right.0);
			}
			if let (Some(first), Some(last)) = (leaves.first(), leaves.last()) {
				assert_eq!(first.2, 0);
				assert_eq!(last.1, 0);
			}
		}
		assert_eq!(stats.entries, state.entries, "entry count");
		Ok(stats)
	}

	// Collects (recid, next, prev) of every leaf in key order.
	fn check_node(
		&self,
		recid: u64,
		height: usize,
		is_root: bool,
		stats: &mut TreeStats,
		leaves: &mut Vec<(u64, u64, u64)>,
	) -> Result<Option<K>> {
		let node = self.load_node(recid)?;
		let n = self.opts.page_size;
		stats.nodes += 1;
		assert_eq!(node.leaf, height == 1, "node {recid} leaf flag at height {height}");
		if !is_root {
			assert!(node.first <= n / 2, "node {recid} underflows at {}", node.first);
		}
		let keys: Vec<&K> = node.slots[node.first..].iter().filter_map(|s| s.key.as_ref()).collect();
		for pair in keys.windows(2) {
			assert_eq!(
				self.comparator.compare(pair[0], pair[1]),
				std::cmp::Ordering::Less,
				"node {recid} keys out of order"
			);
		}
		if node.leaf {
			stats.leaves += 1;
			stats.entries += keys.len() as u64;
			leaves.push((recid, node.next, node.prev));
			return Ok(node.largest_key().cloned());
		}
		for index in node.first..n {
			let largest = self.check_node(node.child(index)?, height - 1, false, stats, leaves)?;
			match (&node.slots[index].key, &largest) {
				(Some(separator), Some(largest)) => assert_eq!(
					self.comparator.compare(separator, largest),
					std::cmp::Ordering::Equal,
					"separator {separator:?} of node {recid} does not match its child"
				),
				(None, None) => {}
				(separator, largest) => {
					panic!("separator {separator:?} of node {recid} against child maximum {largest:?}")
				}
			}
		}
		Ok(node.largest_key().cloned())
	}
}
