use std::cmp::Ordering;

use crate::codec::{read_slice, read_var, write_var, Codec};
use crate::comparator::KeyComparator;
use crate::error::{Error, Result};

const INTERNAL: u8 = 0;
const LEAF: u8 = 1;

const INLINE_VALUE: u8 = 0;
const EXTERNAL_VALUE: u8 = 1;

/// What a slot points at besides its key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Payload {
	Empty,
	/// Encoded value kept inside the leaf.
	Inline(Vec<u8>),
	/// Encoded value stored in its own record.
	External(u64),
	/// Recid of a child node.
	Child(u64),
}

#[derive(Clone, Debug)]
pub(crate) struct Slot<K> {
	/// None marks the infinite key of the rightmost node on each level.
	pub(crate) key: Option<K>,
	pub(crate) payload: Payload,
}

impl<K> Slot<K> {
	pub(crate) fn empty() -> Self {
		Self {
			key: None,
			payload: Payload::Empty,
		}
	}
}

/// One B+Tree node, stored as a single record.
///
/// A node has a fixed number of slots. Occupied slots form the suffix `[first, len)`, so a
/// full node has `first == 0` and entries are prepended by decrementing `first`. The last
/// occupied slot always holds the largest key of the subtree, which the parent repeats as
/// the separator for this child.
#[derive(Clone, Debug)]
pub(crate) struct Node<K> {
	pub(crate) recid: u64,
	pub(crate) leaf: bool,
	pub(crate) first: usize,
	pub(crate) slots: Vec<Slot<K>>,
	// Neighbouring leaves. Always 0 for internal nodes.
	pub(crate) prev: u64,
	pub(crate) next: u64,
}

impl<K: Clone> Node<K> {
	pub(crate) fn new(recid: u64, leaf: bool, page_size: usize) -> Self {
		Self {
			recid,
			leaf,
			first: page_size,
			slots: vec![Slot::empty(); page_size],
			prev: 0,
			next: 0,
		}
	}

	pub(crate) fn page_size(&self) -> usize {
		self.slots.len()
	}

	pub(crate) fn is_full(&self) -> bool {
		self.first == 0
	}

	/// A leaf holding only the infinite key, or an internal node with a single child.
	pub(crate) fn is_empty(&self) -> bool {
		self.first == self.page_size() - 1
	}

	pub(crate) fn largest_key(&self) -> Option<&K> {
		self.slots.last().and_then(|slot| slot.key.as_ref())
	}

	pub(crate) fn child(&self, index: usize) -> Result<u64> {
		match self.slots[index].payload {
			Payload::Child(recid) => Ok(recid),
			ref other => Err(Error::Corruption(format!(
				"slot {index} of node {} holds {other:?} instead of a child",
				self.recid
			))),
		}
	}

	/// Binary search for the first occupied slot whose key is >= `key` (> when not
	/// inclusive). Returns the last slot if there is none.
	pub(crate) fn find_children<C: KeyComparator<K>>(
		&self,
		key: &K,
		inclusive: bool,
		cmp: &C,
	) -> usize {
		let mut left = self.first;
		let mut right = self.page_size() - 1;
		while left < right {
			let middle = (left + right) / 2;
			let before = match &self.slots[middle].key {
				None => false,
				Some(candidate) => match cmp.compare(candidate, key) {
					Ordering::Less => true,
					Ordering::Equal => !inclusive,
					Ordering::Greater => false,
				},
			};
			if before {
				left = middle + 1;
			} else {
				right = middle;
			}
		}
		right
	}

	pub(crate) fn key_matches<C: KeyComparator<K>>(&self, index: usize, key: &K, cmp: &C) -> bool {
		matches!(&self.slots[index].key, Some(candidate) if cmp.compare(candidate, key) == Ordering::Equal)
	}

	/// Inserts `slot` at `index`, shifting the slots in `[first, index]` one to the left.
	pub(crate) fn insert_slot(&mut self, index: usize, slot: Slot<K>) {
		let first = self.first;
		self.move_slots(first, first - 1, index + 1 - first);
		self.first -= 1;
		self.slots[index] = slot;
	}

	/// Removes the slot at `index`, shifting the slots in `[first, index)` one to the right.
	pub(crate) fn remove_slot(&mut self, index: usize) -> Slot<K> {
		let removed = std::mem::replace(&mut self.slots[index], Slot::empty());
		let first = self.first;
		self.move_slots(first, first + 1, index - first);
		self.slots[first] = Slot::empty();
		self.first += 1;
		removed
	}

	/// Copies `count` slots inside this node. The ranges may overlap.
	pub(crate) fn move_slots(&mut self, src: usize, dst: usize, count: usize) {
		if count == 0 || src == dst {
			return;
		}
		let moved: Vec<Slot<K>> = self.slots[src..src + count].to_vec();
		for (offset, slot) in moved.into_iter().enumerate() {
			self.slots[dst + offset] = slot;
		}
	}

	pub(crate) fn copy_slots(from: &Node<K>, src: usize, to: &mut Node<K>, dst: usize, count: usize) {
		to.slots[dst..dst + count].clone_from_slice(&from.slots[src..src + count]);
	}

	pub(crate) fn clear_slots(&mut self, start: usize, count: usize) {
		for slot in &mut self.slots[start..start + count] {
			*slot = Slot::empty();
		}
	}
}

// Layout:
//   [tag u8][first varint]
//   leaf:     [prev varint][next varint]
//   [infinite u8] 1 when the last slot holds the infinite key
//   keys of the occupied slots, through Codec::encode_keys
//   leaf:     per entry [INLINE_VALUE][len varint][bytes] or [EXTERNAL_VALUE][recid varint]
//   internal: per slot [child varint]
impl<K: Codec + Clone> Node<K> {
	pub(crate) fn encode(&self) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		out.push(if self.leaf { LEAF } else { INTERNAL });
		write_var(&mut out, self.first as u64);
		if self.leaf {
			write_var(&mut out, self.prev);
			write_var(&mut out, self.next);
		}
		let occupied = &self.slots[self.first..];
		let infinite = occupied.last().is_some_and(|slot| slot.key.is_none());
		out.push(infinite as u8);

		let keys: Vec<K> = occupied.iter().filter_map(|slot| slot.key.clone()).collect();
		let expected = occupied.len() - infinite as usize;
		if keys.len() != expected {
			return Err(Error::Corruption(format!(
				"node {} has an infinite key before its last slot",
				self.recid
			)));
		}
		K::encode_keys(&keys, &mut out);

		for slot in occupied {
			match (&slot.payload, self.leaf) {
				(Payload::Empty, true) if slot.key.is_none() => {}
				(Payload::Inline(bytes), true) => {
					out.push(INLINE_VALUE);
					write_var(&mut out, bytes.len() as u64);
					out.extend_from_slice(bytes);
				}
				(Payload::External(recid), true) => {
					out.push(EXTERNAL_VALUE);
					write_var(&mut out, *recid);
				}
				(Payload::Child(recid), false) => write_var(&mut out, *recid),
				(other, _) => {
					return Err(Error::Corruption(format!(
						"node {} (leaf: {}) cannot store {other:?}",
						self.recid, self.leaf
					)))
				}
			}
		}
		Ok(out)
	}

	pub(crate) fn decode(recid: u64, page_size: usize, bytes: &[u8]) -> Result<Self> {
		let corrupt = |what: String| Error::Corruption(format!("node {recid}: {what}"));
		let mut input = bytes;
		let leaf = match read_slice(&mut input, 1)?[0] {
			LEAF => true,
			INTERNAL => false,
			tag => return Err(corrupt(format!("unknown tag {tag}"))),
		};
		let mut node = Node::new(recid, leaf, page_size);
		node.first = read_var::<u64>(&mut input)? as usize;
		if node.first >= page_size {
			return Err(corrupt(format!("first slot {} out of {page_size}", node.first)));
		}
		if leaf {
			node.prev = read_var(&mut input)?;
			node.next = read_var(&mut input)?;
		}
		let infinite = read_slice(&mut input, 1)?[0] == 1;

		let count = page_size - node.first - infinite as usize;
		let keys = K::decode_keys(&mut input, count)?;
		for (slot, key) in node.slots[node.first..].iter_mut().zip(keys) {
			slot.key = Some(key);
		}

		let first = node.first;
		for slot in &mut node.slots[first..] {
			slot.payload = if !leaf {
				Payload::Child(read_var(&mut input)?)
			} else if slot.key.is_none() {
				Payload::Empty
			} else {
				match read_slice(&mut input, 1)?[0] {
					INLINE_VALUE => {
						let len = read_var::<u64>(&mut input)? as usize;
						Payload::Inline(read_slice(&mut input, len)?.to_vec())
					}
					EXTERNAL_VALUE => Payload::External(read_var(&mut input)?),
					kind => return Err(corrupt(format!("unknown value kind {kind}"))),
				}
			};
		}
		if !input.is_empty() {
			return Err(corrupt(format!("{} trailing bytes", input.len())));
		}
		Ok(node)
	}
}
