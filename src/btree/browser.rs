use crate::btree::node::Node;
use crate::btree::tree::BTree;
use crate::codec::Codec;
use crate::comparator::KeyComparator;
use crate::error::{Error, Result};

/// A bidirectional cursor over the leaves of a [`BTree`].
///
/// The cursor sits between two entries. [`Browser::get_next`] returns the entry after it and
/// moves past it, [`Browser::get_previous`] does the same backwards. Any mutation of the tree
/// or rollback of its store after the cursor was created makes both fail with
/// [`Error::ConcurrentModification`].
pub struct Browser<'a, K, V, C> {
	tree: &'a BTree<K, V, C>,
	// None for an empty tree.
	node: Option<Node<K>>,
	index: usize,
	expected_stamp: (u64, u64),
}

impl<'a, K, V, C> Browser<'a, K, V, C>
where
	K: Codec + Clone,
	V: Codec,
	C: KeyComparator<K>,
{
	pub(crate) fn new(
		tree: &'a BTree<K, V, C>,
		node: Option<Node<K>>,
		index: usize,
		expected_stamp: (u64, u64),
	) -> Self {
		Self {
			tree,
			node,
			index,
			expected_stamp,
		}
	}

	fn check_stamp(&self) -> Result<()> {
		if self.tree.modification_stamp() != self.expected_stamp {
			return Err(Error::ConcurrentModification);
		}
		Ok(())
	}

	pub fn get_next(&mut self) -> Result<Option<(K, V)>> {
		let tree = self.tree;
		let _guard = tree.read_lock();
		self.check_stamp()?;
		let Some(node) = self.node.as_mut() else {
			return Ok(None);
		};
		if self.index >= tree.page_size() {
			if node.next == 0 {
				return Ok(None);
			}
			*node = tree.load_node(node.next)?;
			self.index = node.first;
		}
		let slot = &node.slots[self.index];
		// The infinite key ends the last leaf.
		let Some(key) = slot.key.clone() else {
			return Ok(None);
		};
		let value = tree.load_value(&slot.payload)?;
		self.index += 1;
		Ok(Some((key, value)))
	}

	pub fn get_previous(&mut self) -> Result<Option<(K, V)>> {
		let tree = self.tree;
		let _guard = tree.read_lock();
		self.check_stamp()?;
		let Some(node) = self.node.as_mut() else {
			return Ok(None);
		};
		if self.index <= node.first {
			if node.prev == 0 {
				return Ok(None);
			}
			*node = tree.load_node(node.prev)?;
			self.index = tree.page_size();
		}
		self.index -= 1;
		let slot = &node.slots[self.index];
		let key = slot.key.clone().ok_or_else(|| {
			Error::Corruption(format!("leaf {} ends without a key", node.recid))
		})?;
		let value = tree.load_value(&slot.payload)?;
		Ok(Some((key, value)))
	}
}

impl<K, V, C> Iterator for Browser<'_, K, V, C>
where
	K: Codec + Clone,
	V: Codec,
	C: KeyComparator<K>,
{
	type Item = Result<(K, V)>;

	fn next(&mut self) -> Option<Self::Item> {
		self.get_next().transpose()
	}
}
