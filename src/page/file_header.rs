use super::{PageType, FILE_HEADER_MAGIC};
use crate::block::Block;
use crate::error::{Error, Result};

const LISTS_OFFSET: usize = 2;
const LIST_ENTRY_SIZE: usize = 16;
const ROOTS_OFFSET: usize = LISTS_OFFSET + LIST_ENTRY_SIZE * PageType::ALL.len();
const ROOT_SIZE: usize = 8;

/// Root slot holding the recid of the name directory record.
pub(crate) const NAME_DIRECTORY_ROOT: usize = 0;
/// Root slot holding the on-disk format version.
pub(crate) const STORE_VERSION_ROOT: usize = 1;
/// Root slot reserved for serializer metadata.
const SERIALIZER_ROOT: usize = 2;
/// First root slot available to callers.
pub(crate) const FIRST_USER_ROOT: usize = SERIALIZER_ROOT + 1;

/// Highest on-disk format version this build reads.
const SUPPORTED_VERSION: u64 = 1;

/// Accessors for block 0.
///
/// Layout: `[magic: u16]`, then `(first: u64, last: u64)` for each page list in `PageType`
/// order, then as many 8-byte root slots as fit in the block.
///
/// The `last` field of the free list is not a list pointer. It holds the next block id that has
/// never been handed out.
pub(crate) struct FileHeader;

impl FileHeader {
	/// Builds the header of a new store.
	pub(crate) fn create(block_size: usize) -> Block {
		let mut block = Block::new(0, block_size);
		block.write_u16(0, FILE_HEADER_MAGIC);
		Self::set_last(&mut block, PageType::Free, 1);
		Self::set_root(&mut block, STORE_VERSION_ROOT, SUPPORTED_VERSION);
		block
	}

	/// Validates the magic and format version of a header block.
	pub(crate) fn check(block: &Block) -> Result<()> {
		let magic = block.read_u16(0);
		if magic != FILE_HEADER_MAGIC {
			return Err(Error::Corruption(format!("file header has bad magic {magic:#06x}")));
		}
		let version = Self::root(block, STORE_VERSION_ROOT);
		if version > SUPPORTED_VERSION {
			return Err(Error::UnsupportedVersion(version));
		}
		Ok(())
	}

	/// Number of root slots in a header of `block_size` bytes.
	pub(crate) fn root_count(block_size: usize) -> usize {
		(block_size - ROOTS_OFFSET) / ROOT_SIZE
	}

	pub(crate) fn first(block: &Block, list: PageType) -> u64 {
		block.read_u64(LISTS_OFFSET + list.index() * LIST_ENTRY_SIZE)
	}

	pub(crate) fn set_first(block: &mut Block, list: PageType, id: u64) {
		block.write_u64(LISTS_OFFSET + list.index() * LIST_ENTRY_SIZE, id);
	}

	pub(crate) fn last(block: &Block, list: PageType) -> u64 {
		block.read_u64(LISTS_OFFSET + list.index() * LIST_ENTRY_SIZE + 8)
	}

	pub(crate) fn set_last(block: &mut Block, list: PageType, id: u64) {
		block.write_u64(LISTS_OFFSET + list.index() * LIST_ENTRY_SIZE + 8, id);
	}

	pub(crate) fn root(block: &Block, slot: usize) -> u64 {
		block.read_u64(ROOTS_OFFSET + slot * ROOT_SIZE)
	}

	pub(crate) fn set_root(block: &mut Block, slot: usize, value: u64) {
		block.write_u64(ROOTS_OFFSET + slot * ROOT_SIZE, value);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_header_is_valid() {
		let block = FileHeader::create(4096);
		assert!(FileHeader::check(&block).is_ok());
		assert_eq!(FileHeader::last(&block, PageType::Free), 1);
		assert_eq!(FileHeader::root(&block, STORE_VERSION_ROOT), SUPPORTED_VERSION);
		for list in PageType::ALL {
			assert_eq!(FileHeader::first(&block, list), 0);
		}
	}

	#[test]
	fn newer_version_is_rejected() {
		let mut block = FileHeader::create(1024);
		FileHeader::set_root(&mut block, STORE_VERSION_ROOT, SUPPORTED_VERSION + 1);
		assert!(matches!(FileHeader::check(&block), Err(Error::UnsupportedVersion(2))));
	}

	#[test]
	fn bad_magic_is_corruption() {
		let block = Block::new(0, 1024);
		assert!(matches!(FileHeader::check(&block), Err(Error::Corruption(_))));
	}

	#[test]
	fn root_slots_fill_the_block() {
		assert_eq!(ROOTS_OFFSET, 82);
		let count = FileHeader::root_count(1024);
		assert_eq!(count, (1024 - 82) / 8);

		let mut block = FileHeader::create(1024);
		FileHeader::set_root(&mut block, count - 1, 0xabcd);
		assert_eq!(FileHeader::root(&block, count - 1), 0xabcd);
		FileHeader::set_last(&mut block, PageType::FreePhysical, 9);
		assert_eq!(FileHeader::last(&block, PageType::FreePhysical), 9);
		assert_eq!(FileHeader::root(&block, 0), 0);
	}
}
