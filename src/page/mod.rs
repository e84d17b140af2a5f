//! Typed pages and the doubly-linked page lists kept in the file header.

mod file_header;
mod manager;

pub(crate) use file_header::{FileHeader, FIRST_USER_ROOT, NAME_DIRECTORY_ROOT};
#[cfg(test)]
pub(crate) use file_header::STORE_VERSION_ROOT;
pub(crate) use manager::PageManager;

use crate::block::Block;
use crate::error::{Error, Result};

/// Magic number of the file header block.
pub(crate) const FILE_HEADER_MAGIC: u16 = 0x1350;

/// Base magic number of every other block; the page type is added to it.
pub(crate) const BLOCK_MAGIC: u16 = 0x1351;

const MAGIC_OFFSET: usize = 0;
const NEXT_OFFSET: usize = 2;
const PREV_OFFSET: usize = 10;

/// Size of the header at the start of every page.
pub(crate) const PAGE_HEADER_SIZE: usize = 18;

/// The five page lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PageType {
	Free = 0,
	Used = 1,
	Translation = 2,
	FreeLogical = 3,
	FreePhysical = 4,
}

impl PageType {
	pub(crate) const ALL: [PageType; 5] = [
		PageType::Free,
		PageType::Used,
		PageType::Translation,
		PageType::FreeLogical,
		PageType::FreePhysical,
	];

	pub(crate) fn magic(self) -> u16 {
		BLOCK_MAGIC + self as u16
	}

	pub(crate) fn from_magic(magic: u16) -> Option<Self> {
		magic.checked_sub(BLOCK_MAGIC).and_then(|offset| Self::ALL.get(offset as usize).copied())
	}

	fn index(self) -> usize {
		self as usize
	}
}

/// Page header accessors.
///
/// Every non-header block starts with `[magic: u16][next: u64][prev: u64]`.
pub(crate) struct PageHeader;

impl PageHeader {
	/// Returns the type of `block`, or a corruption error if its magic is unknown.
	pub(crate) fn page_type(block: &Block) -> Result<PageType> {
		let magic = block.read_u16(MAGIC_OFFSET);
		PageType::from_magic(magic).ok_or_else(|| {
			Error::Corruption(format!("block {} has bad magic {magic:#06x}", block.id()))
		})
	}

	/// Checks that `block` is a page of type `expected`.
	pub(crate) fn expect(block: &Block, expected: PageType) -> Result<()> {
		let actual = Self::page_type(block)?;
		if actual != expected {
			return Err(Error::Corruption(format!(
				"block {} is a {actual:?} page, expected {expected:?}",
				block.id()
			)));
		}
		Ok(())
	}

	pub(crate) fn set_page_type(block: &mut Block, page_type: PageType) {
		block.write_u16(MAGIC_OFFSET, page_type.magic());
	}

	pub(crate) fn next(block: &Block) -> u64 {
		block.read_u64(NEXT_OFFSET)
	}

	pub(crate) fn set_next(block: &mut Block, next: u64) {
		block.write_u64(NEXT_OFFSET, next);
	}

	pub(crate) fn prev(block: &Block) -> u64 {
		block.read_u64(PREV_OFFSET)
	}

	pub(crate) fn set_prev(block: &mut Block, prev: u64) {
		block.write_u64(PREV_OFFSET, prev);
	}
}
