use super::free_page::{self, FreeEntry};
use super::location::Location;
use crate::block::Block;
use crate::error::Result;
use crate::page::{PageManager, PageType};

impl FreeEntry for Location {
	const SIZE: usize = 6;

	fn read(block: &Block, pos: usize) -> Self {
		Location::from_packed(block.read_u48(pos))
	}

	fn write(&self, block: &mut Block, pos: usize) {
		block.write_u48(pos, self.packed());
	}
}

/// Tracks free translation slots.
///
/// Same protocol as the physical free manager: frees are staged until commit. Slots handed out
/// by a new translation page skip the staging, they belong to the running transaction anyway.
pub(crate) struct FreeLogicalManager {
	staged: Vec<Location>,
}

impl FreeLogicalManager {
	pub(crate) fn new() -> Self {
		Self {
			staged: Vec::new(),
		}
	}

	/// Pops the most recently freed committed slot.
	pub(crate) fn get(&mut self, pm: &mut PageManager) -> Result<Option<Location>> {
		let page = pm.last(PageType::FreeLogical)?;
		if page == 0 {
			return Ok(None);
		}
		let entries: Vec<Location> = free_page::read_entries(pm, PageType::FreeLogical, page)?;
		if entries.is_empty() {
			// An empty page is always handed back, so this one is stale.
			pm.free(PageType::FreeLogical, page)?;
			return self.get(pm);
		}
		free_page::remove_entry(pm, PageType::FreeLogical, page, entries.len() - 1).map(Some)
	}

	/// Makes `slots` available to the running transaction, last one first.
	pub(crate) fn push_unstaged(&mut self, pm: &mut PageManager, slots: &[Location]) -> Result<()> {
		free_page::append_entries(pm, PageType::FreeLogical, slots)
	}

	pub(crate) fn put(&mut self, slot: Location) {
		self.staged.push(slot);
	}

	pub(crate) fn commit(&mut self, pm: &mut PageManager) -> Result<()> {
		if self.staged.is_empty() {
			return Ok(());
		}
		let staged = std::mem::take(&mut self.staged);
		free_page::append_entries(pm, PageType::FreeLogical, &staged)
	}

	pub(crate) fn rollback(&mut self) {
		self.staged.clear();
	}
}
