use super::free_logical::FreeLogicalManager;
use super::location::{Location, MAX_BLOCKS};
use crate::error::{Error, Result};
use crate::page::{PageManager, PageType, PAGE_HEADER_SIZE};

const SLOT_SIZE: usize = 6;

/// Maps recids to physical record locations through translation pages.
///
/// A translation page is an array of 6-byte slots after the page header, each holding a packed
/// physical location (zero when unused). A recid numbers a slot as
/// `block * slots_per_page + slot`, so it stays stable while the record moves.
pub(crate) struct LogicalRowManager {
	free: FreeLogicalManager,
	slots_per_page: u64,
}

impl LogicalRowManager {
	pub(crate) fn new(block_size: usize) -> Self {
		Self {
			free: FreeLogicalManager::new(),
			slots_per_page: ((block_size - PAGE_HEADER_SIZE) / SLOT_SIZE) as u64,
		}
	}

	fn slot_of(&self, recid: u64) -> Option<Location> {
		let block = recid / self.slots_per_page;
		if block == 0 || block >= MAX_BLOCKS {
			return None;
		}
		let slot = (recid % self.slots_per_page) as usize;
		Some(Location::new(block, PAGE_HEADER_SIZE + slot * SLOT_SIZE))
	}

	fn recid_of(&self, slot: Location) -> u64 {
		slot.block() * self.slots_per_page + ((slot.offset() - PAGE_HEADER_SIZE) / SLOT_SIZE) as u64
	}

	/// Assigns a recid to the record at `phys`.
	pub(crate) fn insert(&mut self, pm: &mut PageManager, phys: Location) -> Result<u64> {
		let slot = match self.free.get(pm)? {
			Some(slot) => slot,
			None => self.new_translation_page(pm)?,
		};
		pm.file_mut().write(slot.block(), |b| b.write_u48(slot.offset(), phys.packed()))?;
		Ok(self.recid_of(slot))
	}

	// Hands out slot 0 of a fresh translation page and frees the rest, ordered so that they are
	// popped lowest first.
	fn new_translation_page(&mut self, pm: &mut PageManager) -> Result<Location> {
		let page = pm.allocate(PageType::Translation)?;
		log::debug!("Allocated translation page {page}");
		let spare: Vec<Location> = (1..self.slots_per_page as usize)
			.rev()
			.map(|i| Location::new(page, PAGE_HEADER_SIZE + i * SLOT_SIZE))
			.collect();
		self.free.push_unstaged(pm, &spare)?;
		Ok(Location::new(page, PAGE_HEADER_SIZE))
	}

	/// Returns the physical location of `recid`, or None if it does not name a live record.
	pub(crate) fn fetch(&self, pm: &PageManager, recid: u64) -> Result<Option<Location>> {
		let Some(slot) = self.slot_of(recid) else {
			return Ok(None);
		};
		if slot.block() >= pm.high_water()? {
			return Ok(None);
		}
		if pm.page_type(slot.block())? != PageType::Translation {
			return Ok(None);
		}
		let phys = pm.file().read(slot.block(), |b| Location::from_packed(b.read_u48(slot.offset())))?;
		Ok((!phys.is_none()).then_some(phys))
	}

	/// Points `recid` at a new physical location.
	pub(crate) fn update(&mut self, pm: &mut PageManager, recid: u64, phys: Location) -> Result<()> {
		let slot = self.live_slot(pm, recid)?;
		pm.file_mut().write(slot.block(), |b| b.write_u48(slot.offset(), phys.packed()))
	}

	/// Releases `recid`. The slot is reusable after the next commit.
	pub(crate) fn delete(&mut self, pm: &mut PageManager, recid: u64) -> Result<()> {
		let slot = self.live_slot(pm, recid)?;
		pm.file_mut().write(slot.block(), |b| b.write_u48(slot.offset(), 0))?;
		self.free.put(slot);
		Ok(())
	}

	fn live_slot(&self, pm: &PageManager, recid: u64) -> Result<Location> {
		match (self.fetch(pm, recid)?, self.slot_of(recid)) {
			(Some(_), Some(slot)) => Ok(slot),
			_ => Err(Error::InvalidRecid(recid)),
		}
	}

	pub(crate) fn commit(&mut self, pm: &mut PageManager) -> Result<()> {
		self.free.commit(pm)
	}

	pub(crate) fn rollback(&mut self) {
		self.free.rollback()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::file::BlockFile;
	use crate::option::Options;
	use test_log::test;

	fn setup() -> (PageManager, LogicalRowManager) {
		let mut pm = PageManager::new(BlockFile::memory(&Options::new().with_block_size(1024)));
		pm.create_header().unwrap();
		(pm, LogicalRowManager::new(1024))
	}

	#[test]
	fn recids_are_dense_and_ascending() {
		let (mut pm, mut logical) = setup();
		let spp = logical.slots_per_page;
		let first = logical.insert(&mut pm, Location::new(9, 20)).unwrap();
		let second = logical.insert(&mut pm, Location::new(9, 40)).unwrap();
		assert_eq!(first, spp);
		assert_eq!(second, spp + 1);
		assert_eq!(logical.fetch(&pm, first).unwrap(), Some(Location::new(9, 20)));
		assert_eq!(logical.fetch(&pm, second).unwrap(), Some(Location::new(9, 40)));
	}

	#[test]
	fn full_page_bootstraps_another() {
		let (mut pm, mut logical) = setup();
		let spp = logical.slots_per_page;
		let mut last = 0;
		for i in 0..=spp {
			last = logical.insert(&mut pm, Location::new(50, 20 + i as usize)).unwrap();
		}
		assert_eq!(pm.first(PageType::Translation).unwrap(), 1);
		assert_ne!(pm.last(PageType::Translation).unwrap(), 1);
		assert_eq!(last / spp, pm.last(PageType::Translation).unwrap());
		assert_eq!(last % spp, 0);
	}

	#[test]
	fn missing_recids_are_not_found() {
		let (mut pm, mut logical) = setup();
		assert_eq!(logical.fetch(&pm, 0).unwrap(), None);
		assert_eq!(logical.fetch(&pm, 5).unwrap(), None);
		assert_eq!(logical.fetch(&pm, 1_000_000).unwrap(), None);

		let recid = logical.insert(&mut pm, Location::new(3, 20)).unwrap();
		assert_eq!(logical.fetch(&pm, recid + 1).unwrap(), None);
		assert!(matches!(
			logical.update(&mut pm, recid + 1, Location::new(3, 40)),
			Err(Error::InvalidRecid(_))
		));
		assert!(matches!(logical.delete(&mut pm, 1_000_000), Err(Error::InvalidRecid(_))));
	}

	#[test]
	fn recids_past_the_addressable_range_are_not_found() {
		let (mut pm, mut logical) = setup();
		logical.insert(&mut pm, Location::new(3, 20)).unwrap();
		let far = logical.slots_per_page * MAX_BLOCKS;
		for recid in [far, far + 1, u64::MAX] {
			assert_eq!(logical.fetch(&pm, recid).unwrap(), None);
			assert!(matches!(logical.delete(&mut pm, recid), Err(Error::InvalidRecid(_))));
		}
	}

	#[test]
	fn update_keeps_the_recid() {
		let (mut pm, mut logical) = setup();
		let recid = logical.insert(&mut pm, Location::new(3, 20)).unwrap();
		logical.update(&mut pm, recid, Location::new(8, 100)).unwrap();
		assert_eq!(logical.fetch(&pm, recid).unwrap(), Some(Location::new(8, 100)));
	}

	#[test]
	fn deleted_slots_are_reused_after_commit() {
		let (mut pm, mut logical) = setup();
		let a = logical.insert(&mut pm, Location::new(3, 20)).unwrap();
		logical.delete(&mut pm, a).unwrap();
		assert_eq!(logical.fetch(&pm, a).unwrap(), None);

		let b = logical.insert(&mut pm, Location::new(3, 40)).unwrap();
		assert_ne!(a, b);

		logical.commit(&mut pm).unwrap();
		let c = logical.insert(&mut pm, Location::new(3, 60)).unwrap();
		assert_eq!(c, a);
	}
}
