use super::free_physical::FreePhysicalManager;
use super::location::Location;
use super::record_header::{
	round_available_size, RecordHeader, MAX_RECORD_SIZE, MAX_SLACK, RECORD_HEADER_SIZE,
};
use crate::error::{Error, Result};
use crate::page::{PageHeader, PageManager, PageType, PAGE_HEADER_SIZE};

// Data pages: page header, [first: u16], then record bytes. `first` is the offset of the first
// record header that starts in the page, or 0 if the page holds no header (it is entirely
// covered by a record spanning pages, or full).
const FIRST_OFFSET: usize = PAGE_HEADER_SIZE;

/// Offset of the first record byte in a data page.
pub(crate) const DATA_START: usize = PAGE_HEADER_SIZE + 2;

/// Allocates variable-length records inside data pages.
///
/// A record is a [`RecordHeader`] followed by `available` bytes of which the first `current`
/// hold the payload. A record runs past the end of its page into the following pages of the
/// data list.
pub(crate) struct PhysicalRowManager {
	free: FreePhysicalManager,
}

impl PhysicalRowManager {
	pub(crate) fn new(free: FreePhysicalManager) -> Self {
		Self {
			free,
		}
	}

	pub(crate) fn free_manager(&self) -> &FreePhysicalManager {
		&self.free
	}

	pub(crate) fn free_manager_mut(&mut self) -> &mut FreePhysicalManager {
		&mut self.free
	}

	/// Stores `data` in a new record and returns its location.
	pub(crate) fn insert(&mut self, pm: &mut PageManager, data: &[u8]) -> Result<Location> {
		if data.len() > MAX_RECORD_SIZE {
			return Err(Error::RecordTooLarge(data.len()));
		}
		let (loc, available) = match self.free.get(pm, data.len())? {
			Some(slot) => (slot.location, slot.available),
			None => {
				let available = round_available_size(data.len())?;
				(self.alloc_new(pm, available)?, available)
			}
		};
		let header = RecordHeader::new(available, data.len());
		pm.file_mut().write(loc.block(), |b| header.write(b, loc.offset()))??;
		self.write_payload(pm, loc, data)?;
		Ok(loc)
	}

	/// Replaces the payload of the record at `loc`. The record stays in place if the new payload
	/// fits its reserved space with bounded slack, otherwise it moves and the new location is
	/// returned.
	pub(crate) fn update(
		&mut self,
		pm: &mut PageManager,
		loc: Location,
		data: &[u8],
	) -> Result<Location> {
		let header = self.read_header(pm, loc)?;
		if data.len() <= header.available && header.available - data.len() <= MAX_SLACK {
			let header = RecordHeader::new(header.available, data.len());
			pm.file_mut().write(loc.block(), |b| header.write(b, loc.offset()))??;
			self.write_payload(pm, loc, data)?;
			return Ok(loc);
		}
		// The old copy stays live until the new one is written.
		let moved = self.insert(pm, data)?;
		self.free(pm, loc)?;
		Ok(moved)
	}

	/// Reads the payload of the record at `loc`.
	pub(crate) fn fetch(&self, pm: &PageManager, loc: Location) -> Result<Vec<u8>> {
		let header = self.read_header(pm, loc)?;
		let block_size = pm.block_size();
		let mut out = vec![0u8; header.current];
		let mut block = loc.block();
		let mut pos = loc.offset() + RECORD_HEADER_SIZE;
		let mut done = 0;
		while done < out.len() {
			if pos == block_size {
				block = self.next_data_page(pm, block)?;
				pos = DATA_START;
			}
			let n = (block_size - pos).min(out.len() - done);
			pm.file().read(block, |b| b.read_bytes(pos, &mut out[done..done + n]))?;
			pos += n;
			done += n;
		}
		Ok(out)
	}

	/// Releases the record at `loc`. The space becomes reusable after the next commit.
	pub(crate) fn free(&mut self, pm: &mut PageManager, loc: Location) -> Result<()> {
		let header = self.read_header(pm, loc)?;
		let freed = RecordHeader::new(header.available, 0);
		pm.file_mut().write(loc.block(), |b| freed.write(b, loc.offset()))??;
		self.free.put(loc, header.available);
		Ok(())
	}

	pub(crate) fn commit(&mut self, pm: &mut PageManager) -> Result<()> {
		self.free.commit(pm)
	}

	pub(crate) fn rollback(&mut self) {
		self.free.rollback()
	}

	fn read_header(&self, pm: &PageManager, loc: Location) -> Result<RecordHeader> {
		let block_size = pm.block_size();
		if loc.offset() < DATA_START || loc.offset() + RECORD_HEADER_SIZE > block_size {
			return Err(Error::Corruption(format!("record location {loc:?} is outside page data")));
		}
		pm.file().read(loc.block(), |b| -> Result<RecordHeader> {
			PageHeader::expect(b, PageType::Used)?;
			Ok(RecordHeader::read(b, loc.offset()))
		})?
	}

	fn next_data_page(&self, pm: &PageManager, block: u64) -> Result<u64> {
		let next = pm.next(block)?;
		if next == 0 {
			return Err(Error::Corruption(format!("record runs past the last data page {block}")));
		}
		Ok(next)
	}

	fn write_payload(&self, pm: &mut PageManager, loc: Location, data: &[u8]) -> Result<()> {
		let block_size = pm.block_size();
		let mut block = loc.block();
		let mut pos = loc.offset() + RECORD_HEADER_SIZE;
		let mut done = 0;
		while done < data.len() {
			if pos == block_size {
				block = self.next_data_page(pm, block)?;
				pos = DATA_START;
			}
			let n = (block_size - pos).min(data.len() - done);
			pm.file_mut().write(block, |b| b.write_bytes(pos, &data[done..done + n]))?;
			pos += n;
			done += n;
		}
		Ok(())
	}

	/// Offset of the unused tail of data page `block`, if a record header still fits there.
	fn free_tail(&self, pm: &PageManager, block: u64) -> Result<Option<usize>> {
		let block_size = pm.block_size();
		pm.file().read(block, |b| -> Result<Option<usize>> {
			PageHeader::expect(b, PageType::Used)?;
			let mut pos = b.read_u16(FIRST_OFFSET) as usize;
			if pos == 0 {
				return Ok(None);
			}
			loop {
				if block_size - pos < RECORD_HEADER_SIZE {
					return Ok(None);
				}
				let header = RecordHeader::read(b, pos);
				if header.available == 0 {
					return Ok(Some(pos));
				}
				let end = pos + RECORD_HEADER_SIZE + header.available;
				if end > block_size {
					return Err(Error::Corruption(format!(
						"record at {block}:{pos} runs past the last data page"
					)));
				}
				if end == block_size {
					return Ok(None);
				}
				pos = end;
			}
		})?
	}

	/// Reserves `available` bytes plus a header at the end of the data list.
	fn alloc_new(&mut self, pm: &mut PageManager, available: usize) -> Result<Location> {
		let block_size = pm.block_size();
		let last = pm.last(PageType::Used)?;
		let tail = if last != 0 {
			self.free_tail(pm, last)?
		} else {
			None
		};
		let start = match tail {
			Some(pos) => Location::new(last, pos),
			None => {
				let block = pm.allocate(PageType::Used)?;
				pm.file_mut().write(block, |b| b.write_u16(FIRST_OFFSET, DATA_START as u16))?;
				Location::new(block, DATA_START)
			}
		};

		// Pages the record spills into.
		let mut remaining =
			(start.offset() + RECORD_HEADER_SIZE + available).saturating_sub(block_size);
		let data_per_page = block_size - DATA_START;
		while remaining > 0 {
			let block = pm.allocate(PageType::Used)?;
			let first = if remaining >= data_per_page {
				remaining -= data_per_page;
				0
			} else {
				let end = DATA_START + remaining;
				remaining = 0;
				if block_size - end >= RECORD_HEADER_SIZE {
					end
				} else {
					0
				}
			};
			pm.file_mut().write(block, |b| b.write_u16(FIRST_OFFSET, first as u16))?;
		}
		Ok(start)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::file::BlockFile;
	use crate::option::Options;
	use test_log::test;

	fn setup() -> (PageManager, PhysicalRowManager) {
		let mut pm = PageManager::new(BlockFile::memory(&Options::new().with_block_size(1024)));
		pm.create_header().unwrap();
		(pm, PhysicalRowManager::new(FreePhysicalManager::new(64)))
	}

	fn payload(len: usize, seed: u8) -> Vec<u8> {
		(0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
	}

	#[test]
	fn records_pack_into_one_page() {
		let (mut pm, mut phys) = setup();
		let a = phys.insert(&mut pm, b"hello").unwrap();
		let b = phys.insert(&mut pm, b"world!").unwrap();
		assert_eq!(a, Location::new(1, DATA_START));
		assert_eq!(b, Location::new(1, DATA_START + RECORD_HEADER_SIZE + 16));
		assert_eq!(phys.fetch(&pm, a).unwrap(), b"hello");
		assert_eq!(phys.fetch(&pm, b).unwrap(), b"world!");
	}

	#[test]
	fn large_records_span_pages() {
		let (mut pm, mut phys) = setup();
		let small = phys.insert(&mut pm, b"x").unwrap();
		let data = payload(3000, 7);
		let big = phys.insert(&mut pm, &data).unwrap();
		let after = phys.insert(&mut pm, b"after").unwrap();

		assert_eq!(big.block(), small.block());
		assert_eq!(phys.fetch(&pm, big).unwrap(), data);
		assert_eq!(phys.fetch(&pm, after).unwrap(), b"after");
		assert!(after.block() > big.block());
		assert_eq!(phys.fetch(&pm, small).unwrap(), b"x");
	}

	#[test]
	fn empty_payload_round_trips() {
		let (mut pm, mut phys) = setup();
		let loc = phys.insert(&mut pm, b"").unwrap();
		assert!(phys.fetch(&pm, loc).unwrap().is_empty());
	}

	#[test]
	fn update_in_place_within_slack() {
		let (mut pm, mut phys) = setup();
		let loc = phys.insert(&mut pm, &payload(20, 1)).unwrap();
		// 20 rounds to 32 available bytes.
		let moved = phys.update(&mut pm, loc, &payload(32, 2)).unwrap();
		assert_eq!(moved, loc);
		assert_eq!(phys.fetch(&pm, loc).unwrap(), payload(32, 2));

		let shrunk = phys.update(&mut pm, loc, b"ab").unwrap();
		assert_eq!(shrunk, loc);
		assert_eq!(phys.fetch(&pm, loc).unwrap(), b"ab");
	}

	#[test]
	fn update_relocates_when_growing_past_available() {
		let (mut pm, mut phys) = setup();
		let loc = phys.insert(&mut pm, &payload(20, 1)).unwrap();
		let moved = phys.update(&mut pm, loc, &payload(100, 3)).unwrap();
		assert_ne!(moved, loc);
		assert_eq!(phys.fetch(&pm, moved).unwrap(), payload(100, 3));
		assert_eq!(phys.fetch(&pm, loc).unwrap(), b"");
	}

	#[test]
	fn update_relocates_when_slack_is_too_large() {
		let (mut pm, mut phys) = setup();
		let loc = phys.insert(&mut pm, &payload(100_000, 5)).unwrap();
		let moved = phys.update(&mut pm, loc, b"tiny").unwrap();
		assert_ne!(moved, loc);
		assert_eq!(phys.fetch(&pm, moved).unwrap(), b"tiny");
	}

	#[test]
	fn freed_slot_is_reused_after_commit() {
		let (mut pm, mut phys) = setup();
		let loc = phys.insert(&mut pm, &payload(200, 1)).unwrap();
		phys.insert(&mut pm, b"keep").unwrap();
		phys.free(&mut pm, loc).unwrap();

		// Not before commit.
		let other = phys.insert(&mut pm, &payload(190, 2)).unwrap();
		assert_ne!(other, loc);

		phys.commit(&mut pm).unwrap();
		pm.commit().unwrap();
		let high_water = pm.high_water().unwrap();
		let reused = phys.insert(&mut pm, &payload(150, 3)).unwrap();
		assert_eq!(reused, loc);
		assert_eq!(phys.fetch(&pm, reused).unwrap(), payload(150, 3));
		assert_eq!(pm.high_water().unwrap(), high_water);
	}

	#[test]
	fn oversized_records_are_rejected() {
		let (mut pm, mut phys) = setup();
		let data = vec![0u8; MAX_RECORD_SIZE + 1];
		assert!(matches!(phys.insert(&mut pm, &data), Err(Error::RecordTooLarge(_))));
	}

	#[test]
	fn failed_relocation_keeps_the_record() {
		let (mut pm, mut phys) = setup();
		let loc = phys.insert(&mut pm, b"original").unwrap();
		let oversized = vec![1u8; MAX_RECORD_SIZE + 1];
		let err = phys.update(&mut pm, loc, &oversized).unwrap_err();
		assert!(matches!(err, Error::RecordTooLarge(_)));
		assert!(!err.is_fatal());
		assert_eq!(phys.fetch(&pm, loc).unwrap(), b"original");

		// The slot never reached the free list, so a same-sized insert lands elsewhere.
		phys.commit(&mut pm).unwrap();
		pm.commit().unwrap();
		let other = phys.insert(&mut pm, b"intruder").unwrap();
		assert_ne!(other, loc);
		assert_eq!(phys.fetch(&pm, loc).unwrap(), b"original");
	}

	#[test]
	fn relocation_frees_the_old_slot_after_the_new_copy_is_written() {
		let (mut pm, mut phys) = setup();
		let loc = phys.insert(&mut pm, &payload(20, 1)).unwrap();
		let moved = phys.update(&mut pm, loc, &payload(300, 4)).unwrap();
		assert!(moved > loc);
		phys.commit(&mut pm).unwrap();
		pm.commit().unwrap();
		assert_eq!(phys.insert(&mut pm, &payload(20, 9)).unwrap(), loc);
		assert_eq!(phys.fetch(&pm, moved).unwrap(), payload(300, 4));
	}

	#[test]
	fn bad_location_is_corruption() {
		let (mut pm, mut phys) = setup();
		phys.insert(&mut pm, b"data").unwrap();
		let err = phys.fetch(&pm, Location::new(1, 4)).unwrap_err();
		assert!(err.is_fatal());
		let err = phys.fetch(&pm, Location::new(40, DATA_START)).unwrap_err();
		assert!(err.is_fatal());
	}
}
