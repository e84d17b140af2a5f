use super::free_page::{self, FreeEntry};
use super::location::Location;
use super::physical::DATA_START;
use super::record_header::{is_representable, RecordHeader, RECORD_HEADER_SIZE};
use crate::block::Block;
use crate::error::Result;
use crate::page::{PageManager, PageType};

/// Waste below which a free slot is taken without looking any further.
const ACCEPTABLE_WASTE: usize = 128;

/// A freed record: where it starts and how much payload space it reserves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FreeRecord {
	pub(crate) location: Location,
	pub(crate) available: usize,
}

impl FreeEntry for FreeRecord {
	const SIZE: usize = 10;

	fn read(block: &Block, pos: usize) -> Self {
		Self {
			location: Location::from_packed(block.read_u48(pos)),
			available: block.read_u32(pos + 6) as usize,
		}
	}

	fn write(&self, block: &mut Block, pos: usize) {
		block.write_u48(pos, self.location.packed());
		block.write_u32(pos + 6, self.available as u32);
	}
}

/// Tracks freed physical records for reuse.
///
/// Frees are staged in memory and only written to free-physical pages on commit, so a
/// transaction never reuses space it freed itself and rollback simply drops the staged list.
pub(crate) struct FreePhysicalManager {
	staged: Vec<FreeRecord>,
	scanned_pages: usize,
	scan_threshold: usize,
	needs_defrag: bool,
}

impl FreePhysicalManager {
	pub(crate) fn new(scan_threshold: usize) -> Self {
		Self {
			staged: Vec::new(),
			scanned_pages: 0,
			scan_threshold,
			needs_defrag: false,
		}
	}

	/// Finds and removes a committed free record with room for `size` payload bytes.
	///
	/// The search is first-fit over the free pages. A slot wasting fewer than 128 bytes is taken
	/// at once; otherwise the tightest slot seen so far is taken once a page has been scanned, if
	/// it wastes less than a quarter of a data page.
	pub(crate) fn get(&mut self, pm: &mut PageManager, size: usize) -> Result<Option<FreeRecord>> {
		let tolerable_waste = (pm.block_size() - DATA_START) / 4;
		let mut best: Option<(u64, usize, FreeRecord)> = None;

		let mut page = pm.first(PageType::FreePhysical)?;
		while page != 0 {
			self.scanned_pages += 1;
			if self.scanned_pages > self.scan_threshold && !self.needs_defrag {
				log::debug!("Scanned {} free pages, store needs defragmentation", self.scanned_pages);
				self.needs_defrag = true;
			}

			let entries: Vec<FreeRecord> =
				free_page::read_entries(pm, PageType::FreePhysical, page)?;
			for (index, entry) in entries.into_iter().enumerate() {
				if entry.available < size {
					continue;
				}
				let waste = entry.available - size;
				if waste < ACCEPTABLE_WASTE {
					return self.take(pm, page, index).map(Some);
				}
				if best.map_or(true, |(_, _, b)| entry.available < b.available) {
					best = Some((page, index, entry));
				}
			}

			if let Some((best_page, index, entry)) = best {
				if entry.available - size < tolerable_waste {
					return self.take(pm, best_page, index).map(Some);
				}
			}
			page = pm.next(page)?;
		}
		Ok(None)
	}

	fn take(&mut self, pm: &mut PageManager, page: u64, index: usize) -> Result<FreeRecord> {
		free_page::remove_entry(pm, PageType::FreePhysical, page, index)
	}

	/// Stages a freed record for the running transaction.
	pub(crate) fn put(&mut self, location: Location, available: usize) {
		self.staged.push(FreeRecord {
			location,
			available,
		});
	}

	/// Writes staged frees to the free pages, merging records that are adjacent in one block.
	pub(crate) fn commit(&mut self, pm: &mut PageManager) -> Result<()> {
		if self.staged.is_empty() {
			return Ok(());
		}
		let mut staged = std::mem::take(&mut self.staged);
		staged.sort_by_key(|r| r.location);

		let mut merged: Vec<FreeRecord> = Vec::with_capacity(staged.len());
		for record in staged {
			if let Some(prev) = merged.last_mut() {
				if let Some(size) = merged_size(prev, &record) {
					prev.available = size;
					continue;
				}
			}
			merged.push(record);
		}

		for record in &merged {
			let loc = record.location;
			let header = RecordHeader::new(record.available, 0);
			pm.file_mut().write(loc.block(), |b| header.write(b, loc.offset()))??;
		}
		log::debug!("Committing {} free records", merged.len());
		free_page::append_entries(pm, PageType::FreePhysical, &merged)
	}

	pub(crate) fn rollback(&mut self) {
		self.staged.clear();
	}

	pub(crate) fn needs_defrag(&self) -> bool {
		self.needs_defrag
	}

	pub(crate) fn reset_defrag_counter(&mut self) {
		self.scanned_pages = 0;
		self.needs_defrag = false;
	}
}

/// Size of `a` after absorbing `b`, if `b` starts right where `a` ends within the same block and
/// the combined size fits a record header exactly.
fn merged_size(a: &FreeRecord, b: &FreeRecord) -> Option<usize> {
	if a.location.block() != b.location.block() {
		return None;
	}
	let end = a.location.offset() + RECORD_HEADER_SIZE + a.available;
	if end != b.location.offset() {
		return None;
	}
	let size = a.available + RECORD_HEADER_SIZE + b.available;
	is_representable(size).then_some(size)
}
