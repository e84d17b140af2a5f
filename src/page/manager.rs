use super::{FileHeader, PageHeader, PageType};
use crate::block::Block;
use crate::error::{Error, Result};
use crate::file::BlockFile;

/// Owns the block file and keeps the page lists of the file header consistent.
pub(crate) struct PageManager {
	file: BlockFile,
	root_count: usize,
}

impl PageManager {
	pub(crate) fn new(file: BlockFile) -> Self {
		let root_count = FileHeader::root_count(file.block_size());
		Self {
			file,
			root_count,
		}
	}

	pub(crate) fn file(&self) -> &BlockFile {
		&self.file
	}

	pub(crate) fn file_mut(&mut self) -> &mut BlockFile {
		&mut self.file
	}

	pub(crate) fn block_size(&self) -> usize {
		self.file.block_size()
	}

	pub(crate) fn root_count(&self) -> usize {
		self.root_count
	}

	/// Writes the header of a brand new store directly to the extents.
	pub(crate) fn create_header(&mut self) -> Result<()> {
		log::debug!("Creating file header with block size {}", self.block_size());
		let header = FileHeader::create(self.block_size());
		self.file.write_raw(&header)
	}

	/// Validates the header as currently visible (after log replay).
	pub(crate) fn check_header(&self) -> Result<()> {
		self.file.read(0, FileHeader::check)?
	}

	fn header<R>(&self, f: impl FnOnce(&Block) -> R) -> Result<R> {
		self.file.read(0, f)
	}

	fn header_mut<R>(&mut self, f: impl FnOnce(&mut Block) -> R) -> Result<R> {
		self.file.write(0, f)
	}

	/// Returns the type of page `id`, failing if it does not carry a page magic.
	pub(crate) fn page_type(&self, id: u64) -> Result<PageType> {
		self.file.read(id, PageHeader::page_type)?
	}

	/// Next block id that has never been allocated.
	pub(crate) fn high_water(&self) -> Result<u64> {
		Ok(self.header(|h| FileHeader::last(h, PageType::Free))?.max(1))
	}

	pub(crate) fn first(&self, list: PageType) -> Result<u64> {
		self.header(|h| FileHeader::first(h, list))
	}

	pub(crate) fn last(&self, list: PageType) -> Result<u64> {
		if list == PageType::Free {
			return Err(Error::InvalidArgument("the free list has no tail pointer".into()));
		}
		self.header(|h| FileHeader::last(h, list))
	}

	pub(crate) fn next(&self, id: u64) -> Result<u64> {
		self.file.read(id, PageHeader::next)
	}

	pub(crate) fn prev(&self, id: u64) -> Result<u64> {
		self.file.read(id, PageHeader::prev)
	}

	/// Allocates a page of type `list` and links it at the tail of that list.
	///
	/// The page comes from the head of the free list if there is one, otherwise the file grows by
	/// one block. Every byte past the page header is zero.
	pub(crate) fn allocate(&mut self, list: PageType) -> Result<u64> {
		if list == PageType::Free {
			return Err(Error::InvalidArgument("cannot allocate a free page".into()));
		}

		let head = self.first(PageType::Free)?;
		let id = if head != 0 {
			self.file.read(head, |b| PageHeader::expect(b, PageType::Free))??;
			let next = self.next(head)?;
			self.header_mut(|h| FileHeader::set_first(h, PageType::Free, next))?;
			if next != 0 {
				self.file.write(next, |b| PageHeader::set_prev(b, 0))?;
			}
			log::debug!("Allocated {list:?} page {head} from the free list");
			head
		} else {
			let id = self.high_water()?;
			self.header_mut(|h| FileHeader::set_last(h, PageType::Free, id + 1))?;
			log::debug!("Allocated {list:?} page {id} by growing the file");
			id
		};

		let tail = self.last(list)?;
		self.file.write(id, |b| {
			b.zero();
			PageHeader::set_page_type(b, list);
			PageHeader::set_prev(b, tail);
		})?;
		if tail != 0 {
			self.file.write(tail, |b| PageHeader::set_next(b, id))?;
		} else {
			self.header_mut(|h| FileHeader::set_first(h, list, id))?;
		}
		self.header_mut(|h| FileHeader::set_last(h, list, id))?;
		Ok(id)
	}

	/// Unlinks page `id` from `list` and pushes it on the head of the free list.
	pub(crate) fn free(&mut self, list: PageType, id: u64) -> Result<()> {
		if id == 0 {
			return Err(Error::InvalidBlockFree(0));
		}
		match self.page_type(id)? {
			PageType::Free => return Err(Error::InvalidBlockFree(id)),
			actual if actual != list => {
				return Err(Error::Corruption(format!(
					"freeing page {id} from the {list:?} list but it is a {actual:?} page"
				)))
			}
			_ => {}
		}

		let (prev, next) = self.file.read(id, |b| (PageHeader::prev(b), PageHeader::next(b)))?;
		if prev != 0 {
			self.file.write(prev, |b| PageHeader::set_next(b, next))?;
		} else {
			self.header_mut(|h| FileHeader::set_first(h, list, next))?;
		}
		if next != 0 {
			self.file.write(next, |b| PageHeader::set_prev(b, prev))?;
		} else {
			self.header_mut(|h| FileHeader::set_last(h, list, prev))?;
		}

		let head = self.first(PageType::Free)?;
		self.file.write(id, |b| {
			b.zero();
			PageHeader::set_page_type(b, PageType::Free);
			PageHeader::set_next(b, head);
		})?;
		if head != 0 {
			self.file.write(head, |b| PageHeader::set_prev(b, id))?;
		}
		self.header_mut(|h| FileHeader::set_first(h, PageType::Free, id))?;
		Ok(())
	}

	fn check_root_slot(&self, slot: usize) -> Result<()> {
		if slot >= self.root_count {
			return Err(Error::InvalidArgument(format!(
				"root slot {slot} out of range, the store has {} slots",
				self.root_count
			)));
		}
		Ok(())
	}

	pub(crate) fn root(&self, slot: usize) -> Result<u64> {
		self.check_root_slot(slot)?;
		self.header(|h| FileHeader::root(h, slot))
	}

	pub(crate) fn set_root(&mut self, slot: usize, value: u64) -> Result<()> {
		self.check_root_slot(slot)?;
		self.header_mut(|h| FileHeader::set_root(h, slot, value))
	}

	pub(crate) fn commit(&mut self) -> Result<()> {
		self.file.commit()
	}

	pub(crate) fn rollback(&mut self) {
		self.file.rollback()
	}

	pub(crate) fn close(&mut self) -> Result<()> {
		self.file.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::option::Options;
	use test_log::test;

	fn manager() -> PageManager {
		let file = BlockFile::memory(&Options::new().with_block_size(1024));
		let mut pm = PageManager::new(file);
		pm.create_header().unwrap();
		pm
	}

	fn collect(pm: &PageManager, list: PageType) -> Vec<u64> {
		let mut ids = Vec::new();
		let mut id = pm.first(list).unwrap();
		while id != 0 {
			ids.push(id);
			id = pm.next(id).unwrap();
		}
		ids
	}

	#[test]
	fn allocate_grows_and_links_at_tail() {
		let mut pm = manager();
		let a = pm.allocate(PageType::Used).unwrap();
		let b = pm.allocate(PageType::Translation).unwrap();
		let c = pm.allocate(PageType::Used).unwrap();
		assert_eq!((a, b, c), (1, 2, 3));
		assert_eq!(collect(&pm, PageType::Used), vec![1, 3]);
		assert_eq!(pm.last(PageType::Used).unwrap(), 3);
		assert_eq!(pm.prev(3).unwrap(), 1);
		assert_eq!(pm.page_type(2).unwrap(), PageType::Translation);
		assert_eq!(pm.high_water().unwrap(), 4);
	}

	#[test]
	fn freed_pages_are_reused_and_zeroed() {
		let mut pm = manager();
		for _ in 0..3 {
			pm.allocate(PageType::Used).unwrap();
		}
		pm.file_mut().write(2, |b| b.write_u64(100, 77)).unwrap();
		pm.free(PageType::Used, 2).unwrap();
		assert_eq!(collect(&pm, PageType::Used), vec![1, 3]);
		assert_eq!(pm.next(1).unwrap(), 3);
		assert_eq!(pm.prev(3).unwrap(), 1);
		assert_eq!(collect(&pm, PageType::Free), vec![2]);

		let id = pm.allocate(PageType::FreePhysical).unwrap();
		assert_eq!(id, 2);
		assert_eq!(pm.file().read(2, |b| b.read_u64(100)).unwrap(), 0);
		assert!(collect(&pm, PageType::Free).is_empty());
		assert_eq!(pm.high_water().unwrap(), 4);
	}

	#[test]
	fn freeing_head_and_tail_updates_header() {
		let mut pm = manager();
		for _ in 0..3 {
			pm.allocate(PageType::Translation).unwrap();
		}
		pm.free(PageType::Translation, 1).unwrap();
		pm.free(PageType::Translation, 3).unwrap();
		assert_eq!(pm.first(PageType::Translation).unwrap(), 2);
		assert_eq!(pm.last(PageType::Translation).unwrap(), 2);
		assert_eq!(collect(&pm, PageType::Free), vec![3, 1]);
	}

	#[test]
	fn invalid_frees_are_fatal() {
		let mut pm = manager();
		let id = pm.allocate(PageType::Used).unwrap();
		assert!(matches!(pm.free(PageType::Used, 0), Err(Error::InvalidBlockFree(0))));
		pm.free(PageType::Used, id).unwrap();
		let err = pm.free(PageType::Used, id).unwrap_err();
		assert!(matches!(err, Error::InvalidBlockFree(1)));
		assert!(err.is_fatal());
		// Never allocated: no magic.
		assert!(matches!(pm.free(PageType::Used, 9), Err(Error::Corruption(_))));
	}

	#[test]
	fn roots_are_bounded() {
		let mut pm = manager();
		let slot = pm.root_count() - 1;
		pm.set_root(slot, 5).unwrap();
		assert_eq!(pm.root(slot).unwrap(), 5);
		assert!(matches!(pm.root(pm.root_count()), Err(Error::InvalidArgument(_))));
	}

	#[test]
	fn rollback_restores_lists() {
		let mut pm = manager();
		pm.allocate(PageType::Used).unwrap();
		pm.commit().unwrap();
		pm.allocate(PageType::Used).unwrap();
		pm.free(PageType::Used, 1).unwrap();
		pm.rollback();
		assert_eq!(collect(&pm, PageType::Used), vec![1]);
		assert_eq!(pm.high_water().unwrap(), 2);
		pm.check_header().unwrap();
	}
}
