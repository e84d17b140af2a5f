use crate::block::Block;
use crate::error::{Error, Result};
use crate::page::{PageHeader, PageManager, PageType, PAGE_HEADER_SIZE};

// Free pages: page header, [count: u16], then `count` fixed-size entries packed from the front.
const COUNT_OFFSET: usize = PAGE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = PAGE_HEADER_SIZE + 2;

/// A fixed-size entry kept in a free page.
pub(crate) trait FreeEntry: Copy {
	const SIZE: usize;

	fn read(block: &Block, pos: usize) -> Self;
	fn write(&self, block: &mut Block, pos: usize);
}

pub(crate) fn capacity<E: FreeEntry>(block_size: usize) -> usize {
	(block_size - ENTRIES_OFFSET) / E::SIZE
}

fn entry_pos<E: FreeEntry>(index: usize) -> usize {
	ENTRIES_OFFSET + index * E::SIZE
}

fn count(block: &Block) -> usize {
	block.read_u16(COUNT_OFFSET) as usize
}

fn set_count(block: &mut Block, count: usize) {
	block.write_u16(COUNT_OFFSET, count as u16);
}

/// Reads every entry of free page `page`.
pub(crate) fn read_entries<E: FreeEntry>(
	pm: &PageManager,
	list: PageType,
	page: u64,
) -> Result<Vec<E>> {
	let cap = capacity::<E>(pm.block_size());
	pm.file().read(page, |b| -> Result<Vec<E>> {
		PageHeader::expect(b, list)?;
		let n = count(b);
		if n > cap {
			return Err(Error::Corruption(format!(
				"{list:?} page {page} claims {n} entries, capacity is {cap}"
			)));
		}
		Ok((0..n).map(|i| E::read(b, entry_pos::<E>(i))).collect())
	})?
}

/// Appends `entries` to the pages of `list`, allocating pages as they fill up.
pub(crate) fn append_entries<E: FreeEntry>(
	pm: &mut PageManager,
	list: PageType,
	entries: &[E],
) -> Result<()> {
	let cap = capacity::<E>(pm.block_size());
	let mut page = pm.last(list)?;
	for entry in entries {
		let mut n = if page == 0 {
			cap
		} else {
			pm.file().read(page, |b| PageHeader::expect(b, list).map(|_| count(b)))??
		};
		if n >= cap {
			page = pm.allocate(list)?;
			n = 0;
		}
		pm.file_mut().write(page, |b| {
			entry.write(b, entry_pos::<E>(n));
			set_count(b, n + 1);
		})?;
	}
	Ok(())
}

/// Removes entry `index` from free page `page` by moving the last entry into its place. A page
/// left empty goes back to the page manager.
pub(crate) fn remove_entry<E: FreeEntry>(
	pm: &mut PageManager,
	list: PageType,
	page: u64,
	index: usize,
) -> Result<E> {
	let (entry, remaining) = pm.file_mut().write(page, |b| -> Result<(E, usize)> {
		let n = count(b);
		if index >= n {
			return Err(Error::Corruption(format!(
				"entry {index} out of range in {list:?} page {page} with {n} entries"
			)));
		}
		let entry = E::read(b, entry_pos::<E>(index));
		if index != n - 1 {
			let last = E::read(b, entry_pos::<E>(n - 1));
			last.write(b, entry_pos::<E>(index));
		}
		set_count(b, n - 1);
		Ok((entry, n - 1))
	})??;
	if remaining == 0 {
		pm.free(list, page)?;
	}
	Ok(entry)
}
