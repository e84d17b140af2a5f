use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::vfs::{self, File, InMemoryFile};

/// Block-addressed storage spread over one or more backing extents.
///
/// Extent `0` lives at the store path itself, extent `n` at `<path>.n`. Every extent holds
/// `blocks_per_extent` blocks; a block id maps to an extent by plain division. Blocks that were
/// never written read back as zeroes.
pub(crate) struct Extents {
	base: Option<PathBuf>,
	files: Vec<Box<dyn File>>,
	block_size: usize,
	blocks_per_extent: u64,
	read_only: bool,
}

impl Extents {
	pub(crate) fn open(
		path: &Path,
		block_size: usize,
		max_extent_size: u64,
		read_only: bool,
	) -> Result<Self> {
		let mut files: Vec<Box<dyn File>> = Vec::new();
		let first = open_extent(path, read_only, true)?;
		// Through the trait: std's inherent `File::lock` blocks instead of failing.
		vfs::File::lock(&first)?;
		files.push(Box::new(first));

		// Pick up every extent that already exists.
		loop {
			let next = extent_path(path, files.len());
			if !next.exists() {
				break;
			}
			files.push(Box::new(open_extent(&next, read_only, false)?));
		}

		Ok(Self {
			base: Some(path.to_path_buf()),
			files,
			block_size,
			blocks_per_extent: max_extent_size / block_size as u64,
			read_only,
		})
	}

	pub(crate) fn memory(block_size: usize, max_extent_size: u64) -> Self {
		Self {
			base: None,
			files: vec![Box::new(InMemoryFile::new())],
			block_size,
			blocks_per_extent: max_extent_size / block_size as u64,
			read_only: false,
		}
	}

	pub(crate) fn block_size(&self) -> usize {
		self.block_size
	}

	/// Returns true if nothing has ever been written to the store.
	pub(crate) fn is_empty(&self) -> Result<bool> {
		Ok(self.files[0].size()? == 0)
	}

	/// Number of bytes in the first extent that do not form a whole block.
	pub(crate) fn trailing_bytes(&self) -> Result<u64> {
		Ok(self.files[0].size()? % self.block_size as u64)
	}

	fn locate(&self, id: u64) -> (usize, u64) {
		let extent = (id / self.blocks_per_extent) as usize;
		let offset = (id % self.blocks_per_extent) * self.block_size as u64;
		(extent, offset)
	}

	pub(crate) fn read_block(&self, id: u64, buf: &mut [u8]) -> Result<()> {
		let (extent, offset) = self.locate(id);
		match self.files.get(extent) {
			Some(file) => vfs::read_full_at(file.as_ref(), offset, buf),
			None => {
				buf.fill(0);
				Ok(())
			}
		}
	}

	pub(crate) fn write_block(&mut self, id: u64, buf: &[u8]) -> Result<()> {
		if self.read_only {
			return Err(Error::ReadOnly);
		}
		let (extent, offset) = self.locate(id);
		while self.files.len() <= extent {
			let file: Box<dyn File> = match &self.base {
				Some(base) => {
					let path = extent_path(base, self.files.len());
					log::debug!("Creating extent {}", path.display());
					Box::new(open_extent(&path, false, true)?)
				}
				None => Box::new(InMemoryFile::new()),
			};
			self.files.push(file);
		}
		self.files[extent].write_at(offset, buf)?;
		Ok(())
	}

	pub(crate) fn sync(&self) -> Result<()> {
		if self.read_only {
			return Ok(());
		}
		for file in &self.files {
			file.sync_data()?;
		}
		Ok(())
	}

	pub(crate) fn close(&mut self) -> Result<()> {
		self.sync()?;
		self.files[0].unlock()
	}
}

fn extent_path(base: &Path, index: usize) -> PathBuf {
	if index == 0 {
		return base.to_path_buf();
	}
	let mut name = OsString::from(base.as_os_str());
	name.push(format!(".{index}"));
	PathBuf::from(name)
}

fn open_extent(path: &Path, read_only: bool, create: bool) -> Result<std::fs::File> {
	let file = OpenOptions::new()
		.read(true)
		.write(!read_only)
		.create(create && !read_only)
		.truncate(false)
		.open(path)?;
	Ok(file)
}
