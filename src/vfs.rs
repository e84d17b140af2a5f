use std::fs::File as SysFile;
use std::io::ErrorKind;

use fs2::FileExt as LockFileExt;

use crate::error::{Error, Result};

/// Positional file access used by the extents and the transaction log.
pub trait File: Send + Sync {
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
	fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize>;
	fn set_len(&mut self, len: u64) -> Result<()>;
	fn lock(&self) -> Result<()>;
	fn unlock(&self) -> Result<()>;
	fn sync(&self) -> Result<()>;
	fn sync_data(&self) -> Result<()>;
	fn size(&self) -> Result<u64>;
}

/// Reads `buf.len()` bytes at `offset`. Bytes past the end of the file read as zero.
pub(crate) fn read_full_at(file: &dyn File, offset: u64, buf: &mut [u8]) -> Result<()> {
	let mut done = 0;
	while done < buf.len() {
		let n = file.read_at(offset + done as u64, &mut buf[done..])?;
		if n == 0 {
			buf[done..].fill(0);
			break;
		}
		done += n;
	}
	Ok(())
}

pub type InMemoryFile = Vec<u8>;

impl File for InMemoryFile {
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
		let start = offset as usize;
		if start >= self.len() {
			return Ok(0);
		}
		let end = std::cmp::min(start + buf.len(), self.len());
		let bytes_read = end - start;
		buf[..bytes_read].copy_from_slice(&self[start..end]);
		Ok(bytes_read)
	}

	fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
		let start = offset as usize;
		let end = start + buf.len();

		// Ensure the vector is large enough
		if end > self.len() {
			self.resize(end, 0);
		}

		self[start..end].copy_from_slice(buf);
		Ok(buf.len())
	}

	fn set_len(&mut self, len: u64) -> Result<()> {
		self.resize(len as usize, 0);
		Ok(())
	}

	fn lock(&self) -> Result<()> {
		Ok(()) // In-memory file doesn't support locking
	}

	fn unlock(&self) -> Result<()> {
		Ok(())
	}

	fn sync(&self) -> Result<()> {
		Ok(()) // In-memory file doesn't need syncing
	}

	fn sync_data(&self) -> Result<()> {
		Ok(())
	}

	fn size(&self) -> Result<u64> {
		Ok(self.len() as u64)
	}
}

impl File for SysFile {
	fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
		#[cfg(unix)]
		{
			std::os::unix::prelude::FileExt::read_at(self, buf, offset)
				.map_err(|e| Error::Io(e.into()))
		}

		#[cfg(windows)]
		{
			std::os::windows::prelude::FileExt::seek_read(self, buf, offset)
				.map_err(|e| Error::Io(e.into()))
		}
	}

	fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
		#[cfg(unix)]
		{
			std::os::unix::prelude::FileExt::write_all_at(self, buf, offset)
				.map_err(|e| Error::Io(e.into()))?;
			Ok(buf.len())
		}

		#[cfg(windows)]
		{
			let mut written = 0;
			while written < buf.len() {
				written += std::os::windows::prelude::FileExt::seek_write(
					self,
					&buf[written..],
					offset + written as u64,
				)
				.map_err(|e| Error::Io(e.into()))?;
			}
			Ok(written)
		}
	}

	fn set_len(&mut self, len: u64) -> Result<()> {
		SysFile::set_len(self, len).map_err(|e| Error::Io(e.into()))
	}

	fn lock(&self) -> Result<()> {
		LockFileExt::try_lock_exclusive(self).map_err(|e| match e.kind() {
			ErrorKind::WouldBlock => {
				Error::Locked("store is already opened by another handle".into())
			}
			_ => Error::Io(e.into()),
		})
	}

	fn unlock(&self) -> Result<()> {
		LockFileExt::unlock(self).map_err(|e| Error::Io(e.into()))
	}

	fn sync(&self) -> Result<()> {
		SysFile::sync_all(self).map_err(|e| Error::Io(e.into()))
	}

	fn sync_data(&self) -> Result<()> {
		SysFile::sync_data(self).map_err(|e| Error::Io(e.into()))
	}

	fn size(&self) -> Result<u64> {
		match SysFile::metadata(self) {
			Ok(v) => Ok(v.len()),
			Err(e) => Err(Error::Io(e.into())),
		}
	}
}
