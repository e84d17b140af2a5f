use std::fs::OpenOptions;
use std::path::Path;

use crc32fast::Hasher;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::vfs::{self, File, InMemoryFile};

/// Magic number at the head of a non-empty transaction log.
pub(crate) const LOG_MAGIC: u16 = 0x1360;

const MAGIC_SIZE: u64 = 2;

// Frame layout: [count: u32] then count × ([block id: u64][length: u32][bytes]) then [crc32: u32]
// over everything that precedes it in the frame.
const FRAME_COUNT_SIZE: usize = 4;
const BLOCK_ENTRY_HEADER_SIZE: usize = 12;
const FRAME_CRC_SIZE: usize = 4;

/// Redo log of committed transactions.
///
/// Each commit appends one frame holding the full image of every block the transaction dirtied.
/// A frame is only written once all of its blocks are known, so replay never sees a partial
/// transaction: a torn or checksum-failing tail is dropped.
pub(crate) struct TransactionLog {
	file: Box<dyn File>,
	offset: u64,
	read_only: bool,
}

impl TransactionLog {
	/// Opens the log at `path`. A read-only store without a log gets an empty in-memory one.
	pub(crate) fn open(path: &Path, read_only: bool) -> Result<Self> {
		let file: Box<dyn File> = if read_only && !path.exists() {
			Box::new(InMemoryFile::new())
		} else {
			Box::new(
				OpenOptions::new()
					.read(true)
					.write(!read_only)
					.create(!read_only)
					.truncate(false)
					.open(path)?,
			)
		};
		let offset = file.size()?;
		Ok(Self {
			file,
			offset,
			read_only,
		})
	}

	pub(crate) fn memory() -> Self {
		Self {
			file: Box::new(InMemoryFile::new()),
			offset: 0,
			read_only: false,
		}
	}

	/// Returns true if the log holds no transactions, i.e. the last shutdown was clean.
	pub(crate) fn is_empty(&self) -> bool {
		self.offset == 0
	}

	/// Appends one transaction and makes it durable.
	pub(crate) fn append<'a, I>(&mut self, blocks: I) -> Result<()>
	where
		I: IntoIterator<Item = &'a Block>,
	{
		if self.read_only {
			return Err(Error::ReadOnly);
		}
		let mut buf = Vec::new();
		if self.offset == 0 {
			buf.extend_from_slice(&LOG_MAGIC.to_le_bytes());
		}
		let frame_start = buf.len();
		buf.extend_from_slice(&[0u8; FRAME_COUNT_SIZE]);

		let mut count: u32 = 0;
		for block in blocks {
			buf.extend_from_slice(&block.id().to_le_bytes());
			buf.extend_from_slice(&(block.len() as u32).to_le_bytes());
			buf.extend_from_slice(block.as_bytes());
			count += 1;
		}
		buf[frame_start..frame_start + FRAME_COUNT_SIZE].copy_from_slice(&count.to_le_bytes());

		let crc = calculate_crc32(&buf[frame_start..]);
		buf.extend_from_slice(&crc.to_le_bytes());

		self.file.write_at(self.offset, &buf)?;
		self.file.sync_data()?;
		self.offset += buf.len() as u64;
		Ok(())
	}

	/// Reads every complete transaction in the log, oldest first.
	///
	/// Replay stops at the first frame that is short or fails its checksum; the append position is
	/// moved back to the end of the last valid frame.
	pub(crate) fn replay(&mut self) -> Result<Vec<Vec<Block>>> {
		let size = self.file.size()?;
		if size == 0 {
			return Ok(Vec::new());
		}
		if size < MAGIC_SIZE {
			log::warn!("Transaction log is shorter than its header ({size} bytes), ignoring it");
			self.offset = 0;
			return Ok(Vec::new());
		}

		let mut data = vec![0u8; size as usize];
		vfs::read_full_at(self.file.as_ref(), 0, &mut data)?;
		let magic = u16::from_le_bytes([data[0], data[1]]);
		if magic != LOG_MAGIC {
			return Err(Error::Corruption(format!(
				"transaction log has bad magic {magic:#06x}"
			)));
		}

		let mut transactions = Vec::new();
		let mut pos = MAGIC_SIZE as usize;
		while pos < data.len() {
			match parse_frame(&data[pos..]) {
				Some((blocks, consumed)) => {
					transactions.push(blocks);
					pos += consumed;
				}
				None => {
					log::warn!(
						"Ignoring {} bytes of torn or corrupted transaction log after transaction {}",
						data.len() - pos,
						transactions.len()
					);
					break;
				}
			}
		}
		self.offset = pos as u64;
		Ok(transactions)
	}

	/// Discards every transaction in the log.
	pub(crate) fn truncate(&mut self) -> Result<()> {
		if self.read_only {
			return Ok(());
		}
		self.file.set_len(0)?;
		self.file.sync()?;
		self.offset = 0;
		Ok(())
	}
}

fn calculate_crc32(data: &[u8]) -> u32 {
	let mut hasher = Hasher::new();
	hasher.update(data);
	hasher.finalize()
}

/// Parses one frame from the head of `data`. Returns the blocks and the number of bytes consumed,
/// or None if the frame is incomplete or its checksum does not match.
fn parse_frame(data: &[u8]) -> Option<(Vec<Block>, usize)> {
	let count_bytes = data.get(..FRAME_COUNT_SIZE)?;
	let count = u32::from_le_bytes(count_bytes.try_into().ok()?);

	let mut pos = FRAME_COUNT_SIZE;
	let mut blocks = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let header = data.get(pos..pos + BLOCK_ENTRY_HEADER_SIZE)?;
		let id = u64::from_le_bytes(header[..8].try_into().ok()?);
		let len = u32::from_le_bytes(header[8..].try_into().ok()?) as usize;
		pos += BLOCK_ENTRY_HEADER_SIZE;
		let bytes = data.get(pos..pos + len)?;
		blocks.push(Block::from_bytes(id, bytes.to_vec()));
		pos += len;
	}

	let stored = u32::from_le_bytes(data.get(pos..pos + FRAME_CRC_SIZE)?.try_into().ok()?);
	if stored != calculate_crc32(&data[..pos]) {
		return None;
	}
	Some((blocks, pos + FRAME_CRC_SIZE))
}
