use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quick_cache::sync::Cache;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::extent::Extents;
use crate::option::Options;
use crate::wal::TransactionLog;

/// Returns the path of the transaction log belonging to the store at `path`.
pub(crate) fn log_path(path: &Path) -> PathBuf {
	let mut name = OsString::from(path.as_os_str());
	name.push(".log");
	PathBuf::from(name)
}

/// Transactional block store.
///
/// A block lives in exactly one of three places besides the extents:
/// - `dirty`: modified by the running transaction,
/// - `logged`: committed to the transaction log but not yet written to the extents,
/// - `clean`: a bounded cache of blocks identical to their on-extent image.
///
/// Reads look in that order before going to the extents. Rollback forgets `dirty`; everything
/// else already reflects the last durable state.
pub(crate) struct BlockFile {
	extents: Extents,
	log: Option<TransactionLog>,
	dirty: BTreeMap<u64, Block>,
	logged: HashMap<u64, Block>,
	clean: Cache<u64, Arc<Block>>,
	logged_txns: usize,
	max_buffered_txns: usize,
	read_only: bool,
}

impl BlockFile {
	pub(crate) fn open(path: &Path, opts: &Options) -> Result<Self> {
		let extents =
			Extents::open(path, opts.block_size, opts.max_extent_size, opts.read_only)?;
		let log = TransactionLog::open(&log_path(path), opts.read_only)?;
		Ok(Self::new(extents, log, opts))
	}

	pub(crate) fn memory(opts: &Options) -> Self {
		let extents = Extents::memory(opts.block_size, opts.max_extent_size);
		Self::new(extents, TransactionLog::memory(), opts)
	}

	fn new(extents: Extents, log: TransactionLog, opts: &Options) -> Self {
		Self {
			extents,
			log: Some(log),
			dirty: BTreeMap::new(),
			logged: HashMap::new(),
			clean: Cache::new(opts.block_cache_capacity),
			logged_txns: 0,
			max_buffered_txns: opts.max_buffered_txns,
			read_only: opts.read_only,
		}
	}

	pub(crate) fn block_size(&self) -> usize {
		self.extents.block_size()
	}

	pub(crate) fn is_read_only(&self) -> bool {
		self.read_only
	}

	/// Returns true if the backing store has never been written.
	pub(crate) fn is_new(&self) -> Result<bool> {
		Ok(self.extents.is_empty()? && self.log.as_ref().map_or(true, |log| log.is_empty()))
	}

	/// Verifies that the extents are a whole number of blocks of the configured size.
	pub(crate) fn check_layout(&self) -> Result<()> {
		let trailing = self.extents.trailing_bytes()?;
		if trailing != 0 {
			return Err(Error::InvalidArgument(format!(
				"store size is not a multiple of block size {} ({trailing} trailing bytes)",
				self.block_size()
			)));
		}
		Ok(())
	}

	/// Reads a block straight from the extents, bypassing the log and every cache.
	pub(crate) fn read_raw(&self, id: u64) -> Result<Block> {
		let mut buf = vec![0u8; self.block_size()];
		self.extents.read_block(id, &mut buf)?;
		Ok(Block::from_bytes(id, buf))
	}

	/// Writes a block straight to the extents and syncs them. Only used while creating a store.
	pub(crate) fn write_raw(&mut self, block: &Block) -> Result<()> {
		self.extents.write_block(block.id(), block.as_bytes())?;
		self.extents.sync()
	}

	/// Replays the transaction log.
	///
	/// A writable store applies the replayed blocks to the extents and empties the log; a
	/// read-only store keeps them in memory. Returns the number of replayed transactions.
	pub(crate) fn recover(&mut self) -> Result<usize> {
		let Some(log) = self.log.as_mut() else {
			return Ok(0);
		};
		if log.is_empty() {
			return Ok(0);
		}
		log::info!("Recovering store from transaction log");
		let txns = log.replay()?;
		let count = txns.len();
		for block in txns.into_iter().flatten() {
			if block.len() != self.extents.block_size() {
				return Err(Error::Corruption(format!(
					"logged block {} has size {}, expected {}",
					block.id(),
					block.len(),
					self.extents.block_size()
				)));
			}
			self.logged.insert(block.id(), block);
		}
		if self.read_only {
			self.logged_txns = count;
		} else {
			self.sync_log()?;
		}
		log::info!("Recovered {count} transactions from the transaction log");
		Ok(count)
	}

	/// Stops logging: later commits write blocks straight to the extents.
	pub(crate) fn disable_transactions(&mut self) -> Result<()> {
		if !self.read_only {
			self.sync_log()?;
		}
		self.log = None;
		Ok(())
	}

	fn load(&self, id: u64) -> Result<Arc<Block>> {
		if let Some(block) = self.clean.get(&id) {
			return Ok(block);
		}
		let block = Arc::new(self.read_raw(id)?);
		self.clean.insert(id, block.clone());
		Ok(block)
	}

	/// Runs `f` on the current image of block `id`.
	pub(crate) fn read<R>(&self, id: u64, f: impl FnOnce(&Block) -> R) -> Result<R> {
		if let Some(block) = self.dirty.get(&id) {
			return Ok(f(block));
		}
		if let Some(block) = self.logged.get(&id) {
			return Ok(f(block));
		}
		let block = self.load(id)?;
		Ok(f(block.as_ref()))
	}

	/// Runs `f` on a writable image of block `id`, adding the block to the running transaction.
	pub(crate) fn write<R>(&mut self, id: u64, f: impl FnOnce(&mut Block) -> R) -> Result<R> {
		if self.read_only {
			return Err(Error::ReadOnly);
		}
		if !self.dirty.contains_key(&id) {
			let block = match self.logged.get(&id) {
				Some(block) => block.clone(),
				None => {
					let clean = self.load(id)?;
					Block::clone(clean.as_ref())
				}
			};
			self.dirty.insert(id, block);
		}
		match self.dirty.get_mut(&id) {
			Some(block) => Ok(f(block)),
			None => Err(Error::Corruption(format!("block {id} vanished from the transaction"))),
		}
	}

	/// Returns true if the running transaction has modified any block.
	pub(crate) fn has_changes(&self) -> bool {
		!self.dirty.is_empty()
	}

	/// Makes the running transaction durable.
	pub(crate) fn commit(&mut self) -> Result<()> {
		if self.dirty.is_empty() {
			return Ok(());
		}
		if self.read_only {
			return Err(Error::ReadOnly);
		}
		log::debug!("Committing {} dirty blocks", self.dirty.len());

		match self.log.as_mut() {
			Some(log) => {
				log.append(self.dirty.values())?;
				for (id, block) in std::mem::take(&mut self.dirty) {
					self.clean.remove(&id);
					self.logged.insert(id, block);
				}
				self.logged_txns += 1;
				if self.logged_txns >= self.max_buffered_txns {
					self.sync_log()?;
				}
			}
			None => {
				for block in self.dirty.values() {
					self.extents.write_block(block.id(), block.as_bytes())?;
				}
				for (id, block) in std::mem::take(&mut self.dirty) {
					self.clean.insert(id, Arc::new(block));
				}
			}
		}
		Ok(())
	}

	/// Forgets every change made by the running transaction.
	pub(crate) fn rollback(&mut self) {
		self.dirty.clear();
	}

	/// Writes every logged block to the extents and empties the log.
	pub(crate) fn sync_log(&mut self) -> Result<()> {
		if self.logged.is_empty() {
			return Ok(());
		}
		log::debug!(
			"Synchronising {} transactions ({} blocks) into the store",
			self.logged_txns,
			self.logged.len()
		);
		let mut ids: Vec<u64> = self.logged.keys().copied().collect();
		ids.sort_unstable();
		for id in &ids {
			if let Some(block) = self.logged.get(id) {
				self.extents.write_block(*id, block.as_bytes())?;
			}
		}
		self.extents.sync()?;
		if let Some(log) = self.log.as_mut() {
			log.truncate()?;
		}
		for (id, block) in self.logged.drain() {
			self.clean.insert(id, Arc::new(block));
		}
		self.logged_txns = 0;
		Ok(())
	}

	/// Discards the running transaction, folds the log into the extents and releases the lock.
	pub(crate) fn close(&mut self) -> Result<()> {
		self.rollback();
		if !self.read_only {
			self.sync_log()?;
		}
		self.extents.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;
	use test_log::test;

	fn opts() -> Options {
		Options::new().with_block_size(1024)
	}

	#[test]
	fn dirty_blocks_are_visible_until_rollback() {
		let mut file = BlockFile::memory(&opts());
		file.write(3, |b| b.write_u64(0, 42)).unwrap();
		assert_eq!(file.read(3, |b| b.read_u64(0)).unwrap(), 42);
		assert!(file.has_changes());

		file.rollback();
		assert_eq!(file.read(3, |b| b.read_u64(0)).unwrap(), 0);
		assert!(!file.has_changes());
	}

	#[test]
	fn commit_keeps_blocks_in_log_until_threshold() {
		let mut file = BlockFile::memory(&opts().with_max_buffered_txns(2));
		file.write(1, |b| b.write_u16(0, 7)).unwrap();
		file.commit().unwrap();
		assert_eq!(file.logged.len(), 1);
		assert_eq!(file.read_raw(1).unwrap().read_u16(0), 0);

		file.write(2, |b| b.write_u16(0, 8)).unwrap();
		file.commit().unwrap();
		assert!(file.logged.is_empty());
		assert_eq!(file.read_raw(1).unwrap().read_u16(0), 7);
		assert_eq!(file.read_raw(2).unwrap().read_u16(0), 8);
		assert!(file.log.as_ref().unwrap().is_empty());
	}

	#[test]
	fn writing_a_stored_block_starts_from_its_image() {
		let mut file = BlockFile::memory(&opts().with_max_buffered_txns(1));
		file.write(6, |b| b.write_u32(0, 0xabcd)).unwrap();
		file.commit().unwrap();
		assert!(file.logged.is_empty());
		// Warm the clean cache, then modify another field of the same block.
		assert_eq!(file.read(6, |b| b.read_u32(0)).unwrap(), 0xabcd);
		file.write(6, |b| b.write_u32(8, 7)).unwrap();
		assert_eq!(file.read(6, |b| (b.read_u32(0), b.read_u32(8))).unwrap(), (0xabcd, 7));

		file.rollback();
		assert_eq!(file.read(6, |b| (b.read_u32(0), b.read_u32(8))).unwrap(), (0xabcd, 0));
	}

	#[test]
	fn rollback_after_commit_keeps_committed_image() {
		let mut file = BlockFile::memory(&opts());
		file.write(1, |b| b.write_u32(0, 1)).unwrap();
		file.commit().unwrap();
		file.write(1, |b| b.write_u32(0, 2)).unwrap();
		file.rollback();
		assert_eq!(file.read(1, |b| b.read_u32(0)).unwrap(), 1);
	}

	#[test]
	fn recover_replays_committed_transactions() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("store.db");
		{
			let mut file = BlockFile::open(&path, &opts()).unwrap();
			file.write(0, |b| b.write_u16(0, 0x1350)).unwrap();
			file.write(5, |b| b.write_u64(8, 99)).unwrap();
			file.commit().unwrap();
			file.write(5, |b| b.write_u64(8, 100)).unwrap();
			// Dropped without close: the second change was never committed.
		}

		let mut file = BlockFile::open(&path, &opts()).unwrap();
		assert!(!file.is_new().unwrap());
		assert_eq!(file.read_raw(5).unwrap().read_u64(8), 0);
		assert_eq!(file.recover().unwrap(), 1);
		assert_eq!(file.read_raw(5).unwrap().read_u64(8), 99);
		assert_eq!(file.read(0, |b| b.read_u16(0)).unwrap(), 0x1350);
		assert!(std::fs::metadata(log_path(&path)).unwrap().len() == 0);
	}

	#[test]
	fn read_only_recovery_stays_in_memory() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("store.db");
		{
			let mut file = BlockFile::open(&path, &opts()).unwrap();
			file.write(2, |b| b.write_u16(4, 11)).unwrap();
			file.commit().unwrap();
		}
		let log_len = std::fs::metadata(log_path(&path)).unwrap().len();

		let mut file = BlockFile::open(&path, &opts().with_read_only(true)).unwrap();
		assert_eq!(file.recover().unwrap(), 1);
		assert_eq!(file.read(2, |b| b.read_u16(4)).unwrap(), 11);
		assert_eq!(file.read_raw(2).unwrap().read_u16(4), 0);
		assert!(matches!(file.write(2, |_| ()), Err(Error::ReadOnly)));
		assert_eq!(std::fs::metadata(log_path(&path)).unwrap().len(), log_len);
	}

	#[test]
	fn disabled_transactions_write_through() {
		let mut file = BlockFile::memory(&opts());
		file.disable_transactions().unwrap();
		file.write(4, |b| b.write_u32(0, 5)).unwrap();
		file.commit().unwrap();
		assert!(file.logged.is_empty());
		assert_eq!(file.read_raw(4).unwrap().read_u32(0), 5);
	}

	#[test]
	fn close_folds_log_into_extents() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("store.db");
		let mut file = BlockFile::open(&path, &opts()).unwrap();
		file.write(1, |b| b.write_u16(0, 3)).unwrap();
		file.commit().unwrap();
		file.write(2, |b| b.write_u16(0, 4)).unwrap();
		file.close().unwrap();

		let file = BlockFile::open(&path, &opts()).unwrap();
		assert_eq!(file.read_raw(1).unwrap().read_u16(0), 3);
		assert_eq!(file.read_raw(2).unwrap().read_u16(0), 0);
		assert!(file.log.as_ref().unwrap().is_empty());
	}
}
