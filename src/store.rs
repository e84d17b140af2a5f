use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::alloc::{FreePhysicalManager, LogicalRowManager, PhysicalRowManager};
use crate::codec::{self, read_var, write_var, Codec};
use crate::error::{Error, Result};
use crate::file::BlockFile;
use crate::option::Options;
use crate::page::{FileHeader, PageManager, FIRST_USER_ROOT, NAME_DIRECTORY_ROOT};

/// The contract between the storage engine and everything built on top of it.
///
/// Records are opaque byte strings addressed by a recid that never changes for the life of the
/// record. Every change belongs to the running transaction until [`RecordManager::commit`] makes
/// it durable or [`RecordManager::rollback`] forgets it.
pub trait RecordManager: Send + Sync {
	/// Stores a new record and returns its recid.
	fn insert(&self, data: &[u8]) -> Result<u64>;

	/// Replaces the content of an existing record.
	fn update(&self, recid: u64, data: &[u8]) -> Result<()>;

	/// Returns the content of a record, or None if `recid` does not name one.
	fn fetch(&self, recid: u64) -> Result<Option<Vec<u8>>>;

	/// Deletes a record. Its recid may be handed out again after the next commit.
	fn delete(&self, recid: u64) -> Result<()>;

	fn commit(&self) -> Result<()>;

	fn rollback(&self) -> Result<()>;

	/// Number of rollbacks since the store was opened. Anything read before a rollback may
	/// describe discarded state once this value changes.
	fn rollback_count(&self) -> u64;

	/// Number of user root slots.
	fn root_count(&self) -> usize;

	/// Returns the value of user root slot `slot` (0 if never set).
	fn root(&self, slot: usize) -> Result<u64>;

	fn set_root(&self, slot: usize, value: u64) -> Result<()>;

	/// Looks up the recid registered under `name`.
	fn named_object(&self, name: &str) -> Result<Option<u64>>;

	/// Registers `recid` under `name`. A recid of 0 removes the name.
	fn set_named_object(&self, name: &str, recid: u64) -> Result<()>;
}

struct Inner {
	pm: PageManager,
	physical: PhysicalRowManager,
	logical: LogicalRowManager,
	read_only: bool,
	poisoned: bool,
}

impl Inner {
	fn insert(&mut self, data: &[u8]) -> Result<u64> {
		let loc = self.physical.insert(&mut self.pm, data)?;
		self.logical.insert(&mut self.pm, loc)
	}

	fn fetch(&self, recid: u64) -> Result<Option<Vec<u8>>> {
		match self.logical.fetch(&self.pm, recid)? {
			Some(loc) => self.physical.fetch(&self.pm, loc).map(Some),
			None => Ok(None),
		}
	}

	fn update(&mut self, recid: u64, data: &[u8]) -> Result<()> {
		let loc = self.logical.fetch(&self.pm, recid)?.ok_or(Error::InvalidRecid(recid))?;
		let moved = self.physical.update(&mut self.pm, loc, data)?;
		if moved != loc {
			self.logical.update(&mut self.pm, recid, moved)?;
		}
		Ok(())
	}

	fn delete(&mut self, recid: u64) -> Result<()> {
		let loc = self.logical.fetch(&self.pm, recid)?.ok_or(Error::InvalidRecid(recid))?;
		self.physical.free(&mut self.pm, loc)?;
		self.logical.delete(&mut self.pm, recid)
	}

	fn commit(&mut self) -> Result<()> {
		self.physical.commit(&mut self.pm)?;
		self.logical.commit(&mut self.pm)?;
		self.pm.commit()
	}

	fn rollback(&mut self) {
		self.physical.rollback();
		self.logical.rollback();
		self.pm.rollback();
	}

	fn user_root_count(&self) -> usize {
		self.pm.root_count() - FIRST_USER_ROOT
	}

	fn user_slot(&self, slot: usize) -> Result<usize> {
		if slot >= self.user_root_count() {
			return Err(Error::InvalidArgument(format!(
				"root slot {slot} out of range, the store has {} user slots",
				self.user_root_count()
			)));
		}
		Ok(FIRST_USER_ROOT + slot)
	}

	fn name_directory(&self) -> Result<(u64, BTreeMap<String, u64>)> {
		let recid = self.pm.root(NAME_DIRECTORY_ROOT)?;
		if recid == 0 {
			return Ok((0, BTreeMap::new()));
		}
		let data = self.fetch(recid)?.ok_or_else(|| {
			Error::Corruption(format!("name directory record {recid} is missing"))
		})?;
		Ok((recid, decode_directory(&data)?))
	}
}

// [count: varint] then count × ([name: string][recid: varint])
fn encode_directory(names: &BTreeMap<String, u64>) -> Vec<u8> {
	let mut out = Vec::new();
	write_var(&mut out, names.len() as u64);
	for (name, recid) in names {
		name.encode(&mut out);
		write_var(&mut out, *recid);
	}
	out
}

fn decode_directory(data: &[u8]) -> Result<BTreeMap<String, u64>> {
	let mut input = data;
	let count = read_var::<u64>(&mut input)?;
	let mut names = BTreeMap::new();
	for _ in 0..count {
		let name = String::decode(&mut input)?;
		names.insert(name, read_var::<u64>(&mut input)?);
	}
	Ok(names)
}

/// An embedded transactional record store.
///
/// All operations are serialised by one mutex. A fatal error (see [`Error::is_fatal`]) poisons
/// the handle: every later call fails with [`Error::Poisoned`] and the store has to be reopened,
/// which replays the transaction log.
pub struct Store {
	inner: Mutex<Option<Inner>>,
	block_size: usize,
	rollbacks: AtomicU64,
}

impl Store {
	/// Opens the store at `path`, creating it if allowed by `opts`.
	pub fn open<P: AsRef<Path>>(path: P, opts: Options) -> Result<Self> {
		opts.validate()?;
		let path = path.as_ref();
		if !path.exists() && (opts.read_only || !opts.create_if_not_exists) {
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				format!("store {} does not exist", path.display()),
			)
			.into());
		}
		log::info!("Opening store at {}", path.display());
		let file = BlockFile::open(path, &opts)?;
		Self::init(file, opts)
	}

	/// Creates a store that lives in memory only.
	pub fn memory(opts: Options) -> Result<Self> {
		opts.validate()?;
		if opts.read_only {
			return Err(Error::InvalidArgument("an in-memory store cannot be read-only".into()));
		}
		Self::init(BlockFile::memory(&opts), opts)
	}

	fn init(mut file: BlockFile, opts: Options) -> Result<Self> {
		let mut pm = if file.is_new()? {
			if opts.read_only {
				return Err(Error::InvalidArgument("cannot open an empty store read-only".into()));
			}
			let mut pm = PageManager::new(file);
			pm.create_header()?;
			log::info!("Created new store with block size {}", opts.block_size);
			pm
		} else {
			file.check_layout()?;
			// The version must be acceptable before the log touches anything.
			FileHeader::check(&file.read_raw(0)?)?;
			file.recover()?;
			let pm = PageManager::new(file);
			pm.check_header()?;
			pm
		};

		if opts.disable_transactions {
			pm.file_mut().disable_transactions()?;
		}
		let inner = Inner {
			physical: PhysicalRowManager::new(FreePhysicalManager::new(opts.defrag_scan_threshold)),
			logical: LogicalRowManager::new(opts.block_size),
			read_only: pm.file().is_read_only(),
			poisoned: false,
			pm,
		};
		Ok(Self {
			inner: Mutex::new(Some(inner)),
			block_size: opts.block_size,
			rollbacks: AtomicU64::new(0),
		})
	}

	fn with_inner<R>(&self, mutates: bool, f: impl FnOnce(&mut Inner) -> Result<R>) -> Result<R> {
		let mut guard = self.inner.lock();
		let inner = guard.as_mut().ok_or(Error::StoreClosed)?;
		if inner.poisoned {
			return Err(Error::Poisoned);
		}
		if mutates && inner.read_only {
			return Err(Error::ReadOnly);
		}
		let result = f(inner);
		if let Err(err) = &result {
			if err.is_fatal() {
				log::error!("Fatal store error, the handle must be reopened: {err}");
				inner.poisoned = true;
			}
		}
		result
	}

	pub fn block_size(&self) -> usize {
		self.block_size
	}

	pub fn is_read_only(&self) -> Result<bool> {
		self.with_inner(false, |inner| Ok(inner.read_only))
	}

	/// Stores `value` in a new record.
	pub fn insert_value<T: Codec>(&self, value: &T) -> Result<u64> {
		self.insert(&codec::to_bytes(value))
	}

	pub fn update_value<T: Codec>(&self, recid: u64, value: &T) -> Result<()> {
		self.update(recid, &codec::to_bytes(value))
	}

	pub fn fetch_value<T: Codec>(&self, recid: u64) -> Result<Option<T>> {
		match self.fetch(recid)? {
			Some(data) => codec::from_bytes(&data).map(Some),
			None => Ok(None),
		}
	}

	/// Returns true once free-space searches have scanned more pages than configured, a hint
	/// that the store would benefit from compaction.
	pub fn needs_defrag(&self) -> Result<bool> {
		self.with_inner(false, |inner| Ok(inner.physical.free_manager().needs_defrag()))
	}

	pub fn reset_defrag_counter(&self) -> Result<()> {
		self.with_inner(false, |inner| {
			inner.physical.free_manager_mut().reset_defrag_counter();
			Ok(())
		})
	}

	/// Discards uncommitted changes, writes the log into the store and releases it. Later calls
	/// fail with [`Error::StoreClosed`].
	pub fn close(&self) -> Result<()> {
		let Some(mut inner) = self.inner.lock().take() else {
			return Ok(());
		};
		if inner.pm.file().has_changes() {
			log::warn!("Discarding uncommitted changes on close");
		}
		inner.rollback();
		inner.pm.close()?;
		log::info!("Store closed");
		Ok(())
	}

	/// Drops the store without writing anything, as if the process died.
	#[cfg(test)]
	pub(crate) fn crash(self) {
		drop(self.inner.lock().take());
	}
}

impl RecordManager for Store {
	fn insert(&self, data: &[u8]) -> Result<u64> {
		self.with_inner(true, |inner| inner.insert(data))
	}

	fn update(&self, recid: u64, data: &[u8]) -> Result<()> {
		self.with_inner(true, |inner| inner.update(recid, data))
	}

	fn fetch(&self, recid: u64) -> Result<Option<Vec<u8>>> {
		self.with_inner(false, |inner| inner.fetch(recid))
	}

	fn delete(&self, recid: u64) -> Result<()> {
		self.with_inner(true, |inner| inner.delete(recid))
	}

	fn commit(&self) -> Result<()> {
		self.with_inner(false, |inner| {
			if inner.read_only {
				return Ok(());
			}
			inner.commit()
		})
	}

	fn rollback(&self) -> Result<()> {
		self.with_inner(false, |inner| {
			inner.rollback();
			self.rollbacks.fetch_add(1, Ordering::AcqRel);
			Ok(())
		})
	}

	fn rollback_count(&self) -> u64 {
		self.rollbacks.load(Ordering::Acquire)
	}

	fn root_count(&self) -> usize {
		FileHeader::root_count(self.block_size) - FIRST_USER_ROOT
	}

	fn root(&self, slot: usize) -> Result<u64> {
		self.with_inner(false, |inner| {
			let slot = inner.user_slot(slot)?;
			inner.pm.root(slot)
		})
	}

	fn set_root(&self, slot: usize, value: u64) -> Result<()> {
		self.with_inner(true, |inner| {
			let slot = inner.user_slot(slot)?;
			inner.pm.set_root(slot, value)
		})
	}

	fn named_object(&self, name: &str) -> Result<Option<u64>> {
		self.with_inner(false, |inner| Ok(inner.name_directory()?.1.get(name).copied()))
	}

	fn set_named_object(&self, name: &str, recid: u64) -> Result<()> {
		self.with_inner(true, |inner| {
			let (dir, mut names) = inner.name_directory()?;
			if recid == 0 {
				names.remove(name);
			} else {
				names.insert(name.to_string(), recid);
			}
			let data = encode_directory(&names);
			if dir == 0 {
				let dir = inner.insert(&data)?;
				inner.pm.set_root(NAME_DIRECTORY_ROOT, dir)
			} else {
				inner.update(dir, &data)
			}
		})
	}
}

impl Drop for Store {
	fn drop(&mut self) {
		if let Err(err) = self.close() {
			log::error!("Error occurred while closing the store: {err}");
		}
	}
}
