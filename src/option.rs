use crate::error::{Error, Result};

/// Smallest supported block size.
pub const MIN_BLOCK_SIZE: usize = 1024;

/// Largest supported block size. Offsets inside a block must fit in 16 bits.
pub const MAX_BLOCK_SIZE: usize = 32 * 1024;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Options {
	// Layout options, fixed when the store is created.
	pub block_size: usize,      // Size in bytes of every block. Must match on reopen.
	pub max_extent_size: u64,   // Maximum size of one backing extent file.

	// Usually modified options.
	pub read_only: bool,            // Reject every mutation; replay the log into memory only.
	pub create_if_not_exists: bool, // Create the store if the path doesn't exist.
	pub disable_transactions: bool, // Write committed blocks straight to the extents, no log.

	// Fine tuning options.
	pub max_buffered_txns: usize,     // Committed transactions held in the log before it is synchronised.
	pub block_cache_capacity: usize,  // Number of clean blocks kept in memory.
	pub defrag_scan_threshold: usize, // Free pages scanned before defragmentation is suggested.
}

impl Default for Options {
	/// Creates a new set of options with default values.
	fn default() -> Self {
		Self {
			block_size: 4096,
			max_extent_size: 1 << 30, // 1 GiB
			read_only: false,
			create_if_not_exists: true,
			disable_transactions: false,
			max_buffered_txns: 10,
			block_cache_capacity: 1024,
			defrag_scan_threshold: 64,
		}
	}
}

impl Options {
	/// Creates a new set of options with default values.
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_block_size(mut self, block_size: usize) -> Self {
		self.block_size = block_size;
		self
	}

	pub fn with_read_only(mut self, read_only: bool) -> Self {
		self.read_only = read_only;
		self
	}

	pub fn with_disable_transactions(mut self, disable: bool) -> Self {
		self.disable_transactions = disable;
		self
	}

	pub fn with_max_buffered_txns(mut self, max: usize) -> Self {
		self.max_buffered_txns = max;
		self
	}

	pub fn with_max_extent_size(mut self, size: u64) -> Self {
		self.max_extent_size = size;
		self
	}

	pub fn validate(&self) -> Result<()> {
		if !self.block_size.is_power_of_two()
			|| self.block_size < MIN_BLOCK_SIZE
			|| self.block_size > MAX_BLOCK_SIZE
		{
			return Err(Error::InvalidArgument(format!(
				"block_size must be a power of two between {MIN_BLOCK_SIZE} and {MAX_BLOCK_SIZE}, got {}",
				self.block_size
			)));
		}
		if self.max_extent_size == 0 || self.max_extent_size % self.block_size as u64 != 0 {
			return Err(Error::InvalidArgument(format!(
				"max_extent_size must be a non-zero multiple of block_size, got {}",
				self.max_extent_size
			)));
		}
		if self.max_buffered_txns == 0 {
			return Err(Error::InvalidArgument("max_buffered_txns must be at least 1".into()));
		}
		if self.block_cache_capacity == 0 {
			return Err(Error::InvalidArgument("block_cache_capacity must be at least 1".into()));
		}
		Ok(())
	}
}

/// Tuning for a single B+Tree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BTreeOptions {
	pub page_size: usize,            // Fanout: number of key slots per node.
	pub lazy_value_threshold: usize, // Encoded values larger than this are stored out of line.
}

impl Default for BTreeOptions {
	fn default() -> Self {
		Self {
			page_size: 32,
			lazy_value_threshold: 512,
		}
	}
}

impl BTreeOptions {
	pub fn validate(&self) -> Result<()> {
		if self.page_size < 4 || self.page_size % 2 != 0 {
			return Err(Error::InvalidArgument(format!(
				"page_size must be even and at least 4, got {}",
				self.page_size
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_options() {
		let options = Options::default();

		assert_eq!(options.block_size, 4096);
		assert_eq!(options.max_extent_size, 1 << 30);
		assert!(!options.read_only);
		assert!(options.create_if_not_exists);
		assert!(!options.disable_transactions);
		assert_eq!(options.max_buffered_txns, 10);
		assert!(options.validate().is_ok());
	}

	#[test]
	fn block_size_must_be_power_of_two() {
		assert!(Options::new().with_block_size(3000).validate().is_err());
		assert!(Options::new().with_block_size(512).validate().is_err());
		assert!(Options::new().with_block_size(65536).validate().is_err());
		assert!(Options::new()
			.with_block_size(1024)
			.with_max_extent_size(1024 * 16)
			.validate()
			.is_ok());
	}

	#[test]
	fn extent_size_must_align_with_blocks() {
		let options = Options::new().with_max_extent_size(4096 * 3 + 1);
		assert!(options.validate().is_err());
	}

	#[test]
	fn btree_page_size_must_be_even() {
		assert!(BTreeOptions::default().validate().is_ok());
		let odd = BTreeOptions {
			page_size: 7,
			..Default::default()
		};
		assert!(odd.validate().is_err());
	}
}
