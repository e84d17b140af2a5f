use std::fmt;

/// A `(block, offset)` address packed into one integer.
///
/// The block number takes the upper 32 bits of a 48-bit value and the in-block offset the lower
/// 16, which is how locations are stored on disk (6 bytes). Block 0 is the file header, so a
/// packed value of zero never addresses data and is used as "no location".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Location(u64);

/// Number of blocks a location can address.
pub(crate) const MAX_BLOCKS: u64 = 1 << 32;

impl Location {
	pub(crate) const NONE: Location = Location(0);

	pub(crate) fn new(block: u64, offset: usize) -> Self {
		debug_assert!(block < MAX_BLOCKS);
		debug_assert!(offset <= u16::MAX as usize);
		Location(block << 16 | offset as u64)
	}

	pub(crate) fn from_packed(value: u64) -> Self {
		Location(value)
	}

	pub(crate) fn packed(self) -> u64 {
		self.0
	}

	pub(crate) fn block(self) -> u64 {
		self.0 >> 16
	}

	pub(crate) fn offset(self) -> usize {
		(self.0 & 0xffff) as usize
	}

	pub(crate) fn is_none(self) -> bool {
		self.0 == 0
	}
}

impl fmt::Debug for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.block(), self.offset())
	}
}
