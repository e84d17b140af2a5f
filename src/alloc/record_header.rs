use crate::block::Block;
use crate::error::{Error, Result};

/// Size of the header in front of every record.
pub(crate) const RECORD_HEADER_SIZE: usize = 4;

// Available sizes up to this value are stored as is. Larger sizes are stored in 256-byte units
// above it, flagged by the top bit.
const DIRECT_LIMIT: usize = 0x7fff;
const UNIT: usize = 256;
const UNIT_FLAG: u16 = 0x8000;

/// Largest record payload the header can describe.
pub const MAX_RECORD_SIZE: usize = DIRECT_LIMIT + 0x8000 * UNIT;

/// Largest gap allowed between available and current size.
pub(crate) const MAX_SLACK: usize = 0xfffe;

// Stored in the slack field when the record is empty or freed.
const EMPTY: u16 = 0xffff;

// Small sizes are rounded up to this granularity so freed slots are easier to reuse.
const SMALL_GRANULARITY: usize = 16;

fn encode_available(size: usize) -> Result<u16> {
	if size <= DIRECT_LIMIT {
		return Ok(size as u16);
	}
	if size > MAX_RECORD_SIZE {
		return Err(Error::RecordTooLarge(size));
	}
	let units = (size - DIRECT_LIMIT).div_ceil(UNIT);
	Ok(UNIT_FLAG | (units - 1) as u16)
}

fn decode_available(code: u16) -> usize {
	if code & UNIT_FLAG == 0 {
		code as usize
	} else {
		DIRECT_LIMIT + ((code & !UNIT_FLAG) as usize + 1) * UNIT
	}
}

/// Rounds a requested size up to the available size actually reserved for it.
pub(crate) fn round_available_size(size: usize) -> Result<usize> {
	let size = if size <= DIRECT_LIMIT {
		size.max(1).next_multiple_of(SMALL_GRANULARITY)
	} else {
		size
	};
	Ok(decode_available(encode_available(size)?))
}

/// Returns true if `size` can be stored in a header without rounding.
pub(crate) fn is_representable(size: usize) -> bool {
	matches!(encode_available(size), Ok(code) if decode_available(code) == size)
}

/// The `(available, current)` pair in front of a record.
///
/// `available` is the space reserved for the payload, `current` the length of the payload.
/// `current` is stored as the slack `available - current`, which must fit in 16 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RecordHeader {
	pub(crate) available: usize,
	pub(crate) current: usize,
}

impl RecordHeader {
	pub(crate) fn new(available: usize, current: usize) -> Self {
		Self {
			available,
			current,
		}
	}

	pub(crate) fn read(block: &Block, pos: usize) -> Self {
		let available = decode_available(block.read_u16(pos));
		let slack = block.read_u16(pos + 2);
		let current = if slack == EMPTY {
			0
		} else {
			available.saturating_sub(slack as usize)
		};
		Self {
			available,
			current,
		}
	}

	pub(crate) fn write(&self, block: &mut Block, pos: usize) -> Result<()> {
		let code = encode_available(self.available)?;
		if decode_available(code) != self.available {
			return Err(Error::Corruption(format!(
				"available size {} is not representable in a record header",
				self.available
			)));
		}
		let slack = if self.current == 0 {
			EMPTY
		} else {
			if self.current > self.available || self.available - self.current > MAX_SLACK {
				return Err(Error::SlackExceeded(self.available, self.current));
			}
			(self.available - self.current) as u16
		};
		block.write_u16(pos, code);
		block.write_u16(pos + 2, slack);
		Ok(())
	}
}
