/// A fixed-size block buffer identified by its block number.
///
/// All multi-byte fields are little-endian. Locations are stored in 6 bytes: a 32-bit block
/// number followed by a 16-bit offset.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Block {
	id: u64,
	data: Box<[u8]>,
}

impl Block {
	pub(crate) fn new(id: u64, block_size: usize) -> Self {
		Self {
			id,
			data: vec![0u8; block_size].into_boxed_slice(),
		}
	}

	pub(crate) fn from_bytes(id: u64, data: Vec<u8>) -> Self {
		Self {
			id,
			data: data.into_boxed_slice(),
		}
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn len(&self) -> usize {
		self.data.len()
	}

	pub(crate) fn as_bytes(&self) -> &[u8] {
		&self.data
	}

	pub(crate) fn zero(&mut self) {
		self.data.fill(0);
	}

	pub(crate) fn read_u16(&self, pos: usize) -> u16 {
		u16::from_le_bytes([self.data[pos], self.data[pos + 1]])
	}

	pub(crate) fn write_u16(&mut self, pos: usize, value: u16) {
		self.data[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
	}

	pub(crate) fn read_u32(&self, pos: usize) -> u32 {
		let mut buf = [0u8; 4];
		buf.copy_from_slice(&self.data[pos..pos + 4]);
		u32::from_le_bytes(buf)
	}

	pub(crate) fn write_u32(&mut self, pos: usize, value: u32) {
		self.data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
	}

	pub(crate) fn read_u64(&self, pos: usize) -> u64 {
		let mut buf = [0u8; 8];
		buf.copy_from_slice(&self.data[pos..pos + 8]);
		u64::from_le_bytes(buf)
	}

	pub(crate) fn write_u64(&mut self, pos: usize, value: u64) {
		self.data[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
	}

	/// Reads a 6-byte packed value (upper 16 bits of the u64 are always zero).
	pub(crate) fn read_u48(&self, pos: usize) -> u64 {
		let mut buf = [0u8; 8];
		buf[..6].copy_from_slice(&self.data[pos..pos + 6]);
		u64::from_le_bytes(buf)
	}

	pub(crate) fn write_u48(&mut self, pos: usize, value: u64) {
		debug_assert!(value < 1 << 48);
		self.data[pos..pos + 6].copy_from_slice(&value.to_le_bytes()[..6]);
	}

	pub(crate) fn read_bytes(&self, pos: usize, out: &mut [u8]) {
		out.copy_from_slice(&self.data[pos..pos + out.len()]);
	}

	pub(crate) fn write_bytes(&mut self, pos: usize, src: &[u8]) {
		self.data[pos..pos + src.len()].copy_from_slice(src);
	}
}

impl std::fmt::Debug for Block {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Block").field("id", &self.id).field("len", &self.data.len()).finish()
	}
}
