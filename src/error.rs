use std::{fmt, io, sync::Arc};

/// Result returning Error
pub type Result<T> = std::result::Result<T, Error>;

/// `Error` is the error type for every layer of the store.
///
/// Variants in the fatal group (see [`Error::is_fatal`]) mean on-disk or in-memory structures are
/// inconsistent. The store refuses further work after one of them and has to be reopened so the
/// transaction log can be replayed.
#[derive(Clone, Debug)]
pub enum Error {
	Io(Arc<io::Error>),         // An I/O error occurred
	Corruption(String),         // Structural corruption (bad magic, broken page list, torn header)
	InvalidBlockFree(u64),      // Freeing the file header block or an already free block
	SlackExceeded(usize, usize), // Record header slack invariant violated (available, current)
	TreeInvariant(String),      // B+Tree rebalance invariant violated
	ReadOnly,                   // Mutation attempted on a read-only store
	UnsupportedVersion(u64),    // On-disk format is newer than this build understands
	RecordTooLarge(usize),      // Payload exceeds the maximum record size
	InvalidRecid(u64),          // Update or delete of a recid that does not exist
	InvalidArgument(String),
	Decode(String),             // A stored value could not be decoded
	ConcurrentModification,     // Cursor used after a structural change to its tree
	StoreClosed,
	Poisoned,                   // A previous fatal error invalidated this handle
	Locked(String),             // The store is already opened by another handle
}

impl Error {
	/// Returns true for errors that invalidate the store handle.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::Corruption(_)
				| Error::InvalidBlockFree(_)
				| Error::SlackExceeded(..)
				| Error::TreeInvariant(_)
		)
	}
}

// Implementation of Display trait for Error
impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Io(err) => write!(f, "IO error: {err}"),
			Error::Corruption(err) => write!(f, "Data corruption detected: {err}"),
			Error::InvalidBlockFree(block) => {
				write!(f, "Invalid free of block {block}: header block or already free")
			}
			Error::SlackExceeded(available, current) => write!(
				f,
				"Record slack exceeded: available size {available}, current size {current}"
			),
			Error::TreeInvariant(err) => write!(f, "B+Tree invariant violated: {err}"),
			Error::ReadOnly => write!(f, "Store is read-only"),
			Error::UnsupportedVersion(v) => write!(f, "Unsupported store version: {v}"),
			Error::RecordTooLarge(size) => write!(f, "Record too large: {size} bytes"),
			Error::InvalidRecid(recid) => write!(f, "Invalid recid: {recid}"),
			Error::InvalidArgument(err) => write!(f, "Invalid argument: {err}"),
			Error::Decode(err) => write!(f, "Decode error: {err}"),
			Error::ConcurrentModification => {
				write!(f, "Tree was structurally modified while a cursor was open")
			}
			Error::StoreClosed => write!(f, "Store closed"),
			Error::Poisoned => write!(f, "Store is invalid after a fatal error; reopen it"),
			Error::Locked(err) => write!(f, "Store locked: {err}"),
		}
	}
}

// Implementation of Error trait for Error
impl std::error::Error for Error {}

// Implementation to convert io::Error into Error
impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(Arc::new(e))
	}
}
