//! recordkv is an embedded, transactional record store.
//!
//! Records are byte strings addressed by stable recids. Changes are staged in memory until
//! [`RecordManager::commit`] appends them to a write-ahead log, and the log is replayed when a
//! store is reopened after a crash. A [`BTree`] index stores its nodes as records of the same
//! store and takes part in its transactions.

mod alloc;
mod block;
mod extent;
mod file;
mod page;
mod wal;

pub mod btree;
pub mod codec;
pub mod comparator;
pub mod error;
pub mod option;
pub mod store;
pub mod vfs;

#[cfg(test)]
mod test;

pub use alloc::MAX_RECORD_SIZE;
pub use btree::{BTree, Browser};
pub use codec::Codec;
pub use comparator::{KeyComparator, NaturalOrder, ReverseOrder};
pub use error::{Error, Result};
pub use option::{BTreeOptions, Options};
pub use store::{RecordManager, Store};
