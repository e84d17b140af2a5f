//! A B+Tree index stored as records of a [`RecordManager`](crate::RecordManager).
//!
//! Every node is one record. Nodes have a fixed number of slots (the page size) and keep their
//! entries packed at the end of the slot array. The last key of the rightmost node on each
//! level is infinite, so every search key has a child to descend into. Leaves are chained in
//! both directions for [`Browser`] cursors.

mod browser;
mod node;
mod tree;

pub use browser::Browser;
pub use tree::BTree;
