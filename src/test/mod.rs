//! Integration tests for recordkv
//!
//! These tests drive the store and the B+Tree through crashes, reopens and rollbacks, and
//! check what survives on disk.

#[cfg(test)]
pub mod concurrency_tests;
