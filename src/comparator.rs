//! Comparator implementations for key ordering.

use std::cmp::Ordering;
use std::marker::PhantomData;

/// A trait for ordering the keys of a B+Tree.
///
/// The name is persisted with the tree and must match when the tree is loaded again, so two
/// comparators that order keys differently must never share a name.
pub trait KeyComparator<K>: Send + Sync {
	/// Compares two keys `a` and `b`.
	fn compare(&self, a: &K, b: &K) -> Ordering;

	/// Retrieves the name of the comparator.
	fn name(&self) -> &str;
}

/// Orders keys by their `Ord` implementation.
#[derive(Default, Clone, Copy, Debug)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparator<K> for NaturalOrder {
	#[inline]
	fn compare(&self, a: &K, b: &K) -> Ordering {
		a.cmp(b)
	}

	#[inline]
	fn name(&self) -> &'static str {
		"recordkv.NaturalOrder"
	}
}

/// Reverses another comparator.
pub struct ReverseOrder<C, K> {
	inner: C,
	name: String,
	_key: PhantomData<fn(&K)>,
}

impl<C: KeyComparator<K>, K> ReverseOrder<C, K> {
	pub fn new(inner: C) -> Self {
		let name = format!("recordkv.Reverse({})", inner.name());
		Self {
			inner,
			name,
			_key: PhantomData,
		}
	}
}

impl<C: KeyComparator<K>, K> KeyComparator<K> for ReverseOrder<C, K> {
	#[inline]
	fn compare(&self, a: &K, b: &K) -> Ordering {
		self.inner.compare(b, a)
	}

	fn name(&self) -> &str {
		&self.name
	}
}
