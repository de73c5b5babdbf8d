use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Items that can be ranked inside a [`BoundedTopK`].
///
/// A greater key means a better item.
pub trait Ranked {
	type Key: Ord + Clone + std::fmt::Debug;

	fn rank_key(&self) -> Self::Key;
}

/// Heap entry ordered by its rank key only.
#[derive(Clone, Debug)]
struct Entry<T: Ranked> {
	key: T::Key,
	item: T,
}

impl<T: Ranked> PartialEq for Entry<T> {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key
	}
}

impl<T: Ranked> Eq for Entry<T> {}

impl<T: Ranked> PartialOrd for Entry<T> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl<T: Ranked> Ord for Entry<T> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.key.cmp(&other.key)
	}
}

/// A fixed-capacity set keeping the best items seen so far.
///
/// Internally a min-heap on the rank key, so the root is always the
/// weakest retained item and can be evicted in O(log K).
///
/// # Invariants
/// - After `offer(_, k)`, at most `k` items are retained
/// - Retained items are the best `k` offered (ties keep the earlier item)
///
/// The capacity is passed on each `offer` rather than stored, so a set
/// loaded from disk can be re-bounded by whatever limit the caller uses.
#[derive(Clone, Debug)]
pub struct BoundedTopK<T: Ranked> {
	heap: BinaryHeap<Reverse<Entry<T>>>,
}

impl<T: Ranked> Default for BoundedTopK<T> {
	fn default() -> Self {
		Self { heap: BinaryHeap::new() }
	}
}

impl<T: Ranked> BoundedTopK<T> {
	/// Creates an empty set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of retained items.
	pub fn len(&self) -> usize {
		self.heap.len()
	}

	/// Returns `true` if nothing is retained.
	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}

	/// The weakest retained item, i.e. the next one to be evicted.
	pub fn weakest(&self) -> Option<&T> {
		self.heap.peek().map(|Reverse(entry)| &entry.item)
	}

	/// Offers a candidate to the set, bounded by `capacity`.
	///
	/// - Fewer than `capacity` items: the candidate is inserted.
	/// - Full: the candidate replaces the weakest item only if it strictly
	///   outranks it.
	///
	/// Returns `true` if the candidate was retained.
	pub fn offer(&mut self, item: T, capacity: usize) -> bool {
		while self.heap.len() > capacity {
			self.heap.pop();
		}
		if capacity == 0 {
			return false;
		}

		let key = item.rank_key();
		if self.heap.len() < capacity {
			self.heap.push(Reverse(Entry { key, item }));
			return true;
		}

		match self.heap.peek_mut() {
			Some(mut weakest) if key > weakest.0.key => {
				// PeekMut restores the heap order on drop
				*weakest = Reverse(Entry { key, item });
				true
			}
			_ => false,
		}
	}

	/// Retained items sorted best first.
	pub fn sorted(&self) -> Vec<&T> {
		let mut entries: Vec<&Entry<T>> = self.heap.iter().map(|Reverse(entry)| entry).collect();
		entries.sort_by(|a, b| b.cmp(a));
		entries.into_iter().map(|entry| &entry.item).collect()
	}

	/// Consumes the set, returning its items sorted best first.
	pub fn into_sorted_vec(self) -> Vec<T> {
		// Ascending order of Reverse<_> is descending order of the key
		self.heap
			.into_sorted_vec()
			.into_iter()
			.map(|Reverse(entry)| entry.item)
			.collect()
	}
}

/// Collects every item without any bound.
impl<T: Ranked> FromIterator<T> for BoundedTopK<T> {
	fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
		let heap = iter
			.into_iter()
			.map(|item| Reverse(Entry { key: item.rank_key(), item }))
			.collect();
		Self { heap }
	}
}
