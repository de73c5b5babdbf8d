use std::collections::HashMap;

use crate::error::{Result, TrieError};
use super::node::TrieNode;

impl TrieNode {
	/// Merges `other` into this trie, consuming it.
	///
	/// - Counts of nodes at the same path are summed.
	/// - Children present on one side only are moved, not copied.
	/// - A level or example set present on one side only is kept.
	///
	/// Associative and commutative on unpruned tries.
	///
	/// # Errors
	/// Returns [`TrieError::MergeConflict`] naming the token path when both
	/// sides carry different levels, or both carry examples, at the same node.
	/// `self` is left partially merged in that case.
	pub fn merge(&mut self, other: TrieNode) -> Result<()> {
		let mut stack: Vec<(&mut TrieNode, TrieNode, Vec<String>)> = vec![(self, other, Vec::new())];

		while let Some((dst, src, path)) = stack.pop() {
			let TrieNode { count, examples, level, children } = src;
			dst.count += count;

			match (dst.level, level) {
				(Some(a), Some(b)) if a != b => {
					return Err(TrieError::merge_conflict(&path, format!("levels {a} and {b}")));
				}
				(None, Some(b)) => dst.level = Some(b),
				_ => (),
			}

			if !examples.is_empty() {
				if !dst.examples.is_empty() {
					return Err(TrieError::merge_conflict(&path, "examples on both sides"));
				}
				dst.examples = examples;
			}

			let mut overlapping: HashMap<String, TrieNode> = HashMap::new();
			for (token, child) in children {
				if dst.children.contains_key(&token) {
					overlapping.insert(token, child);
				} else {
					dst.children.insert(token, child);
				}
			}
			if overlapping.is_empty() {
				continue;
			}

			for (token, dst_child) in dst.children.iter_mut() {
				if let Some(src_child) = overlapping.remove(token) {
					let mut child_path = path.clone();
					child_path.push(token.clone());
					stack.push((dst_child, src_child, child_path));
				}
			}
		}
		Ok(())
	}
}

/// Merges two tries into a new one.
pub fn merge(mut a: TrieNode, b: TrieNode) -> Result<TrieNode> {
	a.merge(b)?;
	Ok(a)
}

/// Merges any number of tries, left to right.
///
/// Returns an empty trie when `tries` is empty.
pub fn merge_all<I: IntoIterator<Item = TrieNode>>(tries: I) -> Result<TrieNode> {
	let mut tries = tries.into_iter();
	let Some(mut merged) = tries.next() else {
		return Ok(TrieNode::new());
	};
	for trie in tries {
		merged.merge(trie)?;
	}
	Ok(merged)
}
