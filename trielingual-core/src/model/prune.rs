use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrieError};
use super::node::TrieNode;

/// Which prune policies to apply, and with which limits.
///
/// Policies are applied in a fixed order: depth, then threshold, then
/// top-K per level. Each one is skipped when left unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunePolicy {
	min_count: Option<u64>,
	max_depth: Option<usize>,
	children_per_level: Vec<usize>,
}

impl PrunePolicy {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn min_count(&self) -> Option<u64> {
		self.min_count
	}

	pub fn max_depth(&self) -> Option<usize> {
		self.max_depth
	}

	pub fn children_per_level(&self) -> &[usize] {
		&self.children_per_level
	}

	/// Removes every node whose count is below `min_count`.
	///
	/// # Errors
	/// Returns an error if `min_count` is 0 (the policy would be a no-op).
	pub fn set_min_count(&mut self, min_count: u64) -> Result<()> {
		if min_count == 0 {
			return Err(TrieError::invalid_argument("min count must be >= 1"));
		}
		self.min_count = Some(min_count);
		Ok(())
	}

	/// Keeps descendants up to absolute depth `max_depth` (0 = single words).
	pub fn set_max_depth(&mut self, max_depth: usize) {
		self.max_depth = Some(max_depth);
	}

	/// Per-generation child limits applied below every top-level word.
	///
	/// # Errors
	/// Returns an error if `counts` is empty.
	pub fn set_children_per_level(&mut self, counts: Vec<usize>) -> Result<()> {
		if counts.is_empty() {
			return Err(TrieError::invalid_argument("children per level must not be empty"));
		}
		self.children_per_level = counts;
		Ok(())
	}
}

/// Number of subtrees removed by each policy.
///
/// A removed subtree counts once, whatever its size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneSummary {
	pub by_depth: usize,
	pub by_count: usize,
	pub by_top_k: usize,
}

impl PruneSummary {
	pub fn total(&self) -> usize {
		self.by_depth + self.by_count + self.by_top_k
	}
}

impl TrieNode {
	/// Removes every descendant whose count is below `min_count`, with its subtree.
	///
	/// This node itself is never removed. Removed subtrees are not visited.
	/// Returns the number of removed subtrees.
	pub fn prune_by_count(&mut self, min_count: u64) -> usize {
		let mut removed = 0;
		let mut stack: Vec<&mut TrieNode> = vec![self];
		while let Some(node) = stack.pop() {
			let before = node.children.len();
			node.children.retain(|_, child| child.count >= min_count);
			removed += before - node.children.len();
			stack.extend(node.children.values_mut());
		}
		removed
	}

	/// Deletes every node deeper than `max_depth` below this node.
	///
	/// Direct children are depth 0, so `prune_by_depth(0)` keeps only them.
	/// Returns the number of removed subtrees.
	pub fn prune_by_depth(&mut self, max_depth: usize) -> usize {
		let mut removed = 0;
		let mut stack: Vec<(&mut TrieNode, usize)> = self.children.values_mut().map(|child| (child, 0)).collect();
		while let Some((node, depth)) = stack.pop() {
			if depth >= max_depth {
				removed += node.children.len();
				node.children.clear();
				continue;
			}
			stack.extend(node.children.values_mut().map(|child| (child, depth + 1)));
		}
		removed
	}

	/// Keeps only the `counts[d]` highest-count children at each generation `d`
	/// below this node (0 = direct children).
	///
	/// Ties are broken by token order. `counts[d] == 0` removes every child at
	/// that generation. Generations at or beyond `counts.len()` are left
	/// untouched, and only retained children are visited.
	/// Returns the number of removed subtrees.
	pub fn retain_top_children(&mut self, counts: &[usize]) -> usize {
		let mut removed = 0;
		let mut stack: Vec<(&mut TrieNode, usize)> = vec![(self, 0)];
		while let Some((node, depth)) = stack.pop() {
			let Some(&limit) = counts.get(depth) else {
				continue;
			};
			if node.children.len() > limit {
				let keep: HashSet<String> = node
					.children_by_count()
					.into_iter()
					.take(limit)
					.map(|(token, _)| token.to_owned())
					.collect();
				removed += node.children.len() - keep.len();
				node.children.retain(|token, _| keep.contains(token));
			}
			stack.extend(node.children.values_mut().map(|child| (child, depth + 1)));
		}
		removed
	}

	/// Applies [`TrieNode::retain_top_children`] to every top-level word.
	///
	/// Top-level words themselves are never removed.
	pub fn prune_top_children_per_word(&mut self, counts: &[usize]) -> usize {
		self.children.values_mut().map(|word| word.retain_top_children(counts)).sum()
	}

	/// Applies every policy set in `policy`, in depth, threshold, top-K order.
	pub fn prune(&mut self, policy: &PrunePolicy) -> PruneSummary {
		let mut summary = PruneSummary::default();
		if let Some(max_depth) = policy.max_depth {
			summary.by_depth = self.prune_by_depth(max_depth);
		}
		if let Some(min_count) = policy.min_count {
			summary.by_count = self.prune_by_count(min_count);
		}
		if !policy.children_per_level.is_empty() {
			summary.by_top_k = self.prune_top_children_per_word(&policy.children_per_level);
		}
		log::info!(
			"Pruned {} subtrees (depth: {}, count: {}, top-k: {})",
			summary.total(),
			summary.by_depth,
			summary.by_count,
			summary.by_top_k
		);
		summary
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	use super::*;
	use crate::model::builder::build;

	fn the_cat() -> TrieNode {
		let allow: HashSet<String> = ["the", "cat", "sat", "ran"].iter().map(|w| w.to_string()).collect();
		let sentences = vec![
			vec!["the", "cat", "sat"],
			vec!["the", "cat", "ran"],
		];
		build(sentences, &allow, 2).unwrap()
	}

	#[test]
	fn test_threshold_two_on_the_cat() {
		let mut trie = the_cat();
		let removed = trie.prune_by_count(2);
		assert_eq!(removed, 4);
		assert_eq!(
			serde_json::to_value(&trie).unwrap(),
			serde_json::json!({"the": {"__C": 2, "cat": {"__C": 2}}, "cat": {"__C": 2}})
		);
	}

	#[test]
	fn test_threshold_removes_iff_below() {
		let mut trie = the_cat();
		let before = trie.paths_with_counts();
		trie.prune_by_count(2);
		let after = trie.paths_with_counts();
		for (path, count) in before {
			assert_eq!(after.contains_key(&path), count >= 2, "{path:?}");
		}
	}

	#[test]
	fn test_depth_zero_keeps_single_words() {
		let mut trie = the_cat();
		trie.prune_by_depth(0);
		assert_eq!(trie.max_depth(), 1);
		assert_eq!(trie.child("cat").unwrap().count(), 2);
		assert!(trie.child("cat").unwrap().is_leaf());
	}

	#[test]
	fn test_top_children_ties_by_token() {
		let mut trie = the_cat();
		trie.prune_top_children_per_word(&[1]);
		let cat = trie.child("cat").unwrap();
		assert_eq!(cat.child_count(), 1);
		assert!(cat.child("ran").is_some());
	}

	#[test]
	fn test_zero_limit_removes_generation() {
		let mut trie = the_cat();
		trie.prune_top_children_per_word(&[0]);
		assert_eq!(trie.child_count(), 4);
		assert_eq!(trie.max_depth(), 1);
	}

	fn random_trie(rng: &mut StdRng) -> TrieNode {
		let mut root = TrieNode::new();
		let mut stack: Vec<(&mut TrieNode, usize)> = vec![(&mut root, 0)];
		while let Some((node, depth)) = stack.pop() {
			if depth == 4 {
				continue;
			}
			let fanout = rng.random_range(0..6);
			for i in 0..fanout {
				node.child_or_insert(&format!("w{i}")).count = rng.random_range(1..10);
			}
			stack.extend(node.children.values_mut().map(|child| (child, depth + 1)));
		}
		root
	}

	#[test]
	fn test_top_k_keeps_best_within_limit() {
		let mut rng = StdRng::seed_from_u64(7);
		let limits = [3, 2, 1];
		for _ in 0..20 {
			let original = random_trie(&mut rng);
			let mut pruned = original.clone();
			pruned.prune_top_children_per_word(&limits);

			let mut stack: Vec<(&TrieNode, &TrieNode, usize)> = original
				.children()
				.filter_map(|(token, word)| pruned.child(token).map(|kept| (word, kept, 0)))
				.collect();
			while let Some((before, after, depth)) = stack.pop() {
				if let Some(&limit) = limits.get(depth) {
					assert!(after.child_count() <= limit);
					let weakest_kept = after.children().map(|(_, c)| c.count()).min();
					for (token, child) in before.children() {
						if after.child(token).is_none() {
							if let Some(weakest) = weakest_kept {
								assert!(child.count() <= weakest);
							}
						}
					}
				} else {
					assert_eq!(before.paths_with_counts(), after.paths_with_counts());
				}
				for (token, kept) in after.children() {
					let Some(orig) = before.child(token) else {
						panic!("kept child '{token}' not in original");
					};
					stack.push((orig, kept, depth + 1));
				}
			}
		}
	}

	#[test]
	fn test_policy_order_and_summary() {
		let mut trie = the_cat();
		let mut policy = PrunePolicy::new();
		policy.set_max_depth(0);
		policy.set_min_count(2).unwrap();
		let summary = trie.prune(&policy);
		assert_eq!(summary.by_depth, 3);
		assert_eq!(summary.by_count, 2);
		assert_eq!(summary.by_top_k, 0);
		assert_eq!(trie.child_count(), 2);
	}

	#[test]
	fn test_policy_validation() {
		let mut policy = PrunePolicy::new();
		assert!(policy.set_min_count(0).is_err());
		assert!(policy.set_children_per_level(Vec::new()).is_err());
	}
}
