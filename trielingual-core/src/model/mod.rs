//! Collocation trie algorithms.
//!
//! Components, leaves first:
//! - Frequency ranks and word counting (`frequency`)
//! - The trie node and its serialized form (`node`)
//! - Building, pruning and merging tries (`builder`, `prune`, `merge`)
//! - Example sentence selection (`annotate`, `extract`)
//! - Sharded parallel build and batched merge (`parallel`)

/// Pluggable tokenizer and a language-agnostic fallback.
pub mod tokenize;

/// Word counts, frequency ranks and allowlists.
pub mod frequency;

/// Fixed-capacity set keeping the best K items.
pub mod top_k;

/// Example sentence records and their ranking.
pub mod example;

/// The n-gram count trie node and its reserved-key serialization.
pub mod node;

/// N-gram trie construction from tokenized sentences.
pub mod builder;

/// Threshold, depth and top-K-per-level pruning.
pub mod prune;

/// Iterative trie merge.
pub mod merge;

/// Attaches the best example sentences to trie nodes.
pub mod annotate;

/// Collects the best example sentences per dictionary word.
pub mod extract;

/// Line-range sharded build and batched parallel merge.
pub mod parallel;
