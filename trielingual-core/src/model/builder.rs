use serde::{Deserialize, Serialize};

use crate::error::{Result, TrieError};
use super::frequency::Allowlist;
use super::node::{TrieNode, is_reserved_key};
use super::tokenize::{Tokenizer, tokenize_words};

/// Deepest n-gram a build accepts.
///
/// A node at this depth, with its examples, stays below the JSON nesting
/// limit applied when a trie is loaded back.
pub const MAX_DEPTH: usize = 100;

/// Direction in which n-grams extend from their first word.
///
/// - `Forward`: word followed by the next words (`the → cat → sat`)
/// - `Reverse`: word followed by the previous words (`sat → cat → the`)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	#[default]
	Forward,
	Reverse,
}

impl Direction {
	/// Position `step` tokens away from `start`, or `None` past either sentence end.
	pub(crate) fn offset(self, start: usize, step: usize, len: usize) -> Option<usize> {
		match self {
			Direction::Forward => start.checked_add(step).filter(|&index| index < len),
			Direction::Reverse => start.checked_sub(step),
		}
	}
}

/// Parameters of a trie build pass.
///
/// # Invariants
/// - `1 <= depth <= MAX_DEPTH`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
	/// Maximum n-gram length (1 = single words only).
	depth: usize,

	/// Direction in which n-grams are read.
	pub direction: Direction,

	/// Language code handed to the tokenizer.
	pub language: String,

	/// Whether the tokenizer folds case.
	pub ignore_case: bool,
}

impl BuildOptions {
	/// Creates options for n-grams up to `depth` words.
	///
	/// # Errors
	/// Returns an error if `depth` is 0 or above [`MAX_DEPTH`].
	pub fn new(depth: usize) -> Result<Self> {
		let mut options = Self { depth: 1, direction: Direction::Forward, language: String::new(), ignore_case: true };
		options.set_depth(depth)?;
		Ok(options)
	}

	pub fn depth(&self) -> usize {
		self.depth
	}

	/// Sets the maximum n-gram length.
	///
	/// # Errors
	/// Returns an error if `depth` is 0 or above [`MAX_DEPTH`].
	pub fn set_depth(&mut self, depth: usize) -> Result<()> {
		if depth == 0 {
			return Err(TrieError::invalid_argument("depth must be >= 1"));
		}
		if depth > MAX_DEPTH {
			return Err(TrieError::invalid_argument(format!("depth must be <= {MAX_DEPTH}")));
		}
		self.depth = depth;
		Ok(())
	}

	pub fn with_direction(mut self, direction: Direction) -> Self {
		self.direction = direction;
		self
	}

	pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
		self.language = language.into();
		self
	}

	pub fn with_ignore_case(mut self, ignore_case: bool) -> Self {
		self.ignore_case = ignore_case;
		self
	}
}

/// Builds an n-gram count trie from tokenized sentences.
///
/// For every position whose token is allowlisted, the word's top-level node is
/// incremented, then the n-gram is extended one position at a time (forward
/// or backward) while the next token is also allowlisted, up to `depth`
/// words. A token outside the allowlist breaks the n-gram: adjacency is read
/// from the original sentence, never from the filtered one.
///
/// Complexity: O(tokens × depth) time, O(distinct n-grams) space.
pub struct TrieBuilder<'a, A: Allowlist + ?Sized> {
	allowlist: &'a A,
	options: BuildOptions,
	root: TrieNode,
	sentences: usize,
}

impl<'a, A: Allowlist + ?Sized> TrieBuilder<'a, A> {
	pub fn new(allowlist: &'a A, options: BuildOptions) -> Self {
		Self { allowlist, options, root: TrieNode::new(), sentences: 0 }
	}

	pub fn options(&self) -> &BuildOptions {
		&self.options
	}

	/// Number of non-empty sentences added so far.
	pub fn sentences(&self) -> usize {
		self.sentences
	}

	/// Adds one sentence given as tokens.
	///
	/// Empty sentences are skipped.
	pub fn add_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) {
		if tokens.is_empty() {
			return;
		}
		let allowlist = self.allowlist;
		let allowed = |token: &str| !token.is_empty() && !is_reserved_key(token) && allowlist.allows(token);
		let depth = self.options.depth;
		let direction = self.options.direction;

		for (start, first) in tokens.iter().enumerate() {
			let first = first.as_ref();
			if !allowed(first) {
				continue;
			}

			let mut node = self.root.child_or_insert(first);
			node.count += 1;

			for step in 1..depth {
				let Some(index) = direction.offset(start, step, tokens.len()) else {
					break;
				};
				let token = tokens[index].as_ref();
				if !allowed(token) {
					break;
				}
				node = node.child_or_insert(token);
				node.count += 1;
			}
		}
		self.sentences += 1;
	}

	/// Tokenizes and adds one raw sentence.
	pub fn add_sentence<T: Tokenizer + ?Sized>(&mut self, tokenizer: &T, text: &str) {
		let tokens = tokenize_words(tokenizer, text.trim(), &self.options.language, self.options.ignore_case);
		self.add_tokens(&tokens);
	}

	/// Returns the built trie.
	pub fn finish(self) -> TrieNode {
		log::debug!("Built trie from {} sentences ({} top-level words)", self.sentences, self.root.child_count());
		self.root
	}
}

/// Builds a trie from already tokenized sentences.
///
/// # Errors
/// Returns an error if `max_depth` is 0.
pub fn build<I, S, A>(sentences: I, allowlist: &A, max_depth: usize) -> Result<TrieNode>
where
	I: IntoIterator<Item = Vec<S>>,
	S: AsRef<str>,
	A: Allowlist + ?Sized,
{
	let mut builder = TrieBuilder::new(allowlist, BuildOptions::new(max_depth)?);
	for tokens in sentences {
		builder.add_tokens(&tokens);
	}
	Ok(builder.finish())
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;
	use crate::model::tokenize::UnicodeWordTokenizer;

	fn allow(words: &[&str]) -> HashSet<String> {
		words.iter().map(|w| w.to_string()).collect()
	}

	fn split(sentences: &[&str]) -> Vec<Vec<String>> {
		sentences.iter().map(|s| s.split_whitespace().map(str::to_owned).collect()).collect()
	}

	#[test]
	fn test_the_cat_bigrams() {
		let trie = build(split(&["the cat sat", "the cat ran"]), &allow(&["the", "cat", "sat", "ran"]), 2).unwrap();
		let json = serde_json::to_value(&trie).unwrap();
		assert_eq!(
			json,
			serde_json::json!({
				"the": {"__C": 2, "cat": {"__C": 2}},
				"cat": {"__C": 2, "sat": {"__C": 1}, "ran": {"__C": 1}},
				"sat": {"__C": 1},
				"ran": {"__C": 1}
			})
		);
	}

	#[test]
	fn test_disallowed_token_breaks_ngram() {
		let trie = build(split(&["the big cat"]), &allow(&["the", "cat"]), 3).unwrap();
		assert_eq!(trie.child("the").unwrap().count(), 1);
		assert!(trie.child("the").unwrap().is_leaf());
		assert!(trie.child("big").is_none());
		assert_eq!(trie.child("cat").unwrap().count(), 1);
	}

	#[test]
	fn test_depth_limits_ngram_length() {
		let trie = build(split(&["a b c d"]), &allow(&["a", "b", "c", "d"]), 3).unwrap();
		assert_eq!(trie.get_path(["a", "b", "c"]).unwrap().count(), 1);
		assert!(trie.get_path(["a", "b", "c", "d"]).is_none());
		assert_eq!(trie.max_depth(), 3);
	}

	#[test]
	fn test_repeated_ngram_counts_each_occurrence() {
		let trie = build(split(&["go go go"]), &allow(&["go"]), 2).unwrap();
		assert_eq!(trie.child("go").unwrap().count(), 3);
		assert_eq!(trie.get_path(["go", "go"]).unwrap().count(), 2);
	}

	#[test]
	fn test_reverse_direction_reads_preceding_words() {
		let options = BuildOptions::new(3).unwrap().with_direction(Direction::Reverse);
		let words = allow(&["the", "cat", "sat"]);
		let mut builder = TrieBuilder::new(&words, options);
		builder.add_tokens(&["the", "cat", "sat"]);
		let trie = builder.finish();
		assert_eq!(trie.get_path(["sat", "cat", "the"]).unwrap().count(), 1);
		assert!(trie.get_path(["the", "cat"]).is_none());
	}

	#[test]
	fn test_add_sentence_tokenizes_and_skips_empty() {
		let words = allow(&["hi", "there"]);
		let mut builder = TrieBuilder::new(&words, BuildOptions::new(2).unwrap());
		builder.add_sentence(&UnicodeWordTokenizer, "Hi, there!");
		builder.add_sentence(&UnicodeWordTokenizer, "   ");
		assert_eq!(builder.sentences(), 1);
		let trie = builder.finish();
		assert_eq!(trie.get_path(["hi", "there"]).unwrap().count(), 1);
	}

	#[test]
	fn test_reserved_tokens_are_never_path_segments() {
		let trie = build(split(&["a __C b"]), &allow(&["a", "__C", "b"]), 2).unwrap();
		assert!(trie.child("__C").is_none());
		assert!(trie.child("a").unwrap().is_leaf());
	}

	#[test]
	fn test_depth_bounds_are_validated() {
		assert!(BuildOptions::new(0).is_err());
		assert!(BuildOptions::new(MAX_DEPTH).is_ok());
		assert!(BuildOptions::new(MAX_DEPTH + 1).is_err());

		let mut options = BuildOptions::new(2).unwrap();
		assert!(options.set_depth(MAX_DEPTH + 1).is_err());
		assert_eq!(options.depth(), 2);
	}
}
