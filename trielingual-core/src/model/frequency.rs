use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::error::Result;
use crate::io::{LineStats, for_each_line};
use super::tokenize::{Tokenizer, tokenize_words};

/// Decides which tokens may appear as trie path segments.
pub trait Allowlist: Sync {
	fn allows(&self, token: &str) -> bool;
}

impl Allowlist for HashSet<String> {
	fn allows(&self, token: &str) -> bool {
		self.contains(token)
	}
}

impl Allowlist for BTreeSet<String> {
	fn allows(&self, token: &str) -> bool {
		self.contains(token)
	}
}

impl<V: Sync> Allowlist for HashMap<String, V> {
	fn allows(&self, token: &str) -> bool {
		self.contains_key(token)
	}
}

/// Word → frequency rank table (0 = most frequent).
///
/// Used both as an allowlist and to score sentence difficulty.
/// Unknown words rank as `len()`, the worst possible rank.
#[derive(Clone, Debug, Default)]
pub struct FrequencyRanks {
	ranks: HashMap<String, usize>,
}

impl FrequencyRanks {
	/// Builds ranks from raw `(word, count)` pairs.
	///
	/// Words are ranked by descending count; equal counts are ordered by word
	/// so the result does not depend on the input order.
	pub fn from_counts<I, S>(counts: I) -> Self
	where
		I: IntoIterator<Item = (S, u64)>,
		S: Into<String>,
	{
		let sorted = sort_by_count(counts.into_iter().map(|(word, count)| (word.into(), count)).collect());
		Self::from_ordered(sorted.into_iter().map(|(word, _)| word))
	}

	/// Builds ranks from words already sorted most frequent first.
	///
	/// A repeated word keeps its first (best) rank; empty words are ignored.
	pub fn from_ordered<I, S>(words: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut ranks = HashMap::new();
		for word in words {
			let word = word.into();
			if word.is_empty() || ranks.contains_key(&word) {
				continue;
			}
			let rank = ranks.len();
			ranks.insert(word, rank);
		}
		Self { ranks }
	}

	/// Number of ranked words, also the rank given to unknown words.
	pub fn len(&self) -> usize {
		self.ranks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ranks.is_empty()
	}

	pub fn contains(&self, word: &str) -> bool {
		self.ranks.contains_key(word)
	}

	/// Rank of `word`, `None` if unknown.
	pub fn rank(&self, word: &str) -> Option<usize> {
		self.ranks.get(word).copied()
	}

	/// Rank of `word`, or the worst rank if unknown.
	pub fn rank_or_worst(&self, word: &str) -> usize {
		self.rank(word).unwrap_or(self.len())
	}

	/// Mean rank of `tokens` (lower is easier).
	///
	/// Unknown tokens count as the worst rank. Returns `None` for an empty slice.
	pub fn difficulty<S: AsRef<str>>(&self, tokens: &[S]) -> Option<f64> {
		if tokens.is_empty() {
			return None;
		}
		let total: usize = tokens.iter().map(|token| self.rank_or_worst(token.as_ref())).sum();
		Some(total as f64 / tokens.len() as f64)
	}

	/// Words sorted by rank, most frequent first.
	pub fn ordered_words(&self) -> Vec<&str> {
		let mut words: Vec<(&str, usize)> = self.ranks.iter().map(|(w, r)| (w.as_str(), *r)).collect();
		words.sort_by_key(|(_, rank)| *rank);
		words.into_iter().map(|(word, _)| word).collect()
	}
}

impl Allowlist for FrequencyRanks {
	fn allows(&self, token: &str) -> bool {
		self.contains(token)
	}
}

/// Sorts `(word, count)` pairs by descending count, then by word.
pub fn sort_by_count(mut counts: Vec<(String, u64)>) -> Vec<(String, u64)> {
	counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
	counts
}

/// Counts word occurrences over a stream of sentences.
#[derive(Debug, Default)]
pub struct WordCounter {
	counts: HashMap<String, u64>,
	sentences: usize,
}

impl WordCounter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Tokenizes one sentence and counts its words.
	pub fn add_sentence<T: Tokenizer + ?Sized>(&mut self, tokenizer: &T, text: &str, language: &str, ignore_case: bool) {
		for word in tokenize_words(tokenizer, text, language, ignore_case) {
			*self.counts.entry(word).or_insert(0) += 1;
		}
		self.sentences += 1;
	}

	/// Counts the words of every line of a corpus file.
	pub fn add_file<P, T>(&mut self, path: P, tokenizer: &T, language: &str, ignore_case: bool) -> Result<LineStats>
	where
		P: AsRef<Path>,
		T: Tokenizer + ?Sized,
	{
		let stats = for_each_line(&path, None, |line| {
			let line = line.trim();
			if !line.is_empty() {
				self.add_sentence(tokenizer, line, language, ignore_case);
			}
		})?;
		log::info!(
			"Counted {} lines of {} ({} distinct words so far)",
			stats.lines,
			path.as_ref().display(),
			self.distinct_words()
		);
		Ok(stats)
	}

	/// Adds the counts of another counter.
	pub fn merge(&mut self, other: WordCounter) {
		for (word, count) in other.counts {
			*self.counts.entry(word).or_insert(0) += count;
		}
		self.sentences += other.sentences;
	}

	/// Number of sentences seen.
	pub fn sentences(&self) -> usize {
		self.sentences
	}

	/// Number of distinct words seen.
	pub fn distinct_words(&self) -> usize {
		self.counts.len()
	}

	/// The `limit` most frequent words with their counts, most frequent first.
	pub fn most_frequent(self, limit: usize) -> Vec<(String, u64)> {
		let mut sorted = sort_by_count(self.counts.into_iter().collect());
		sorted.truncate(limit);
		sorted
	}
}

/// Keeps only the words present in `dictionary`, sorted by descending count.
///
/// Output shape matches the `[[word, count], ...]` common-words list.
pub fn filter_by_dictionary<I>(counts: I, dictionary: &HashSet<String>) -> Vec<(String, u64)>
where
	I: IntoIterator<Item = (String, u64)>,
{
	let kept: Vec<(String, u64)> = counts.into_iter().filter(|(word, _)| dictionary.contains(word)).collect();
	sort_by_count(kept)
}

/// The first `n` words of a list sorted most frequent first.
pub fn top_words(sorted: &[(String, u64)], n: usize) -> Vec<&str> {
	sorted.iter().take(n).map(|(word, _)| word.as_str()).collect()
}
