use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrieError};
use crate::io::for_each_sentence_pair;
use super::builder::Direction;
use super::example::ExampleRecord;
use super::frequency::FrequencyRanks;
use super::node::TrieNode;
use super::tokenize::{Tokenizer, tokenize_words};

/// Default number of examples kept per node or word.
pub const DEFAULT_MAX_EXAMPLES: usize = 3;

/// Parameters of an annotation or extraction pass.
///
/// # Invariants
/// - `max_examples >= 1`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotateOptions {
	max_examples: usize,

	/// Direction the trie was built in.
	pub direction: Direction,

	/// Language code handed to the tokenizer.
	pub language: String,

	/// Whether the tokenizer folds case.
	pub ignore_case: bool,
}

impl Default for AnnotateOptions {
	fn default() -> Self {
		Self {
			max_examples: DEFAULT_MAX_EXAMPLES,
			direction: Direction::Forward,
			language: String::new(),
			ignore_case: true,
		}
	}
}

impl AnnotateOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn max_examples(&self) -> usize {
		self.max_examples
	}

	/// Sets how many examples are kept per node (or per word when extracting).
	///
	/// # Errors
	/// Returns an error if `max_examples` is 0.
	pub fn set_max_examples(&mut self, max_examples: usize) -> Result<()> {
		if max_examples == 0 {
			return Err(TrieError::invalid_argument("max examples must be >= 1"));
		}
		self.max_examples = max_examples;
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

/// Normalized form of a target sentence used for deduplication.
///
/// Case-folded, with every character that is not alphanumeric removed, so
/// `"Hi, there!"` and `"hi there"` normalize identically.
pub fn normalize_sentence(text: &str) -> String {
	text.chars()
		.filter(|c| c.is_alphanumeric())
		.flat_map(char::to_lowercase)
		.collect()
}

/// Target sentences already seen, shared by every pass over every dataset.
#[derive(Clone, Debug, Default)]
pub struct SeenSentences {
	seen: HashSet<String>,
}

impl SeenSentences {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `text`, returning `false` if an equivalent sentence was seen before.
	pub fn insert(&mut self, text: &str) -> bool {
		self.seen.insert(normalize_sentence(text))
	}

	pub fn contains(&self, text: &str) -> bool {
		self.seen.contains(&normalize_sentence(text))
	}

	pub fn len(&self) -> usize {
		self.seen.len()
	}

	pub fn is_empty(&self) -> bool {
		self.seen.is_empty()
	}
}

/// Counters of an annotation or extraction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnotateSummary {
	/// Sentence pairs read.
	pub pairs: usize,
	/// Pairs skipped because a side was empty or tokenized to nothing.
	pub empty: usize,
	/// Pairs skipped as duplicates of an earlier target sentence.
	pub duplicates: usize,
	/// Sentences that matched at least one node or word.
	pub matched: usize,
	/// Candidate insertions that were retained, evictions included.
	pub retained: usize,
	/// Pairs skipped because a line was malformed.
	pub malformed: usize,
}

impl AnnotateSummary {
	pub fn absorb(&mut self, other: AnnotateSummary) {
		self.pairs += other.pairs;
		self.empty += other.empty;
		self.duplicates += other.duplicates;
		self.matched += other.matched;
		self.retained += other.retained;
		self.malformed += other.malformed;
	}
}

/// Outcome of the checks shared by annotation and extraction.
pub(crate) enum Screened {
	Empty,
	Duplicate,
	Accepted { tokens: Vec<String>, difficulty: f64 },
}

/// Skips empty pairs and duplicates, tokenizes and scores the target.
///
/// A sentence is marked seen before tokenization, so one that tokenizes to
/// nothing is not retried from a later dataset.
pub(crate) fn screen_sentence<T: Tokenizer + ?Sized>(
	tokenizer: &T,
	ranks: &FrequencyRanks,
	options: &AnnotateOptions,
	seen: &mut SeenSentences,
	target: &str,
	base: &str,
) -> Screened {
	if target.is_empty() || base.is_empty() {
		return Screened::Empty;
	}
	if !seen.insert(target) {
		return Screened::Duplicate;
	}
	let tokens = tokenize_words(tokenizer, target, &options.language, options.ignore_case);
	match ranks.difficulty(&tokens) {
		Some(difficulty) => Screened::Accepted { tokens, difficulty },
		None => Screened::Empty,
	}
}

/// Attaches the best example sentences to the nodes of a trie.
///
/// Every contiguous run of tokens that is a trie path, from every start
/// position and up to the trie's observed depth, receives the sentence as a
/// candidate. Each node keeps at most `max_examples` records, ranked by
/// dataset index first, then by difficulty.
pub struct ExampleAnnotator<'a, T: Tokenizer + ?Sized> {
	trie: &'a mut TrieNode,
	ranks: &'a FrequencyRanks,
	tokenizer: &'a T,
	options: AnnotateOptions,
	max_depth: usize,
}

impl<'a, T: Tokenizer + ?Sized> ExampleAnnotator<'a, T> {
	pub fn new(trie: &'a mut TrieNode, ranks: &'a FrequencyRanks, tokenizer: &'a T, options: AnnotateOptions) -> Self {
		let max_depth = trie.max_depth();
		Self { trie, ranks, tokenizer, options, max_depth }
	}

	pub fn options(&self) -> &AnnotateOptions {
		&self.options
	}

	/// Token paths of every node matched by `tokens`, sorted and deduplicated.
	pub fn matching_paths(&self, tokens: &[String]) -> Vec<Vec<String>> {
		let mut paths = Vec::new();
		for (start, first) in tokens.iter().enumerate() {
			let Some(mut node) = self.trie.child(first) else {
				continue;
			};
			let mut path = vec![first.clone()];
			paths.push(path.clone());

			for step in 1..self.max_depth {
				let Some(index) = self.options.direction.offset(start, step, tokens.len()) else {
					break;
				};
				let Some(child) = node.child(&tokens[index]) else {
					break;
				};
				node = child;
				path.push(tokens[index].clone());
				paths.push(path.clone());
			}
		}
		paths.sort_unstable();
		paths.dedup();
		paths
	}

	/// Offers one sentence pair from dataset `dataset_index`.
	pub fn annotate_sentence(
		&mut self,
		target: &str,
		base: &str,
		dataset_index: usize,
		seen: &mut SeenSentences,
		summary: &mut AnnotateSummary,
	) {
		summary.pairs += 1;
		let (target, base) = (target.trim(), base.trim());
		let (tokens, difficulty) = match screen_sentence(self.tokenizer, self.ranks, &self.options, seen, target, base) {
			Screened::Empty => {
				summary.empty += 1;
				return;
			}
			Screened::Duplicate => {
				summary.duplicates += 1;
				return;
			}
			Screened::Accepted { tokens, difficulty } => (tokens, difficulty),
		};

		let paths = self.matching_paths(&tokens);
		if paths.is_empty() {
			return;
		}
		summary.matched += 1;

		let max_examples = self.options.max_examples;
		for path in paths {
			let Some(node) = self.trie.get_path_mut(&path) else {
				continue;
			};
			let record = ExampleRecord::new(tokens.clone(), base.to_owned(), dataset_index, difficulty);
			if node.examples.offer(record, max_examples) {
				summary.retained += 1;
			}
		}
	}

	/// Offers every `(target, base)` pair of one in-memory dataset.
	pub fn annotate_pairs<I, S>(&mut self, pairs: I, dataset_index: usize, seen: &mut SeenSentences) -> AnnotateSummary
	where
		I: IntoIterator<Item = (S, S)>,
		S: AsRef<str>,
	{
		let mut summary = AnnotateSummary::default();
		for (target, base) in pairs {
			self.annotate_sentence(target.as_ref(), base.as_ref(), dataset_index, seen, &mut summary);
		}
		summary
	}

	/// Offers every line pair of two parallel sentence files.
	pub fn annotate_file_pair<P: AsRef<Path>>(
		&mut self,
		target: P,
		base: P,
		dataset_index: usize,
		seen: &mut SeenSentences,
	) -> Result<AnnotateSummary> {
		let mut summary = AnnotateSummary::default();
		let stats = for_each_sentence_pair(&target, &base, |t, b| {
			self.annotate_sentence(t, b, dataset_index, seen, &mut summary);
			if summary.pairs % 100_000 == 0 {
				log::info!("Processed {} sentences from {}", summary.pairs, target.as_ref().display());
			}
		})?;
		summary.malformed += stats.malformed;
		Ok(summary)
	}

	/// Runs one pass per `(target, base)` file pair, in priority order.
	///
	/// # Parameters
	/// - `datasets`: Parallel sentence files. The first pair is dataset 0, the highest priority.
	/// - `seen`: Sentences already used. Shared across passes and updated in place.
	///
	/// # Returns
	/// - `Ok(AnnotateSummary)`: Counters summed over every pass.
	/// - `Err(...)`: If a sentence file cannot be opened or read.
	///
	/// # Behavior
	/// - Line `i` of the target file is paired with line `i` of the base file.
	///   A pass ends when either file runs out of lines.
	/// - Each sentence is offered to every trie node it matches. A node keeps
	///   its best `max_examples` sentences, earlier datasets first.
	///
	/// # Notes
	/// - A sentence seen in an earlier pass, up to case and punctuation, is skipped.
	pub fn annotate_datasets(&mut self, datasets: &[(PathBuf, PathBuf)], seen: &mut SeenSentences) -> Result<AnnotateSummary> {
		let mut total = AnnotateSummary::default();
		for (index, (target, base)) in datasets.iter().enumerate() {
			log::info!("[Pair {}/{}] {} / {}", index + 1, datasets.len(), target.display(), base.display());
			let summary = self.annotate_file_pair(target, base, index, seen)?;
			log::info!(
				"Processed {} pairs ({} matched, {} duplicates, {} empty, {} malformed)",
				summary.pairs,
				summary.matched,
				summary.duplicates,
				summary.empty,
				summary.malformed
			);
			total.absorb(summary);
		}
		log::info!("Total unique sentences: {}", seen.len());
		Ok(total)
	}
}

/// Annotates `trie` with in-memory datasets given in priority order.
pub fn annotate<T, D, I, S>(
	trie: &mut TrieNode,
	datasets: D,
	ranks: &FrequencyRanks,
	tokenizer: &T,
	options: AnnotateOptions,
) -> AnnotateSummary
where
	T: Tokenizer + ?Sized,
	D: IntoIterator<Item = I>,
	I: IntoIterator<Item = (S, S)>,
	S: AsRef<str>,
{
	let mut annotator = ExampleAnnotator::new(trie, ranks, tokenizer, options);
	let mut seen = SeenSentences::new();
	let mut total = AnnotateSummary::default();
	for (index, pairs) in datasets.into_iter().enumerate() {
		total.absorb(annotator.annotate_pairs(pairs, index, &mut seen));
	}
	total
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;
	use crate::model::builder::{BuildOptions, TrieBuilder, build};
	use crate::model::tokenize::UnicodeWordTokenizer;

	fn pruned_the_cat() -> TrieNode {
		let allow: HashSet<String> = ["the", "cat", "sat", "ran"].iter().map(|w| w.to_string()).collect();
		let mut trie = build(vec![vec!["the", "cat", "sat"], vec!["the", "cat", "ran"]], &allow, 2).unwrap();
		trie.prune_by_count(2);
		trie
	}

	fn ranks() -> FrequencyRanks {
		FrequencyRanks::from_counts([("the", 2), ("cat", 2), ("sat", 1), ("ran", 1)])
	}

	fn options(max_examples: usize) -> AnnotateOptions {
		let mut options = AnnotateOptions::new().with_language("en");
		options.set_max_examples(max_examples).unwrap();
		options
	}

	#[test]
	fn test_single_example_keeps_easiest_sentence() {
		let mut trie = pruned_the_cat();
		let ranks = ranks();
		let pairs = vec![("the cat sat", "le chat s'assit"), ("the cat ran", "le chat courut")];
		let summary = annotate(&mut trie, [pairs], &ranks, &UnicodeWordTokenizer, options(1));

		assert_eq!(summary.matched, 2);
		let examples = trie.get_path(["the", "cat"]).unwrap().examples();
		assert_eq!(examples.len(), 1);
		assert_eq!(examples[0].target_tokens, vec!["the", "cat", "ran"]);
		assert_eq!(examples[0].base_sentence, "le chat courut");
	}

	#[test]
	fn test_duplicates_are_counted_once() {
		let mut trie = pruned_the_cat();
		let ranks = ranks();
		let pairs = vec![("Hi, there!", "Salut !"), ("hi there", "salut")];
		let summary = annotate(&mut trie, [pairs], &ranks, &UnicodeWordTokenizer, options(3));
		assert_eq!(summary.pairs, 2);
		assert_eq!(summary.duplicates, 1);
	}

	#[test]
	fn test_seen_sentences_carry_across_datasets() {
		let mut trie = pruned_the_cat();
		let ranks = ranks();
		let first = vec![("The cat!", "Le chat !")];
		let second = vec![("the cat", "le chat"), ("", "vide")];
		let summary = annotate(&mut trie, [first, second], &ranks, &UnicodeWordTokenizer, options(3));
		assert_eq!(summary.duplicates, 1);
		assert_eq!(summary.empty, 1);
		assert_eq!(trie.child("cat").unwrap().example_count(), 1);
	}

	#[test]
	fn test_lower_dataset_index_outranks_easier_sentence() {
		let mut trie = pruned_the_cat();
		let ranks = ranks();
		let first = vec![("the cat sat sat sat", "hard but preferred")];
		let second = vec![("the cat", "easy")];
		annotate(&mut trie, [first, second], &ranks, &UnicodeWordTokenizer, options(1));
		let examples = trie.get_path(["the", "cat"]).unwrap().examples();
		assert_eq!(examples[0].base_sentence, "hard but preferred");
		assert_eq!(examples[0].dataset_index, 0);
	}

	#[test]
	fn test_sentence_contributes_once_per_node() {
		let mut trie = pruned_the_cat();
		let ranks = ranks();
		annotate(&mut trie, [vec![("the cat and the cat", "twice")]], &ranks, &UnicodeWordTokenizer, options(3));
		assert_eq!(trie.get_path(["the", "cat"]).unwrap().example_count(), 1);
		assert_eq!(trie.child("the").unwrap().example_count(), 1);
	}

	#[test]
	fn test_reverse_matching_follows_preceding_words() {
		let allow: HashSet<String> = ["the", "cat", "sat"].iter().map(|w| w.to_string()).collect();
		let build_options = BuildOptions::new(2).unwrap().with_direction(Direction::Reverse);
		let mut builder = TrieBuilder::new(&allow, build_options);
		builder.add_tokens(&["the", "cat", "sat"]);
		let mut trie = builder.finish();

		let ranks = FrequencyRanks::from_ordered(["the", "cat", "sat"]);
		let options = options(2).with_direction(Direction::Reverse);
		annotate(&mut trie, [vec![("the cat sat", "x")]], &ranks, &UnicodeWordTokenizer, options);
		assert_eq!(trie.get_path(["sat", "cat"]).unwrap().example_count(), 1);
		assert_eq!(trie.get_path(["cat", "the"]).unwrap().example_count(), 1);
	}

	#[test]
	fn test_normalize_sentence() {
		assert_eq!(normalize_sentence("Hi, there!"), "hithere");
		assert_eq!(normalize_sentence("C'est l'été."), "cestlété");
		assert!(AnnotateOptions::new().set_max_examples(0).is_err());
	}
}
