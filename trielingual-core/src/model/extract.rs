use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::io::for_each_sentence_pair;
use super::annotate::{AnnotateOptions, AnnotateSummary, Screened, SeenSentences, screen_sentence};
use super::example::{ExampleRecord, ExampleSet};
use super::frequency::FrequencyRanks;
use super::tokenize::Tokenizer;

/// One entry of the standalone sentence dataset: `{"t": [tokens], "b": base}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentenceEntry {
	#[serde(rename = "t")]
	pub tokens: Vec<String>,
	#[serde(rename = "b")]
	pub base: String,
}

/// Collects the best example sentences for each word of a dictionary.
///
/// Same deduplication, difficulty and ranking as the trie annotator, but a
/// sentence matches every dictionary word it contains, and the result is a
/// flat, deduplicated sentence list instead of an annotated trie.
pub struct SentenceExtractor<'a, T: Tokenizer + ?Sized> {
	words: &'a HashSet<String>,
	ranks: &'a FrequencyRanks,
	tokenizer: &'a T,
	options: AnnotateOptions,
	best: HashMap<String, ExampleSet>,
}

impl<'a, T: Tokenizer + ?Sized> SentenceExtractor<'a, T> {
	pub fn new(words: &'a HashSet<String>, ranks: &'a FrequencyRanks, tokenizer: &'a T, options: AnnotateOptions) -> Self {
		Self { words, ranks, tokenizer, options, best: HashMap::new() }
	}

	/// Number of dictionary words with at least one sentence.
	pub fn covered_words(&self) -> usize {
		self.best.len()
	}

	/// Offers one sentence pair from dataset `dataset_index`.
	pub fn add_sentence(
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

		let mut matched: Vec<&String> = tokens.iter().filter(|token| self.words.contains(*token)).collect();
		matched.sort_unstable();
		matched.dedup();
		if matched.is_empty() {
			return;
		}
		summary.matched += 1;

		for word in matched {
			let record = ExampleRecord::new(tokens.clone(), base.to_owned(), dataset_index, difficulty);
			let set = self.best.entry(word.clone()).or_default();
			if set.offer(record, self.options.max_examples()) {
				summary.retained += 1;
			}
		}
	}

	/// Offers every line pair of two parallel sentence files.
	pub fn add_file_pair<P: AsRef<Path>>(
		&mut self,
		target: P,
		base: P,
		dataset_index: usize,
		seen: &mut SeenSentences,
	) -> Result<AnnotateSummary> {
		let mut summary = AnnotateSummary::default();
		let stats = for_each_sentence_pair(&target, &base, |t, b| {
			self.add_sentence(t, b, dataset_index, seen, &mut summary);
		})?;
		summary.malformed += stats.malformed;
		Ok(summary)
	}

	/// Runs one pass per `(target, base)` file pair, in priority order.
	pub fn add_datasets(&mut self, datasets: &[(PathBuf, PathBuf)], seen: &mut SeenSentences) -> Result<AnnotateSummary> {
		let mut total = AnnotateSummary::default();
		for (index, (target, base)) in datasets.iter().enumerate() {
			log::info!("Processing {} / {}", target.display(), base.display());
			total.absorb(self.add_file_pair(target, base, index, seen)?);
		}
		log::info!(
			"Found sentences for {}/{} words ({} pairs read)",
			self.covered_words(),
			self.words.len(),
			total.pairs
		);
		Ok(total)
	}

	/// Returns the retained sentences, best first, deduplicated by `(tokens, base)`.
	///
	/// A sentence retained for several words appears once, at the rank of
	/// its best occurrence. Ties are ordered by tokens then base.
	pub fn finish(self) -> Vec<SentenceEntry> {
		let mut records: Vec<ExampleRecord> = self.best.into_values().flat_map(ExampleSet::into_sorted_vec).collect();
		records.sort_by(|a, b| {
			b.priority()
				.cmp(&a.priority())
				.then_with(|| a.target_tokens.cmp(&b.target_tokens))
				.then_with(|| a.base_sentence.cmp(&b.base_sentence))
		});

		let mut emitted = HashSet::new();
		let mut entries = Vec::new();
		for record in records {
			let entry = SentenceEntry { tokens: record.target_tokens, base: record.base_sentence };
			if emitted.insert(entry.clone()) {
				entries.push(entry);
			}
		}
		log::info!("Total unique sentences: {}", entries.len());
		entries
	}
}

/// Extracts the best sentences for `words` from in-memory datasets given in priority order.
pub fn extract<T, D, I, S>(
	words: &HashSet<String>,
	datasets: D,
	ranks: &FrequencyRanks,
	tokenizer: &T,
	options: AnnotateOptions,
) -> Vec<SentenceEntry>
where
	T: Tokenizer + ?Sized,
	D: IntoIterator<Item = I>,
	I: IntoIterator<Item = (S, S)>,
	S: AsRef<str>,
{
	let mut extractor = SentenceExtractor::new(words, ranks, tokenizer, options);
	let mut seen = SeenSentences::new();
	let mut summary = AnnotateSummary::default();
	for (index, pairs) in datasets.into_iter().enumerate() {
		for (target, base) in pairs {
			extractor.add_sentence(target.as_ref(), base.as_ref(), index, &mut seen, &mut summary);
		}
	}
	extractor.finish()
}
