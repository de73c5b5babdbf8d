use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use trielingual_core::io::{load_trie, save_trie};
use trielingual_core::{
	AnnotateOptions, BuildOptions, ExampleAnnotator, FrequencyRanks, ParallelBuilder, ParallelOptions, PrunePolicy,
	SeenSentences, SentenceExtractor, TrieNode, UnicodeWordTokenizer, merge_files,
};

fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
	let path = dir.join(name);
	fs::write(&path, lines.join("\n")).unwrap();
	path
}

fn allowlist() -> HashSet<String> {
	["le", "chat", "chien", "dort", "mange"].iter().map(|w| w.to_string()).collect()
}

fn parallel_options(shard_lines: usize) -> ParallelOptions {
	let mut options = ParallelOptions::new();
	options.set_shard_lines(shard_lines).unwrap();
	options.set_parallelism(2).unwrap();
	options.set_merge_batch_size(2).unwrap();
	options
}

fn build_corpus_trie(dir: &Path) -> TrieNode {
	let corpus = write_lines(dir, "corpus.txt", &["Le chat dort.", "le chat mange", "Le chien dort", "", "le chat"]);
	let allowlist = allowlist();
	let build = BuildOptions::new(2).unwrap();
	ParallelBuilder::new(&allowlist, &UnicodeWordTokenizer, build, parallel_options(2))
		.build_file(&corpus, None)
		.unwrap()
}

#[test]
fn test_build_prune_annotate_and_reload() {
	let dir = tempfile::tempdir().unwrap();
	let mut trie = build_corpus_trie(dir.path());

	assert_eq!(trie.child("le").unwrap().count(), 4);
	assert_eq!(trie.get_path(["le", "chat"]).unwrap().count(), 3);
	assert_eq!(trie.get_path(["chien", "dort"]).unwrap().count(), 1);

	let mut policy = PrunePolicy::new();
	policy.set_min_count(2).unwrap();
	let summary = trie.prune(&policy);
	assert!(summary.by_count > 0);
	assert!(trie.child("chien").is_none());
	assert!(trie.get_path(["le", "chien"]).is_none());
	assert_eq!(trie.get_path(["le", "chat"]).unwrap().count(), 3);

	let datasets = vec![
		(
			write_lines(dir.path(), "a.fr", &["Le chat dort.", "le chien"]),
			write_lines(dir.path(), "a.en", &["The cat sleeps.", "the dog"]),
		),
		(
			write_lines(dir.path(), "b.fr", &["le chat", "Le chat, dort!"]),
			write_lines(dir.path(), "b.en", &["the cat", "The cat is sleeping."]),
		),
	];
	let ranks = FrequencyRanks::from_ordered(["le", "chat", "dort", "mange", "chien"]);
	let mut options = AnnotateOptions::new();
	options.set_max_examples(1).unwrap();

	let mut seen = SeenSentences::new();
	let summary = ExampleAnnotator::new(&mut trie, &ranks, &UnicodeWordTokenizer, options)
		.annotate_datasets(&datasets, &mut seen)
		.unwrap();
	assert_eq!(summary.pairs, 4);
	assert_eq!(summary.duplicates, 1);
	assert_eq!(seen.len(), 3);

	// The first dataset wins over an easier sentence from the second one
	let le_chat = trie.get_path(["le", "chat"]).unwrap();
	assert_eq!(le_chat.examples()[0].base_sentence, "The cat sleeps.");
	assert_eq!(le_chat.examples()[0].dataset_index, 0);

	for name in ["trie.json", "trie.bin"] {
		let path = dir.path().join(name);
		save_trie(&path, &trie, false).unwrap();
		let loaded = load_trie(&path).unwrap();
		assert_eq!(loaded.paths_with_counts(), trie.paths_with_counts());
		let dort = loaded.child("dort").unwrap();
		assert_eq!(dort.examples()[0].target_tokens, vec!["le", "chat", "dort"]);
		assert_eq!(dort.examples()[0].base_sentence, "The cat sleeps.");
	}
}

#[test]
fn test_extract_prefers_earlier_datasets() {
	let dir = tempfile::tempdir().unwrap();
	let datasets = vec![
		(
			write_lines(dir.path(), "a.fr", &["le chien mange le chat"]),
			write_lines(dir.path(), "a.en", &["the dog eats the cat"]),
		),
		(write_lines(dir.path(), "b.fr", &["le chat"]), write_lines(dir.path(), "b.en", &["the cat"])),
	];
	let words: HashSet<String> = ["chat".to_owned()].into_iter().collect();
	let ranks = FrequencyRanks::from_ordered(["le", "chat", "mange", "chien"]);
	let mut options = AnnotateOptions::new();
	options.set_max_examples(1).unwrap();

	let mut extractor = SentenceExtractor::new(&words, &ranks, &UnicodeWordTokenizer, options);
	let summary = extractor.add_datasets(&datasets, &mut SeenSentences::new()).unwrap();
	assert_eq!(summary.pairs, 2);
	assert_eq!(extractor.covered_words(), 1);

	let entries = extractor.finish();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].base, "the dog eats the cat");
}

#[test]
fn test_merge_saved_shards_matches_single_build() {
	let dir = tempfile::tempdir().unwrap();
	let whole = build_corpus_trie(dir.path());

	let allowlist = allowlist();
	let builder = ParallelBuilder::new(&allowlist, &UnicodeWordTokenizer, BuildOptions::new(2).unwrap(), parallel_options(10));
	let corpus = dir.path().join("corpus.txt");
	let first = builder.build_file(&corpus, Some(0..2)).unwrap();
	let second = builder.build_file(&corpus, Some(2..5)).unwrap();
	save_trie(dir.path().join("first.json"), &first, true).unwrap();
	save_trie(dir.path().join("second.bin"), &second, false).unwrap();

	let merged = merge_files(&[dir.path().join("first.json"), dir.path().join("second.bin")], &parallel_options(10)).unwrap();
	assert_eq!(merged.paths_with_counts(), whole.paths_with_counts());
	assert!(dir.path().join("first.json").exists());
}
