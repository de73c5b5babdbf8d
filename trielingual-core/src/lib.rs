//! Collocation index library.
//!
//! Builds a compact trie of word n-gram counts from large sentence corpora,
//! prunes it to a deployable size and annotates its nodes with the easiest
//! example sentences:
//! - N-gram count trie construction, sequential or sharded in parallel
//! - Threshold, depth and top-K-per-level pruning
//! - Associative merging of tries
//! - Bounded, priority-ordered example sentence selection
//!
//! Tokenization is pluggable through [`model::tokenize::Tokenizer`].

/// Trie algorithms and their parameter types.
pub mod model;

/// File helpers: line passes over corpora, trie and frequency table loading and saving.
pub mod io;

/// Error type shared by the crate.
pub mod error;

pub use error::{Result, TrieError};
pub use model::annotate::{AnnotateOptions, AnnotateSummary, ExampleAnnotator, SeenSentences, annotate};
pub use model::builder::{BuildOptions, Direction, TrieBuilder, build};
pub use model::example::ExampleRecord;
pub use model::extract::{SentenceEntry, SentenceExtractor, extract};
pub use model::frequency::{Allowlist, FrequencyRanks, WordCounter};
pub use model::merge::{merge, merge_all};
pub use model::node::TrieNode;
pub use model::parallel::{ParallelBuilder, ParallelOptions, merge_files};
pub use model::prune::{PrunePolicy, PruneSummary};
pub use model::tokenize::{Tokenizer, UnicodeWordTokenizer};
