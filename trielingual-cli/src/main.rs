use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};

use trielingual_core::io;
use trielingual_core::model::frequency::{filter_by_dictionary, top_words};
use trielingual_core::{
	AnnotateOptions, BuildOptions, Direction, ExampleAnnotator, FrequencyRanks, ParallelBuilder, ParallelOptions,
	PrunePolicy, SeenSentences, SentenceExtractor, UnicodeWordTokenizer, WordCounter, merge_files,
};

/// Builds, prunes and annotates n-gram collocation tries from sentence corpora.
#[derive(Parser, Debug)]
#[command(name = "trielingual", author, version, about, long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Counts word frequencies over corpus files
	Freq(FreqArgs),

	/// Builds an n-gram count trie from a corpus
	Build(BuildArgs),

	/// Merges several tries into one
	Merge(MergeArgs),

	/// Prunes a trie by depth, count and per-level top-K
	Prune(PruneArgs),

	/// Attaches curriculum levels to top-level words
	Levels(LevelsArgs),

	/// Attaches the easiest example sentences to trie nodes
	Annotate(AnnotateArgs),

	/// Extracts the easiest example sentences for dictionary words
	Extract(ExtractArgs),

	/// Prints statistics about a trie
	Stats(StatsArgs),
}

#[derive(Args, Debug)]
struct TokenizeArgs {
	/// Language code handed to the tokenizer.
	#[arg(long, default_value = "")]
	language: String,

	/// Keep the original case instead of lowercasing tokens.
	#[arg(long, default_value = "false")]
	keep_case: bool,
}

#[derive(Args, Debug)]
struct ParallelArgs {
	/// Lines per shard.
	#[arg(long)]
	shard_lines: Option<usize>,

	/// Worker threads (defaults to the number of CPUs).
	#[arg(long)]
	parallelism: Option<usize>,

	/// Tries merged together by one merge task.
	#[arg(long)]
	merge_batch_size: Option<usize>,

	/// Lossy: prune each shard below this count before merging.
	#[arg(long)]
	shard_min_count: Option<u64>,

	/// Spill shard tries to a temporary directory under this path.
	#[arg(long)]
	spill_dir: Option<PathBuf>,

	/// Keep the spilled shard tries once done, to merge them again later.
	#[arg(long, default_value = "false", requires = "spill_dir")]
	keep_spill: bool,
}

impl ParallelArgs {
	fn options(&self) -> anyhow::Result<ParallelOptions> {
		let mut options = ParallelOptions::new();
		if let Some(shard_lines) = self.shard_lines {
			options.set_shard_lines(shard_lines)?;
		}
		if let Some(parallelism) = self.parallelism {
			options.set_parallelism(parallelism)?;
		}
		if let Some(batch) = self.merge_batch_size {
			options.set_merge_batch_size(batch)?;
		}
		if let Some(min_count) = self.shard_min_count {
			options.set_shard_min_count(min_count)?;
		}
		if let Some(dir) = &self.spill_dir {
			options.set_spill_dir(dir);
		}
		options.set_keep_spill(self.keep_spill)?;
		Ok(options)
	}
}

#[derive(Args, Debug)]
struct FreqArgs {
	/// Corpus files, one sentence per line.
	#[arg(required = true)]
	inputs: Vec<PathBuf>,

	#[command(flatten)]
	tokenize: TokenizeArgs,

	/// Keep only the most frequent words.
	#[arg(long, default_value = "50000")]
	limit: usize,

	/// Keep only words that are keys of this dictionary; writes `[[word, count], ...]`.
	#[arg(long)]
	dictionary: Option<PathBuf>,

	/// With `--dictionary`, keep only the N most frequent remaining words.
	#[arg(long)]
	top: Option<usize>,

	/// Output JSON file.
	#[arg(short, long)]
	output: PathBuf,
}

#[derive(Args, Debug)]
struct BuildArgs {
	/// Corpus file, one sentence per line.
	corpus: PathBuf,

	/// Frequency table whose words form the allowlist.
	#[arg(long)]
	allowlist: PathBuf,

	/// Only allow the N most frequent words of the table.
	#[arg(long)]
	top_words: Option<usize>,

	/// Maximum n-gram length.
	#[arg(long, default_value = "3")]
	depth: usize,

	/// Build n-grams from each word and the words before it.
	#[arg(long, default_value = "false")]
	reverse: bool,

	/// Only build from lines in `START..END`.
	#[arg(long, value_parser = parse_range)]
	lines: Option<Range<usize>>,

	#[command(flatten)]
	tokenize: TokenizeArgs,

	#[command(flatten)]
	parallel: ParallelArgs,

	/// Output trie (`.bin` selects the binary format). Defaults to the corpus path with a `.json` extension.
	#[arg(short, long)]
	output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MergeArgs {
	/// Trie files to merge.
	#[arg(required = true)]
	inputs: Vec<PathBuf>,

	#[command(flatten)]
	parallel: ParallelArgs,

	/// Output trie.
	#[arg(short, long)]
	output: PathBuf,
}

#[derive(Args, Debug)]
struct PruneArgs {
	/// Input trie.
	input: PathBuf,

	/// Remove nodes whose count is below this value.
	#[arg(long)]
	min_count: Option<u64>,

	/// Deepest level kept (0 = single words only).
	#[arg(long)]
	max_depth: Option<usize>,

	/// Children kept per generation below each word, e.g. `50,10,3`.
	#[arg(long, value_delimiter = ',')]
	children_per_level: Vec<usize>,

	/// Remove every count from the output.
	#[arg(long, default_value = "false")]
	strip_counts: bool,

	/// Pretty-print JSON output.
	#[arg(long, default_value = "false")]
	pretty: bool,

	/// Output trie.
	#[arg(short, long)]
	output: PathBuf,
}

#[derive(Args, Debug)]
struct LevelsArgs {
	/// Input trie.
	trie: PathBuf,

	/// `word<TAB>level` file.
	#[arg(long)]
	levels: PathBuf,

	/// Output trie.
	#[arg(short, long)]
	output: PathBuf,
}

#[derive(Args, Debug)]
struct ExampleArgs {
	/// Word frequency table used to score sentence difficulty.
	#[arg(long)]
	freq_file: PathBuf,

	/// Target and base sentence files. Repeat for more datasets; earlier pairs take precedence.
	#[arg(long, num_args = 2, value_names = ["TARGET", "BASE"], required = true)]
	sentence_files: Vec<PathBuf>,

	#[command(flatten)]
	tokenize: TokenizeArgs,
}

impl ExampleArgs {
	fn datasets(&self) -> Vec<(PathBuf, PathBuf)> {
		self.sentence_files
			.chunks_exact(2)
			.map(|pair| (pair[0].clone(), pair[1].clone()))
			.collect()
	}

	fn options(&self, max_examples: usize, direction: Direction) -> anyhow::Result<AnnotateOptions> {
		let mut options = AnnotateOptions::new()
			.with_direction(direction)
			.with_language(self.tokenize.language.clone())
			.with_ignore_case(!self.tokenize.keep_case);
		options.set_max_examples(max_examples)?;
		Ok(options)
	}
}

#[derive(Args, Debug)]
struct AnnotateArgs {
	/// Input trie.
	trie: PathBuf,

	#[command(flatten)]
	examples: ExampleArgs,

	/// Examples kept per node.
	#[arg(long, default_value = "3")]
	max_examples_per_node: usize,

	/// The trie holds n-grams ending at each word.
	#[arg(long, default_value = "false")]
	reverse: bool,

	/// Pretty-print JSON output.
	#[arg(long, default_value = "false")]
	pretty: bool,

	/// Output trie.
	#[arg(short, long)]
	output: PathBuf,
}

#[derive(Args, Debug)]
struct ExtractArgs {
	/// Dictionary JSON whose keys are the words to illustrate.
	#[arg(long)]
	dict_file: PathBuf,

	#[command(flatten)]
	examples: ExampleArgs,

	/// Sentences kept per word.
	#[arg(long, default_value = "3")]
	max_sentences: usize,

	/// Output sentence dataset.
	#[arg(short, long)]
	output: PathBuf,
}

#[derive(Args, Debug)]
struct StatsArgs {
	/// Trie to inspect.
	trie: PathBuf,
}

/// Parses `START..END` into a half-open line range.
fn parse_range(s: &str) -> Result<Range<usize>, String> {
	let (start, end) = s.split_once("..").ok_or_else(|| format!("expected START..END, got '{s}'"))?;
	let start = if start.is_empty() { 0 } else { start.parse().map_err(|e| format!("invalid start: {e}"))? };
	let end = if end.is_empty() { usize::MAX } else { end.parse().map_err(|e| format!("invalid end: {e}"))? };
	if start > end {
		return Err(format!("start {start} is after end {end}"));
	}
	Ok(start..end)
}

fn direction(reverse: bool) -> Direction {
	if reverse { Direction::Reverse } else { Direction::Forward }
}

fn run_freq(args: FreqArgs) -> anyhow::Result<()> {
	let mut counter = WordCounter::new();
	for input in &args.inputs {
		counter
			.add_file(input, &UnicodeWordTokenizer, &args.tokenize.language, !args.tokenize.keep_case)
			.with_context(|| format!("reading {}", input.display()))?;
	}
	log::info!("{} sentences, {} distinct words", counter.sentences(), counter.distinct_words());
	let counts = counter.most_frequent(args.limit);

	match &args.dictionary {
		Some(dictionary) => {
			let words = io::load_word_set(dictionary).with_context(|| format!("loading {}", dictionary.display()))?;
			let mut filtered = filter_by_dictionary(counts, &words);
			if let Some(top) = args.top {
				filtered.truncate(top);
			}
			log::info!("{} words kept after dictionary filtering", filtered.len());
			io::save_json(&args.output, &filtered, false)?;
		}
		None => {
			let map: BTreeMap<String, u64> = counts.into_iter().collect();
			io::save_json(&args.output, &map, false)?;
		}
	}
	log::info!("Word frequencies saved to {}", args.output.display());
	Ok(())
}

fn run_build(args: BuildArgs) -> anyhow::Result<()> {
	let counts = io::load_word_counts(&args.allowlist).with_context(|| format!("loading {}", args.allowlist.display()))?;
	let limit = args.top_words.unwrap_or(counts.len());
	let allowlist = FrequencyRanks::from_ordered(top_words(&counts, limit));
	log::info!("Allowlist: {} words", allowlist.len());

	let build = BuildOptions::new(args.depth)?
		.with_direction(direction(args.reverse))
		.with_language(args.tokenize.language.clone())
		.with_ignore_case(!args.tokenize.keep_case);

	let builder = ParallelBuilder::new(&allowlist, &UnicodeWordTokenizer, build, args.parallel.options()?);
	let trie = builder
		.build_file(&args.corpus, args.lines.clone())
		.with_context(|| format!("building from {}", args.corpus.display()))?;

	let output = match args.output {
		Some(output) => output,
		None => io::build_output_path(&args.corpus, "json")?,
	};
	io::save_trie(&output, &trie, false)?;
	log::info!("Trie saved to {}", output.display());
	Ok(())
}

fn run_merge(args: MergeArgs) -> anyhow::Result<()> {
	let trie = merge_files(&args.inputs, &args.parallel.options()?)?;
	io::save_trie(&args.output, &trie, false)?;
	log::info!("Merged {} tries into {}", args.inputs.len(), args.output.display());
	Ok(())
}

fn run_prune(args: PruneArgs) -> anyhow::Result<()> {
	let mut policy = PrunePolicy::new();
	if let Some(min_count) = args.min_count {
		policy.set_min_count(min_count)?;
	}
	if let Some(max_depth) = args.max_depth {
		policy.set_max_depth(max_depth);
	}
	if !args.children_per_level.is_empty() {
		policy.set_children_per_level(args.children_per_level.clone())?;
	}

	let mut trie = io::load_trie(&args.input).with_context(|| format!("loading {}", args.input.display()))?;
	trie.prune(&policy);
	if args.strip_counts {
		trie.strip_counts();
	}
	io::save_trie(&args.output, &trie, args.pretty)?;
	log::info!("Pruned trie saved to {}", args.output.display());
	Ok(())
}

fn run_levels(args: LevelsArgs) -> anyhow::Result<()> {
	let mut trie = io::load_trie(&args.trie).with_context(|| format!("loading {}", args.trie.display()))?;
	let (levels, stats) = io::load_levels(&args.levels)?;
	let applied = trie.apply_levels(levels);
	log::info!("Applied {applied} levels ({} malformed lines skipped)", stats.malformed);
	io::save_trie(&args.output, &trie, false)?;
	Ok(())
}

fn run_annotate(args: AnnotateArgs) -> anyhow::Result<()> {
	let mut trie = io::load_trie(&args.trie).with_context(|| format!("loading {}", args.trie.display()))?;
	let ranks = io::load_frequency_ranks(&args.examples.freq_file)?;
	log::info!("Loaded {} word frequencies, trie depth {}", ranks.len(), trie.max_depth());

	let options = args.examples.options(args.max_examples_per_node, direction(args.reverse))?;
	let mut seen = SeenSentences::new();
	let summary = ExampleAnnotator::new(&mut trie, &ranks, &UnicodeWordTokenizer, options)
		.annotate_datasets(&args.examples.datasets(), &mut seen)?;
	log::info!(
		"{} sentences matched, {} nodes with examples",
		summary.matched,
		trie.nodes_with_examples()
	);

	io::save_trie(&args.output, &trie, args.pretty)?;
	log::info!("Trie with examples saved to {}", args.output.display());
	Ok(())
}

fn run_extract(args: ExtractArgs) -> anyhow::Result<()> {
	let words = io::load_word_set(&args.dict_file).with_context(|| format!("loading {}", args.dict_file.display()))?;
	let ranks = io::load_frequency_ranks(&args.examples.freq_file)?;
	if words.is_empty() {
		bail!("dictionary {} has no words", args.dict_file.display());
	}

	let options = args.examples.options(args.max_sentences, Direction::Forward)?;
	let mut seen = SeenSentences::new();
	let mut extractor = SentenceExtractor::new(&words, &ranks, &UnicodeWordTokenizer, options);
	extractor.add_datasets(&args.examples.datasets(), &mut seen)?;
	let sentences = extractor.finish();

	io::save_json(&args.output, &sentences, false)?;
	log::info!("{} sentences saved to {}", sentences.len(), args.output.display());
	Ok(())
}

fn run_stats(args: StatsArgs) -> anyhow::Result<()> {
	let trie = io::load_trie(&args.trie).with_context(|| format!("loading {}", args.trie.display()))?;
	println!("Top-level words: {}", trie.child_count());
	println!("Max depth: {}", trie.max_depth());
	for (depth, nodes) in trie.depth_histogram().iter().enumerate() {
		println!("  depth {depth}: {nodes} nodes");
	}
	println!("Nodes with examples: {}", trie.nodes_with_examples());
	Ok(())
}

fn main() -> anyhow::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	match Cli::parse().command {
		Command::Freq(args) => run_freq(args),
		Command::Build(args) => run_build(args),
		Command::Merge(args) => run_merge(args),
		Command::Prune(args) => run_prune(args),
		Command::Levels(args) => run_levels(args),
		Command::Annotate(args) => run_annotate(args),
		Command::Extract(args) => run_extract(args),
		Command::Stats(args) => run_stats(args),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_range() {
		assert_eq!(parse_range("10..20").unwrap(), 10..20);
		assert_eq!(parse_range("..5").unwrap(), 0..5);
		assert_eq!(parse_range("7..").unwrap(), 7..usize::MAX);
		assert!(parse_range("5..2").is_err());
		assert!(parse_range("12").is_err());
	}

	#[test]
	fn test_cli_definition_is_valid() {
		use clap::CommandFactory;
		Cli::command().debug_assert();
	}

	#[test]
	fn test_keep_spill_requires_spill_dir() {
		assert!(Cli::try_parse_from(["trielingual", "merge", "a.json", "-o", "out.json", "--keep-spill"]).is_err());

		let cli = Cli::try_parse_from([
			"trielingual", "merge", "a.json", "-o", "out.json", "--keep-spill", "--spill-dir", "spill",
		])
		.unwrap();
		let Command::Merge(args) = cli.command else {
			panic!("expected merge");
		};
		assert!(args.parallel.options().unwrap().keep_spill());
	}

	#[test]
	fn test_sentence_files_pair_up() {
		let cli = Cli::try_parse_from([
			"trielingual", "extract", "--dict-file", "d.json", "--freq-file", "f.json",
			"--sentence-files", "a.fr", "a.en", "--sentence-files", "b.fr", "b.en", "-o", "out.json",
		])
		.unwrap();
		let Command::Extract(args) = cli.command else {
			panic!("expected extract");
		};
		assert_eq!(args.examples.datasets(), vec![
			(PathBuf::from("a.fr"), PathBuf::from("a.en")),
			(PathBuf::from("b.fr"), PathBuf::from("b.en")),
		]);
	}
}
