use std::fs;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;

use crate::error::{Result, TrieError};
use crate::io::{self, LineStats};
use super::builder::{BuildOptions, TrieBuilder};
use super::frequency::Allowlist;
use super::node::TrieNode;
use super::tokenize::Tokenizer;

/// Default number of corpus lines per shard.
pub const DEFAULT_SHARD_LINES: usize = 1_000_000;

/// Default number of tries merged together by one merge task.
pub const DEFAULT_MERGE_BATCH_SIZE: usize = 10;

/// Tunables of the sharded build and the batched merge.
///
/// # Invariants
/// - `shard_lines >= 1`
/// - `parallelism >= 1`
/// - `merge_batch_size >= 2`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParallelOptions {
	shard_lines: usize,
	parallelism: usize,
	merge_batch_size: usize,
	shard_min_count: Option<u64>,
	spill_dir: Option<PathBuf>,
	keep_spill: bool,
}

impl Default for ParallelOptions {
	fn default() -> Self {
		Self {
			shard_lines: DEFAULT_SHARD_LINES,
			parallelism: num_cpus::get().max(1),
			merge_batch_size: DEFAULT_MERGE_BATCH_SIZE,
			shard_min_count: None,
			spill_dir: None,
			keep_spill: false,
		}
	}
}

impl ParallelOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn shard_lines(&self) -> usize {
		self.shard_lines
	}

	pub fn parallelism(&self) -> usize {
		self.parallelism
	}

	pub fn merge_batch_size(&self) -> usize {
		self.merge_batch_size
	}

	pub fn shard_min_count(&self) -> Option<u64> {
		self.shard_min_count
	}

	pub fn spill_dir(&self) -> Option<&Path> {
		self.spill_dir.as_deref()
	}

	pub fn keep_spill(&self) -> bool {
		self.keep_spill
	}

	/// # Errors
	/// Returns an error if `shard_lines` is 0.
	pub fn set_shard_lines(&mut self, shard_lines: usize) -> Result<()> {
		if shard_lines == 0 {
			return Err(TrieError::invalid_argument("shard lines must be >= 1"));
		}
		self.shard_lines = shard_lines;
		Ok(())
	}

	/// # Errors
	/// Returns an error if `parallelism` is 0.
	pub fn set_parallelism(&mut self, parallelism: usize) -> Result<()> {
		if parallelism == 0 {
			return Err(TrieError::invalid_argument("parallelism must be >= 1"));
		}
		self.parallelism = parallelism;
		Ok(())
	}

	/// # Errors
	/// Returns an error if `merge_batch_size` is below 2.
	pub fn set_merge_batch_size(&mut self, merge_batch_size: usize) -> Result<()> {
		if merge_batch_size < 2 {
			return Err(TrieError::invalid_argument("merge batch size must be >= 2"));
		}
		self.merge_batch_size = merge_batch_size;
		Ok(())
	}

	/// Prunes every shard trie below `min_count` before merging.
	///
	/// Lossy: an n-gram spread thinly over many shards can be dropped even
	/// though its global count is above the threshold.
	///
	/// # Errors
	/// Returns an error if `min_count` is 0.
	pub fn set_shard_min_count(&mut self, min_count: u64) -> Result<()> {
		if min_count == 0 {
			return Err(TrieError::invalid_argument("shard min count must be >= 1"));
		}
		self.shard_min_count = Some(min_count);
		Ok(())
	}

	/// Spills shard and intermediate tries to a temporary directory under `dir`.
	pub fn set_spill_dir<P: Into<PathBuf>>(&mut self, dir: P) {
		self.spill_dir = Some(dir.into());
	}

	/// Keeps the spill directory and every spilled trie after the build,
	/// so shard tries can be merged again later with [`merge_files`].
	///
	/// # Errors
	/// Returns an error if no spill directory is set.
	pub fn set_keep_spill(&mut self, keep: bool) -> Result<()> {
		if keep && self.spill_dir.is_none() {
			return Err(TrieError::invalid_argument("keeping spilled tries requires a spill directory"));
		}
		self.keep_spill = keep;
		Ok(())
	}
}

/// A contiguous, half-open range of corpus lines built by one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shard {
	pub id: usize,
	pub lines: Range<usize>,
}

/// Splits `lines` into consecutive shards of at most `shard_lines` lines.
pub fn plan_shards(lines: Range<usize>, shard_lines: usize) -> Vec<Shard> {
	let shard_lines = shard_lines.max(1);
	let mut shards = Vec::new();
	let mut start = lines.start;
	while start < lines.end {
		let end = start.saturating_add(shard_lines).min(lines.end);
		shards.push(Shard { id: shards.len(), lines: start..end });
		start = end;
	}
	shards
}

/// A shard or intermediate trie, either held in memory or spilled to disk.
enum ShardTrie {
	Memory(TrieNode),
	/// An input file, left in place after loading.
	OnDisk(PathBuf),
	/// A spill file, deleted once loaded.
	Spilled(PathBuf),
}

impl ShardTrie {
	fn load(self) -> Result<TrieNode> {
		match self {
			ShardTrie::Memory(trie) => Ok(trie),
			ShardTrie::OnDisk(path) => io::load_trie(path),
			ShardTrie::Spilled(path) => {
				let trie = io::load_trie(&path)?;
				fs::remove_file(&path)?;
				Ok(trie)
			}
		}
	}
}

/// Temporary directory holding spilled tries, removed on drop unless kept.
struct Spill {
	dir: tempfile::TempDir,
	keep: bool,
}

impl Spill {
	fn open(options: &ParallelOptions) -> Result<Option<Self>> {
		let Some(parent) = &options.spill_dir else {
			return Ok(None);
		};
		fs::create_dir_all(parent)?;
		let dir = tempfile::Builder::new().prefix("trielingual-").tempdir_in(parent)?;
		log::debug!("Spilling tries to {}", dir.path().display());
		Ok(Some(Self { dir, keep: options.keep_spill }))
	}

	fn store(&self, name: &str, trie: &TrieNode) -> Result<ShardTrie> {
		let path = self.dir.path().join(format!("{name}.{}", io::BINARY_EXTENSION));
		io::save_trie(&path, trie, false)?;
		if self.keep {
			return Ok(ShardTrie::OnDisk(path));
		}
		Ok(ShardTrie::Spilled(path))
	}

	/// Removes the directory, or leaves it in place when kept.
	fn close(self) {
		if self.keep {
			let dir = self.dir.keep();
			log::info!("Spilled tries kept in {}", dir.display());
		}
	}
}

fn keep(spill: Option<&Spill>, name: &str, trie: TrieNode) -> Result<ShardTrie> {
	match spill {
		Some(spill) => spill.store(name, &trie),
		None => Ok(ShardTrie::Memory(trie)),
	}
}

/// Runs `job` over `tasks` on up to `workers` scoped threads.
///
/// Workers pull the next task from a shared queue. The first failure stops
/// the queue: running tasks finish, pending ones are never started. A
/// panicking task is reported as [`TrieError::WorkerPanicked`].
/// Results are returned in task order; on failure, the error of the lowest
/// failed task index is returned with that index.
fn run_parallel<T, R, F>(tasks: Vec<T>, workers: usize, job: F) -> std::result::Result<Vec<R>, (usize, TrieError)>
where
	T: Send,
	R: Send,
	F: Fn(usize, T) -> Result<R> + Sync,
{
	let total = tasks.len();
	if total == 0 {
		return Ok(Vec::new());
	}
	let queue = Mutex::new(tasks.into_iter().enumerate());
	let cancelled = AtomicBool::new(false);
	let (tx, rx) = mpsc::channel();

	thread::scope(|scope| {
		for _ in 0..workers.clamp(1, total) {
			let tx = tx.clone();
			let (queue, cancelled, job) = (&queue, &cancelled, &job);
			scope.spawn(move || {
				while !cancelled.load(Ordering::Relaxed) {
					let next = match queue.lock() {
						Ok(mut queue) => queue.next(),
						Err(poisoned) => poisoned.into_inner().next(),
					};
					let Some((index, task)) = next else {
						break;
					};
					let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(index, task)))
						.unwrap_or_else(|payload| Err(TrieError::from_panic(format!("task {index}"), payload)));
					if outcome.is_err() {
						cancelled.store(true, Ordering::Relaxed);
					}
					if tx.send((index, outcome)).is_err() {
						break;
					}
				}
			});
		}
	});
	drop(tx);

	let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
	let mut first_error: Option<(usize, TrieError)> = None;
	for (index, outcome) in rx {
		match outcome {
			Ok(result) => results[index] = Some(result),
			Err(e) => {
				if first_error.as_ref().is_none_or(|(failed, _)| index < *failed) {
					first_error = Some((index, e));
				}
			}
		}
	}
	if let Some(error) = first_error {
		return Err(error);
	}
	Ok(results.into_iter().flatten().collect())
}

/// Merges a batch of tries, loading at most one spilled trie at a time.
fn merge_batch(batch: Vec<ShardTrie>) -> Result<TrieNode> {
	let mut batch = batch.into_iter();
	let mut merged = match batch.next() {
		Some(first) => first.load()?,
		None => return Ok(TrieNode::new()),
	};
	for trie in batch {
		merged.merge(trie.load()?)?;
	}
	Ok(merged)
}

/// Reduces tries by merging batches of `merge_batch_size`, round after
/// round, until one remains. Batches of a round merge in parallel.
fn reduce(mut tries: Vec<ShardTrie>, options: &ParallelOptions, spill: Option<&Spill>) -> Result<TrieNode> {
	let mut round = 0;
	while tries.len() > 1 {
		round += 1;
		let mut batches = Vec::new();
		let mut remaining = tries.into_iter();
		loop {
			let batch: Vec<ShardTrie> = remaining.by_ref().take(options.merge_batch_size).collect();
			if batch.is_empty() {
				break;
			}
			batches.push(batch);
		}
		log::debug!("Merge round {round}: {} batches", batches.len());

		tries = run_parallel(batches, options.parallelism, |index, batch| {
			let merged = merge_batch(batch)?;
			keep(spill, &format!("round-{round}-batch-{index}"), merged)
		})
		.map_err(|(_, e)| e)?;
	}
	match tries.pop() {
		Some(trie) => trie.load(),
		None => Ok(TrieNode::new()),
	}
}

/// Merges trie files (JSON or `.bin`) with the batched parallel reduction.
pub fn merge_files<P: AsRef<Path>>(paths: &[P], options: &ParallelOptions) -> Result<TrieNode> {
	let spill = Spill::open(options)?;
	let tries = paths.iter().map(|path| ShardTrie::OnDisk(path.as_ref().to_path_buf())).collect();
	log::info!("Merging {} tries", paths.len());
	let merged = reduce(tries, options, spill.as_ref())?;
	if let Some(spill) = spill {
		spill.close();
	}
	Ok(merged)
}

/// Builds a trie from a corpus split into line-range shards, one worker per
/// shard, then merges the shard tries.
///
/// The result is identical to a single-threaded build over the same lines,
/// unless shard-local pruning is enabled.
pub struct ParallelBuilder<'a, A: Allowlist + ?Sized, T: Tokenizer + ?Sized> {
	allowlist: &'a A,
	tokenizer: &'a T,
	build: BuildOptions,
	parallel: ParallelOptions,
}

impl<'a, A: Allowlist + ?Sized, T: Tokenizer + ?Sized> ParallelBuilder<'a, A, T> {
	pub fn new(allowlist: &'a A, tokenizer: &'a T, build: BuildOptions, parallel: ParallelOptions) -> Self {
		Self { allowlist, tokenizer, build, parallel }
	}

	/// Builds a trie from the lines of a corpus file, one worker per shard.
	///
	/// # Parameters
	/// - `path`: Corpus file, one sentence per line.
	/// - `range`: Half-open line range to build from, or `None` for the whole file.
	///   A range past the end of the file is clamped to it.
	///
	/// # Returns
	/// - `Ok(TrieNode)`: The merged trie of every shard.
	/// - `Err(TrieError::ShardFailed)`: If a shard could not be read or its worker panicked.
	/// - `Err(...)`: If the corpus or a spill file cannot be read or written.
	///
	/// # Behavior
	/// - Counts the lines, then splits `range` into shards of `shard_lines` lines.
	/// - Computes the byte offset of every shard start in one pass, so each
	///   worker seeks straight to its first line.
	/// - Builds shards on up to `parallelism` threads, then merges them in
	///   batches of `merge_batch_size`.
	///
	/// # Notes
	/// - Lines that are not valid UTF-8 are skipped and logged.
	/// - With `shard_min_count` set, the result may miss n-grams that are rare in every shard.
	pub fn build_file<P: AsRef<Path>>(&self, path: P, range: Option<Range<usize>>) -> Result<TrieNode> {
		let path = path.as_ref();
		let total = io::count_lines(path)?;
		let range = range.unwrap_or(0..total);
		let range = range.start.min(total)..range.end.min(total);

		let shards = plan_shards(range, self.parallel.shard_lines);
		let starts: Vec<usize> = shards.iter().map(|shard| shard.lines.start).collect();
		let offsets = io::line_offsets(path, &starts)?;
		log::info!("Building {} ({} lines, {} shards)", path.display(), total, shards.len());

		self.build_shards(shards, |shard| {
			let mut builder = TrieBuilder::new(self.allowlist, self.build.clone());
			let stats = io::for_each_line_at(path, offsets[shard.id], shard.lines.len(), |line| {
				builder.add_sentence(self.tokenizer, line);
			})?;
			log_shard(shard, stats);
			Ok(builder.finish())
		})
	}

	/// Builds from in-memory lines.
	pub fn build_lines<S: AsRef<str> + Sync>(&self, lines: &[S]) -> Result<TrieNode> {
		let shards = plan_shards(0..lines.len(), self.parallel.shard_lines);
		self.build_shards(shards, |shard| {
			let mut builder = TrieBuilder::new(self.allowlist, self.build.clone());
			for line in &lines[shard.lines.clone()] {
				builder.add_sentence(self.tokenizer, line.as_ref());
			}
			log_shard(shard, LineStats { lines: shard.lines.len(), malformed: 0 });
			Ok(builder.finish())
		})
	}

	fn build_shards<F>(&self, shards: Vec<Shard>, build_shard: F) -> Result<TrieNode>
	where
		F: Fn(&Shard) -> Result<TrieNode> + Sync,
	{
		let spill = Spill::open(&self.parallel)?;
		let min_count = self.parallel.shard_min_count;
		if let Some(min_count) = min_count {
			log::warn!("Shard-local pruning below {min_count} is lossy: n-grams rare in every shard are dropped");
		}
		let ranges: Vec<Range<usize>> = shards.iter().map(|shard| shard.lines.clone()).collect();

		let tries = run_parallel(shards, self.parallel.parallelism, |_, shard| {
			let mut trie = build_shard(&shard)?;
			if let Some(min_count) = min_count {
				trie.prune_by_count(min_count);
			}
			keep(spill.as_ref(), &format!("shard-{}", shard.id), trie)
		})
		.map_err(|(index, source)| TrieError::ShardFailed {
			shard: index,
			lines: ranges[index].clone(),
			source: Box::new(source),
		})?;

		let trie = reduce(tries, &self.parallel, spill.as_ref())?;
		if let Some(spill) = spill {
			spill.close();
		}
		log::info!("Built trie with {} top-level words", trie.child_count());
		Ok(trie)
	}
}

fn log_shard(shard: &Shard, stats: LineStats) {
	log::debug!(
		"Shard {} (lines {}..{}): {} lines, {} malformed",
		shard.id,
		shard.lines.start,
		shard.lines.end,
		stats.lines,
		stats.malformed
	);
}
