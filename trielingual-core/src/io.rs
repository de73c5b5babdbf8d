use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::frequency::{FrequencyRanks, sort_by_count};
use crate::model::node::TrieNode;

/// Extension selecting the binary (postcard) trie encoding.
pub const BINARY_EXTENSION: &str = "bin";

/// Line counters reported by every file pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineStats {
	/// Lines handed to the callback.
	pub lines: usize,
	/// Lines skipped because they were not valid UTF-8 or had the wrong shape.
	pub malformed: usize,
}

impl LineStats {
	pub fn absorb(&mut self, other: LineStats) {
		self.lines += other.lines;
		self.malformed += other.malformed;
	}
}

/// Reads a file line by line, tolerating invalid UTF-8.
struct LineReader<R> {
	reader: R,
	buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
	fn new(reader: R) -> Self {
		Self { reader, buf: Vec::new() }
	}

	/// Next line without its terminator.
	///
	/// `Ok(None)` at EOF, `Ok(Some(None))` for a line that is not valid UTF-8.
	fn next_line(&mut self) -> io::Result<Option<Option<&str>>> {
		self.buf.clear();
		if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
			return Ok(None);
		}
		let mut line = self.buf.as_slice();
		if let Some(rest) = line.strip_suffix(b"\n") {
			line = rest;
		}
		if let Some(rest) = line.strip_suffix(b"\r") {
			line = rest;
		}
		Ok(Some(std::str::from_utf8(line).ok()))
	}

	/// Consumes the next line, returning its length in bytes (0 at EOF).
	fn skip_line(&mut self) -> io::Result<usize> {
		self.buf.clear();
		self.reader.read_until(b'\n', &mut self.buf)
	}
}

fn open_lines<P: AsRef<Path>>(path: P) -> io::Result<LineReader<BufReader<File>>> {
	Ok(LineReader::new(BufReader::new(File::open(path)?)))
}

/// Calls `f` on every line of `path`, or only on lines in `range` if given.
///
/// Lines that are not valid UTF-8 are skipped and counted as malformed.
pub fn for_each_line<P, F>(path: P, range: Option<Range<usize>>, mut f: F) -> Result<LineStats>
where
	P: AsRef<Path>,
	F: FnMut(&str),
{
	let path = path.as_ref();
	let range = range.unwrap_or(0..usize::MAX);
	let mut reader = open_lines(path)?;
	let mut stats = LineStats::default();

	let mut index = 0;
	while index < range.start {
		if reader.skip_line()? == 0 {
			return Ok(stats);
		}
		index += 1;
	}
	while index < range.end {
		match reader.next_line()? {
			None => break,
			Some(Some(line)) => {
				f(line);
				stats.lines += 1;
			}
			Some(None) => {
				log::warn!("Skipping line {} of {}: invalid UTF-8", index + 1, path.display());
				stats.malformed += 1;
			}
		}
		index += 1;
	}
	Ok(stats)
}

/// Calls `f` on at most `max_lines` lines, starting at byte `offset`.
///
/// `offset` must be the start of a line, see [`line_offsets`].
pub fn for_each_line_at<P, F>(path: P, offset: u64, max_lines: usize, mut f: F) -> Result<LineStats>
where
	P: AsRef<Path>,
	F: FnMut(&str),
{
	let path = path.as_ref();
	let mut file = File::open(path)?;
	file.seek(SeekFrom::Start(offset))?;
	let mut reader = LineReader::new(BufReader::new(file));
	let mut stats = LineStats::default();

	for _ in 0..max_lines {
		match reader.next_line()? {
			None => break,
			Some(Some(line)) => {
				f(line);
				stats.lines += 1;
			}
			Some(None) => {
				log::warn!("Skipping a line of {} (from byte {offset}): invalid UTF-8", path.display());
				stats.malformed += 1;
			}
		}
	}
	Ok(stats)
}

/// Number of lines in `path`.
pub fn count_lines<P: AsRef<Path>>(path: P) -> Result<usize> {
	let mut reader = open_lines(path)?;
	let mut lines = 0;
	while reader.skip_line()? > 0 {
		lines += 1;
	}
	Ok(lines)
}

/// Byte offsets of the given line numbers, in one pass over `path`.
///
/// `starts` must be sorted. Line numbers past the end of the file map to the
/// file length.
pub fn line_offsets<P: AsRef<Path>>(path: P, starts: &[usize]) -> Result<Vec<u64>> {
	let mut reader = open_lines(path)?;
	let mut offsets = Vec::with_capacity(starts.len());
	let mut line = 0;
	let mut offset: u64 = 0;

	for &start in starts {
		while line < start {
			let len = reader.skip_line()?;
			if len == 0 {
				break;
			}
			offset += len as u64;
			line += 1;
		}
		offsets.push(offset);
	}
	Ok(offsets)
}

/// Walks two parallel sentence files, line `i` of `target` with line `i` of `base`.
///
/// - Stops early, without error, when `base` runs out of lines.
/// - A pair where either line is not valid UTF-8 is skipped and counted.
pub fn for_each_sentence_pair<P, Q, F>(target: P, base: Q, mut f: F) -> Result<LineStats>
where
	P: AsRef<Path>,
	Q: AsRef<Path>,
	F: FnMut(&str, &str),
{
	let mut targets = open_lines(&target)?;
	let mut bases = open_lines(&base)?;
	let mut stats = LineStats::default();

	loop {
		let Some(target_line) = targets.next_line()? else {
			break;
		};
		let Some(base_line) = bases.next_line()? else {
			log::debug!("{} ended before {}", base.as_ref().display(), target.as_ref().display());
			break;
		};
		match (target_line, base_line) {
			(Some(t), Some(b)) => {
				f(t, b);
				stats.lines += 1;
			}
			_ => stats.malformed += 1,
		}
	}
	if stats.malformed > 0 {
		log::warn!("Skipped {} malformed sentence pairs in {}", stats.malformed, target.as_ref().display());
	}
	Ok(stats)
}

/// Loads a trie, from postcard if the extension is `.bin`, from JSON otherwise.
pub fn load_trie<P: AsRef<Path>>(path: P) -> Result<TrieNode> {
	let path = path.as_ref();
	if is_binary(path) {
		let bytes = fs::read(path)?;
		return Ok(postcard::from_bytes(&bytes)?);
	}
	let reader = BufReader::new(File::open(path)?);
	Ok(serde_json::from_reader(reader)?)
}

/// Saves a trie, as postcard if the extension is `.bin`, as JSON otherwise.
///
/// The file is written next to its destination then renamed, so readers
/// never observe a partial artifact.
pub fn save_trie<P: AsRef<Path>>(path: P, trie: &TrieNode, pretty: bool) -> Result<()> {
	let path = path.as_ref();
	if is_binary(path) {
		let bytes = postcard::to_stdvec(trie)?;
		return write_atomic(path, |writer| Ok(writer.write_all(&bytes)?));
	}
	save_json(path, trie, pretty)
}

/// Serializes `value` as JSON to `path`, atomically.
pub fn save_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T, pretty: bool) -> Result<()> {
	write_atomic(path.as_ref(), |writer| {
		if pretty {
			serde_json::to_writer_pretty(writer, value)?;
		} else {
			serde_json::to_writer(writer, value)?;
		}
		Ok(())
	})
}

fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
	F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
	let parent = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};
	let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
	{
		let mut writer = BufWriter::new(temp_file.as_file_mut());
		write(&mut writer)?;
		writer.flush()?;
	}
	temp_file.as_file().sync_all()?;
	temp_file.persist(path)?;
	Ok(())
}

fn is_binary(path: &Path) -> bool {
	path.extension() == Some(std::ffi::OsStr::new(BINARY_EXTENSION))
}

/// The two accepted frequency table shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum FrequencyFile {
	Map(HashMap<String, u64>),
	List(Vec<(String, u64)>),
}

/// Loads `(word, count)` pairs sorted by descending count.
///
/// Accepts `{word: count}` or `[[word, count], ...]`.
pub fn load_word_counts<P: AsRef<Path>>(path: P) -> Result<Vec<(String, u64)>> {
	let reader = BufReader::new(File::open(path)?);
	let counts = match serde_json::from_reader(reader)? {
		FrequencyFile::Map(map) => map.into_iter().collect(),
		FrequencyFile::List(list) => list,
	};
	Ok(sort_by_count(counts))
}

/// Loads a frequency table and converts it to ranks.
pub fn load_frequency_ranks<P: AsRef<Path>>(path: P) -> Result<FrequencyRanks> {
	let counts = load_word_counts(path)?;
	Ok(FrequencyRanks::from_ordered(counts.into_iter().map(|(word, _)| word)))
}

/// The accepted word set shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum WordSetFile {
	Keys(HashMap<String, serde::de::IgnoredAny>),
	Words(Vec<String>),
}

/// Loads a word set from a dictionary object (its keys) or an array of words.
pub fn load_word_set<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
	let reader = BufReader::new(File::open(path)?);
	let words = match serde_json::from_reader(reader)? {
		WordSetFile::Keys(map) => map.into_keys().collect(),
		WordSetFile::Words(words) => words.into_iter().collect(),
	};
	Ok(words)
}

/// Loads `word<TAB>level` lines.
///
/// Blank lines are ignored. Lines without exactly two fields, or whose level
/// is not an unsigned integer, are skipped and counted as malformed.
pub fn load_levels<P: AsRef<Path>>(path: P) -> Result<(Vec<(String, u32)>, LineStats)> {
	let path = path.as_ref();
	let mut levels = Vec::new();
	let mut malformed = 0;
	let mut stats = for_each_line(path, None, |line| {
		if line.trim().is_empty() {
			return;
		}
		let fields: Vec<&str> = line.split('\t').collect();
		match fields.as_slice() {
			[word, level] if !word.trim().is_empty() => match level.trim().parse::<u32>() {
				Ok(level) => levels.push((word.trim().to_owned(), level)),
				Err(_) => malformed += 1,
			},
			_ => malformed += 1,
		}
	})?;
	if malformed > 0 {
		log::warn!("Skipped {malformed} malformed level lines in {}", path.display());
	}
	stats.lines -= malformed;
	stats.malformed += malformed;
	Ok((levels, stats))
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `data/corpus.txt` + `"json"` → `data/corpus.json`
pub fn build_output_path<P: AsRef<Path>>(input_path: P, output_extension: &str) -> io::Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}

/// Extracts the base filename without extension.
///
/// Examples:
/// - `"./data/fr.trie.json"` → `"fr.trie"`
/// - `"fr.json"` → `"fr"`
pub fn get_filename<P: AsRef<Path>>(input_path: P) -> io::Result<String> {
	let stem = input_path
		.as_ref()
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no filename"))?;

	Ok(stem.to_string_lossy().to_string())
}

/// Normalize a folder path.
///
/// - `"."` or `"./"` resolves to the current working directory
/// - Other paths are returned as-is (not canonicalized)
pub fn normalize_folder(input: &str) -> PathBuf {
	if input == "." || input == "./" {
		env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
	} else {
		PathBuf::from(input)
	}
}

/// Lists the files of `dir` whose extension is one of `extensions`.
///
/// Returns sorted file names only (no paths).
pub fn list_files<P: AsRef<Path>>(dir: P, extensions: &[&str]) -> io::Result<Vec<String>> {
	let mut files = BTreeSet::new();

	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if !path.is_file() {
			continue;
		}
		let matches = path
			.extension()
			.and_then(|ext| ext.to_str())
			.is_some_and(|ext| extensions.contains(&ext));
		if let (true, Some(name)) = (matches, path.file_name()) {
			files.insert(name.to_string_lossy().to_string());
		}
	}

	Ok(files.into_iter().collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
		let path = dir.join(name);
		fs::write(&path, contents).unwrap();
		path
	}

	#[test]
	fn test_for_each_line_range_and_invalid_utf8() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "corpus.txt", b"zero\r\none\n\xff\xfe\nthree\nfour");

		let mut lines = Vec::new();
		let stats = for_each_line(&path, Some(1..4), |line| lines.push(line.to_owned())).unwrap();
		assert_eq!(lines, vec!["one", "three"]);
		assert_eq!(stats, LineStats { lines: 2, malformed: 1 });

		let mut all = 0;
		for_each_line(&path, None, |_| all += 1).unwrap();
		assert_eq!(all, 4);
		assert_eq!(count_lines(&path).unwrap(), 5);
	}

	#[test]
	fn test_line_offsets_seek_to_line_starts() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "corpus.txt", "a b\nçé\nc\nd\n".as_bytes());
		let offsets = line_offsets(&path, &[0, 2, 3, 10]).unwrap();
		assert_eq!(offsets, vec![0, 9, 11, 13]);

		let mut lines = Vec::new();
		for_each_line_at(&path, offsets[1], 5, |line| lines.push(line.to_owned())).unwrap();
		assert_eq!(lines, vec!["c", "d"]);
	}

	#[test]
	fn test_sentence_pairs_stop_at_base_eof() {
		let dir = tempfile::tempdir().unwrap();
		let target = write(dir.path(), "fr.txt", b"le chat\nle chien\nun oiseau\n");
		let base = write(dir.path(), "en.txt", b"the cat\nthe dog\n");
		let mut pairs = Vec::new();
		let stats = for_each_sentence_pair(&target, &base, |t, b| pairs.push((t.to_owned(), b.to_owned()))).unwrap();
		assert_eq!(stats.lines, 2);
		assert_eq!(pairs[1], ("le chien".to_owned(), "the dog".to_owned()));
	}

	#[test]
	fn test_sentence_pairs_skip_invalid_utf8() {
		let dir = tempfile::tempdir().unwrap();
		let target = write(dir.path(), "fr.txt", b"le chat\nle chien\nun oiseau\n");
		let base = write(dir.path(), "en.txt", b"the cat\n\xff\na bird\n");
		let mut pairs = Vec::new();
		let stats = for_each_sentence_pair(&target, &base, |t, b| pairs.push((t.to_owned(), b.to_owned()))).unwrap();
		assert_eq!(stats, LineStats { lines: 2, malformed: 1 });
		assert_eq!(pairs, vec![
			("le chat".to_owned(), "the cat".to_owned()),
			("un oiseau".to_owned(), "a bird".to_owned()),
		]);
	}

	#[test]
	fn test_trie_roundtrip_json_and_binary() {
		let dir = tempfile::tempdir().unwrap();
		let mut trie = TrieNode::new();
		trie.child_or_insert("chat").count = 3;
		trie.child_or_insert("chat").child_or_insert("noir").count = 1;

		for name in ["trie.json", "trie.bin"] {
			let path = dir.path().join(name);
			save_trie(&path, &trie, false).unwrap();
			let back = load_trie(&path).unwrap();
			assert_eq!(back.paths_with_counts(), trie.paths_with_counts());
		}
		let json = fs::read_to_string(dir.path().join("trie.json")).unwrap();
		assert_eq!(json, r#"{"chat":{"__C":3,"noir":{"__C":1}}}"#);
	}

	#[test]
	fn test_deepest_annotated_trie_reloads() {
		use crate::model::builder::{BuildOptions, MAX_DEPTH, TrieBuilder};
		use crate::model::example::ExampleRecord;

		let tokens: Vec<String> = (0..MAX_DEPTH).map(|i| format!("w{i}")).collect();
		let allowlist: HashSet<String> = tokens.iter().cloned().collect();
		let mut builder = TrieBuilder::new(&allowlist, BuildOptions::new(MAX_DEPTH).unwrap());
		builder.add_tokens(&tokens);
		let mut trie = builder.finish();
		assert_eq!(trie.max_depth(), MAX_DEPTH);

		let deepest = trie.get_path_mut(&tokens).unwrap();
		deepest.examples.offer(ExampleRecord::new(tokens.clone(), "base".to_owned(), 0, 1.0), 1);

		let dir = tempfile::tempdir().unwrap();
		for name in ["deep.json", "deep.bin"] {
			let path = dir.path().join(name);
			save_trie(&path, &trie, false).unwrap();
			let back = load_trie(&path).unwrap();
			assert_eq!(back.max_depth(), MAX_DEPTH);
			assert_eq!(back.get_path(&tokens).unwrap().examples()[0].base_sentence, "base");
		}
	}

	#[test]
	fn test_load_rejects_scalar_child() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "bad.json", br#"{"a": {"b": 3}}"#);
		let err = load_trie(&path).unwrap_err().to_string();
		assert!(err.contains("under 'a'"), "{err}");
	}

	#[test]
	fn test_frequency_table_shapes() {
		let dir = tempfile::tempdir().unwrap();
		let map = write(dir.path(), "map.json", br#"{"chat": 3, "le": 10, "noir": 1}"#);
		let list = write(dir.path(), "list.json", br#"[["le", 10], ["chat", 3], ["noir", 1]]"#);
		for path in [map, list] {
			let ranks = load_frequency_ranks(&path).unwrap();
			assert_eq!(ranks.rank("le"), Some(0));
			assert_eq!(ranks.rank("noir"), Some(2));
		}
	}

	#[test]
	fn test_word_set_from_dictionary_keys() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "dict.json", br#"{"chat": {"def": "cat"}, "chien": ["dog"]}"#);
		let words = load_word_set(&path).unwrap();
		assert!(words.contains("chat") && words.contains("chien"));
	}

	#[test]
	fn test_levels_skip_malformed_lines() {
		let dir = tempfile::tempdir().unwrap();
		let path = write(dir.path(), "levels.tsv", b"chat\t1\nchien 2\n\nnoir\tx\noiseau\t3\n");
		let (levels, stats) = load_levels(&path).unwrap();
		assert_eq!(levels, vec![("chat".to_owned(), 1), ("oiseau".to_owned(), 3)]);
		assert_eq!(stats.malformed, 2);
	}

	#[test]
	fn test_list_files_filters_extensions() {
		let dir = tempfile::tempdir().unwrap();
		write(dir.path(), "b.json", b"{}");
		write(dir.path(), "a.bin", b"");
		write(dir.path(), "notes.txt", b"");
		assert_eq!(list_files(dir.path(), &["json", "bin"]).unwrap(), vec!["a.bin", "b.json"]);
	}
}
