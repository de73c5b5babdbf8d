use std::cmp::Ordering;
use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::top_k::{BoundedTopK, Ranked};

/// Bounded, priority-ordered example sentences attached to a node or word.
pub type ExampleSet = BoundedTopK<ExampleRecord>;

/// One example sentence illustrating an n-gram.
///
/// Serialized as the 3-element array `[target_tokens, base_sentence, dataset_index]`.
/// `difficulty` is only used while ranking and is not part of the artifact:
/// records read back from disk get `f64::INFINITY`, the worst difficulty.
#[derive(Clone, Debug, PartialEq)]
pub struct ExampleRecord {
	/// Tokens of the target-language sentence.
	pub target_tokens: Vec<String>,
	/// The base-language (translation) sentence.
	pub base_sentence: String,
	/// Position of the source dataset in priority order (0 = preferred).
	pub dataset_index: usize,
	/// Mean frequency rank of the target tokens. Lower is easier.
	pub difficulty: f64,
}

impl ExampleRecord {
	pub fn new(target_tokens: Vec<String>, base_sentence: String, dataset_index: usize, difficulty: f64) -> Self {
		Self { target_tokens, base_sentence, dataset_index, difficulty }
	}

	/// Ranking key of this record.
	pub fn priority(&self) -> ExamplePriority {
		ExamplePriority { dataset_index: self.dataset_index, difficulty: self.difficulty }
	}
}

/// Ranking key of an [`ExampleRecord`]. A greater priority is a better example.
///
/// Compared lexicographically on `(-dataset_index, -difficulty)`: a lower
/// dataset index always wins, then a lower difficulty.
#[derive(Clone, Copy, Debug)]
pub struct ExamplePriority {
	pub dataset_index: usize,
	pub difficulty: f64,
}

impl PartialEq for ExamplePriority {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for ExamplePriority {}

impl PartialOrd for ExamplePriority {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for ExamplePriority {
	fn cmp(&self, other: &Self) -> Ordering {
		other
			.dataset_index
			.cmp(&self.dataset_index)
			.then_with(|| other.difficulty.total_cmp(&self.difficulty))
	}
}

impl Ranked for ExampleRecord {
	type Key = ExamplePriority;

	fn rank_key(&self) -> ExamplePriority {
		self.priority()
	}
}

impl Serialize for ExampleRecord {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut tuple = serializer.serialize_tuple(3)?;
		tuple.serialize_element(&self.target_tokens)?;
		tuple.serialize_element(&self.base_sentence)?;
		tuple.serialize_element(&self.dataset_index)?;
		tuple.end()
	}
}

impl<'de> Deserialize<'de> for ExampleRecord {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_tuple(3, ExampleRecordVisitor)
	}
}

struct ExampleRecordVisitor;

impl<'de> Visitor<'de> for ExampleRecordVisitor {
	type Value = ExampleRecord;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("an example array [target_tokens, base_sentence, dataset_index]")
	}

	fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ExampleRecord, A::Error> {
		let target_tokens = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(0, &self))?;
		let base_sentence = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(1, &self))?;
		let dataset_index = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(2, &self))?;
		Ok(ExampleRecord::new(target_tokens, base_sentence, dataset_index, f64::INFINITY))
	}
}
