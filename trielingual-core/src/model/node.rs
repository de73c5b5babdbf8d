use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::example::{ExampleRecord, ExampleSet};

/// Reserved key holding a node's occurrence count.
pub const COUNT_KEY: &str = "__C";
/// Reserved key holding a node's example sentences.
pub const EXAMPLES_KEY: &str = "__e";
/// Reserved key holding a top-level word's curriculum level.
pub const LEVEL_KEY: &str = "__l";

/// Returns `true` if `token` collides with one of the reserved node keys.
pub fn is_reserved_key(token: &str) -> bool {
	token == COUNT_KEY || token == EXAMPLES_KEY || token == LEVEL_KEY
}

/// A node of the n-gram count trie.
///
/// The root carries no token; its children are single words (depth 0),
/// their children bigrams (depth 1), and so on.
///
/// # Invariants
/// - `count` is the exact number of occurrences of the path ending here,
///   independent of the children's counts
/// - No child token is a reserved key (`__C`, `__e`, `__l`)
///
/// Serialized as a JSON object: reserved keys for count (omitted when 0),
/// examples and level, every other key is a child token.
#[derive(Clone, Debug, Default)]
pub struct TrieNode {
	pub(crate) count: u64,
	pub(crate) examples: ExampleSet,
	pub(crate) level: Option<u32>,
	pub(crate) children: BTreeMap<String, TrieNode>,
}

impl TrieNode {
	/// Creates an empty node (also used as an empty root).
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a node with the given count and no children.
	pub fn with_count(count: u64) -> Self {
		Self { count, ..Self::default() }
	}

	/// Occurrences of the n-gram ending at this node.
	pub fn count(&self) -> u64 {
		self.count
	}

	/// Curriculum level, if one was attached.
	pub fn level(&self) -> Option<u32> {
		self.level
	}

	/// Example sentences, best first.
	pub fn examples(&self) -> Vec<&ExampleRecord> {
		self.examples.sorted()
	}

	/// Number of example sentences attached to this node.
	pub fn example_count(&self) -> usize {
		self.examples.len()
	}

	/// Returns `true` if the node has no children.
	pub fn is_leaf(&self) -> bool {
		self.children.is_empty()
	}

	/// Iterates over `(token, child)` pairs in token order.
	pub fn children(&self) -> impl Iterator<Item = (&str, &TrieNode)> {
		self.children.iter().map(|(token, child)| (token.as_str(), child))
	}

	/// Number of direct children.
	pub fn child_count(&self) -> usize {
		self.children.len()
	}

	/// Returns the child for `token`, if any.
	pub fn child(&self, token: &str) -> Option<&TrieNode> {
		self.children.get(token)
	}

	/// Returns the child for `token`, creating an empty one if needed.
	pub fn child_or_insert(&mut self, token: &str) -> &mut TrieNode {
		if !self.children.contains_key(token) {
			self.children.insert(token.to_owned(), TrieNode::default());
		}
		// Should not panic, the child was inserted above if missing
		self.children.get_mut(token).expect("child exists")
	}

	/// Follows `path` from this node.
	///
	/// Returns `None` as soon as a token has no matching child.
	pub fn get_path<I, S>(&self, path: I) -> Option<&TrieNode>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut node = self;
		for token in path {
			node = node.children.get(token.as_ref())?;
		}
		Some(node)
	}

	/// Mutable variant of [`TrieNode::get_path`].
	pub fn get_path_mut<I, S>(&mut self, path: I) -> Option<&mut TrieNode>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut node = self;
		for token in path {
			node = node.children.get_mut(token.as_ref())?;
		}
		Some(node)
	}

	/// Children sorted by descending count, ties broken by token.
	pub fn children_by_count(&self) -> Vec<(&str, &TrieNode)> {
		let mut children: Vec<(&str, &TrieNode)> = self.children().collect();
		// BTreeMap order is token order, so a stable sort keeps ties sorted by token
		children.sort_by(|a, b| b.1.count.cmp(&a.1.count));
		children
	}

	/// Number of n-gram levels below this node (1 = single words only, 0 = empty).
	pub fn max_depth(&self) -> usize {
		let mut max_depth = 0;
		let mut stack: Vec<(&TrieNode, usize)> = vec![(self, 0)];
		while let Some((node, depth)) = stack.pop() {
			max_depth = max_depth.max(depth);
			stack.extend(node.children.values().map(|child| (child, depth + 1)));
		}
		max_depth
	}

	/// Number of nodes at each depth below this node (index 0 = direct children).
	pub fn depth_histogram(&self) -> Vec<usize> {
		let mut histogram: Vec<usize> = Vec::new();
		let mut stack: Vec<(&TrieNode, usize)> = self.children.values().map(|child| (child, 0)).collect();
		while let Some((node, depth)) = stack.pop() {
			if histogram.len() <= depth {
				histogram.resize(depth + 1, 0);
			}
			histogram[depth] += 1;
			stack.extend(node.children.values().map(|child| (child, depth + 1)));
		}
		histogram
	}

	/// Total number of nodes below this node.
	pub fn node_count(&self) -> usize {
		self.depth_histogram().iter().sum()
	}

	/// Number of nodes (this one included) carrying at least one example.
	pub fn nodes_with_examples(&self) -> usize {
		let mut total = 0;
		let mut stack: Vec<&TrieNode> = vec![self];
		while let Some(node) = stack.pop() {
			if !node.examples.is_empty() {
				total += 1;
			}
			stack.extend(node.children.values());
		}
		total
	}

	/// Every token path below this node with its count.
	///
	/// Mostly useful to compare tries independently of their layout.
	pub fn paths_with_counts(&self) -> BTreeMap<Vec<String>, u64> {
		let mut paths = BTreeMap::new();
		let mut stack: Vec<(Vec<String>, &TrieNode)> = vec![(Vec::new(), self)];
		while let Some((path, node)) = stack.pop() {
			for (token, child) in &node.children {
				let mut child_path = path.clone();
				child_path.push(token.clone());
				paths.insert(child_path.clone(), child.count);
				stack.push((child_path, child));
			}
		}
		paths
	}

	/// Clears every count in the tree, so `__C` is dropped from the output.
	pub fn strip_counts(&mut self) {
		let mut stack: Vec<&mut TrieNode> = vec![self];
		while let Some(node) = stack.pop() {
			node.count = 0;
			stack.extend(node.children.values_mut());
		}
	}

	/// Attaches curriculum levels to top-level words.
	///
	/// Words not present yet get an empty top-level node.
	/// Returns the number of levels applied.
	pub fn apply_levels<I, S>(&mut self, levels: I) -> usize
	where
		I: IntoIterator<Item = (S, u32)>,
		S: AsRef<str>,
	{
		let mut applied = 0;
		for (word, level) in levels {
			let word = word.as_ref();
			if word.is_empty() || is_reserved_key(word) {
				log::warn!("Ignoring level for reserved or empty word '{word}'");
				continue;
			}
			self.child_or_insert(word).level = Some(level);
			applied += 1;
		}
		applied
	}
}

impl Serialize for TrieNode {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let len = self.children.len()
			+ usize::from(self.count > 0)
			+ usize::from(!self.examples.is_empty())
			+ usize::from(self.level.is_some());

		let mut map = serializer.serialize_map(Some(len))?;
		if self.count > 0 {
			map.serialize_entry(COUNT_KEY, &self.count)?;
		}
		if !self.examples.is_empty() {
			map.serialize_entry(EXAMPLES_KEY, &self.examples.sorted())?;
		}
		if let Some(level) = self.level {
			map.serialize_entry(LEVEL_KEY, &level)?;
		}
		for (token, child) in &self.children {
			map.serialize_entry(token, child)?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for TrieNode {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_map(TrieNodeVisitor)
	}
}

struct TrieNodeVisitor;

impl<'de> Visitor<'de> for TrieNodeVisitor {
	type Value = TrieNode;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("a trie node object")
	}

	fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<TrieNode, A::Error> {
		let mut node = TrieNode::default();
		while let Some(key) = map.next_key::<String>()? {
			match key.as_str() {
				COUNT_KEY => node.count = map.next_value()?,
				LEVEL_KEY => node.level = Some(map.next_value()?),
				EXAMPLES_KEY => {
					let records: Vec<ExampleRecord> = map.next_value()?;
					node.examples = records.into_iter().collect();
				}
				_ => {
					// Prefix nested errors with the token so a corrupt subtree reports its path
					let child: TrieNode = map
						.next_value()
						.map_err(|e| de::Error::custom(format!("under '{key}': {e}")))?;
					if node.children.contains_key(&key) {
						return Err(de::Error::custom(format!("duplicate token '{key}'")));
					}
					node.children.insert(key, child);
				}
			}
		}
		Ok(node)
	}
}
