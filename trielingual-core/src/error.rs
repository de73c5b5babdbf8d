use std::ops::Range;

/// Result type used throughout the crate.
///
/// Defaults to [`TrieError`] as the error type.
pub type Result<T, E = TrieError> = std::result::Result<T, E>;

/// Errors raised by trie construction, merging, annotation and I/O.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
	/// A tunable parameter is outside its valid range.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Two nodes at the same path carry data that cannot be combined.
	///
	/// `path` is the space-separated token path of the offending node.
	#[error("merge conflict at '{path}': {detail}")]
	MergeConflict { path: String, detail: String },

	/// A shard worker returned an error. Fatal for the whole parallel build.
	#[error("shard {shard} (lines {}..{}) failed: {source}", lines.start, lines.end)]
	ShardFailed {
		shard: usize,
		lines: Range<usize>,
		#[source]
		source: Box<TrieError>,
	},

	/// A shard worker or merge task panicked.
	#[error("worker for {task} panicked: {message}")]
	WorkerPanicked { task: String, message: String },

	/// Standard I/O error.
	#[error(transparent)]
	Io(#[from] std::io::Error),

	/// JSON (de)serialization error, including malformed trie shapes.
	#[error(transparent)]
	Json(#[from] serde_json::Error),

	/// Binary (postcard) (de)serialization error.
	#[error(transparent)]
	Postcard(#[from] postcard::Error),

	/// Failure while atomically persisting an output file.
	#[error(transparent)]
	Persist(#[from] tempfile::PersistError),
}

impl TrieError {
	/// Shorthand for [`TrieError::InvalidArgument`].
	pub(crate) fn invalid_argument<S: Into<String>>(msg: S) -> Self {
		Self::InvalidArgument(msg.into())
	}

	/// Shorthand for [`TrieError::MergeConflict`] built from a token path.
	pub(crate) fn merge_conflict<S: Into<String>>(path: &[String], detail: S) -> Self {
		Self::MergeConflict { path: path.join(" "), detail: detail.into() }
	}

	/// Converts a panic payload from a joined thread into an error.
	pub(crate) fn from_panic(task: String, payload: Box<dyn std::any::Any + Send>) -> Self {
		let message = if let Some(s) = payload.downcast_ref::<&str>() {
			(*s).to_owned()
		} else if let Some(s) = payload.downcast_ref::<String>() {
			s.clone()
		} else {
			"unknown panic payload".to_owned()
		};
		Self::WorkerPanicked { task, message }
	}
}
