use unicode_segmentation::UnicodeSegmentation;

/// Splits raw text into word tokens.
///
/// Language-specific segmentation lives outside this crate; callers plug
/// their own segmenter in through this trait. Any
/// `Fn(&str, &str, bool) -> Vec<String>` closure also implements it.
pub trait Tokenizer: Send + Sync {
	/// Tokenizes `text` written in `language`.
	///
	/// Implementations may return empty strings; see [`tokenize_words`].
	fn tokenize(&self, text: &str, language: &str, ignore_case: bool) -> Vec<String>;
}

impl<F> Tokenizer for F
where
	F: Fn(&str, &str, bool) -> Vec<String> + Send + Sync,
{
	fn tokenize(&self, text: &str, language: &str, ignore_case: bool) -> Vec<String> {
		self(text, language, ignore_case)
	}
}

/// Tokenizes `text` and drops empty tokens.
pub fn tokenize_words<T: Tokenizer + ?Sized>(tokenizer: &T, text: &str, language: &str, ignore_case: bool) -> Vec<String> {
	let mut words = tokenizer.tokenize(text, language, ignore_case);
	words.retain(|word| !word.is_empty());
	words
}

/// Language-agnostic fallback tokenizer.
///
/// Splits on Unicode word boundaries (UAX #29): inner apostrophes stay in
/// the word (`don't`, `aujourd'hui`) and scripts written without spaces
/// are split per ideograph. The language code is ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnicodeWordTokenizer;

impl Tokenizer for UnicodeWordTokenizer {
	fn tokenize(&self, text: &str, _language: &str, ignore_case: bool) -> Vec<String> {
		text.unicode_words()
			.map(|word| if ignore_case { word.to_lowercase() } else { word.to_owned() })
			.collect()
	}
}
