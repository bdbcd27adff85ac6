//! Document text as an ordered sequence of narration units.
//!
//! PDF extraction happens outside this crate: the reader expects text as
//! written by `pdftotext`, where form feeds separate pages. Plain text without
//! form feeds is paginated by line count, preferring paragraph breaks.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

const PAGE_BREAK: char = '\u{000C}';

static RE_LINE_HYPHENATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-[ \t]*\r?\n[ \t]*(\p{Ll})").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One page or segment of document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub ordinal: usize,
    pub text: String,
}

impl TextUnit {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Immutable, ordered narration units for one loaded document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    units: Vec<TextUnit>,
}

impl Document {
    /// Build a document from unit texts; ordinals follow input order.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let units = texts
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| TextUnit {
                ordinal,
                text: text.into(),
            })
            .collect();
        Self { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[TextUnit] {
        &self.units
    }

    /// First unit at or after `from` with speakable text.
    pub fn next_speakable(&self, from: usize) -> Option<usize> {
        self.units
            .iter()
            .skip(from)
            .find(|unit| !unit.is_blank())
            .map(|unit| unit.ordinal)
    }

    /// Last unit at or before `from` with speakable text.
    pub fn previous_speakable(&self, from: usize) -> Option<usize> {
        let end = from.saturating_add(1).min(self.units.len());
        self.units[..end]
            .iter()
            .rev()
            .find(|unit| !unit.is_blank())
            .map(|unit| unit.ordinal)
    }
}

/// Load a UTF-8 text file into narration units.
pub fn load_text_document(path: &Path, lines_per_page: usize) -> Result<Document> {
    info!(path = %path.display(), "Loading document text");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document = Document::from_texts(split_units(&raw, lines_per_page));
    info!(
        units = document.len(),
        blank = document.units().iter().filter(|u| u.is_blank()).count(),
        "Finished loading document"
    );
    Ok(document)
}

/// Split raw text into cleaned unit texts.
pub fn split_units(raw: &str, lines_per_page: usize) -> Vec<String> {
    let pages: Vec<String> = if raw.contains(PAGE_BREAK) {
        let mut pages: Vec<&str> = raw.split(PAGE_BREAK).collect();
        // pdftotext terminates the last page with a form feed too.
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        debug!(pages = pages.len(), "Splitting on form feeds");
        pages.into_iter().map(str::to_string).collect()
    } else {
        paginate_lines(raw, lines_per_page)
    };
    pages.iter().map(|page| clean_for_speech(page)).collect()
}

/// Normalize unit text for narration.
pub fn clean_for_speech(text: &str) -> String {
    let composed: String = text.nfkc().collect();
    let joined = RE_LINE_HYPHENATION.replace_all(&composed, "$1$2");
    RE_WHITESPACE.replace_all(&joined, " ").trim().to_string()
}

/// Group lines into pages of at most `lines_per_page` lines, closing a page
/// early at a blank line once it is at least half full.
fn paginate_lines(text: &str, lines_per_page: usize) -> Vec<String> {
    let lines_per_page = lines_per_page.max(1);
    let mut pages = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();

    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && buffer.len() * 2 >= lines_per_page {
            pages.push(buffer.join("\n"));
            buffer.clear();
            continue;
        }
        if blank && buffer.is_empty() {
            continue;
        }
        buffer.push(line);
        if buffer.len() >= lines_per_page {
            pages.push(buffer.join("\n"));
            buffer.clear();
        }
    }

    if buffer.iter().any(|line| !line.trim().is_empty()) {
        pages.push(buffer.join("\n"));
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn form_feeds_delimit_pages_and_keep_blank_pages() {
        let units = split_units("First page.\n\x0c\n\x0cThird  page.\n\x0c", 60);
        assert_eq!(units, vec!["First page.", "", "Third page."]);
    }

    #[test]
    fn cleaning_joins_hyphenated_line_breaks() {
        assert_eq!(
            clean_for_speech("an exam-\nple of\n\ntext"),
            "an example of text"
        );
        // Capitalized continuation is a real compound, not a line-break split.
        assert_eq!(clean_for_speech("North-\nAmerica"), "North- America");
    }

    #[test]
    fn cleaning_applies_nfkc() {
        assert_eq!(clean_for_speech("ﬁne"), "fine");
    }

    #[test]
    fn paginates_on_blank_lines_once_half_full() {
        let text = "a\nb\nc\n\nd\ne\n";
        let pages = paginate_lines(text, 4);
        assert_eq!(pages, vec!["a\nb\nc".to_string(), "d\ne".to_string()]);
    }

    #[test]
    fn paginates_long_runs_by_line_count() {
        let text = "1\n2\n3\n4\n5";
        let pages = paginate_lines(text, 2);
        assert_eq!(pages, vec!["1\n2", "3\n4", "5"]);
    }

    #[test]
    fn speakable_navigation_skips_blank_units() {
        let doc = Document::from_texts(["A.", "", " ", "D."]);
        assert_eq!(doc.next_speakable(1), Some(3));
        assert_eq!(doc.previous_speakable(2), Some(0));
        assert_eq!(doc.next_speakable(4), None);
        assert_eq!(doc.previous_speakable(99), Some(3));
    }

    #[test]
    fn loads_document_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "One.\x0cTwo.").expect("write");
        let doc = load_text_document(file.path(), 60).expect("load");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.units()[1].text, "Two.");
    }
}
