//! Numpy-style docstring parsing.
//!
//! Headers are a short line followed by an underline of `-` (or `=`), e.g.
//!
//! ```text
//! Parameters
//! ----------
//! adata : AnnData
//!     The annotated data matrix.
//! ```
//!
//! Parsing is total: anything without recognizable headers comes back as one generic section.

use serde::Serialize;

/// Heading used for text preceding the first section header.
pub const SUMMARY: &str = "Summary";
/// Heading used when the docstring has no recognizable structure.
pub const GENERIC: &str = "Documentation";

const MAX_HEADER_CHARS: usize = 40;
const MIN_UNDERLINE_CHARS: usize = 3;

/// Priority tier. Ordering matters: sorting by tier puts critical content first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Never dropped, even over budget.
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocSection {
    pub heading: String,
    pub body: String,
    pub tier: Tier,
}

impl DocSection {
    fn new(heading: &str, body: String) -> Self {
        Self {
            tier: tier_for(heading),
            heading: heading.to_string(),
            body,
        }
    }

    /// Case-insensitive heading comparison.
    pub fn is(&self, heading: &str) -> bool {
        self.heading.eq_ignore_ascii_case(heading)
    }
}

pub fn tier_for(heading: &str) -> Tier {
    match heading.to_ascii_lowercase().as_str() {
        "parameters" => Tier::Critical,
        "summary" | "returns" | "yields" => Tier::High,
        _ => Tier::Medium,
    }
}

/// Remove common leading indentation, mirroring Python's `inspect.cleandoc`.
///
/// The first line is only left-stripped; indentation is measured on the lines after it.
pub fn cleandoc(doc: &str) -> String {
    let expanded = doc.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    out.push(lines[0].trim_start().trim_end().to_string());
    for line in &lines[1..] {
        let line = line.trim_end();
        match line.get(margin..) {
            Some(rest) => out.push(rest.to_string()),
            None => out.push(line.trim_start().to_string()),
        }
    }

    while out.first().is_some_and(|l| l.is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn is_underline(line: &str) -> bool {
    let t = line.trim();
    t.chars().count() >= MIN_UNDERLINE_CHARS
        && (t.chars().all(|c| c == '-') || t.chars().all(|c| c == '='))
}

fn is_header(line: &str, next: Option<&str>) -> bool {
    let t = line.trim();
    if t.is_empty() || t.chars().count() > MAX_HEADER_CHARS || is_underline(t) {
        return false;
    }
    if !t.chars().next().is_some_and(char::is_alphabetic) {
        return false;
    }
    next.is_some_and(is_underline)
}

fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

/// Split a docstring into ordered sections.
pub fn parse(doc: &str) -> Vec<DocSection> {
    let text = cleandoc(doc);
    if text.trim().is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = text.lines().collect();

    let headers: Vec<usize> = (0..lines.len())
        .filter(|&i| is_header(lines[i], lines.get(i + 1).copied()))
        .collect();

    if headers.is_empty() {
        return vec![DocSection::new(GENERIC, text.trim().to_string())];
    }

    let mut sections = Vec::with_capacity(headers.len() + 1);
    let preamble = trim_blank_lines(&lines[..headers[0]]);
    if !preamble.is_empty() {
        sections.push(DocSection::new(SUMMARY, preamble));
    }

    for (k, &h) in headers.iter().enumerate() {
        let end = headers.get(k + 1).copied().unwrap_or(lines.len());
        let body = trim_blank_lines(&lines[(h + 2).min(end)..end]);
        sections.push(DocSection::new(lines[h].trim(), body));
    }
    sections
}

/// First paragraph of a docstring (up to the first blank line), cleaned.
pub fn first_paragraph(doc: &str) -> String {
    let text = cleandoc(doc);
    text.split("\n\n").next().unwrap_or_default().trim().to_string()
}

/// First non-empty line of a docstring.
pub fn summary_line(doc: &str) -> &str {
    doc.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
}

/// Does a section mention `topic` (already lowercased) in its heading or body?
pub fn section_mentions(section: &DocSection, topic_lower: &str) -> bool {
    section.heading.to_lowercase().contains(topic_lower)
        || section.body.to_lowercase().contains(topic_lower)
}

/// Keep the summary plus every section mentioning `topic`.
///
/// An empty topic, or a docstring without structure, comes back unchanged.
pub fn filter_by_topic(doc: &str, topic: &str) -> String {
    let topic = topic.trim().to_lowercase();
    if topic.is_empty() {
        return doc.to_string();
    }
    let sections = parse(doc);
    if sections.len() <= 1 {
        return doc.to_string();
    }

    let mut out: Vec<String> = Vec::new();
    for s in &sections {
        if s.is(SUMMARY) {
            out.push(s.body.clone());
        } else if section_mentions(s, &topic) {
            let underline = "-".repeat(s.heading.chars().count());
            out.push(format!("{}\n{}\n{}", s.heading, underline, s.body));
        }
    }
    out.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NUMPY_DOC: &str = "
    Short summary of the function.

    Longer description here.

    Parameters
    ----------
    x : int
        The first parameter.
    y : str
        The second parameter.

    Returns
    -------
    bool
        The return value.

    Examples
    --------
    >>> example()
    True
    ";

    #[test]
    fn parses_numpy_sections_in_order() {
        let sections = parse(NUMPY_DOC);
        let headings: Vec<&str> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, ["Summary", "Parameters", "Returns", "Examples"]);
        assert!(sections[0].body.starts_with("Short summary"));
        assert!(sections[0].body.contains("Longer description"));
        assert!(sections[1].body.contains("x : int"));
        assert!(sections[1].body.contains("    The first parameter."));
        assert!(sections[2].body.contains("bool"));
        assert!(sections[3].body.contains("example()"));
    }

    #[test]
    fn parameters_and_returns_only_yields_two_sections() {
        let doc = "Parameters\n----------\nx : int\n    Value.\n\nReturns\n-------\nint\n    Doubled.";
        let sections = parse(doc);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "Parameters");
        assert_eq!(sections[0].tier, Tier::Critical);
        assert_eq!(sections[1].heading, "Returns");
        assert_eq!(sections[1].tier, Tier::High);
    }

    #[test]
    fn unstructured_text_is_one_generic_section() {
        let sections = parse("Join two paths.\n\nSome more words with --- dashes.");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, GENERIC);
        assert_eq!(sections[0].tier, Tier::Medium);
    }

    #[test]
    fn empty_and_malformed_inputs_never_fail() {
        assert!(parse("").is_empty());
        assert!(parse("   \n\t\n").is_empty());
        // Underline with nothing above it, header at end of input.
        let sections = parse("----------\nNotes\n");
        assert_eq!(sections.len(), 1);
        let sections = parse("Notes\n-----");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "Notes");
        assert!(sections[0].body.is_empty());
    }

    #[test]
    fn cleandoc_matches_python_semantics() {
        let doc = "First line.\n\n        Indented body.\n          Deeper.\n    ";
        assert_eq!(cleandoc(doc), "First line.\n\nIndented body.\n  Deeper.");
    }

    #[test]
    fn topic_filter_keeps_summary_and_matching_sections() {
        let doc = "Normalize counts per cell.\n\nParameters\n----------\nmethod : str\n    Normalization method to use.\n\nExamples\n--------\n>>> run(data)\n";
        let filtered = filter_by_topic(doc, "normalization");
        assert!(filtered.contains("Normalize counts per cell."));
        assert!(filtered.contains("Normalization method"));
        assert!(!filtered.contains(">>> run(data)"));
    }

    #[test]
    fn topic_filter_without_topic_is_identity() {
        let doc = "Test docstring content.";
        assert_eq!(filter_by_topic(doc, ""), doc);
        assert_eq!(filter_by_topic(doc, "   "), doc);
    }

    #[test]
    fn summary_helpers() {
        assert_eq!(summary_line("\n  Join paths.\nMore."), "Join paths.");
        assert_eq!(first_paragraph("Join\npaths.\n\nMore."), "Join\npaths.");
    }
}
