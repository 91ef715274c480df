//! Rendering for LLM consumption, under a token budget.
//!
//! Output is assembled from [`Block`]s. Critical blocks are always emitted; high and medium
//! blocks are emitted in that order while they fit. Token counts are approximated at
//! four characters per token.

use std::collections::BTreeMap;

use crate::docstring::{self, DocSection, Tier};
use crate::environment::InstalledPackage;
use crate::introspect::{FunctionInfo, MemberSummary, SourceInfo, TopicMatch, NO_SIGNATURE};

pub const MINIMUM_TOKENS: usize = 1000;
pub const DEFAULT_TOKENS: usize = 10_000;

pub const TRUNCATION_MARKER: &str = "[... truncated due to token limit ...]";

const CHARS_PER_TOKEN: usize = 4;
// "\n\n" between blocks.
const SEPARATOR_CHARS: usize = 2;
// Room kept for the trailing omission note.
const NOTE_RESERVE_TOKENS: usize = 20;
// A hard cut smaller than this is not worth emitting.
const HARD_CUT_FLOOR_TOKENS: usize = 100;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Rounded up, so per-block charges never undercount the joined output.
fn block_cost(text: &str) -> usize {
    (text.chars().count() + SEPARATOR_CHARS).div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    max_tokens: usize,
    consumed: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(DEFAULT_TOKENS)
    }
}

impl TokenBudget {
    /// Requests below [`MINIMUM_TOKENS`] are clamped up.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(MINIMUM_TOKENS),
            consumed: 0,
        }
    }

    /// Clamp a caller-supplied (possibly negative) request.
    pub fn from_request(max_tokens: i64) -> Self {
        Self::new(usize::try_from(max_tokens).unwrap_or(0))
    }

    /// A slice of a larger, already-clamped budget. Not clamped.
    pub(crate) fn share(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            consumed: 0,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn remaining(&self) -> usize {
        self.max_tokens.saturating_sub(self.consumed)
    }

    fn charge(&mut self, text: &str) {
        self.consumed += block_cost(text);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub tier: Tier,
    pub text: String,
}

impl Block {
    pub fn new(tier: Tier, text: impl Into<String>) -> Self {
        Self {
            tier,
            text: text.into(),
        }
    }

    pub fn critical(text: impl Into<String>) -> Self {
        Self::new(Tier::Critical, text)
    }

    pub fn high(text: impl Into<String>) -> Self {
        Self::new(Tier::High, text)
    }

    pub fn medium(text: impl Into<String>) -> Self {
        Self::new(Tier::Medium, text)
    }
}

/// Cut `text` to roughly `max_tokens`, preferring a line boundary, and keep fences balanced.
fn hard_cut(text: &str, max_tokens: usize) -> String {
    let marker_chars = TRUNCATION_MARKER.chars().count() + 8;
    let limit = (max_tokens * CHARS_PER_TOKEN).saturating_sub(marker_chars);
    let byte_end = text
        .char_indices()
        .nth(limit)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let mut cut = &text[..byte_end];
    if let Some(nl) = cut.rfind('\n') {
        if nl >= byte_end / 2 {
            cut = &cut[..nl];
        }
    }
    let mut out = cut.trim_end().to_string();
    if out.matches("```").count() % 2 == 1 {
        out.push_str("\n```");
    }
    out.push_str("\n\n");
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Emit blocks by tier under `budget`.
///
/// Critical blocks are never dropped. Once a lower-tier block does not fit, it and every
/// block after it are omitted; the exception is a single block larger than the whole
/// budget, which is hard-cut into whatever room is left.
pub fn render(mut blocks: Vec<Block>, budget: &mut TokenBudget) -> String {
    blocks.sort_by_key(|b| b.tier);

    let mut out: Vec<String> = Vec::with_capacity(blocks.len() + 1);
    let mut stopped = false;
    let mut omitted = 0usize;

    for block in blocks {
        if block.tier == Tier::Critical {
            budget.charge(&block.text);
            out.push(block.text);
            continue;
        }
        if stopped {
            omitted += 1;
            continue;
        }

        let room = budget.remaining().saturating_sub(NOTE_RESERVE_TOKENS);
        if block_cost(&block.text) <= room {
            budget.charge(&block.text);
            out.push(block.text);
            continue;
        }

        stopped = true;
        if estimate_tokens(&block.text) > budget.max_tokens() && room >= HARD_CUT_FLOOR_TOKENS {
            let cut = hard_cut(&block.text, room);
            budget.charge(&cut);
            out.push(cut);
        } else {
            omitted += 1;
        }
    }

    if omitted > 0 {
        let note = format!("[... {omitted} section(s) omitted due to token limit ...]");
        budget.charge(&note);
        out.push(note);
    }
    out.join("\n\n")
}

fn signature_line(info: &FunctionInfo) -> String {
    match &info.signature {
        Some(sig) => format!("{}{}", info.name(), sig),
        None => format!("{}  # {}", info.name(), NO_SIGNATURE),
    }
}

fn parameter_line(p: &crate::introspect::Parameter) -> String {
    let mut line = format!("- **{}**", p.name);
    if let Some(ann) = &p.annotation {
        line.push_str(&format!(": `{ann}`"));
    }
    if let Some(default) = &p.default {
        line.push_str(&format!(" (default: `{default}`)"));
    }
    line
}

fn documented_params(info: &FunctionInfo) -> Vec<&crate::introspect::Parameter> {
    info.parameters
        .iter()
        .filter(|p| p.name != "self" && p.name != "cls")
        .collect()
}

/// Blocks for one callable.
///
/// With a topic, only the summary and the sections mentioning it are kept (promoted to high
/// tier); the signature, parameters and returns are always kept.
pub fn function_blocks(info: &FunctionInfo, topic: &str) -> Vec<Block> {
    let topic_lower = topic.trim().to_lowercase();
    let mut blocks = Vec::new();

    let mut header = format!(
        "# {}\n\n**Module:** `{}`  \n**Kind:** {}",
        info.path,
        info.module,
        info.kind.as_str()
    );
    let returns_doc = info
        .section("Returns")
        .or_else(|| info.section("Yields"))
        .filter(|s| !s.body.is_empty());
    let rendered_apart =
        |s: &DocSection| s.is("Parameters") || returns_doc.is_some_and(|r| s.is(&r.heading));

    let sections = if topic_lower.is_empty() {
        info.sections.clone()
    } else {
        docstring::parse(&docstring::filter_by_topic(&info.docstring, topic))
    };
    if !topic_lower.is_empty() {
        header.push_str(&format!("  \n**Topic:** `{}`", topic.trim()));
        let omitted: Vec<&str> = info
            .sections
            .iter()
            .filter(|s| !rendered_apart(s) && !s.is(docstring::SUMMARY))
            .filter(|s| !sections.iter().any(|kept| kept.is(&s.heading)))
            .map(|s| s.heading.as_str())
            .collect();
        if !omitted.is_empty() {
            header.push_str(&format!(
                "  \n**Filtered out (no mention of topic):** {}",
                omitted.join(", ")
            ));
        }
    }
    header.push_str(&format!(
        "\n\n## Signature\n\n```python\n{}\n```",
        signature_line(info)
    ));
    blocks.push(Block::critical(header));

    let params = documented_params(info);
    let param_doc = info.section("Parameters");
    if !params.is_empty() || param_doc.is_some() {
        let mut text = String::from("## Parameters\n");
        if !params.is_empty() {
            text.push('\n');
            for p in &params {
                text.push_str(&parameter_line(p));
                text.push('\n');
            }
        }
        if let Some(section) = param_doc.filter(|s| !s.body.is_empty()) {
            text.push_str(&format!("\n```text\n{}\n```\n", section.body));
        }
        blocks.push(Block::critical(text.trim_end().to_string()));
    }

    if info.return_annotation.is_some() || returns_doc.is_some() {
        let mut text = String::from("## Returns\n");
        if let Some(ann) = &info.return_annotation {
            text.push_str(&format!("\n`{ann}`\n"));
        }
        if let Some(section) = returns_doc {
            text.push_str(&format!("\n```text\n{}\n```\n", section.body));
        }
        blocks.push(Block::high(text.trim_end().to_string()));
    }

    for section in &sections {
        if rendered_apart(section) {
            continue;
        }
        let mut tier = section.tier;
        if !topic_lower.is_empty() && docstring::section_mentions(section, &topic_lower) {
            tier = tier.min(Tier::High);
        }
        let heading = if section.is(docstring::SUMMARY) {
            docstring::GENERIC
        } else {
            section.heading.as_str()
        };
        let body = if section.is("Examples") {
            format!("```python\n{}\n```", section.body)
        } else {
            section.body.clone()
        };
        blocks.push(Block::new(tier, format!("## {heading}\n\n{body}")));
    }

    blocks
}

pub fn format_function_docs(info: &FunctionInfo, mut budget: TokenBudget, topic: &str) -> String {
    render(function_blocks(info, topic), &mut budget)
}

/// Append lines while they fit; returns how many were skipped.
fn push_lines_within(
    out: &mut String,
    lines: impl IntoIterator<Item = String>,
    budget: &mut TokenBudget,
) -> usize {
    let mut skipped = 0;
    for line in lines {
        let cost = line.chars().count().div_ceil(CHARS_PER_TOKEN) + 1;
        if skipped > 0 || cost + NOTE_RESERVE_TOKENS > budget.remaining() {
            skipped += 1;
            continue;
        }
        budget.consumed += cost;
        out.push_str(&line);
        out.push('\n');
    }
    skipped
}

pub fn format_module_listing(
    module_path: &str,
    members: &[MemberSummary],
    mut budget: TokenBudget,
) -> String {
    let mut out = format!(
        "# Functions in {module_path}\n\nFound {} public functions:\n\n",
        members.len()
    );
    budget.consumed += estimate_tokens(&out);

    let lines = members.iter().map(|m| {
        if m.summary.is_empty() {
            format!("- `{module_path}.{}`", m.name)
        } else {
            format!("- `{module_path}.{}`: {}", m.name, m.summary)
        }
    });
    let skipped = push_lines_within(&mut out, lines, &mut budget);
    if skipped > 0 {
        out.push_str(&format!(
            "\n[... {skipped} more member(s) omitted due to token limit ...]\n"
        ));
    }
    out.trim_end().to_string()
}

pub fn format_topic_results(
    module_path: &str,
    topic: &str,
    matches: &[TopicMatch],
    budget: TokenBudget,
) -> String {
    let mut out = vec![
        format!("# Functions in {module_path} matching topic: '{topic}'"),
        String::new(),
        format!("Found {} relevant function(s):", matches.len()),
        String::new(),
    ];

    let max = budget.max_tokens();
    for (i, m) in matches.iter().enumerate() {
        let used = estimate_tokens(&out.join("\n"));
        let remaining = max.saturating_sub(used);
        let share = remaining / (matches.len() - i);
        if i > 0 && remaining < MINIMUM_TOKENS {
            out.push("[... additional results truncated due to token limit ...]".to_string());
            break;
        }
        out.push(format!("## {} (relevance score: {})", m.name, m.score));
        out.push(String::new());
        out.push(format_function_docs(&m.info, TokenBudget::share(share), topic));
        out.push(format!("\n{}\n", "-".repeat(80)));
    }
    out.join("\n")
}

pub fn format_package_list(packages: &[InstalledPackage]) -> String {
    let mut lines = vec!["# Installed Scverse Packages".to_string(), String::new()];

    let (installed, missing): (Vec<_>, Vec<_>) = packages.iter().partition(|p| p.installed);

    if !installed.is_empty() {
        lines.push("## Available Packages".to_string());
        lines.push(String::new());
        for p in &installed {
            let version = p
                .version
                .as_deref()
                .map(|v| format!("v{v}"))
                .unwrap_or_else(|| "version unknown".to_string());
            lines.push(format!(
                "- **{}** ({version}): {}",
                p.package.name,
                p.package.category.as_str()
            ));
        }
        lines.push(String::new());
    }

    if !missing.is_empty() {
        lines.push("## Not Installed".to_string());
        lines.push(String::new());
        for p in &missing {
            lines.push(format!("- {}", p.package.name));
        }
        lines.push(String::new());
    }

    if installed.is_empty() {
        lines.push(
            "⚠️ No scverse packages are currently installed in this environment.".to_string(),
        );
        lines.push(String::new());
        lines.push("Install packages with: `pip install <package-name>`".to_string());
    }

    lines.join("\n").trim_end().to_string()
}

pub fn format_package_detail(p: &InstalledPackage) -> String {
    let meta = p.package;
    if p.installed {
        format!(
            "# {}\n\n\
             **Package:** `{}`\n\
             **Import as:** `{}`\n\
             **Version:** {}\n\
             **Category:** {}\n\
             **Status:** ✅ Installed\n\n\
             **Description:** {}\n\n\
             **Documentation:** {}\n\
             **GitHub:** {}\n\n\
             Use `get_scverse_docs` to fetch documentation for specific functions.",
            meta.display_name,
            meta.name,
            meta.import_name,
            p.version.as_deref().unwrap_or("unknown"),
            meta.category.as_str(),
            meta.description,
            meta.docs_url,
            meta.github_url,
        )
    } else {
        format!(
            "# {}\n\n\
             **Package:** `{}`\n\
             **Category:** {}\n\
             **Status:** ❌ Not Installed\n\n\
             **Description:** {}\n\n\
             Install with: `pip install {}`\n\n\
             **Documentation:** {}\n\
             **GitHub:** {}",
            meta.display_name,
            meta.name,
            meta.category.as_str(),
            meta.description,
            meta.name,
            meta.docs_url,
            meta.github_url,
        )
    }
}

pub fn format_function_source(
    source: &SourceInfo,
    info: Option<&FunctionInfo>,
    mut budget: TokenBudget,
) -> String {
    let mut blocks = vec![Block::critical(format!(
        "# {}\n\n**Source:** `{}` (lines {}-{})",
        source.path, source.file_path, source.line_start, source.line_end
    ))];
    if let Some(info) = info {
        let mut text = format!(
            "## Documentation\n\n**Signature:** `{}`",
            signature_line(info)
        );
        if info.has_documentation() {
            text.push_str(&format!("\n\n{}", docstring::first_paragraph(&info.docstring)));
        }
        blocks.push(Block::high(text));
    }
    let mut out = render(blocks, &mut budget);

    out.push_str("\n\n## Source Code\n\n```python\n");
    budget.consumed += 8;
    let total = source.code.lines().count();
    let skipped = push_lines_within(
        &mut out,
        source.code.lines().map(str::to_string),
        &mut budget,
    );
    if skipped > 0 {
        out.push_str(&format!(
            "# ... {skipped} of {total} lines truncated due to token limit ...\n"
        ));
    }
    out.push_str("```");
    out
}

pub fn format_ecosystem_results(topic: &str, results: &BTreeMap<String, Vec<TopicMatch>>) -> String {
    let mut lines = vec![
        format!("# Functions matching '{topic}' across scverse ecosystem"),
        String::new(),
        format!("Found matches in {} package(s):", results.len()),
        String::new(),
    ];

    for (package, matches) in results {
        lines.push(format!("## {package}"));
        lines.push(String::new());
        for m in matches {
            let summary = if m.info.has_documentation() {
                m.info.summary()
            } else {
                "No description"
            };
            lines.push(format!("- **{}** (score: {})", m.info.path, m.score));
            lines.push(format!("  {summary}"));
            lines.push(String::new());
        }
    }

    lines.push("---".to_string());
    lines.push(String::new());
    lines.push("To get detailed documentation for a specific function, use:".to_string());
    lines.push("`get_scverse_docs('<package>.<module>.<function_name>')`".to_string());
    if let Some(first) = results.values().next().and_then(|m| m.first()) {
        lines.push(String::new());
        lines.push("Example:".to_string());
        lines.push(format!("`get_scverse_docs('{}')`", first.info.path));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{CallableRecord, ObjectKind, Parameter};

    fn normalize_total(doc: &str) -> FunctionInfo {
        FunctionInfo::from_record(CallableRecord {
            path: "scanpy.pp.normalize_total".into(),
            module: Some("scanpy.preprocessing._normalization".into()),
            object_kind: ObjectKind::Function,
            signature: Some("(adata: AnnData, *, target_sum: float | None = None) -> AnnData | None".into()),
            parameters: vec![
                Parameter {
                    name: "adata".into(),
                    annotation: Some("AnnData".into()),
                    default: None,
                },
                Parameter {
                    name: "target_sum".into(),
                    annotation: Some("float | None".into()),
                    default: Some("None".into()),
                },
            ],
            return_annotation: Some("AnnData | None".into()),
            docstring: Some(doc.into()),
        })
    }

    fn big_doc() -> String {
        let notes = "Counts are scaled per cell so that every cell has the same total. ".repeat(400);
        format!(
            "Normalize counts per cell.\n\n\
             Parameters\n----------\nadata\n    The annotated data matrix.\ntarget_sum\n    Total after normalization.\n\n\
             Returns\n-------\nReturns or updates `adata`.\n\n\
             Notes\n-----\n{notes}\n\n\
             Examples\n--------\n>>> sc.pp.normalize_total(adata)\n"
        )
    }

    #[test]
    fn budget_is_clamped_to_minimum() {
        assert_eq!(TokenBudget::new(10).max_tokens(), MINIMUM_TOKENS);
        assert_eq!(TokenBudget::from_request(-5).max_tokens(), MINIMUM_TOKENS);
        assert_eq!(TokenBudget::from_request(5000).max_tokens(), 5000);
        assert_eq!(TokenBudget::default().max_tokens(), DEFAULT_TOKENS);
    }

    #[test]
    fn critical_sections_survive_minimum_budget() {
        let info = normalize_total(&big_doc());
        let out = format_function_docs(&info, TokenBudget::new(100), "");
        assert!(out.contains("# scanpy.pp.normalize_total"));
        assert!(out.contains("## Signature"));
        assert!(out.contains("normalize_total(adata: AnnData"));
        assert!(out.contains("## Parameters"));
        assert!(out.contains("- **target_sum**: `float | None` (default: `None`)"));
        assert!(out.contains("The annotated data matrix."));
    }

    #[test]
    fn minimum_budget_output_stays_within_budget() {
        let info = normalize_total(&big_doc());
        let out = format_function_docs(&info, TokenBudget::new(1000), "");
        assert!(estimate_tokens(&out) <= MINIMUM_TOKENS, "{}", estimate_tokens(&out));
        assert!(out.contains("omitted due to token limit") || out.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn overlong_single_section_is_hard_cut() {
        let info = normalize_total(&big_doc());
        let out = format_function_docs(&info, TokenBudget::new(2000), "");
        assert!(out.contains("## Notes"));
        assert!(out.contains(TRUNCATION_MARKER));
        assert!(!out.contains(">>> sc.pp.normalize_total"));
        assert!(estimate_tokens(&out) <= 2000);
    }

    #[test]
    fn small_docs_are_emitted_whole() {
        let info = normalize_total("Normalize counts per cell.\n\nReturns\n-------\nNothing.");
        let out = format_function_docs(&info, TokenBudget::default(), "");
        assert!(out.contains("## Documentation\n\nNormalize counts per cell."));
        assert!(out.contains("## Returns\n\n`AnnData | None`"));
        assert!(!out.contains("omitted"));
        assert!(!out.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn critical_first_then_high_then_medium() {
        let blocks = vec![
            Block::medium("m1"),
            Block::high("h1"),
            Block::critical("c1"),
            Block::medium("m2"),
            Block::critical("c2"),
        ];
        let out = render(blocks, &mut TokenBudget::default());
        assert_eq!(out, "c1\n\nc2\n\nh1\n\nm1\n\nm2");
    }

    #[test]
    fn topic_keeps_only_matching_sections() {
        let doc = "Summary line.\n\nParameters\n----------\nadata\n    The matrix.\n\n\
                   Notes\n-----\nabout clustering\n\nSee Also\n--------\nconnectivity graphs\n";
        let info = normalize_total(doc);
        let out = format_function_docs(&info, TokenBudget::default(), "connectivity");
        assert!(out.contains("**Topic:** `connectivity`"));
        assert!(out.contains("**Filtered out (no mention of topic):** Notes"));
        assert!(out.contains("## See Also\n\nconnectivity graphs"));
        assert!(out.contains("## Documentation\n\nSummary line."));
        assert!(out.contains("The matrix."));
        assert!(!out.contains("## Notes"));

        let unfiltered = format_function_docs(&info, TokenBudget::default(), "");
        assert!(unfiltered.contains("## Notes"));
        assert!(!unfiltered.contains("Filtered out"));
    }

    #[test]
    fn module_listing_is_budgeted() {
        let members: Vec<MemberSummary> = (0..2000)
            .map(|i| MemberSummary {
                name: format!("function_number_{i}"),
                kind: crate::introspect::MemberKind::Function,
                summary: "Does a thing to the data matrix.".into(),
            })
            .collect();
        let out = format_module_listing("scanpy.pp", &members, TokenBudget::new(1000));
        assert!(out.starts_with("# Functions in scanpy.pp"));
        assert!(out.contains("more member(s) omitted"));
        assert!(estimate_tokens(&out) <= 1000);
    }

    #[test]
    fn source_is_line_truncated() {
        let code: String = (0..3000).map(|i| format!("    x_{i} = compute({i})\n")).collect();
        let source = SourceInfo {
            path: "scanpy.pp.normalize_total".into(),
            file_path: "/site-packages/scanpy/preprocessing/_normalization.py".into(),
            line_start: 10,
            line_end: 3009,
            code,
        };
        let out = format_function_source(&source, None, TokenBudget::new(1000));
        assert!(out.contains("## Source Code"));
        assert!(out.contains("```python"));
        assert!(out.ends_with("```"));
        assert!(out.contains("lines truncated due to token limit"));
        assert!(estimate_tokens(&out) <= 1000);
    }
}
