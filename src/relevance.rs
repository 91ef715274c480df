//! Topic relevance ranking.
//!
//! Two strategies behind one [`RelevanceFilter`]:
//! - keyword: substring counting over name / summary / body (always available);
//! - semantic: cosine similarity of sentence embeddings, when an [`Embedder`] is available.
//!
//! The semantic backend is probed at most once per [`BackendSelector`]; a failed probe
//! selects keyword mode for the rest of the process.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use thiserror::Error;

/// Name match bonus (keyword mode).
pub const NAME_MATCH_SCORE: u32 = 10;
/// Per-occurrence score in the summary paragraph (keyword mode).
pub const SUMMARY_MATCH_SCORE: u32 = 5;
/// Per-occurrence score anywhere in the body (keyword mode).
pub const BODY_MATCH_SCORE: u32 = 1;
/// Semantic scores at or below this are treated as "no match".
pub const SEMANTIC_MIN_SCORE: u32 = 10;

const SEMANTIC_TEXT_MAX_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error("embedding request failed: {0}")]
    Failed(String),
}

/// Text embedding capability (e.g. sentence-transformers behind the Python worker).
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Keyword,
    Semantic,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Keyword => "keyword",
            Mode::Semantic => "semantic",
        }
    }
}

/// Something that can be ranked against a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    /// Short description (first docstring paragraph, or a section heading).
    pub summary: String,
    /// Full text searched for body matches.
    pub body: String,
}

impl Candidate {
    pub fn new(
        name: impl Into<String>,
        summary: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            body: body.into(),
        }
    }

    fn semantic_text(&self) -> String {
        format!("{} {}", self.name, self.summary)
            .chars()
            .take(SEMANTIC_TEXT_MAX_CHARS)
            .collect()
    }
}

/// A candidate's position in the input slice plus its score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranked {
    pub index: usize,
    pub score: u32,
}

pub fn keyword_score(topic_lower: &str, candidate: &Candidate) -> u32 {
    if topic_lower.is_empty() {
        return 0;
    }
    let mut score = 0;
    if candidate.name.to_lowercase().contains(topic_lower) {
        score += NAME_MATCH_SCORE;
    }
    let summary_hits = candidate.summary.to_lowercase().matches(topic_lower).count() as u32;
    let body_hits = candidate.body.to_lowercase().matches(topic_lower).count() as u32;
    score + summary_hits * SUMMARY_MATCH_SCORE + body_hits * BODY_MATCH_SCORE
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Highest score first; equal scores keep enumeration order (`sort_by` is stable).
fn sort_ranked(mut ranked: Vec<Ranked>) -> Vec<Ranked> {
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

#[derive(Clone)]
pub struct RelevanceFilter {
    semantic: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for RelevanceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevanceFilter")
            .field("mode", &self.mode())
            .field("model", &self.semantic.as_ref().map(|e| e.model().to_string()))
            .finish()
    }
}

impl RelevanceFilter {
    pub fn keyword() -> Self {
        Self { semantic: None }
    }

    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            semantic: Some(embedder),
        }
    }

    /// Run a capability probe; any failure silently selects keyword mode.
    pub fn detect<F>(probe: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn Embedder>, EmbedError>,
    {
        match probe() {
            Ok(embedder) => {
                log::info!("relevance: semantic mode (model={})", embedder.model());
                Self::with_embedder(embedder)
            }
            Err(e) => {
                log::info!("relevance: keyword mode ({e})");
                Self::keyword()
            }
        }
    }

    pub fn mode(&self) -> Mode {
        if self.semantic.is_some() {
            Mode::Semantic
        } else {
            Mode::Keyword
        }
    }

    /// Rank candidates against `topic`. Non-matching candidates are excluded.
    pub fn rank(&self, topic: &str, candidates: &[Candidate]) -> Vec<Ranked> {
        let topic = topic.trim();
        if topic.is_empty() || candidates.is_empty() {
            return Vec::new();
        }
        if let Some(embedder) = &self.semantic {
            match rank_semantic(embedder.as_ref(), topic, candidates) {
                Ok(ranked) => return ranked,
                Err(e) => log::warn!("relevance: semantic ranking failed, using keywords: {e}"),
            }
        }
        rank_keyword(topic, candidates)
    }
}

pub fn rank_keyword(topic: &str, candidates: &[Candidate]) -> Vec<Ranked> {
    let topic_lower = topic.trim().to_lowercase();
    let ranked = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| Ranked {
            index,
            score: keyword_score(&topic_lower, c),
        })
        .filter(|r| r.score > 0)
        .collect();
    sort_ranked(ranked)
}

fn rank_semantic(
    embedder: &dyn Embedder,
    topic: &str,
    candidates: &[Candidate],
) -> Result<Vec<Ranked>, EmbedError> {
    let mut texts = Vec::with_capacity(candidates.len() + 1);
    texts.push(topic.to_string());
    texts.extend(candidates.iter().map(Candidate::semantic_text));

    let vectors = embedder.embed(&texts)?;
    if vectors.len() != texts.len() {
        return Err(EmbedError::Failed(format!(
            "expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }

    let topic_vec = &vectors[0];
    let ranked = vectors[1..]
        .iter()
        .enumerate()
        .map(|(index, v)| {
            let sim = cosine(topic_vec, v).clamp(0.0, 1.0);
            Ranked {
                index,
                score: (sim * 100.0).floor() as u32,
            }
        })
        .filter(|r| r.score > SEMANTIC_MIN_SCORE)
        .collect();
    Ok(sort_ranked(ranked))
}

/// Once-per-process backend selection.
///
/// The probe runs on first use (not at startup) so a slow model load never delays the MCP
/// handshake.
pub struct BackendSelector {
    cell: OnceCell<RelevanceFilter>,
    probe: Box<dyn Fn() -> Result<Arc<dyn Embedder>, EmbedError> + Send + Sync>,
}

impl BackendSelector {
    pub fn new<F>(probe: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>, EmbedError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            probe: Box::new(probe),
        }
    }

    /// A selector whose decision is already made.
    pub fn ready(filter: RelevanceFilter) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(filter);
        Self {
            cell,
            probe: Box::new(|| Err(EmbedError::Unavailable("selection already made".into()))),
        }
    }

    pub fn get(&self) -> &RelevanceFilter {
        self.cell.get_or_init(|| RelevanceFilter::detect(|| (self.probe)()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn os_path_like() -> Vec<Candidate> {
        vec![
            Candidate::new("abspath", "Return an absolute path.", "Return an absolute path."),
            Candidate::new("basename", "Returns the final component of a pathname", ""),
            Candidate::new(
                "join",
                "Join two or more pathname components, inserting '/' as needed.",
                "Join two or more pathname components, inserting '/' as needed. \
                 If any component is an absolute path, all previous path components \
                 will be discarded.",
            ),
            Candidate::new("exists", "Test whether a path exists.", "Test whether a path exists."),
        ]
    }

    /// Embeds each text as a fixed vector keyed on whether it mentions "join".
    struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        fn model(&self) -> &str {
            "fake"
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("join") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn model(&self) -> &str {
            "broken"
        }
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Failed("worker died".into()))
        }
    }

    #[test]
    fn keyword_name_match_ranks_first() {
        let ranked = rank_keyword("join", &os_path_like());
        assert_eq!(ranked[0].index, 2);
        assert!(ranked[0].score >= NAME_MATCH_SCORE);
    }

    #[test]
    fn keyword_excludes_non_matches() {
        assert!(rank_keyword("nonexistent_topic_xyz", &os_path_like()).is_empty());
        assert!(RelevanceFilter::keyword().rank("   ", &os_path_like()).is_empty());
    }

    #[test]
    fn keyword_scoring_weights() {
        let c = Candidate::new("normalize_total", "Normalize counts.", "Normalize counts. normalize");
        // name (10) + summary once (5) + body twice (2)
        assert_eq!(keyword_score("normalize", &c), 17);
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let candidates = vec![
            Candidate::new("a", "path", ""),
            Candidate::new("b", "path", ""),
            Candidate::new("c", "path", ""),
        ];
        let order: Vec<usize> = rank_keyword("path", &candidates).iter().map(|r| r.index).collect();
        assert_eq!(order, [0, 1, 2]);
    }

    #[test]
    fn unavailable_backend_falls_back_to_keyword_ranking() {
        let filter = RelevanceFilter::detect(|| Err(EmbedError::Unavailable("no module".into())));
        assert_eq!(filter.mode(), Mode::Keyword);
        let candidates = os_path_like();
        for topic in ["join", "path", "absolute", "nothing-here"] {
            assert_eq!(filter.rank(topic, &candidates), rank_keyword(topic, &candidates));
        }
    }

    #[test]
    fn failing_semantic_call_falls_back_per_call() {
        let filter = RelevanceFilter::with_embedder(Arc::new(BrokenEmbedder));
        assert_eq!(filter.mode(), Mode::Semantic);
        let candidates = os_path_like();
        assert_eq!(filter.rank("join", &candidates), rank_keyword("join", &candidates));
    }

    #[test]
    fn semantic_scores_are_normalized_and_thresholded() {
        let filter = RelevanceFilter::with_embedder(Arc::new(FakeEmbedder));
        let ranked = filter.rank("join", &os_path_like());
        assert_eq!(ranked, vec![Ranked { index: 2, score: 100 }]);
    }

    #[test]
    fn selector_probes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let selector = BackendSelector::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(EmbedError::Unavailable("nope".into()))
        });
        assert!(selector.cell.get().is_none());
        for _ in 0..3 {
            assert_eq!(selector.get().mode(), Mode::Keyword);
        }
        assert!(selector.cell.get().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
