//! Runtime configuration from environment variables.
//!
//! CLI flags override these; see `main.rs`.

use std::path::PathBuf;

pub const ENV_PYTHON: &str = "CONTEXTSC_PYTHON";
pub const ENV_TABLE: &str = "CONTEXTSC_TABLE";
pub const ENV_SEMANTIC: &str = "CONTEXTSC_SEMANTIC";
pub const ENV_EMBED_MODEL: &str = "CONTEXTSC_EMBED_MODEL";

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_EMBED_MODEL: &str = "all-MiniLM-L6-v2";

/// Whether to try the embedding backend for topic ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SemanticMode {
    /// Use embeddings when the interpreter can load them, keywords otherwise.
    #[default]
    Auto,
    /// Always rank by keywords.
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Interpreter used for the introspection worker.
    pub python: String,
    /// Serve from a lookup table instead of a live interpreter.
    pub table: Option<PathBuf>,
    pub semantic: SemanticMode,
    pub embed_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: DEFAULT_PYTHON.to_string(),
            table: None,
            semantic: SemanticMode::Auto,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
        }
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_semantic(raw: Option<String>) -> SemanticMode {
    let Some(raw) = non_empty(raw) else {
        return SemanticMode::Auto;
    };
    match raw.to_ascii_lowercase().as_str() {
        "auto" | "on" | "1" | "true" => SemanticMode::Auto,
        "off" | "0" | "false" | "keyword" => SemanticMode::Off,
        other => {
            log::warn!("{ENV_SEMANTIC} must be one of: auto, off (got {other}); defaulting to auto");
            SemanticMode::Auto
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map here).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            python: non_empty(get(ENV_PYTHON)).unwrap_or(defaults.python),
            table: non_empty(get(ENV_TABLE)).map(PathBuf::from),
            semantic: parse_semantic(get(ENV_SEMANTIC)),
            embed_model: non_empty(get(ENV_EMBED_MODEL)).unwrap_or(defaults.embed_model),
        }
    }
}
