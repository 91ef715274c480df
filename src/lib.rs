//! `contextsc`: version-accurate scverse documentation for LLM clients.
//!
//! The server answers one question for a model about to write analysis code:
//! “What does the API I'm about to call look like *in this environment*?”
//!
//! Signatures and docstrings come from the packages actually installed next to the
//! interpreter we talk to, never from the web. Output is markdown-ish text cut to a token
//! budget, with the signature and parameters always kept.
//!
//! Layout, leaf-first:
//! - [`registry`]: the static table of known scverse packages.
//! - [`bridge`]: the [`Resolver`](introspect::Resolver) implementations (live Python worker,
//!   JSON lookup table).
//! - [`environment`]: which registry packages are importable, and at what version.
//! - [`introspect`]: dotted-path resolution, member listing, topic search.
//! - [`docstring`]: numpy-style section parsing.
//! - [`relevance`]: keyword / semantic ranking of candidates against a topic.
//! - [`format`]: tiered, budgeted rendering.
//! - [`service`]: the operation table behind both the CLI and the MCP surface.

pub mod bridge;
pub mod config;
pub mod docstring;
pub mod environment;
pub mod format;
pub mod introspect;
pub mod registry;
pub mod relevance;
pub mod service;

#[cfg(feature = "stdio")]
pub mod mcp;

pub use config::Config;
pub use format::{DEFAULT_TOKENS, MINIMUM_TOKENS};
pub use service::DocsService;
