//! Dotted-path introspection over a [`Resolver`].
//!
//! A resolver answers three questions about the host environment: is a package importable,
//! what object lives at a dotted path, and where is its source. Everything above it
//! (member listing, topic search, ecosystem search) is plain Rust over the returned records.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::docstring::{self, DocSection};
use crate::registry::Package;
use crate::relevance::{Candidate, RelevanceFilter};

/// Default number of results for module topic search.
pub const TOPIC_RESULTS: usize = 5;
/// Upper bound on callables considered per package in ecosystem search.
pub const ECOSYSTEM_CANDIDATE_CAP: usize = 500;

pub const NO_DOCUMENTATION: &str = "No documentation available.";
pub const NO_SIGNATURE: &str = "Signature not available";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectError {
    #[error("package '{0}' is not installed")]
    PackageNotInstalled(String),
    #[error("could not find object at path: {0}")]
    SymbolNotFound(String),
    #[error("{0} is not a callable object")]
    NotCallable(String),
    #[error("{0} is not a module")]
    NotAModule(String),
    #[error("cannot retrieve source code for '{path}': {reason}")]
    SourceUnavailable { path: String, reason: String },
    #[error("introspection backend failed: {0}")]
    Backend(String),
}

/// Result of a lightweight existence probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub installed: bool,
    #[serde(default)]
    pub version: Option<String>,
}

impl Probe {
    pub fn absent() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    #[default]
    Function,
    Class,
    Method,
    Builtin,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Function => "function",
            ObjectKind::Class => "class",
            ObjectKind::Method => "method",
            ObjectKind::Builtin => "builtin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub annotation: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// Raw facts about a callable, as reported by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableRecord {
    pub path: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub object_kind: ObjectKind,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_annotation: Option<String>,
    #[serde(default)]
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Function,
    Class,
    Module,
    #[default]
    Other,
}

impl MemberKind {
    pub fn is_callable(self) -> bool {
        matches!(self, MemberKind::Function | MemberKind::Class)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub name: String,
    #[serde(default)]
    pub kind: MemberKind,
    /// First line of the member's docstring (may be empty).
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub path: String,
    #[serde(default)]
    pub members: Vec<MemberSummary>,
}

/// What a dotted path resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolved {
    Callable(CallableRecord),
    Module(ModuleRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub code: String,
}

/// Host-environment capability: "given a name, return an object or indicate absence".
pub trait Resolver: Send + Sync {
    /// Existence probe; never fails (absence is `installed: false`).
    fn probe(&self, import_name: &str, distribution: &str) -> Probe;

    fn probe_many(&self, packages: &[(&str, &str)]) -> Vec<Probe> {
        packages
            .iter()
            .map(|(import_name, dist)| self.probe(import_name, dist))
            .collect()
    }

    fn resolve(&self, path: &str) -> Result<Resolved, IntrospectError>;

    fn resolve_many(&self, paths: &[String]) -> Vec<Result<Resolved, IntrospectError>> {
        paths.iter().map(|p| self.resolve(p)).collect()
    }

    fn source(&self, path: &str) -> Result<SourceInfo, IntrospectError>;
}

/// Documentation facts for one callable, with its docstring already split into sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    pub path: String,
    pub module: String,
    pub kind: ObjectKind,
    pub signature: Option<String>,
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<String>,
    pub docstring: String,
    pub sections: Vec<DocSection>,
}

impl FunctionInfo {
    pub fn from_record(record: CallableRecord) -> Self {
        let docstring = record
            .docstring
            .filter(|d| !d.trim().is_empty())
            .map(|d| docstring::cleandoc(&d))
            .unwrap_or_else(|| NO_DOCUMENTATION.to_string());
        let sections = docstring::parse(&docstring);
        let return_annotation = record
            .return_annotation
            .filter(|a| !a.trim().is_empty() && a != "Any");
        Self {
            module: record.module.unwrap_or_else(|| "unknown".to_string()),
            kind: record.object_kind,
            signature: record.signature.filter(|s| !s.trim().is_empty()),
            parameters: record.parameters,
            return_annotation,
            docstring,
            sections,
            path: record.path,
        }
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn summary(&self) -> &str {
        docstring::summary_line(&self.docstring)
    }

    pub fn has_documentation(&self) -> bool {
        self.docstring != NO_DOCUMENTATION
    }

    pub fn section(&self, heading: &str) -> Option<&DocSection> {
        self.sections.iter().find(|s| s.is(heading))
    }

    pub fn candidate(&self) -> Candidate {
        Candidate::new(
            self.name(),
            docstring::first_paragraph(&self.docstring),
            self.docstring.clone(),
        )
    }
}

/// One ranked hit from a topic search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicMatch {
    pub name: String,
    pub info: FunctionInfo,
    pub score: u32,
}

pub fn extract_function_info(
    resolver: &dyn Resolver,
    path: &str,
) -> Result<FunctionInfo, IntrospectError> {
    match resolver.resolve(path)? {
        Resolved::Callable(record) => Ok(FunctionInfo::from_record(record)),
        Resolved::Module(_) => Err(IntrospectError::NotCallable(path.to_string())),
    }
}

/// Public members of a module, sorted by name.
pub fn list_module_members(
    resolver: &dyn Resolver,
    path: &str,
) -> Result<Vec<MemberSummary>, IntrospectError> {
    match resolver.resolve(path)? {
        Resolved::Module(module) => Ok(public_members(module.members)),
        Resolved::Callable(_) => Err(IntrospectError::NotAModule(path.to_string())),
    }
}

/// Public functions and classes of a module, sorted by name.
pub fn list_module_functions(
    resolver: &dyn Resolver,
    path: &str,
) -> Result<Vec<MemberSummary>, IntrospectError> {
    Ok(list_module_members(resolver, path)?
        .into_iter()
        .filter(|m| m.kind.is_callable())
        .collect())
}

fn public_members(mut members: Vec<MemberSummary>) -> Vec<MemberSummary> {
    members.retain(|m| !m.name.starts_with('_'));
    members.sort_by(|a, b| a.name.cmp(&b.name));
    members.dedup_by(|a, b| a.name == b.name);
    members
}

/// Resolve many callables; anything that fails or is not callable is skipped.
fn resolve_functions(resolver: &dyn Resolver, paths: &[String]) -> Vec<FunctionInfo> {
    resolver
        .resolve_many(paths)
        .into_iter()
        .zip(paths)
        .filter_map(|(res, path)| match res {
            Ok(Resolved::Callable(record)) => Some(FunctionInfo::from_record(record)),
            Ok(Resolved::Module(_)) => None,
            Err(e) => {
                log::debug!("skipping {path}: {e}");
                None
            }
        })
        .collect()
}

fn rank_functions(
    filter: &RelevanceFilter,
    topic: &str,
    functions: Vec<FunctionInfo>,
    max_results: usize,
) -> Vec<TopicMatch> {
    let candidates: Vec<Candidate> = functions.iter().map(FunctionInfo::candidate).collect();
    let ranked = filter.rank(topic, &candidates);

    let mut slots: Vec<Option<FunctionInfo>> = functions.into_iter().map(Some).collect();
    ranked
        .into_iter()
        .take(max_results)
        .filter_map(|r| {
            let info = slots.get_mut(r.index)?.take()?;
            Some(TopicMatch {
                name: info.name().to_string(),
                info,
                score: r.score,
            })
        })
        .collect()
}

/// Top `max_results` callables of `module_path` ranked against `topic`.
pub fn search_functions_by_topic(
    resolver: &dyn Resolver,
    filter: &RelevanceFilter,
    module_path: &str,
    topic: &str,
    max_results: usize,
) -> Result<Vec<TopicMatch>, IntrospectError> {
    if topic.trim().is_empty() {
        return Ok(Vec::new());
    }
    let paths: Vec<String> = list_module_functions(resolver, module_path)?
        .into_iter()
        .map(|m| format!("{module_path}.{}", m.name))
        .collect();
    let functions = resolve_functions(resolver, &paths);
    Ok(rank_functions(filter, topic, functions, max_results))
}

pub fn extract_source(resolver: &dyn Resolver, path: &str) -> Result<SourceInfo, IntrospectError> {
    resolver.source(path)
}

/// Callable paths under a package root and its public first-level submodules.
fn ecosystem_candidates(resolver: &dyn Resolver, root: &str) -> Vec<String> {
    let members = match list_module_members(resolver, root) {
        Ok(m) => m,
        Err(e) => {
            log::debug!("ecosystem search: skipping {root}: {e}");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    let mut submodules = Vec::new();
    for m in &members {
        let path = format!("{root}.{}", m.name);
        match m.kind {
            MemberKind::Module => submodules.push(path),
            k if k.is_callable() => {
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
            _ => {}
        }
    }

    for (sub, res) in submodules.iter().zip(resolver.resolve_many(&submodules)) {
        let Ok(Resolved::Module(module)) = res else {
            continue;
        };
        for m in public_members(module.members) {
            if !m.kind.is_callable() {
                continue;
            }
            let path = format!("{sub}.{}", m.name);
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    paths.truncate(ECOSYSTEM_CANDIDATE_CAP);
    paths
}

/// Rank callables across the given (installed) packages, keyed by import name.
///
/// Packages without a match are omitted.
pub fn search_ecosystem(
    resolver: &dyn Resolver,
    filter: &RelevanceFilter,
    packages: &[&Package],
    topic: &str,
    max_results_per_package: usize,
) -> BTreeMap<String, Vec<TopicMatch>> {
    let mut out = BTreeMap::new();
    if topic.trim().is_empty() || max_results_per_package == 0 {
        return out;
    }
    for package in packages {
        let paths = ecosystem_candidates(resolver, package.import_name);
        let functions = resolve_functions(resolver, &paths);
        let matches = rank_functions(filter, topic, functions, max_results_per_package);
        if !matches.is_empty() {
            out.insert(package.import_name.to_string(), matches);
        }
    }
    out
}
