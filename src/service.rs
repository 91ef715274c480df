//! The four documentation operations, and the table that names them.
//!
//! Every operation returns text. Domain failures (package missing, path not found, no
//! source) are reported in that text; only malformed arguments are errors.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::bridge::{PythonEmbedder, PythonResolver, PythonWorker, Table, TableError, TableResolver};
use crate::config::{Config, SemanticMode};
use crate::environment::Environment;
use crate::format::{self, TokenBudget, DEFAULT_TOKENS};
use crate::introspect::{self, IntrospectError, Resolver, TOPIC_RESULTS};
use crate::registry::{self, Package};
use crate::relevance::{BackendSelector, RelevanceFilter};

pub const DEFAULT_RESULTS_PER_PACKAGE: i64 = 3;
const MAX_RESULTS_PER_PACKAGE: usize = 50;

pub struct DocsService {
    resolver: Arc<dyn Resolver>,
    env: Environment,
    selector: BackendSelector,
}

impl DocsService {
    pub fn new(resolver: Arc<dyn Resolver>, selector: BackendSelector) -> Self {
        Self {
            env: Environment::new(resolver.clone()),
            resolver,
            selector,
        }
    }

    /// Keyword-ranked service over a fixed table.
    pub fn from_table(table: Table) -> Self {
        Self::new(
            Arc::new(TableResolver::new(table)),
            BackendSelector::ready(RelevanceFilter::keyword()),
        )
    }

    pub fn from_config(config: &Config) -> Result<Self, TableError> {
        if let Some(path) = &config.table {
            let table = Table::from_path(path)?;
            log::info!(
                "serving from table {} ({} packages, {} objects)",
                path.display(),
                table.packages.len(),
                table.objects.len()
            );
            return Ok(Self::from_table(table));
        }

        let worker = Arc::new(PythonWorker::new(config.python.clone()));
        let selector = match config.semantic {
            SemanticMode::Off => BackendSelector::ready(RelevanceFilter::keyword()),
            SemanticMode::Auto => {
                let worker = worker.clone();
                let model = config.embed_model.clone();
                BackendSelector::new(move || PythonEmbedder::probe(worker.clone(), &model))
            }
        };
        log::info!("introspecting with {}", worker.program());
        Ok(Self::new(Arc::new(PythonResolver::new(worker)), selector))
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Selected on first call.
    pub fn relevance(&self) -> &RelevanceFilter {
        self.selector.get()
    }

    /// `Err` carries the user-facing message when `path` cannot be served at all.
    fn preflight(&self, path: &str) -> Result<(), String> {
        let installed = self.env.installed_import_names();
        if installed.is_empty() {
            return Err(no_packages_message(""));
        }
        let root = path.split('.').next().unwrap_or(path);
        if !installed.iter().any(|name| *name == root) {
            let install = registry::package_for_path(path)
                .map(|p| format!("Install with: `pip install {}`\n\n", p.name))
                .unwrap_or_default();
            return Err(format!(
                "❌ Package '{root}' is not installed.\n\n\
                 Installed packages: {}\n\n\
                 {install}\
                 Use `resolve_scverse_package` to see all available packages.",
                installed.join(", ")
            ));
        }
        Ok(())
    }

    pub fn resolve_package(&self, package_name: Option<&str>) -> String {
        match package_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => match self.env.lookup(name) {
                Some(pkg) => format::format_package_detail(&pkg),
                None => {
                    let known: Vec<&str> = registry::CORE_PACKAGES.iter().map(|p| p.name).collect();
                    format!(
                        "Package '{name}' is not a core scverse package.\n\n\
                         Core packages: {}",
                        known.join(", ")
                    )
                }
            },
            None => format::format_package_list(&self.env.packages()),
        }
    }

    pub fn get_docs(&self, function_path: &str, topic: &str, max_tokens: i64) -> String {
        let budget = TokenBudget::from_request(max_tokens);
        let path = function_path.trim();
        let topic = topic.trim();
        if let Err(message) = self.preflight(path) {
            return message;
        }

        let err = match introspect::extract_function_info(self.resolver.as_ref(), path) {
            Ok(info) => return format::format_function_docs(&info, budget, topic),
            Err(e) => e,
        };
        if !matches!(err, IntrospectError::NotCallable(_)) {
            return not_found_message(path, &err);
        }

        let functions = match introspect::list_module_functions(self.resolver.as_ref(), path) {
            Ok(f) => f,
            Err(e) => return not_found_message(path, &e),
        };
        if functions.is_empty() {
            return format!(
                "❌ No public functions found in module '{path}'.\n\n\
                 Try using `resolve_scverse_package` to explore available packages."
            );
        }

        if topic.is_empty() {
            let mut out = format::format_module_listing(path, &functions, budget);
            out.push_str(&format!(
                "\n\nTo get documentation for a specific function, use:\n\
                 `get_scverse_docs('{path}.<function_name>')`\n\n\
                 Or search by topic:\n\
                 `get_scverse_docs('{path}', topic='your_topic')`"
            ));
            return out;
        }

        match introspect::search_functions_by_topic(
            self.resolver.as_ref(),
            self.relevance(),
            path,
            topic,
            TOPIC_RESULTS,
        ) {
            Ok(matches) if matches.is_empty() => format!(
                "No functions found in '{path}' matching topic '{topic}'.\n\n\
                 Try a different topic or use `get_scverse_docs('{path}')` \
                 to see all available functions."
            ),
            Ok(matches) => format::format_topic_results(path, topic, &matches, budget),
            Err(e) => not_found_message(path, &e),
        }
    }

    pub fn get_source(&self, function_path: &str, include_docs: bool, max_tokens: i64) -> String {
        let budget = TokenBudget::from_request(max_tokens);
        let path = function_path.trim();
        if let Err(message) = self.preflight(path) {
            return message;
        }

        let source = match introspect::extract_source(self.resolver.as_ref(), path) {
            Ok(s) => s,
            Err(e @ IntrospectError::SourceUnavailable { .. }) => {
                return format!(
                    "❌ Cannot retrieve source code for '{path}'.\n\n\
                     This appears to be a built-in function, C extension, or dynamically \
                     generated code. Source code is not available for inspection.\n\n\
                     Error: {e}\n\n\
                     Try using `get_scverse_docs('{path}')` to see the documentation instead."
                )
            }
            Err(e) => return not_found_message(path, &e),
        };

        let info = if include_docs {
            introspect::extract_function_info(self.resolver.as_ref(), path)
                .map_err(|e| log::debug!("no docs for {path}: {e}"))
                .ok()
        } else {
            None
        };
        format::format_function_source(&source, info.as_ref(), budget)
    }

    pub fn search_ecosystem(&self, topic: &str, max_results_per_package: i64) -> String {
        let installed = self.env.installed();
        if installed.is_empty() {
            return no_packages_message("- `pip install pertpy` for perturbation analysis\n");
        }
        let topic = topic.trim();
        if topic.is_empty() {
            return "❌ Please provide a search topic (e.g., 'differential', 'clustering', 'normalize')."
                .to_string();
        }

        let per_package =
            usize::try_from(max_results_per_package.max(1)).unwrap_or(1).min(MAX_RESULTS_PER_PACKAGE);
        let packages: Vec<&Package> = installed.iter().map(|p| p.package).collect();
        let results = introspect::search_ecosystem(
            self.resolver.as_ref(),
            self.relevance(),
            &packages,
            topic,
            per_package,
        );

        if results.is_empty() {
            let names: Vec<&str> = packages.iter().map(|p| p.import_name).collect();
            return format!(
                "No functions found matching topic '{topic}' across installed packages.\n\n\
                 Installed packages: {}\n\n\
                 Tips:\n\
                 - Try a different or more general topic\n\
                 - Check if the relevant package is installed with `resolve_scverse_package`\n\
                 - Use `get_scverse_docs('<package>.tl')` or `get_scverse_docs('<package>.pp')` \
                 to list all functions in a package",
                names.join(", ")
            );
        }
        format::format_ecosystem_results(topic, &results)
    }
}

fn no_packages_message(extra_hint: &str) -> String {
    format!(
        "❌ No scverse packages are currently installed.\n\n\
         Please install at least one scverse package:\n\
         - `pip install scanpy` for single-cell analysis\n\
         {extra_hint}\
         - `pip install anndata` for data structures\n\n\
         Use `resolve_scverse_package` to see all available packages."
    )
}

fn not_found_message(path: &str, err: &IntrospectError) -> String {
    format!(
        "❌ Could not find '{path}'.\n\n\
         Error: {err}\n\n\
         Make sure the path is correct. Examples:\n\
         - 'scanpy.pp.normalize_total'\n\
         - 'anndata.AnnData'\n\
         - 'scanpy.pp' (for module listing)\n\n\
         Use `resolve_scverse_package` to see installed packages."
    )
}

fn default_max_tokens() -> i64 {
    DEFAULT_TOKENS as i64
}

fn default_results_per_package() -> i64 {
    DEFAULT_RESULTS_PER_PACKAGE
}

#[derive(Debug, Default, Deserialize)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub struct ResolvePackageArgs {
    /// Package to look up (distribution or import name). Omit to list all packages.
    #[serde(default)]
    pub package_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub struct GetDocsArgs {
    /// Full dotted path to a function, class or module, e.g. `scanpy.pp.normalize_total`.
    pub function_path: String,
    /// Optional topic keyword. With a module path, ranks its functions; with a function
    /// path, promotes matching docstring sections.
    #[serde(default)]
    pub topic: String,
    /// Maximum tokens in the response (minimum 1000).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub struct GetSourceArgs {
    /// Full dotted path to a function or method.
    pub function_path: String,
    /// Include the signature and summary above the source.
    #[serde(default)]
    pub include_docs: bool,
    /// Maximum tokens in the response (minimum 1000).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub struct SearchEcosystemArgs {
    /// Topic keyword, e.g. `differential`, `clustering`, `normalize`.
    pub topic: String,
    /// Maximum results per package.
    #[serde(default = "default_results_per_package")]
    pub max_results_per_package: i64,
}

impl ResolvePackageArgs {
    pub fn run(&self, service: &DocsService) -> String {
        service.resolve_package(self.package_name.as_deref())
    }
}

impl GetDocsArgs {
    pub fn run(&self, service: &DocsService) -> String {
        service.get_docs(&self.function_path, &self.topic, self.max_tokens)
    }
}

impl GetSourceArgs {
    pub fn run(&self, service: &DocsService) -> String {
        service.get_source(&self.function_path, self.include_docs, self.max_tokens)
    }
}

impl SearchEcosystemArgs {
    pub fn run(&self, service: &DocsService) -> String {
        service.search_ecosystem(&self.topic, self.max_results_per_package)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown operation '{0}' (see `contextsc operations`)")]
    UnknownOperation(String),
    #[error("invalid arguments for {operation}: {source}")]
    InvalidArgs {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

type Handler = fn(&DocsService, Value) -> Result<String, DispatchError>;

/// One named operation: `name(args: JSON object) -> text`.
pub struct Operation {
    pub name: &'static str,
    pub summary: &'static str,
    handler: Handler,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").field("name", &self.name).finish()
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    args: Value,
) -> Result<T, DispatchError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|source| DispatchError::InvalidArgs { operation, source })
}

pub const RESOLVE_PACKAGE: &str = "resolve_scverse_package";
pub const GET_DOCS: &str = "get_scverse_docs";
pub const GET_SOURCE: &str = "get_scverse_source";
pub const SEARCH_ECOSYSTEM: &str = "search_scverse_ecosystem";

pub static OPERATIONS: &[Operation] = &[
    Operation {
        name: RESOLVE_PACKAGE,
        summary: "List core scverse packages and their install status, or describe one package",
        handler: |svc, args| Ok(parse_args::<ResolvePackageArgs>(RESOLVE_PACKAGE, args)?.run(svc)),
    },
    Operation {
        name: GET_DOCS,
        summary: "Token-budgeted documentation for a function or class, or a module listing / topic search",
        handler: |svc, args| Ok(parse_args::<GetDocsArgs>(GET_DOCS, args)?.run(svc)),
    },
    Operation {
        name: GET_SOURCE,
        summary: "Source code of a function or method, optionally with its signature and summary",
        handler: |svc, args| Ok(parse_args::<GetSourceArgs>(GET_SOURCE, args)?.run(svc)),
    },
    Operation {
        name: SEARCH_ECOSYSTEM,
        summary: "Search functions matching a topic across all installed scverse packages",
        handler: |svc, args| Ok(parse_args::<SearchEcosystemArgs>(SEARCH_ECOSYSTEM, args)?.run(svc)),
    },
];

pub fn operation(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.name == name)
}

pub fn dispatch(service: &DocsService, name: &str, args: Value) -> Result<String, DispatchError> {
    let op = operation(name).ok_or_else(|| DispatchError::UnknownOperation(name.to_string()))?;
    log::debug!("dispatch {}", op.name);
    (op.handler)(service, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> DocsService {
        let table: Table = serde_json::from_value(json!({
            "packages": { "scanpy": "1.10.1", "anndata": "0.10.7" },
            "objects": {
                "scanpy.pp.normalize_total": {
                    "kind": "callable",
                    "module": "scanpy.preprocessing._normalization",
                    "signature": "(adata, target_sum=None)",
                    "parameters": [{ "name": "adata", "annotation": "AnnData" }, { "name": "target_sum", "default": "None" }],
                    "docstring": "Normalize counts per cell.\n\nParameters\n----------\nadata\n    The annotated data matrix.\n",
                    "source": { "file_path": "scanpy/preprocessing/_normalization.py", "line_start": 40, "code": "def normalize_total(adata, target_sum=None):\n    return adata\n" }
                },
                "scanpy.pp.log1p": { "kind": "callable", "signature": "(data)", "docstring": "Logarithmize the data matrix." },
                "scanpy.pp.neighbors": { "kind": "callable", "signature": "(adata, n_neighbors=15)", "docstring": "Compute a neighborhood graph.\n\nThe connectivity matrix is stored." },
                "scanpy.tl.leiden": { "kind": "callable", "signature": "(adata)", "docstring": "Cluster cells into subgroups.\n\nLeiden clustering on the neighborhood graph." },
                "scanpy.tl.umap": { "kind": "callable", "signature": "(adata, min_dist=0.5)", "docstring": "Embed the neighborhood graph using UMAP.\n\nNotes\n-----\nRun neighbors first.\n\nReferences\n----------\nMcInnes et al., uniform manifold approximation." },
                "anndata.AnnData": { "kind": "callable", "object_kind": "class", "signature": "(X=None, obs=None)", "docstring": "An annotated data matrix." }
            }
        }))
        .unwrap();
        DocsService::from_table(table)
    }

    #[test]
    fn lists_and_describes_packages() {
        let svc = service();
        let list = svc.resolve_package(None);
        assert!(list.contains("- **scanpy** (v1.10.1): analysis"));
        assert!(list.contains("## Not Installed"));
        assert!(list.contains("- squidpy"));

        let detail = svc.resolve_package(Some("Scanpy"));
        assert!(detail.contains("✅ Installed"));
        assert!(detail.contains("**Version:** 1.10.1"));

        let missing = svc.resolve_package(Some("scvi-tools"));
        assert!(missing.contains("❌ Not Installed"));
        assert!(missing.contains("pip install scvi-tools"));

        assert!(svc
            .resolve_package(Some("numpy"))
            .contains("is not a core scverse package"));
    }

    #[test]
    fn function_docs_always_carry_signature_and_parameters() {
        let svc = service();
        for max_tokens in [0, 1000, 10_000] {
            let out = svc.get_docs("scanpy.pp.normalize_total", "", max_tokens);
            assert!(out.contains("normalize_total(adata, target_sum=None)"), "{out}");
            assert!(out.contains("- **adata**: `AnnData`"));
            assert!(out.contains("The annotated data matrix."));
        }
    }

    #[test]
    fn not_installed_and_not_found_are_reported_as_text() {
        let svc = service();
        let out = svc.get_docs("squidpy.gr.spatial_neighbors", "", 10_000);
        assert!(out.starts_with("❌ Package 'squidpy' is not installed."));
        assert!(out.contains("Installed packages: anndata, scanpy"));

        let out = svc.get_docs("scanpy.pp.nonexistent_function_xyz", "", 10_000);
        assert!(out.starts_with("❌ Could not find 'scanpy.pp.nonexistent_function_xyz'"));
    }

    #[test]
    fn module_paths_list_or_search_functions() {
        let svc = service();
        let listing = svc.get_docs("scanpy.pp", "", 10_000);
        assert!(listing.contains("Found 3 public functions:"));
        assert!(listing.contains("- `scanpy.pp.log1p`: Logarithmize the data matrix."));

        let search = svc.get_docs("scanpy.pp", "connectivity", 10_000);
        assert!(search.contains("matching topic: 'connectivity'"));
        assert!(search.contains("## neighbors (relevance score: 1)"));
        assert!(!search.contains("## log1p"));

        let none = svc.get_docs("scanpy.pp", "nonexistent_topic_xyz", 10_000);
        assert!(none.starts_with("No functions found in 'scanpy.pp'"));
    }

    #[test]
    fn function_topic_drops_unrelated_sections() {
        let svc = service();
        let out = svc.get_docs("scanpy.tl.umap", "manifold", 10_000);
        assert!(out.contains("## Signature"));
        assert!(out.contains("## Documentation\n\nEmbed the neighborhood graph using UMAP."));
        assert!(out.contains("## References"));
        assert!(!out.contains("## Notes"));
        assert!(!out.contains("Run neighbors first."));
        assert!(out.contains("**Filtered out (no mention of topic):** Notes"));

        let full = svc.get_docs("scanpy.tl.umap", "", 10_000);
        assert!(full.contains("## Notes"));
    }

    #[test]
    fn source_with_and_without_docs() {
        let svc = service();
        let out = svc.get_source("scanpy.pp.normalize_total", true, 10_000);
        assert!(out.contains("(lines 40-41)"));
        assert!(out.contains("def normalize_total"));
        assert!(out.contains("**Signature:**"));

        let bare = svc.get_source("scanpy.pp.log1p", false, 10_000);
        assert!(bare.starts_with("❌ Cannot retrieve source code for 'scanpy.pp.log1p'"));
    }

    #[test]
    fn ecosystem_search_groups_by_package() {
        let svc = service();
        let out = svc.search_ecosystem("cluster", 3);
        assert!(out.contains("Found matches in 1 package(s):"));
        assert!(out.contains("## scanpy"));
        assert!(out.contains("- **scanpy.tl.leiden**"));
        assert!(out.contains("`get_scverse_docs('scanpy.tl.leiden')`"));

        assert!(svc.search_ecosystem("  ", 3).starts_with("❌ Please provide a search topic"));
        assert!(svc
            .search_ecosystem("nonexistent_topic_xyz", 3)
            .starts_with("No functions found matching topic"));
    }

    #[test]
    fn empty_environment_short_circuits() {
        let svc = DocsService::from_table(Table::default());
        for out in [
            svc.get_docs("scanpy.pp.normalize_total", "", 10_000),
            svc.get_source("scanpy.pp.normalize_total", false, 10_000),
            svc.search_ecosystem("normalize", 3),
        ] {
            assert!(out.starts_with("❌ No scverse packages are currently installed."));
        }
    }

    #[test]
    fn identical_calls_yield_identical_output() {
        let svc = service();
        assert_eq!(
            svc.get_docs("scanpy.pp", "graph", 2000),
            svc.get_docs("scanpy.pp", "graph", 2000)
        );
    }

    #[test]
    fn dispatch_parses_named_arguments() {
        let svc = service();
        let out = dispatch(&svc, GET_DOCS, json!({ "function_path": "anndata.AnnData" })).unwrap();
        assert!(out.contains("# anndata.AnnData"));
        assert!(out.contains("**Kind:** class"));

        let out = dispatch(&svc, RESOLVE_PACKAGE, Value::Null).unwrap();
        assert!(out.starts_with("# Installed Scverse Packages"));

        assert!(matches!(
            dispatch(&svc, GET_DOCS, json!({ "topic": "x" })),
            Err(DispatchError::InvalidArgs { operation: GET_DOCS, .. })
        ));
        assert!(matches!(
            dispatch(&svc, "get-scverse-docs", json!({})),
            Err(DispatchError::UnknownOperation(_))
        ));
    }
}
