//! MCP stdio server.
//!
//! - keep stdout clean (transport)
//! - one tool per documentation operation, text in, text out
//! - domain failures are tool output, not protocol errors

use std::sync::Arc;

use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use crate::service::{
    DocsService, GetDocsArgs, GetSourceArgs, ResolvePackageArgs, SearchEcosystemArgs,
};

const INSTRUCTIONS: &str = "Version-accurate documentation for the scverse ecosystem \
(anndata, mudata, spatialdata, scanpy, squidpy, muon, scvi-tools, scirpy, snapatac2, rapids-singlecell, \
pertpy, decoupler), read from the packages installed in this environment.\n\n\
Workflow:\n\
- resolve_scverse_package: which packages are installed, at which version\n\
- search_scverse_ecosystem: find candidate functions for a task across packages\n\
- get_scverse_docs: signature, parameters and docstring of one function, or a module listing\n\
- get_scverse_source: the implementation, when the docstring is not enough";

#[derive(Clone)]
pub struct ContextScMcp {
    service: Arc<DocsService>,
    tool_router: RmcpToolRouter<Self>,
}

/// Run a blocking operation off the async runtime.
async fn run_blocking<F>(service: &Arc<DocsService>, op: F) -> Result<CallToolResult, McpError>
where
    F: FnOnce(&DocsService) -> String + Send + 'static,
{
    let service = service.clone();
    let text = tokio::task::spawn_blocking(move || op(&service))
        .await
        .map_err(|e| McpError::internal_error(format!("tool task failed: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[tool_router]
impl ContextScMcp {
    pub fn new(service: Arc<DocsService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Resolve scverse package names and list installed packages. With package_name, describe that package (version, install status, docs and GitHub links); without it, list all core packages and their installation status."
    )]
    async fn resolve_scverse_package(
        &self,
        params: Parameters<ResolvePackageArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        run_blocking(&self.service, move |svc| args.run(svc)).await
    }

    #[tool(
        description = "Fetch documentation for a scverse function or class (signature, parameters, docstring), truncated to max_tokens (minimum 1000) with signature and parameters always kept. A module path lists its public functions; a module path plus topic returns the most relevant functions; a function path plus topic surfaces matching docstring sections first. Examples: 'scanpy.pp.normalize_total', 'anndata.AnnData', 'scanpy.pp' with topic 'normalize'."
    )]
    async fn get_scverse_docs(
        &self,
        params: Parameters<GetDocsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        if args.function_path.trim().is_empty() {
            return Err(McpError::invalid_params("function_path must not be empty", None));
        }
        run_blocking(&self.service, move |svc| args.run(svc)).await
    }

    #[tool(
        description = "Fetch the source code of a scverse function or method from the installed package, with file path and line numbers, truncated to max_tokens. Set include_docs to prepend the signature and summary."
    )]
    async fn get_scverse_source(
        &self,
        params: Parameters<GetSourceArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        if args.function_path.trim().is_empty() {
            return Err(McpError::invalid_params("function_path must not be empty", None));
        }
        run_blocking(&self.service, move |svc| args.run(svc)).await
    }

    #[tool(
        description = "Search functions matching a topic (e.g. 'differential', 'clustering', 'normalize') across all installed scverse packages. Results are grouped by package with relevance scores and one-line descriptions."
    )]
    async fn search_scverse_ecosystem(
        &self,
        params: Parameters<SearchEcosystemArgs>,
    ) -> Result<CallToolResult, McpError> {
        let args = params.0;
        run_blocking(&self.service, move |svc| args.run(svc)).await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for ContextScMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
