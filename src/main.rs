//! `contextsc`: scverse documentation from the installed environment.
//!
//! Two surfaces over the same operations:
//! - `contextsc mcp-stdio` (the default): an MCP server for LLM clients;
//! - `contextsc docs|source|search|packages|call`: the same answers on the command line.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

use contextsc::config::{Config, SemanticMode};
use contextsc::service::{
    self, DocsService, GetDocsArgs, GetSourceArgs, SearchEcosystemArgs,
    DEFAULT_RESULTS_PER_PACKAGE,
};
use contextsc::DEFAULT_TOKENS;

#[cfg(feature = "stdio")]
use rmcp::{transport::stdio, ServiceExt};

#[derive(Parser, Debug)]
#[command(name = "contextsc", version)]
#[command(about = "Version-accurate scverse documentation for LLM clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Python interpreter to introspect (default: $CONTEXTSC_PYTHON, else `python3`).
    #[arg(long, global = true)]
    python: Option<String>,

    /// Serve from a JSON lookup table instead of a live interpreter ($CONTEXTSC_TABLE).
    #[arg(long, global = true)]
    table: Option<PathBuf>,

    /// Topic ranking backend ($CONTEXTSC_SEMANTIC).
    #[arg(long, global = true, value_enum)]
    semantic: Option<SemanticMode>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Debug logging on stderr (otherwise `RUST_LOG`, default `warn`).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve as an MCP stdio server (default when no subcommand is given).
    McpStdio,
    /// List core scverse packages and their install status, or describe one.
    Packages(PackagesArgs),
    /// Documentation for a function or class; a module path lists its functions.
    Docs(DocsCliArgs),
    /// Source code of a function or method.
    Source(SourceCliArgs),
    /// Search functions matching a topic across installed packages.
    Search(SearchCliArgs),
    /// Invoke an operation by name with JSON arguments.
    ///
    /// Same names and parameters as the MCP tools, e.g.
    /// `contextsc call get_scverse_docs --args '{"function_path": "scanpy.pp.pca"}'`.
    Call(CallArgs),
    /// List operation names.
    Operations,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
struct PackagesArgs {
    /// Distribution or import name (e.g. `scvi-tools` or `scvi`).
    name: Option<String>,
}

#[derive(Args, Debug)]
struct DocsCliArgs {
    /// Dotted path, e.g. `scanpy.pp.normalize_total` or `scanpy.pp`.
    path: String,

    /// Topic keyword (module path: rank functions; function path: promote matching sections).
    #[arg(short, long, default_value = "")]
    topic: String,

    /// Token budget (minimum 1000).
    #[arg(long, default_value_t = DEFAULT_TOKENS as i64, allow_hyphen_values = true)]
    max_tokens: i64,
}

#[derive(Args, Debug)]
struct SourceCliArgs {
    /// Dotted path to a function or method.
    path: String,

    /// Prepend the signature and summary.
    #[arg(long)]
    include_docs: bool,

    /// Token budget (minimum 1000).
    #[arg(long, default_value_t = DEFAULT_TOKENS as i64, allow_hyphen_values = true)]
    max_tokens: i64,
}

#[derive(Args, Debug)]
struct SearchCliArgs {
    /// Topic keyword, e.g. `differential` or `clustering`.
    topic: String,

    /// Maximum results per package.
    #[arg(short = 'n', long, default_value_t = DEFAULT_RESULTS_PER_PACKAGE)]
    max_results_per_package: i64,
}

#[derive(Args, Debug)]
struct CallArgs {
    /// Operation name (see `contextsc operations`).
    operation: String,

    /// Arguments as a JSON object.
    #[arg(long, default_value = "{}")]
    args: String,
}

fn init_logging(verbose: bool) {
    // stderr only: stdout carries MCP frames or command output.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn load_config(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    if let Some(python) = &cli.python {
        config.python = python.clone();
    }
    if let Some(table) = &cli.table {
        config.table = Some(table.clone());
    }
    if let Some(semantic) = cli.semantic {
        config.semantic = semantic;
    }
    config
}

fn build_service(config: &Config) -> Result<DocsService> {
    DocsService::from_config(config).context("failed to initialize documentation service")
}

/// Print `text`, or the versioned JSON envelope around it.
fn emit(format: OutputFormat, command: &str, text: String, extra: Value) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{text}"),
        OutputFormat::Json => {
            let mut result = serde_json::json!({ "text": text });
            if let (Some(obj), Value::Object(more)) = (result.as_object_mut(), extra) {
                obj.extend(more);
            }
            let out = serde_json::json!({
                "schema_version": 1,
                "ok": true,
                "command": command,
                "result": result,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

fn run_packages(cli: &Cli, args: &PackagesArgs) -> Result<()> {
    let service = build_service(&load_config(cli))?;
    let text = service.resolve_package(args.name.as_deref());
    let packages = serde_json::to_value(service.environment().packages())?;
    emit(
        cli.format,
        "packages",
        text,
        serde_json::json!({ "packages": packages }),
    )
}

fn run_docs(cli: &Cli, args: &DocsCliArgs) -> Result<()> {
    let service = build_service(&load_config(cli))?;
    let text = GetDocsArgs {
        function_path: args.path.clone(),
        topic: args.topic.clone(),
        max_tokens: args.max_tokens,
    }
    .run(&service);
    emit(
        cli.format,
        "docs",
        text,
        serde_json::json!({ "function_path": args.path, "topic": args.topic }),
    )
}

fn run_source(cli: &Cli, args: &SourceCliArgs) -> Result<()> {
    let service = build_service(&load_config(cli))?;
    let text = GetSourceArgs {
        function_path: args.path.clone(),
        include_docs: args.include_docs,
        max_tokens: args.max_tokens,
    }
    .run(&service);
    emit(
        cli.format,
        "source",
        text,
        serde_json::json!({ "function_path": args.path }),
    )
}

fn run_search(cli: &Cli, args: &SearchCliArgs) -> Result<()> {
    let service = build_service(&load_config(cli))?;
    let text = SearchEcosystemArgs {
        topic: args.topic.clone(),
        max_results_per_package: args.max_results_per_package,
    }
    .run(&service);
    emit(
        cli.format,
        "search",
        text,
        serde_json::json!({
            "topic": args.topic,
            "relevance": service.relevance().mode().as_str(),
        }),
    )
}

fn run_call(cli: &Cli, args: &CallArgs) -> Result<()> {
    let op = service::operation(&args.operation)
        .ok_or_else(|| service::DispatchError::UnknownOperation(args.operation.clone()))?;
    let value: Value = serde_json::from_str(&args.args)
        .with_context(|| format!("--args must be a JSON object (got {})", args.args))?;
    let docs = build_service(&load_config(cli))?;
    let text = service::dispatch(&docs, op.name, value)?;
    emit(
        cli.format,
        "call",
        text,
        serde_json::json!({ "operation": op.name }),
    )
}

fn run_operations(cli: &Cli) -> Result<()> {
    let text = service::OPERATIONS
        .iter()
        .map(|op| format!("{:<26} {}", op.name, op.summary))
        .collect::<Vec<_>>()
        .join("\n");
    let ops: Vec<Value> = service::OPERATIONS
        .iter()
        .map(|op| serde_json::json!({ "name": op.name, "summary": op.summary }))
        .collect();
    emit(
        cli.format,
        "operations",
        text,
        serde_json::json!({ "operations": ops }),
    )
}

fn run_mcp_stdio(cli: &Cli) -> Result<()> {
    // IMPORTANT: stdout is reserved for MCP JSON-RPC frames.
    // If you need diagnostics, use stderr.
    #[cfg(feature = "stdio")]
    {
        let service = std::sync::Arc::new(build_service(&load_config(cli))?);
        let rt = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
        rt.block_on(async {
            let server = contextsc::mcp::ContextScMcp::new(service);
            let running = server
                .serve(stdio())
                .await
                .context("failed to start stdio MCP server")?;
            let _ = running
                .waiting()
                .await
                .context("stdio MCP server task join failed")?;
            Ok::<(), anyhow::Error>(())
        })?;
        Ok(())
    }
    #[cfg(not(feature = "stdio"))]
    {
        let _ = cli;
        anyhow::bail!(
            "mcp-stdio requires compile-time feature `stdio` (rebuild: cargo build --features stdio)"
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (command_name, result): (&str, Result<()>) = match &cli.command {
        None | Some(Command::McpStdio) => ("mcp-stdio", run_mcp_stdio(&cli)),
        Some(Command::Packages(args)) => ("packages", run_packages(&cli, args)),
        Some(Command::Docs(args)) => ("docs", run_docs(&cli, args)),
        Some(Command::Source(args)) => ("source", run_source(&cli, args)),
        Some(Command::Search(args)) => ("search", run_search(&cli, args)),
        Some(Command::Call(args)) => ("call", run_call(&cli, args)),
        Some(Command::Operations) => ("operations", run_operations(&cli)),
    };

    result.with_context(|| format!("contextsc {command_name} failed"))
}
