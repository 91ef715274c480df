//! Smoke test for `contextsc mcp-stdio`.
//!
//! This starts a child process running `contextsc --table <fixture> mcp-stdio` and calls each
//! tool once. It's meant to validate the MCP surface without relying on an editor as the client.
//!
//! Pass `--live` to introspect the real Python environment instead of the fixture table.

#[cfg(not(feature = "stdio"))]
fn main() {
    eprintln!("mcp_smoke requires `--features stdio` (or default features enabled)");
}

#[cfg(feature = "stdio")]
use rmcp::{
    model::CallToolRequestParam,
    service::ServiceExt,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
#[cfg(feature = "stdio")]
use std::path::{Path, PathBuf};
#[cfg(feature = "stdio")]
use tokio::process::Command;

#[cfg(feature = "stdio")]
const TOOLS: [&str; 4] = [
    "resolve_scverse_package",
    "get_scverse_docs",
    "get_scverse_source",
    "search_scverse_ecosystem",
];

#[cfg(feature = "stdio")]
fn text_payload(tool: &str, call: &rmcp::model::CallToolResult) -> anyhow::Result<String> {
    let texts: Vec<&str> = call
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
        .collect();
    anyhow::ensure!(
        texts.len() == 1,
        "{tool}: expected exactly one text payload, got {}",
        texts.len()
    );
    Ok(texts[0].to_string())
}

#[cfg(feature = "stdio")]
async fn call(
    service: &rmcp::service::RunningService<rmcp::RoleClient, ()>,
    tool: &'static str,
    args: serde_json::Value,
) -> anyhow::Result<String> {
    let result = service
        .call_tool(CallToolRequestParam {
            name: tool.into(),
            arguments: args.as_object().cloned(),
        })
        .await?;
    text_payload(tool, &result)
}

#[cfg(feature = "stdio")]
async fn spawn_and_check(bin: &Path, table: Option<&Path>) -> anyhow::Result<()> {
    eprintln!(
        "spawning: {} mcp-stdio (table={:?})",
        bin.display(),
        table.map(Path::display).map(|d| d.to_string())
    );
    let service = ()
        .serve(TokioChildProcess::new(Command::new(bin).configure(
            |cmd| {
                if let Some(table) = table {
                    cmd.arg("--table").arg(table);
                }
                cmd.arg("mcp-stdio");
                // Always set explicitly to avoid inheriting user shell env.
                cmd.env_remove("CONTEXTSC_TABLE");
                cmd.env("CONTEXTSC_SEMANTIC", "off");
            },
        ))?)
        .await?;

    let tools = service.list_tools(Default::default()).await?;
    let names: Vec<String> = tools.tools.iter().map(|t| t.name.to_string()).collect();
    for required in TOOLS {
        anyhow::ensure!(
            names.iter().any(|n| n == required),
            "missing tool {required} (got {names:?})"
        );
    }

    let packages = call(&service, "resolve_scverse_package", serde_json::json!({})).await?;
    anyhow::ensure!(
        packages.starts_with("# Installed Scverse Packages"),
        "resolve_scverse_package: unexpected output:\n{packages}"
    );

    if table.is_some() {
        let docs = call(
            &service,
            "get_scverse_docs",
            serde_json::json!({ "function_path": "scanpy.pp.normalize_total", "max_tokens": 1000 }),
        )
        .await?;
        anyhow::ensure!(
            docs.contains("## Signature") && docs.contains("## Parameters"),
            "get_scverse_docs: signature/parameters missing:\n{docs}"
        );

        let source = call(
            &service,
            "get_scverse_source",
            serde_json::json!({ "function_path": "scanpy.pp.normalize_total" }),
        )
        .await?;
        anyhow::ensure!(
            source.contains("def normalize_total("),
            "get_scverse_source: no code:\n{source}"
        );

        let search = call(
            &service,
            "search_scverse_ecosystem",
            serde_json::json!({ "topic": "differential" }),
        )
        .await?;
        anyhow::ensure!(
            search.contains("## pertpy"),
            "search_scverse_ecosystem: expected a pertpy group:\n{search}"
        );
    }

    // Domain failures come back as text, not protocol errors.
    let missing = call(
        &service,
        "get_scverse_docs",
        serde_json::json!({ "function_path": "definitely_not_a_package.fn" }),
    )
    .await?;
    anyhow::ensure!(missing.starts_with('❌'), "expected a ❌ message:\n{missing}");

    service.cancel().await?;
    Ok(())
}

#[cfg(feature = "stdio")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let live = std::env::args().any(|a| a == "--live");
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let bin = root.join("target/debug/contextsc");
    // Ensure the server binary exists *and* matches current sources/features.
    // (The example itself can compile without rebuilding the contextsc binary.)
    let status = Command::new("cargo")
        .current_dir(&root)
        .args(["build", "--features", "stdio"])
        .status()
        .await?;
    anyhow::ensure!(status.success(), "cargo build --features stdio failed");
    anyhow::ensure!(bin.exists(), "expected contextsc binary at {}", bin.display());

    let fixture = root.join("tests/fixtures/scverse.json");
    if live {
        spawn_and_check(&bin, None).await?;
    } else {
        spawn_and_check(&bin, Some(&fixture)).await?;
    }
    Ok(())
}
