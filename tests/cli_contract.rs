use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/scverse.json");

fn parse_json_stdout(args: &[&str]) -> serde_json::Value {
    let out = cargo_bin_cmd!("contextsc")
        .args(["--table", FIXTURE, "--format", "json"])
        .args(args)
        .output()
        .expect("spawn contextsc");
    assert!(
        out.status.success(),
        "contextsc failed (status={:?})\nstdout:\n{}\nstderr:\n{}",
        out.status.code(),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr),
    );
    serde_json::from_slice(&out.stdout).expect("stdout JSON parse")
}

#[test]
fn packages_json_is_versioned_envelope() {
    let v = parse_json_stdout(&["packages"]);
    assert_eq!(v.get("schema_version").and_then(|x| x.as_u64()), Some(1));
    assert_eq!(v.get("ok").and_then(|x| x.as_bool()), Some(true));
    assert_eq!(v.get("command").and_then(|x| x.as_str()), Some("packages"));

    let packages = v["result"]["packages"].as_array().cloned().unwrap_or_default();
    assert_eq!(packages.len(), 12);
    let scanpy = packages
        .iter()
        .find(|p| p["package"]["name"] == "scanpy")
        .expect("scanpy row");
    assert_eq!(scanpy["installed"], true);
    assert_eq!(scanpy["version"], "1.10.1");
    let scvi = packages
        .iter()
        .find(|p| p["package"]["import_name"] == "scvi")
        .expect("scvi-tools row");
    assert_eq!(scvi["installed"], false);
}

#[test]
fn docs_json_carries_text_and_request() {
    let v = parse_json_stdout(&["docs", "anndata.read_h5ad"]);
    assert_eq!(v["command"], "docs");
    assert_eq!(v["result"]["function_path"], "anndata.read_h5ad");
    let text = v["result"]["text"].as_str().unwrap_or_default();
    assert!(text.starts_with("# anndata.read_h5ad"));
    assert!(text.contains("`AnnData`"));
}

#[test]
fn operations_json_lists_all_tools() {
    let v = parse_json_stdout(&["operations"]);
    let names: Vec<&str> = v["result"]["operations"]
        .as_array()
        .map(|ops| ops.iter().filter_map(|op| op["name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(
        names,
        [
            "resolve_scverse_package",
            "get_scverse_docs",
            "get_scverse_source",
            "search_scverse_ecosystem"
        ]
    );
}

#[test]
fn search_json_reports_keyword_ranking_for_tables() {
    let v = parse_json_stdout(&["search", "differential"]);
    assert_eq!(v["result"]["relevance"], "keyword");
}

#[test]
fn missing_table_is_an_error() {
    cargo_bin_cmd!("contextsc")
        .args(["--table", "/nonexistent/contextsc-table.json", "packages"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read table"));
}

#[test]
fn unknown_operation_is_an_error() {
    cargo_bin_cmd!("contextsc")
        .args(["--table", FIXTURE, "call", "get-scverse-docs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown operation 'get-scverse-docs'"));
}

#[test]
fn malformed_call_arguments_are_an_error() {
    cargo_bin_cmd!("contextsc")
        .args([
            "--table",
            FIXTURE,
            "call",
            "get_scverse_docs",
            "--args",
            r#"{"topic": "pca"}"#,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid arguments for get_scverse_docs"));
}
