//! Python worker bridge.
//!
//! One long-lived interpreter per process, spawned on first use. Requests and replies are
//! single JSON lines; the worker keeps its own stdout for replies and sends everything
//! imported packages print to stderr.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::BridgeError;
use crate::introspect::{IntrospectError, Probe, Resolved, Resolver, SourceInfo};
use crate::relevance::{EmbedError, Embedder};

const WORKER_SOURCE: &str = include_str!("worker.py");

/// Error payload of a failed request, as sent by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireError {
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<WireError>,
}

impl Reply {
    fn into_result(self) -> Result<Value, WireError> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(self.error.unwrap_or(WireError {
                kind: "internal".to_string(),
                reason: None,
                message: "worker reported failure without details".to_string(),
            }))
        }
    }
}

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    op: &'a str,
    args: Value,
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Process {
    fn exchange(&mut self, id: u64, line: &str) -> Result<Reply, BridgeError> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;

        let mut buf = String::new();
        loop {
            buf.clear();
            if self.stdout.read_line(&mut buf)? == 0 {
                return Err(BridgeError::Closed);
            }
            let text = buf.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Reply>(text) {
                Ok(reply) if reply.id == Some(id) => return Ok(reply),
                Ok(reply) if reply.id.is_none() => {
                    return Err(BridgeError::Remote(
                        reply
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| "unaddressed reply".to_string()),
                    ))
                }
                Ok(reply) => log::debug!("bridge: dropping stale reply id={:?}", reply.id),
                // The worker's fd 1 goes to stderr: this pipe carries replies only.
                Err(e) => return Err(BridgeError::Protocol(e)),
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Lazily spawned, respawn-once Python interpreter.
pub struct PythonWorker {
    program: String,
    script: &'static str,
    state: Mutex<Option<Process>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PythonWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonWorker")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

impl PythonWorker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: WORKER_SOURCE,
            state: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn spawn(&self) -> Result<Process, BridgeError> {
        // Worker chatter is only useful while debugging.
        let stderr = if log::log_enabled!(log::Level::Debug) {
            Stdio::inherit()
        } else {
            Stdio::null()
        };
        let mut child = ProcessCommand::new(&self.program)
            .args(["-u", "-c", self.script])
            .env("PYTHONIOENCODING", "utf-8")
            .env("HF_HUB_OFFLINE", "1")
            .env("TRANSFORMERS_OFFLINE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or(BridgeError::Closed)?;
        let stdout = child.stdout.take().ok_or(BridgeError::Closed)?;
        log::debug!("bridge: spawned {} (pid={})", self.program, child.id());
        Ok(Process {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Send one request. Transport failures respawn the worker and retry once; the inner
    /// `Result` carries errors the worker itself reported.
    pub fn request(&self, op: &str, args: Value) -> Result<Result<Value, WireError>, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Request { id, op, args })?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if state.is_none() {
                *state = Some(self.spawn()?);
            }
            let Some(process) = state.as_mut() else {
                return Err(BridgeError::Closed);
            };
            match process.exchange(id, &line) {
                Ok(reply) => return Ok(reply.into_result()),
                Err(e @ (BridgeError::Io(_) | BridgeError::Closed)) if attempt < 2 => {
                    log::warn!("bridge: worker failed during '{op}' ({e}); respawning");
                    *state = None;
                }
                Err(e) => {
                    *state = None;
                    return Err(e);
                }
            }
        }
    }

    fn call<T: serde::de::DeserializeOwned>(
        &self,
        op: &str,
        args: Value,
    ) -> Result<Result<T, WireError>, BridgeError> {
        match self.request(op, args)? {
            Ok(value) => Ok(Ok(serde_json::from_value(value)?)),
            Err(e) => Ok(Err(e)),
        }
    }
}

/// Map a worker-reported failure for `path` onto the introspection taxonomy.
fn introspect_error(path: &str, e: WireError) -> IntrospectError {
    match (e.kind.as_str(), e.reason.as_deref()) {
        ("not_found", Some("package_not_installed")) => {
            IntrospectError::PackageNotInstalled(path.split('.').next().unwrap_or(path).to_string())
        }
        ("not_found", Some("not_callable")) => IntrospectError::NotCallable(path.to_string()),
        ("not_found", _) => IntrospectError::SymbolNotFound(path.to_string()),
        ("unavailable", _) => IntrospectError::SourceUnavailable {
            path: path.to_string(),
            reason: e.message,
        },
        _ => IntrospectError::Backend(e.message),
    }
}

fn backend_error(e: BridgeError) -> IntrospectError {
    IntrospectError::Backend(e.to_string())
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    ok: bool,
    #[serde(default)]
    result: Option<Resolved>,
    #[serde(default)]
    error: Option<WireError>,
}

/// Resolver backed by the live Python environment.
#[derive(Debug, Clone)]
pub struct PythonResolver {
    worker: Arc<PythonWorker>,
}

impl PythonResolver {
    pub fn new(worker: Arc<PythonWorker>) -> Self {
        Self { worker }
    }
}

impl Resolver for PythonResolver {
    fn probe(&self, import_name: &str, distribution: &str) -> Probe {
        let args = serde_json::json!({ "import_name": import_name, "distribution": distribution });
        match self.worker.call::<Probe>("probe", args) {
            Ok(Ok(probe)) => probe,
            Ok(Err(e)) => {
                log::warn!("probe {import_name}: {}", e.message);
                Probe::absent()
            }
            Err(e) => {
                log::warn!("probe {import_name}: {e}");
                Probe::absent()
            }
        }
    }

    fn probe_many(&self, packages: &[(&str, &str)]) -> Vec<Probe> {
        let query: Vec<Value> = packages
            .iter()
            .map(|(import_name, dist)| {
                serde_json::json!({ "import_name": import_name, "distribution": dist })
            })
            .collect();
        match self
            .worker
            .call::<Vec<Probe>>("probe_many", serde_json::json!({ "packages": query }))
        {
            Ok(Ok(probes)) if probes.len() == packages.len() => probes,
            Ok(Ok(probes)) => {
                log::warn!(
                    "probe_many: expected {} results, got {}",
                    packages.len(),
                    probes.len()
                );
                vec![Probe::absent(); packages.len()]
            }
            Ok(Err(e)) => {
                log::warn!("probe_many: {}", e.message);
                vec![Probe::absent(); packages.len()]
            }
            Err(e) => {
                log::warn!("probe_many: {e}");
                vec![Probe::absent(); packages.len()]
            }
        }
    }

    fn resolve(&self, path: &str) -> Result<Resolved, IntrospectError> {
        self.worker
            .call::<Resolved>("resolve", serde_json::json!({ "path": path }))
            .map_err(backend_error)?
            .map_err(|e| introspect_error(path, e))
    }

    fn resolve_many(&self, paths: &[String]) -> Vec<Result<Resolved, IntrospectError>> {
        if paths.is_empty() {
            return Vec::new();
        }
        let items = match self
            .worker
            .call::<Vec<BatchItem>>("resolve_many", serde_json::json!({ "paths": paths }))
        {
            Ok(Ok(items)) if items.len() == paths.len() => items,
            Ok(Ok(_)) => {
                let e = IntrospectError::Backend("resolve_many: result count mismatch".into());
                return vec![Err(e); paths.len()];
            }
            Ok(Err(e)) => return vec![Err(IntrospectError::Backend(e.message)); paths.len()],
            Err(e) => return vec![Err(backend_error(e)); paths.len()],
        };
        items
            .into_iter()
            .zip(paths)
            .map(|(item, path)| match (item.ok, item.result, item.error) {
                (true, Some(resolved), _) => Ok(resolved),
                (_, _, Some(e)) => Err(introspect_error(path, e)),
                _ => Err(IntrospectError::Backend(format!("empty reply for {path}"))),
            })
            .collect()
    }

    fn source(&self, path: &str) -> Result<SourceInfo, IntrospectError> {
        self.worker
            .call::<SourceInfo>("source", serde_json::json!({ "path": path }))
            .map_err(backend_error)?
            .map_err(|e| introspect_error(path, e))
    }
}

/// Sentence-transformers embeddings computed by the worker.
#[derive(Debug, Clone)]
pub struct PythonEmbedder {
    worker: Arc<PythonWorker>,
    model: String,
}

impl PythonEmbedder {
    /// Load `model` in the worker; any failure means the semantic backend is unavailable.
    pub fn probe(worker: Arc<PythonWorker>, model: &str) -> Result<Arc<dyn Embedder>, EmbedError> {
        match worker.request("embed_probe", serde_json::json!({ "model": model })) {
            Ok(Ok(_)) => Ok(Arc::new(Self {
                worker,
                model: model.to_string(),
            })),
            Ok(Err(e)) => Err(EmbedError::Unavailable(e.message)),
            Err(e) => Err(EmbedError::Unavailable(e.to_string())),
        }
    }
}

impl Embedder for PythonEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let args = serde_json::json!({ "model": self.model, "texts": texts });
        match self.worker.call::<Vec<Vec<f32>>>("embed", args) {
            Ok(Ok(vectors)) => Ok(vectors),
            Ok(Err(e)) => Err(EmbedError::Failed(e.message)),
            Err(e) => Err(EmbedError::Failed(e.to_string())),
        }
    }
}
