//! Lookup-table resolver.
//!
//! A table is a JSON snapshot of an environment:
//!
//! ```json
//! {
//!   "packages": { "scanpy": "1.10.1" },
//!   "objects": {
//!     "scanpy.pp": { "kind": "module", "doc": "Preprocessing." },
//!     "scanpy.pp.pca": { "kind": "callable", "signature": "(data, n_comps=None)", "docstring": "..." }
//!   }
//! }
//! ```
//!
//! `packages` maps import names to versions (`null` when unknown); anything absent is not
//! installed. A module's members are the table entries directly below it, and a path that
//! only appears as a prefix of other entries is treated as a module.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::docstring;
use crate::introspect::{
    CallableRecord, IntrospectError, MemberKind, MemberSummary, ModuleRecord, ObjectKind,
    Parameter, Probe, Resolved, Resolver, SourceInfo,
};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read table {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse table {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSource {
    pub file_path: String,
    #[serde(default = "first_line")]
    pub line_start: u32,
    pub code: String,
}

fn first_line() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableObject {
    Module {
        #[serde(default)]
        doc: Option<String>,
    },
    Callable {
        #[serde(default)]
        module: Option<String>,
        #[serde(default)]
        object_kind: ObjectKind,
        #[serde(default)]
        signature: Option<String>,
        #[serde(default)]
        parameters: Vec<Parameter>,
        #[serde(default)]
        return_annotation: Option<String>,
        #[serde(default)]
        docstring: Option<String>,
        #[serde(default)]
        source: Option<TableSource>,
    },
    Other {
        #[serde(default)]
        doc: Option<String>,
    },
}

impl TableObject {
    fn member_kind(&self) -> MemberKind {
        match self {
            TableObject::Module { .. } => MemberKind::Module,
            TableObject::Callable {
                object_kind: ObjectKind::Class,
                ..
            } => MemberKind::Class,
            TableObject::Callable { .. } => MemberKind::Function,
            TableObject::Other { .. } => MemberKind::Other,
        }
    }

    fn doc(&self) -> Option<&str> {
        match self {
            TableObject::Module { doc } | TableObject::Other { doc } => doc.as_deref(),
            TableObject::Callable { docstring, .. } => docstring.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub packages: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub objects: BTreeMap<String, TableObject>,
}

impl Table {
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| TableError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Names directly below `path`, sorted.
    fn children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}.");
        let mut names: Vec<String> = self
            .objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('.').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.dedup();
        names
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{path}.");
        self.objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn module_record(&self, path: &str) -> ModuleRecord {
        let members = self
            .children(path)
            .into_iter()
            .map(|name| {
                let full = format!("{path}.{name}");
                let (kind, summary) = match self.objects.get(&full) {
                    Some(obj) => (
                        obj.member_kind(),
                        obj.doc().map(docstring::summary_line).unwrap_or_default(),
                    ),
                    None => (MemberKind::Module, ""),
                };
                MemberSummary {
                    name,
                    kind,
                    summary: summary.to_string(),
                }
            })
            .collect();
        ModuleRecord {
            path: path.to_string(),
            members,
        }
    }

    fn check_installed(&self, path: &str) -> Result<(), IntrospectError> {
        let root = path.split('.').next().unwrap_or(path);
        if self.packages.contains_key(root) {
            Ok(())
        } else {
            Err(IntrospectError::PackageNotInstalled(root.to_string()))
        }
    }
}

/// Resolver that answers from a [`Table`] instead of a live interpreter.
#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    table: Table,
}

impl TableResolver {
    pub fn new(table: Table) -> Self {
        Self { table }
    }
}

impl Resolver for TableResolver {
    fn probe(&self, import_name: &str, _distribution: &str) -> Probe {
        match self.table.packages.get(import_name) {
            Some(version) => Probe {
                installed: true,
                version: version.clone(),
            },
            None => Probe::absent(),
        }
    }

    fn resolve(&self, path: &str) -> Result<Resolved, IntrospectError> {
        self.table.check_installed(path)?;
        match self.table.objects.get(path) {
            Some(TableObject::Module { .. }) => Ok(Resolved::Module(self.table.module_record(path))),
            Some(TableObject::Callable {
                module,
                object_kind,
                signature,
                parameters,
                return_annotation,
                docstring,
                ..
            }) => Ok(Resolved::Callable(CallableRecord {
                path: path.to_string(),
                module: module.clone(),
                object_kind: *object_kind,
                signature: signature.clone(),
                parameters: parameters.clone(),
                return_annotation: return_annotation.clone(),
                docstring: docstring.clone(),
            })),
            Some(TableObject::Other { .. }) => Err(IntrospectError::NotCallable(path.to_string())),
            None if self.table.has_children(path) => {
                Ok(Resolved::Module(self.table.module_record(path)))
            }
            None => Err(IntrospectError::SymbolNotFound(path.to_string())),
        }
    }

    fn source(&self, path: &str) -> Result<SourceInfo, IntrospectError> {
        match self.resolve(path)? {
            Resolved::Module(_) => return Err(IntrospectError::NotCallable(path.to_string())),
            Resolved::Callable(_) => {}
        }
        match self.table.objects.get(path) {
            Some(TableObject::Callable {
                source: Some(src), ..
            }) => {
                let lines = src.code.lines().count().max(1) as u32;
                Ok(SourceInfo {
                    path: path.to_string(),
                    file_path: src.file_path.clone(),
                    line_start: src.line_start,
                    line_end: src.line_start + lines - 1,
                    code: src.code.clone(),
                })
            }
            _ => Err(IntrospectError::SourceUnavailable {
                path: path.to_string(),
                reason: "no source recorded (built-in or C extension)".to_string(),
            }),
        }
    }
}
