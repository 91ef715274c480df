//! Which registry packages are importable, and at what version.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::introspect::{Probe, Resolver};
use crate::registry::{self, Package, CORE_PACKAGES};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub package: &'static Package,
    pub installed: bool,
    pub version: Option<String>,
}

/// Probe cache keyed by import name. Entries are only ever added.
pub struct Environment {
    resolver: Arc<dyn Resolver>,
    probes: Mutex<HashMap<&'static str, Probe>>,
}

impl Environment {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            probes: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, import_name: &str) -> Option<Probe> {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(import_name)
            .cloned()
    }

    fn remember(&self, import_name: &'static str, probe: Probe) {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(import_name, probe);
    }

    pub fn probe(&self, package: &'static Package) -> InstalledPackage {
        let probe = match self.cached(package.import_name) {
            Some(p) => p,
            None => {
                let p = self.resolver.probe(package.import_name, package.name);
                log::debug!(
                    "probe {}: installed={} version={:?}",
                    package.import_name,
                    p.installed,
                    p.version
                );
                self.remember(package.import_name, p.clone());
                p
            }
        };
        InstalledPackage {
            package,
            installed: probe.installed,
            version: probe.version,
        }
    }

    /// Every registry package, in registry order. Unprobed packages are probed in one batch.
    pub fn packages(&self) -> Vec<InstalledPackage> {
        let missing: Vec<&'static Package> = CORE_PACKAGES
            .iter()
            .filter(|p| self.cached(p.import_name).is_none())
            .collect();
        if !missing.is_empty() {
            let query: Vec<(&str, &str)> =
                missing.iter().map(|p| (p.import_name, p.name)).collect();
            let probes = self.resolver.probe_many(&query);
            for (p, probe) in missing.iter().zip(probes) {
                self.remember(p.import_name, probe);
            }
        }
        CORE_PACKAGES.iter().map(|p| self.probe(p)).collect()
    }

    pub fn installed(&self) -> Vec<InstalledPackage> {
        self.packages().into_iter().filter(|p| p.installed).collect()
    }

    pub fn installed_import_names(&self) -> Vec<&'static str> {
        self.installed()
            .iter()
            .map(|p| p.package.import_name)
            .collect()
    }

    /// Look a package up by distribution or import name and probe it.
    pub fn lookup(&self, name: &str) -> Option<InstalledPackage> {
        registry::package_by_name(name).map(|p| self.probe(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{IntrospectError, Resolved, SourceInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports only scanpy as installed and counts probes.
    #[derive(Default)]
    struct CountingResolver {
        probes: AtomicUsize,
    }

    impl Resolver for CountingResolver {
        fn probe(&self, import_name: &str, _distribution: &str) -> Probe {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if import_name == "scanpy" {
                Probe {
                    installed: true,
                    version: Some("1.10.1".into()),
                }
            } else {
                Probe::absent()
            }
        }

        fn resolve(&self, path: &str) -> Result<Resolved, IntrospectError> {
            Err(IntrospectError::SymbolNotFound(path.into()))
        }

        fn source(&self, path: &str) -> Result<SourceInfo, IntrospectError> {
            Err(IntrospectError::SymbolNotFound(path.into()))
        }
    }

    #[test]
    fn reports_installed_packages_with_versions() {
        let env = Environment::new(Arc::new(CountingResolver::default()));
        let installed = env.installed();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].package.name, "scanpy");
        assert_eq!(installed[0].version.as_deref(), Some("1.10.1"));
        assert_eq!(env.installed_import_names(), ["scanpy"]);
        assert_eq!(env.packages().len(), CORE_PACKAGES.len());
    }

    #[test]
    fn probes_are_memoized() {
        let resolver = Arc::new(CountingResolver::default());
        let env = Environment::new(resolver.clone());
        env.packages();
        env.packages();
        assert!(env.lookup("SCANPY").is_some_and(|p| p.installed));
        assert!(env.lookup("scvi").is_some_and(|p| !p.installed));
        assert_eq!(resolver.probes.load(Ordering::SeqCst), CORE_PACKAGES.len());
    }

    #[test]
    fn unknown_names_are_not_registry_packages() {
        let env = Environment::new(Arc::new(CountingResolver::default()));
        assert!(env.lookup("numpy").is_none());
    }
}
