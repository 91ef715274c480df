//! Static registry of the core scverse packages.

use serde::Serialize;

/// Package category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageCategory {
    /// Data structures for single-cell and spatial omics data.
    DataFormat,
    /// Tools and algorithms operating on those data structures.
    Analysis,
}

impl PackageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageCategory::DataFormat => "data format",
            PackageCategory::Analysis => "analysis",
        }
    }
}

/// Metadata for one registry package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    /// Distribution name (what `pip install` takes).
    pub name: &'static str,
    /// Top-level import name. Differs from `name` for e.g. `scvi-tools` → `scvi`.
    pub import_name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub category: PackageCategory,
    pub github_url: &'static str,
    pub docs_url: &'static str,
}

const fn data_format(
    name: &'static str,
    display_name: &'static str,
    description: &'static str,
    github_url: &'static str,
    docs_url: &'static str,
) -> Package {
    Package {
        name,
        import_name: name,
        display_name,
        description,
        category: PackageCategory::DataFormat,
        github_url,
        docs_url,
    }
}

const fn analysis(
    name: &'static str,
    import_name: &'static str,
    display_name: &'static str,
    description: &'static str,
    github_url: &'static str,
    docs_url: &'static str,
) -> Package {
    Package {
        name,
        import_name,
        display_name,
        description,
        category: PackageCategory::Analysis,
        github_url,
        docs_url,
    }
}

pub static CORE_PACKAGES: &[Package] = &[
    data_format(
        "anndata",
        "AnnData",
        "Annotated data matrices for single-cell analysis",
        "https://github.com/scverse/anndata",
        "https://anndata.readthedocs.io/",
    ),
    data_format(
        "mudata",
        "MuData",
        "Multimodal omics data structure",
        "https://github.com/scverse/mudata",
        "https://mudata.readthedocs.io/",
    ),
    data_format(
        "spatialdata",
        "SpatialData",
        "Spatial omics data framework",
        "https://github.com/scverse/spatialdata",
        "https://spatialdata.scverse.org/",
    ),
    analysis(
        "scanpy",
        "scanpy",
        "Scanpy",
        "Scalable toolkit for analyzing single-cell gene expression data",
        "https://github.com/scverse/scanpy",
        "https://scanpy.readthedocs.io/",
    ),
    analysis(
        "squidpy",
        "squidpy",
        "Squidpy",
        "Spatial molecular data analysis and visualization",
        "https://github.com/scverse/squidpy",
        "https://squidpy.readthedocs.io/",
    ),
    analysis(
        "muon",
        "muon",
        "Muon",
        "Multimodal omics analysis framework",
        "https://github.com/scverse/muon",
        "https://muon.readthedocs.io/",
    ),
    analysis(
        "scvi-tools",
        "scvi",
        "scvi-tools",
        "Deep learning models for single-cell omics data analysis",
        "https://github.com/scverse/scvi-tools",
        "https://docs.scvi-tools.org/",
    ),
    analysis(
        "scirpy",
        "scirpy",
        "Scirpy",
        "Single-cell TCR and BCR analysis toolkit",
        "https://github.com/scverse/scirpy",
        "https://scirpy.scverse.org/",
    ),
    analysis(
        "snapatac2",
        "snapatac2",
        "SnapATAC2",
        "Single-cell ATAC-seq analysis pipeline",
        "https://github.com/scverse/SnapATAC2",
        "https://scverse.org/SnapATAC2/",
    ),
    analysis(
        "rapids_singlecell",
        "rapids_singlecell",
        "rapids-singlecell",
        "GPU-accelerated single-cell analysis",
        "https://github.com/scverse/rapids_singlecell",
        "https://rapids-singlecell.readthedocs.io/",
    ),
    analysis(
        "pertpy",
        "pertpy",
        "pertpy",
        "Perturbation analysis for single-cell experiments",
        "https://github.com/scverse/pertpy",
        "https://pertpy.readthedocs.io/",
    ),
    analysis(
        "decoupler",
        "decoupler",
        "decoupler",
        "Enrichment analysis from omics data",
        "https://github.com/scverse/decoupler",
        "https://decoupler.readthedocs.io/",
    ),
];

/// Look up a package by distribution or import name (case-insensitive).
pub fn package_by_name(name: &str) -> Option<&'static Package> {
    let name = name.trim();
    CORE_PACKAGES.iter().find(|p| {
        p.name.eq_ignore_ascii_case(name) || p.import_name.eq_ignore_ascii_case(name)
    })
}

/// Look up the package owning a dotted path (`scvi.model.SCVI` → scvi-tools).
pub fn package_for_path(path: &str) -> Option<&'static Package> {
    let head = path.trim().split('.').next().unwrap_or_default();
    CORE_PACKAGES
        .iter()
        .find(|p| p.import_name.eq_ignore_ascii_case(head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_expected_shape() {
        assert_eq!(CORE_PACKAGES.len(), 12);
        let count = |c: PackageCategory| CORE_PACKAGES.iter().filter(|p| p.category == c).count();
        assert_eq!(count(PackageCategory::DataFormat), 3);
        assert_eq!(count(PackageCategory::Analysis), 9);
        for required in [
            "anndata", "scanpy", "mudata", "scvi-tools", "snapatac2", "pertpy", "decoupler",
        ] {
            assert!(package_by_name(required).is_some(), "missing {required}");
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_accepts_import_names() {
        assert_eq!(package_by_name("AnnData").map(|p| p.name), Some("anndata"));
        assert_eq!(package_by_name("scvi").map(|p| p.name), Some("scvi-tools"));
        assert_eq!(package_by_name("SnapATAC2").map(|p| p.import_name), Some("snapatac2"));
        assert!(package_by_name("nonexistent").is_none());
    }

    #[test]
    fn path_owner_uses_import_name() {
        assert_eq!(
            package_for_path("scvi.model.SCVI").map(|p| p.name),
            Some("scvi-tools")
        );
        assert_eq!(
            package_for_path("scanpy.pp.normalize_total").map(|p| p.category),
            Some(PackageCategory::Analysis)
        );
        assert!(package_for_path("os.path.join").is_none());
    }
}
