//! Package discovery and manifest resolution.
//!
//! The [`PackageRegistry`] owns the manifest caches for one build-process
//! run. Caches are append-only, guarded by locks because compile batches
//! run on the rayon pool.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::{Arc, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::core::ArcStr;
use crate::error::ManifestError;
use crate::manifest::PackageManifest;

const MANIFEST: &str = "package.json";

/// One workspace package.
#[derive(Debug)]
pub struct Package {
    /// Directory name, e.g. `block-editor`.
    pub short: ArcStr,
    /// Declared name, e.g. `@acme/block-editor`.
    pub full: ArcStr,
    /// Absolute package directory.
    pub dir: Utf8PathBuf,
    pub manifest: Arc<PackageManifest>,
}

impl Package {
    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.dir.join(MANIFEST)
    }

    pub fn src_dir(&self) -> Utf8PathBuf {
        self.dir.join("src")
    }
}

/// The scanned workspace: full name to package, plus the short name index.
#[derive(Debug, Default)]
pub struct Catalog {
    packages: BTreeMap<ArcStr, Arc<Package>>,
    short_to_full: BTreeMap<ArcStr, ArcStr>,
}

impl Catalog {
    pub fn from_packages(packages: impl IntoIterator<Item = Package>) -> Result<Self, ManifestError> {
        let mut catalog = Catalog::default();

        for package in packages {
            if let Some(existing) = catalog.packages.get(&package.full) {
                return Err(ManifestError::DuplicateName(
                    existing.short.to_string(),
                    package.short.to_string(),
                    package.full.to_string(),
                ));
            }

            catalog
                .short_to_full
                .insert(package.short.clone(), package.full.clone());
            catalog
                .packages
                .insert(package.full.clone(), Arc::new(package));
        }

        Ok(catalog)
    }

    pub fn get(&self, full: &str) -> Option<&Arc<Package>> {
        self.packages.get(full)
    }

    pub fn by_short(&self, short: &str) -> Option<&Arc<Package>> {
        self.short_to_full
            .get(short)
            .and_then(|full| self.packages.get(full))
    }

    pub fn full_name(&self, short: &str) -> Option<&ArcStr> {
        self.short_to_full.get(short)
    }

    pub fn contains(&self, full: &str) -> bool {
        self.packages.contains_key(full)
    }

    /// Packages ordered by full name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Package>> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// A manifest found by name-based resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub path: Utf8PathBuf,
    pub manifest: Arc<PackageManifest>,
}

/// Manifest loader with per-run caches.
#[derive(Debug, Default)]
pub struct PackageRegistry {
    by_path: RwLock<HashMap<Utf8PathBuf, Arc<PackageManifest>>>,
    by_name: RwLock<HashMap<(String, Utf8PathBuf), Resolved>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerates the package directories directly under `packages_root`.
    /// Every directory must hold a manifest, there is no partial catalog.
    pub fn scan(&self, packages_root: &Utf8Path) -> Result<Catalog, ManifestError> {
        let mut dirs = Vec::new();

        let entries =
            fs::read_dir(packages_root).map_err(|e| ManifestError::Scan(packages_root.into(), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| ManifestError::Scan(packages_root.into(), e))?;
            let path = Utf8PathBuf::try_from(entry.path())?;

            if !path.is_dir() || path.file_name().is_some_and(|name| name.starts_with('.')) {
                continue;
            }

            dirs.push(path);
        }

        dirs.sort();

        let packages = dirs
            .into_par_iter()
            .map(|dir| {
                let path = dir.join(MANIFEST);
                if !path.is_file() {
                    return Err(ManifestError::Missing(dir));
                }

                let manifest = self.load(&path)?;
                let short = dir.file_name().unwrap_or_default();

                Ok(Package {
                    short: short.into(),
                    full: manifest.name.as_str().into(),
                    dir: dir.clone(),
                    manifest,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let catalog = Catalog::from_packages(packages)?;
        tracing::info!("found {} packages in {}", catalog.len(), packages_root);

        Ok(catalog)
    }

    /// Loads a manifest by absolute path, parsing each file at most once.
    pub fn load(&self, path: &Utf8Path) -> Result<Arc<PackageManifest>, ManifestError> {
        if let Some(manifest) = self.by_path.read().unwrap().get(path) {
            tracing::debug!("manifest cache hit: {path}");
            return Ok(manifest.clone());
        }

        let manifest = Arc::new(PackageManifest::from_file(path)?);
        self.by_path
            .write()
            .unwrap()
            .entry(path.to_owned())
            .or_insert(manifest.clone());

        Ok(manifest)
    }

    /// Resolves `full_name` the way a consumer located at `context` would.
    ///
    /// The search starts at the nearest directory at or above `context` that
    /// holds a manifest and walks up through `node_modules` directories, so a
    /// consumer with a nested copy gets that copy. Results are cached per
    /// `(full_name, package root)`.
    pub fn resolve(&self, full_name: &str, context: &Utf8Path) -> Result<Resolved, ManifestError> {
        let root = nearest_package_root(context)
            .ok_or_else(|| ManifestError::NotFound(full_name.to_string(), context.to_owned()))?;

        let key = (full_name.to_string(), root.clone());
        if let Some(resolved) = self.by_name.read().unwrap().get(&key) {
            return Ok(resolved.clone());
        }

        for dir in root.ancestors() {
            let candidate = dir.join("node_modules").join(full_name).join(MANIFEST);
            if !candidate.is_file() {
                continue;
            }

            let resolved = Resolved {
                manifest: self.load(&candidate)?,
                path: candidate,
            };

            self.by_name
                .write()
                .unwrap()
                .entry(key)
                .or_insert(resolved.clone());

            return Ok(resolved);
        }

        Err(ManifestError::NotFound(full_name.to_string(), root))
    }

    /// Whether `dependency`, as declared by `consumer`, is satisfied by the
    /// workspace copy. A resolution miss means nothing is installed, in which
    /// case the workspace copy is what the build sees. A resolution hit to a
    /// different manifest means the consumer has its own nested copy.
    pub fn resolves_to_workspace(&self, catalog: &Catalog, consumer: &Package, dependency: &str) -> bool {
        let Some(target) = catalog.get(dependency) else {
            return false;
        };

        match self.resolve(dependency, &consumer.dir) {
            Ok(resolved) => {
                let same = same_file(&resolved.path, &target.manifest_path());
                if !same {
                    tracing::debug!(
                        "{} resolves {} to nested copy {}",
                        consumer.full,
                        dependency,
                        resolved.path
                    );
                }
                same
            }
            Err(_) => true,
        }
    }

    pub fn cached_manifests(&self) -> usize {
        self.by_path.read().unwrap().len()
    }
}

fn nearest_package_root(context: &Utf8Path) -> Option<Utf8PathBuf> {
    let start = if context.is_file() {
        context.parent()?
    } else {
        context
    };

    start
        .ancestors()
        .find(|dir| dir.join(MANIFEST).is_file())
        .map(Utf8Path::to_path_buf)
}

fn same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (a.canonicalize_utf8(), b.canonicalize_utf8()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
