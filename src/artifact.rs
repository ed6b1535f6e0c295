//! What a compile produced, and the store that keeps the latest result per
//! target for the registration step.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::core::Hash32;

/// Kind of output a single artifact entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Transpiled `src/` tree, CommonJS and ES modules.
    Library,
    /// Browser global bundle.
    Script,
    /// Script-module export.
    Module,
    Style,
    Worker,
    Copied,
    /// Routing or content bundle of a route.
    Route,
    /// Per-page route loader.
    Page,
}

/// One output the registration step can refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    /// External handle, e.g. `ws-editor` or `@acme/editor/router`.
    pub id: String,
    /// Output path relative to the workspace root.
    pub path: Utf8PathBuf,
    /// Asset metadata file, relative to the workspace root.
    pub asset: Option<Utf8PathBuf>,
    /// Handles this entry must load after.
    pub dependencies: Vec<String>,
}

impl ArtifactEntry {
    pub fn new(kind: ArtifactKind, id: impl Into<String>, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            kind,
            id: id.into(),
            path: path.into(),
            asset: None,
            dependencies: Vec::new(),
        }
    }

    pub fn asset(mut self, asset: impl Into<Utf8PathBuf>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Everything one compile of a package or route produced. Created fresh on
/// every compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArtifact {
    pub entries: Vec<ArtifactEntry>,
}

impl BuildArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ArtifactEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, other: BuildArtifact) {
        self.entries.extend(other.entries);
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &ArtifactEntry> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Contents of an `*.asset.json` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetMeta {
    pub dependencies: Vec<String>,
    /// Content hash prefix of the non-minified output.
    pub version: String,
}

impl AssetMeta {
    /// Hashes `output` and writes the metadata to `asset_path`.
    pub fn write(output: &Utf8Path, asset_path: &Utf8Path, dependencies: Vec<String>) -> anyhow::Result<Self> {
        let content = fs::read(output)?;
        let meta = AssetMeta {
            dependencies,
            version: Hash32::hash(&content).short(20),
        };

        fs::write(asset_path, serde_json::to_string_pretty(&meta)?)?;
        Ok(meta)
    }
}

/// `dir/index.js` -> `dir/index.asset.json`.
pub fn asset_path(output: &Utf8Path) -> Utf8PathBuf {
    let stem = output.file_stem().unwrap_or_default();
    output.with_file_name(format!("{stem}.asset.json"))
}

/// Latest artifact per package and per route, plus the page loaders.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    packages: BTreeMap<String, BuildArtifact>,
    routes: BTreeMap<String, BuildArtifact>,
    pages: BuildArtifact,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever the previous compile of `package` produced in the
    /// given kinds. Entries of other kinds are kept, so rerunning one phase
    /// does not drop the other phase's outputs.
    pub fn replace_package(&mut self, package: &str, kinds: &[ArtifactKind], artifact: BuildArtifact) {
        let current = self.packages.entry(package.to_string()).or_default();
        current.entries.retain(|entry| !kinds.contains(&entry.kind));
        current.extend(artifact);
    }

    pub fn insert_route(&mut self, route: &str, artifact: BuildArtifact) {
        self.routes.insert(route.to_string(), artifact);
    }

    pub fn remove_route(&mut self, route: &str) {
        self.routes.remove(route);
    }

    pub fn set_pages(&mut self, artifact: BuildArtifact) {
        self.pages = artifact;
    }

    pub fn package(&self, package: &str) -> Option<&BuildArtifact> {
        self.packages.get(package)
    }

    pub fn route(&self, route: &str) -> Option<&BuildArtifact> {
        self.routes.get(route)
    }

    /// Entries of one kind across everything stored.
    pub fn entries(&self, kind: ArtifactKind) -> Vec<&ArtifactEntry> {
        self.packages
            .values()
            .chain(self.routes.values())
            .chain(std::iter::once(&self.pages))
            .flat_map(|artifact| artifact.of_kind(kind))
            .collect()
    }
}
