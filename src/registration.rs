//! Registration data handed to the host runtime.
//!
//! The data is plain JSON under `build/registration/`. Nothing here depends
//! on time or iteration order, so an unchanged workspace renders
//! byte-identical files.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::artifact::{ArtifactEntry, ArtifactKind, ArtifactStore};
use crate::core::BuildConfig;
use crate::routes::{Route, RouteInfo, route_registry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub id: String,
    pub path: Utf8PathBuf,
    pub asset: Option<Utf8PathBuf>,
    pub dependencies: Vec<String>,
}

impl From<&ArtifactEntry> for RegistryEntry {
    fn from(entry: &ArtifactEntry) -> Self {
        Self {
            id: entry.id.clone(),
            path: entry.path.clone(),
            asset: entry.asset.clone(),
            dependencies: entry.dependencies.clone(),
        }
    }
}

/// A per-page loader file and its asset metadata.
pub type PageLoader = RegistryEntry;

/// All registration data of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registries {
    /// Script-module exports.
    pub modules: Vec<RegistryEntry>,
    /// Browser global bundles.
    pub scripts: Vec<RegistryEntry>,
    pub styles: Vec<RegistryEntry>,
    /// Route bundles.
    pub routes: Vec<RegistryEntry>,
    pub pages: Vec<PageLoader>,
    /// Aggregate route registry.
    pub route_info: Vec<RouteInfo>,
}

fn sorted(store: &ArtifactStore, kind: ArtifactKind) -> Vec<RegistryEntry> {
    let mut entries: Vec<RegistryEntry> = store
        .entries(kind)
        .into_iter()
        .map(RegistryEntry::from)
        .collect();

    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

impl Registries {
    pub fn collect(store: &ArtifactStore, routes: &[Route]) -> Self {
        Self {
            modules: sorted(store, ArtifactKind::Module),
            scripts: sorted(store, ArtifactKind::Script),
            styles: sorted(store, ArtifactKind::Style),
            routes: sorted(store, ArtifactKind::Route),
            pages: sorted(store, ArtifactKind::Page),
            route_info: route_registry(routes),
        }
    }
}

#[derive(Serialize)]
struct Document<'a, T> {
    base_url: &'a str,
    entries: &'a [T],
}

fn write_document<T: Serialize>(path: &Utf8Path, base_url: &str, entries: &[T]) -> anyhow::Result<()> {
    let document = Document { base_url, entries };
    let mut text = serde_json::to_string_pretty(&document)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

/// Writes `modules.json`, `scripts.json`, `styles.json`, `routes.json`, and
/// `pages.json`, then renders any templates. Returns the written files.
pub fn render_registries(registries: &Registries, config: &BuildConfig) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let out = config.output_root().join("registration");
    fs::create_dir_all(&out)?;

    let base_url = config.base_url.as_str();
    let mut written = Vec::new();

    let documents: [(&str, &[RegistryEntry]); 3] = [
        ("modules.json", &registries.modules),
        ("scripts.json", &registries.scripts),
        ("styles.json", &registries.styles),
    ];

    for (name, entries) in documents {
        let path = out.join(name);
        write_document(&path, base_url, entries)?;
        written.push(path);
    }

    #[derive(Serialize)]
    struct RouteDocument<'a> {
        bundles: &'a [RegistryEntry],
        routes: &'a [RouteInfo],
    }

    let path = out.join("routes.json");
    write_document(
        &path,
        base_url,
        &[RouteDocument {
            bundles: &registries.routes,
            routes: &registries.route_info,
        }],
    )?;
    written.push(path);

    let path = out.join("pages.json");
    write_document(&path, base_url, &registries.pages)?;
    written.push(path);

    #[cfg(feature = "minijinja")]
    written.extend(templates::render(registries, config, &out)?);

    tracing::debug!("wrote {} registration files", written.len());
    Ok(written)
}

#[cfg(feature = "minijinja")]
mod templates {
    use std::fs;

    use camino::{Utf8Path, Utf8PathBuf};
    use minijinja::{Environment, context};

    use super::Registries;
    use crate::core::BuildConfig;

    /// Renders `<root>/templates/*.j2` into the registration directory,
    /// dropping the `.j2` suffix.
    pub(super) fn render(registries: &Registries, config: &BuildConfig, out: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let pattern = config.root.join("templates/*.j2");
        let env = Environment::new();
        let mut written = Vec::new();

        let mut paths = Vec::new();
        for path in glob::glob(pattern.as_str())? {
            paths.push(Utf8PathBuf::try_from(path?)?);
        }
        paths.sort();

        for path in paths {
            let source = fs::read_to_string(&path)?;
            let rendered = env.render_str(
                &source,
                context! {
                    base_url => config.base_url,
                    modules => registries.modules,
                    scripts => registries.scripts,
                    styles => registries.styles,
                    routes => registries.route_info,
                    pages => registries.pages,
                },
            )?;

            let target = out.join(path.file_stem().unwrap_or_default());
            fs::write(&target, rendered)?;
            written.push(target);
        }

        Ok(written)
    }
}
