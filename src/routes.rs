//! Routes: file-system convention directories compiled next to packages.
//!
//! A route directory holds a manifest, an optional routing script
//! (`route.js`), and any of the content roles `stage`, `inspector`, and
//! `canvas`. Content roles are bundled together through a generated entry
//! point that only exists while the backend runs.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::artifact::{ArtifactEntry, ArtifactKind, AssetMeta, BuildArtifact, asset_path};
use crate::backend::{Backend, CompileRequest, Format};
use crate::core::BuildConfig;
use crate::error::{CompileError, RouteError};
use crate::manifest::{RouteManifest, WorkspaceSettings};

/// Generated composite entry point. Never a rebuild trigger.
pub const ROUTE_ENTRY: &str = ".route-entry.generated.js";

/// Content roles, in export order.
pub const ROLES: [&str; 3] = ["stage", "inspector", "canvas"];

const EXTENSIONS: [&str; 4] = ["tsx", "ts", "jsx", "js"];

#[derive(Debug, Clone)]
pub struct Route {
    /// Directory name.
    pub name: String,
    pub dir: Utf8PathBuf,
    pub manifest: RouteManifest,
    pub routing_script: Option<Utf8PathBuf>,
    /// Present content roles with their source files.
    pub roles: Vec<(&'static str, Utf8PathBuf)>,
}

impl Route {
    pub fn load(dir: &Utf8Path) -> Result<Self, RouteError> {
        let manifest = RouteManifest::from_file(&dir.join("package.json"))?;
        let name = dir.file_name().unwrap_or_default().to_string();

        let find = |stem: &str| {
            EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{stem}.{ext}")))
                .find(|path| path.is_file())
        };

        let routing_script = ["js", "ts"]
            .iter()
            .map(|ext| dir.join(format!("route.{ext}")))
            .find(|path| path.is_file());

        let roles = ROLES
            .iter()
            .filter_map(|role| find(*role).map(|path| (*role, path)))
            .collect();

        Ok(Self {
            name,
            dir: dir.to_owned(),
            manifest,
            routing_script,
            roles,
        })
    }

    pub fn has_route(&self) -> bool {
        self.routing_script.is_some()
    }

    pub fn has_content(&self) -> bool {
        !self.roles.is_empty()
    }

    pub fn path(&self) -> &str {
        &self.manifest.route.path
    }

    pub fn pages(&self) -> &[String] {
        &self.manifest.route.pages
    }

    /// Declared dependency names.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.manifest.dependencies.keys().map(String::as_str)
    }

    /// Source of the composite entry re-exporting each present role.
    pub fn composite_entry(&self) -> String {
        self.roles
            .iter()
            .map(|(role, path)| {
                let file = path.file_name().unwrap_or_default();
                format!("export {{ default as {role} }} from \"./{file}\";\n")
            })
            .collect()
    }
}

/// Loads every route under `routes_root`, sorted by name. A missing routes
/// root means no routes.
pub fn discover_routes(routes_root: &Utf8Path) -> Result<Vec<Route>, RouteError> {
    if !routes_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(routes_root)? {
        let path = Utf8PathBuf::try_from(entry?.path()).map_err(CompileError::from)?;
        if path.is_dir() && path.join("package.json").is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let routes: Vec<Route> = dirs
        .iter()
        .map(|dir| Route::load(dir))
        .collect::<Result<_, _>>()?;

    tracing::info!("found {} routes in {}", routes.len(), routes_root);
    Ok(routes)
}

/// Route entry in the aggregate registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub name: String,
    pub path: String,
    pub pages: Vec<String>,
    pub has_route: bool,
    pub has_content: bool,
}

pub fn route_registry(routes: &[Route]) -> Vec<RouteInfo> {
    routes
        .iter()
        .map(|route| RouteInfo {
            name: route.name.clone(),
            path: route.path().to_string(),
            pages: route.pages().to_vec(),
            has_route: route.has_route(),
            has_content: route.has_content(),
        })
        .collect()
}

/// Every page a route claims must be configured.
pub fn validate_pages(routes: &[Route], settings: &WorkspaceSettings) -> Result<(), RouteError> {
    for route in routes {
        for page in route.pages() {
            if !settings.pages.contains(page) {
                return Err(RouteError::UnknownPage(route.name.clone(), page.clone()));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct PageRoute<'a> {
    name: &'a str,
    path: &'a str,
    route: Option<String>,
    content: Option<String>,
}

pub struct RouteCompiler<'a> {
    config: &'a BuildConfig,
    backend: &'a dyn Backend,
}

impl<'a> RouteCompiler<'a> {
    pub fn new(config: &'a BuildConfig, backend: &'a dyn Backend) -> Self {
        Self { config, backend }
    }

    fn out_dir(&self, route: &str) -> Utf8PathBuf {
        self.config.output_root().join("routes").join(route)
    }

    fn compile_pair(&self, request: &CompileRequest) -> Result<(), CompileError> {
        if let Some(parent) = request.outfile.parent() {
            fs::create_dir_all(parent)?;
        }

        for request in [request.clone(), request.minified()] {
            self.backend
                .compile(&request)
                .map_err(|e| CompileError::Backend(request.entry.clone(), e))?;
        }

        Ok(())
    }

    fn bundle(&self, route: &Route, entry: &Utf8Path, outfile: &Utf8Path, id: String) -> Result<ArtifactEntry, CompileError> {
        let dependencies: Vec<String> = route.dependencies().map(str::to_string).collect();

        let request = CompileRequest::new(entry, outfile, Format::Esm)
            .bundle()
            .externals(dependencies.clone())
            .defines(self.config.flags.defines());

        self.compile_pair(&request)?;

        let asset = asset_path(outfile);
        AssetMeta::write(outfile, &asset, dependencies.clone())
            .map_err(|e| CompileError::Asset(outfile.to_owned(), e))?;

        Ok(
            ArtifactEntry::new(ArtifactKind::Route, id, self.config.relative(outfile))
                .asset(self.config.relative(&asset))
                .dependencies(dependencies),
        )
    }

    /// Compiles the routing script and the content roles of one route.
    pub fn compile_route(&self, route: &Route) -> Result<BuildArtifact, RouteError> {
        let out = self.out_dir(&route.name);
        let mut artifact = BuildArtifact::new();

        if let Some(script) = &route.routing_script {
            let entry = self.bundle(route, script, &out.join("route.js"), format!("{}/route", route.name))?;
            artifact.push(entry);
        }

        if route.has_content() {
            let composite = route.dir.join(ROUTE_ENTRY);
            fs::write(&composite, route.composite_entry())?;

            let result = self.bundle(route, &composite, &out.join("content.js"), format!("{}/content", route.name));
            fs::remove_file(&composite)?;

            artifact.push(result?);
        }

        Ok(artifact)
    }

    /// Writes one loader and one asset file per configured page.
    pub fn compile_pages(&self, routes: &[Route], settings: &WorkspaceSettings) -> Result<BuildArtifact, RouteError> {
        validate_pages(routes, settings)?;

        let out = self.config.output_root().join("pages");
        fs::create_dir_all(&out)?;

        let mut by_page: BTreeMap<&str, Vec<&Route>> = settings
            .pages
            .iter()
            .map(|page| (page.as_str(), Vec::new()))
            .collect();

        for route in routes {
            for page in route.pages() {
                by_page.entry(page.as_str()).or_default().push(route);
            }
        }

        let mut artifact = BuildArtifact::new();

        for (page, routes) in by_page {
            let entries: Vec<PageRoute> = routes
                .iter()
                .map(|route| {
                    let out = self.out_dir(&route.name);
                    PageRoute {
                        name: &route.name,
                        path: route.path(),
                        route: route
                            .has_route()
                            .then(|| self.config.relative(&out.join("route.js")).to_string()),
                        content: route
                            .has_content()
                            .then(|| self.config.relative(&out.join("content.js")).to_string()),
                    }
                })
                .collect();

            let json = serde_json::to_string_pretty(&entries)
                .map_err(|e| CompileError::Asset(out.clone(), e.into()))?;

            let loader = out.join(format!("{page}.js"));
            fs::write(&loader, format!("export default {json};\n"))?;

            let dependencies = routes.iter().map(|route| route.name.clone()).collect();
            let asset = asset_path(&loader);
            AssetMeta::write(&loader, &asset, dependencies)
                .map_err(|e| CompileError::Asset(loader.clone(), e))?;

            artifact.push(
                ArtifactEntry::new(ArtifactKind::Page, page, self.config.relative(&loader))
                    .asset(self.config.relative(&asset)),
            );
        }

        Ok(artifact)
    }
}
