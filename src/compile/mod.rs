//! Per-package compilation.
//!
//! A package's manifest flags are turned into a list of [`BuildStep`]s once,
//! up front. The orchestrator then runs the steps of one [`StepPhase`] at a
//! time: transpile steps level by level, bundle steps all at once.

mod bundle;
mod copy;
mod library;
mod style;
mod worker;

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::artifact::{ArtifactKind, BuildArtifact};
use crate::backend::{Backend, CompileRequest, Format};
use crate::core::{BuildConfig, as_overhead};
use crate::error::CompileError;
use crate::graph::DependencyGraph;
use crate::manifest::WorkspaceSettings;
use crate::registry::{Catalog, Package};

pub use bundle::{BrowserBundleStep, ModuleExportsStep};
pub use copy::CopyStep;
pub use library::LibraryStep;
pub use style::{StyleStep, infer_style_dependencies};
pub use worker::{PendingWorkerSource, WorkerStep};

/// Source files that never take part in a build.
static EXCLUDED: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    [
        "**/test/**",
        "**/__tests__/**",
        "**/__mocks__/**",
        "**/stories/**",
        "**/*.test.*",
        "**/*.spec.*",
        "**/*.story.*",
        "**/*.stories.*",
        "**/*.native.*",
        "**/*.ios.*",
        "**/*.android.*",
    ]
    .into_iter()
    .filter_map(|pattern| Pattern::new(pattern).ok())
    .collect()
});

/// Tests, stories, and platform-suffixed variants. `path` is relative to the
/// package source directory.
pub fn is_excluded_source(path: &Utf8Path) -> bool {
    EXCLUDED.iter().any(|pattern| pattern.matches(path.as_str()))
}

/// When a step runs relative to the rest of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepPhase {
    /// Runs level by level, consumers after their dependencies.
    Transpile,
    /// Runs after every package is transpiled, in any order.
    Bundle,
}

impl StepPhase {
    /// Artifact kinds a phase produces, replaced as a whole on recompile.
    pub fn kinds(self) -> &'static [ArtifactKind] {
        match self {
            StepPhase::Transpile => &[
                ArtifactKind::Library,
                ArtifactKind::Worker,
                ArtifactKind::Style,
                ArtifactKind::Copied,
            ],
            StepPhase::Bundle => &[ArtifactKind::Script, ArtifactKind::Module],
        }
    }
}

/// Everything a step needs to know about the package it runs for.
pub struct StepContext<'a> {
    pub package: &'a Package,
    pub config: &'a BuildConfig,
    pub settings: &'a WorkspaceSettings,
    pub catalog: &'a Catalog,
    pub backend: &'a dyn Backend,
    /// In-workspace dependencies, ordered by full name.
    pub dependencies: Vec<Arc<Package>>,
}

impl StepContext<'_> {
    pub fn handle(&self) -> String {
        self.settings.handle(&self.package.short)
    }

    /// Full names of in-workspace dependencies, left as imports when
    /// bundling.
    pub fn externals(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .map(|package| package.full.to_string())
            .collect()
    }

    /// Handles of every in-workspace dependency.
    pub fn dependency_handles(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .map(|package| self.settings.handle(&package.short))
            .collect()
    }

    /// Handles of dependencies that ship a browser global bundle.
    pub fn script_dependency_handles(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|package| package.manifest.browser_global().is_some())
            .map(|package| self.settings.handle(&package.short))
            .collect()
    }

    /// Module ids of dependencies that ship script-module exports.
    pub fn module_dependency_ids(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|package| package.manifest.has_module_exports())
            .map(|package| package.full.to_string())
            .collect()
    }

    /// A request with the feature flags already applied.
    pub fn request(&self, entry: impl Into<Utf8PathBuf>, outfile: impl Into<Utf8PathBuf>, format: Format) -> CompileRequest {
        CompileRequest::new(entry, outfile, format).defines(self.config.flags.defines())
    }

    pub fn compile(&self, request: &CompileRequest) -> Result<(), CompileError> {
        if let Some(parent) = request.outfile.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.backend
            .compile(request)
            .map_err(|e| CompileError::Backend(request.entry.clone(), e))
    }

    /// Compiles the plain and the minified variant of `request`.
    pub fn compile_pair(&self, request: &CompileRequest) -> Result<(), CompileError> {
        self.compile(request)?;
        self.compile(&request.minified())
    }

    /// Root-relative path for registration data.
    pub fn relative(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.config.relative(path).to_owned()
    }

    /// `src/index.{js,ts,tsx,jsx}`, whichever exists first.
    pub fn find_entry(&self, step: &'static str, stem: &str) -> Result<Utf8PathBuf, CompileError> {
        let src = self.package.src_dir();

        ["js", "ts", "tsx", "jsx"]
            .iter()
            .map(|ext| src.join(format!("{stem}.{ext}")))
            .find(|path| path.is_file())
            .ok_or_else(|| CompileError::MissingEntry(step, src.join(format!("{stem}.js"))))
    }
}

/// Common capability of every build step.
pub trait Step {
    fn name(&self) -> &'static str;

    fn phase(&self) -> StepPhase;

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError>;
}

/// The closed set of things a package build can do.
#[derive(Debug, Clone)]
pub enum BuildStep {
    Library(LibraryStep),
    BrowserBundle(BrowserBundleStep),
    ModuleExports(ModuleExportsStep),
    Worker(WorkerStep),
    Style(StyleStep),
    Copy(CopyStep),
}

impl Step for BuildStep {
    fn name(&self) -> &'static str {
        match self {
            BuildStep::Library(step) => step.name(),
            BuildStep::BrowserBundle(step) => step.name(),
            BuildStep::ModuleExports(step) => step.name(),
            BuildStep::Worker(step) => step.name(),
            BuildStep::Style(step) => step.name(),
            BuildStep::Copy(step) => step.name(),
        }
    }

    fn phase(&self) -> StepPhase {
        match self {
            BuildStep::Library(step) => step.phase(),
            BuildStep::BrowserBundle(step) => step.phase(),
            BuildStep::ModuleExports(step) => step.phase(),
            BuildStep::Worker(step) => step.phase(),
            BuildStep::Style(step) => step.phase(),
            BuildStep::Copy(step) => step.phase(),
        }
    }

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        match self {
            BuildStep::Library(step) => step.run(cx, artifact),
            BuildStep::BrowserBundle(step) => step.run(cx, artifact),
            BuildStep::ModuleExports(step) => step.run(cx, artifact),
            BuildStep::Worker(step) => step.run(cx, artifact),
            BuildStep::Style(step) => step.run(cx, artifact),
            BuildStep::Copy(step) => step.run(cx, artifact),
        }
    }
}

/// Assembles the step list for a package from its manifest flags. Workers
/// come first so their inline sources exist before the library transpiles.
pub fn plan_steps(package: &Package) -> Vec<BuildStep> {
    let manifest = &package.manifest;
    let mut steps = Vec::new();

    for (name, source) in &manifest.build.workers {
        steps.push(BuildStep::Worker(WorkerStep::new(name, source)));
    }

    if manifest.is_library() {
        steps.push(BuildStep::Library(LibraryStep));
    }

    if manifest.has_styles() {
        steps.push(BuildStep::Style(StyleStep::new(
            manifest.build.style_entry_points.clone(),
        )));
    }

    if let Some(copy) = &manifest.build.copy_files {
        steps.push(BuildStep::Copy(CopyStep::new(copy)));
    }

    if let Some(global) = manifest.browser_global() {
        steps.push(BuildStep::BrowserBundle(BrowserBundleStep::new(global)));
    }

    if let Some(exports) = &manifest.build.module_exports {
        steps.push(BuildStep::ModuleExports(ModuleExportsStep::new(exports)));
    }

    steps
}

/// Compiles packages of one workspace.
pub struct PackageCompiler<'a> {
    config: &'a BuildConfig,
    settings: &'a WorkspaceSettings,
    catalog: &'a Catalog,
    graph: &'a DependencyGraph,
    backend: &'a dyn Backend,
}

impl<'a> PackageCompiler<'a> {
    pub fn new(
        config: &'a BuildConfig,
        settings: &'a WorkspaceSettings,
        catalog: &'a Catalog,
        graph: &'a DependencyGraph,
        backend: &'a dyn Backend,
    ) -> Self {
        Self {
            config,
            settings,
            catalog,
            graph,
            backend,
        }
    }

    fn context<'p>(&'p self, package: &'p Package) -> StepContext<'p> {
        let dependencies = self
            .graph
            .dependencies(&package.full)
            .iter()
            .filter_map(|name| self.catalog.get(name).cloned())
            .collect();

        StepContext {
            package,
            config: self.config,
            settings: self.settings,
            catalog: self.catalog,
            backend: self.backend,
            dependencies,
        }
    }

    /// Runs both phases for one package.
    pub fn compile(&self, full: &str) -> Result<BuildArtifact, CompileError> {
        let mut artifact = self.compile_phase(full, StepPhase::Transpile)?;
        artifact.extend(self.compile_phase(full, StepPhase::Bundle)?);
        Ok(artifact)
    }

    /// Runs the steps of one phase for one package.
    ///
    /// Worker bundles are produced first, their inline sources are emitted
    /// as companion modules, and only then do the remaining steps run.
    pub fn compile_phase(&self, full: &str, phase: StepPhase) -> Result<BuildArtifact, CompileError> {
        let package = self
            .catalog
            .get(full)
            .ok_or_else(|| CompileError::UnknownPackage(full.to_string()))?;

        let s = Instant::now();
        let cx = self.context(package);
        let steps: Vec<BuildStep> = plan_steps(package)
            .into_iter()
            .filter(|step| step.phase() == phase)
            .collect();

        let mut artifact = BuildArtifact::new();

        let workers: Vec<&WorkerStep> = steps
            .iter()
            .filter_map(|step| match step {
                BuildStep::Worker(worker) => Some(worker),
                _ => None,
            })
            .collect();

        let pending = workers
            .par_iter()
            .map(|worker| worker.bundle(&cx))
            .collect::<Result<Vec<PendingWorkerSource>, _>>()?;

        for source in pending {
            source.emit(&cx, &mut artifact)?;
        }

        for step in steps.iter().filter(|step| !matches!(step, BuildStep::Worker(_))) {
            tracing::debug!("{}: running {} step", package.full, step.name());
            step.run(&cx, &mut artifact)?;
        }

        if !steps.is_empty() {
            tracing::debug!("{}: {:?} phase done {}", package.full, phase, as_overhead(s));
        }

        Ok(artifact)
    }

    /// See [`infer_style_dependencies`].
    pub fn infer_style_dependencies(&self, handles: &[String], package: &Package) -> Vec<String> {
        infer_style_dependencies(handles, package, self.catalog, self.settings, self.config)
    }
}


#[cfg(test)]
mod tests {
    use super::fixture::Workspace;
    use super::*;
    use crate::backend::testing::Recorder;

    #[test]
    fn test_excluded_sources() {
        assert!(is_excluded_source(Utf8Path::new("test/index.js")));
        assert!(is_excluded_source(Utf8Path::new("button/stories/index.js")));
        assert!(is_excluded_source(Utf8Path::new("a.test.ts")));
        assert!(is_excluded_source(Utf8Path::new("a.native.js")));
        assert!(!is_excluded_source(Utf8Path::new("testing.js")));
        assert!(!is_excluded_source(Utf8Path::new("index.js")));
    }

    #[test]
    fn test_plan_steps_from_flags() {
        let ws = Workspace::new();
        ws.write(
            "packages/a/package.json",
            r#"{
                "name": "a",
                "build": {
                    "library": true,
                    "browserGlobal": true,
                    "workers": { "parser": "src/parser.js" },
                    "styleEntryPoints": ["src/style.css"]
                }
            }"#,
        );
        let (_, _, catalog, _) = ws.load();

        let steps = plan_steps(catalog.get("a").unwrap());
        let names: Vec<_> = steps.iter().map(Step::name).collect();
        assert_eq!(names, vec!["worker", "library", "style", "browser-global"]);

        let bundle: Vec<_> = steps
            .iter()
            .filter(|step| step.phase() == StepPhase::Bundle)
            .collect();
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_plan_steps_empty_manifest() {
        let ws = Workspace::new();
        ws.write("packages/a/package.json", r#"{ "name": "a" }"#);
        let (_, _, catalog, _) = ws.load();

        assert!(plan_steps(catalog.get("a").unwrap()).is_empty());
    }

    #[test]
    fn test_compile_unknown_package() {
        let ws = Workspace::new();
        let (config, settings, catalog, graph) = ws.load();
        let backend = Recorder::default();

        let compiler = PackageCompiler::new(&config, &settings, &catalog, &graph, &backend);
        assert!(matches!(
            compiler.compile("nope"),
            Err(CompileError::UnknownPackage(_))
        ));
    }

    #[test]
    fn test_backend_failure_names_entry() {
        let ws = Workspace::new();
        ws.write(
            "packages/a/package.json",
            r#"{ "name": "a", "build": { "browserGlobal": true } }"#,
        );
        ws.write("packages/a/src/index.js", "export default 1;");
        let (config, settings, catalog, graph) = ws.load();
        let backend = Recorder::failing("index.js");

        let compiler = PackageCompiler::new(&config, &settings, &catalog, &graph, &backend);
        let err = compiler.compile("a").unwrap_err();
        assert!(matches!(err, CompileError::Backend(..)));
        assert!(err.to_string().contains("index.js"));
    }
}
