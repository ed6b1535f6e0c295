//! The build orchestrator.
//!
//! A full build runs in four phases: transpile level by level, bundle every
//! terminal package, compile every route, then render registration data.
//! Each batch inside a phase runs on the rayon pool and is a barrier, the
//! next batch starts only after every target of the current one settled.

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};
use std::time::Instant;

use anyhow::anyhow;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::artifact::{ArtifactStore, BuildArtifact};
use crate::backend::Backend;
use crate::compile::{PackageCompiler, Step, StepPhase, plan_steps};
use crate::core::{ArcStr, BuildConfig, FailurePolicy, as_overhead};
use crate::error::{BuildError, GraphError, TargetFailure};
use crate::graph::DependencyGraph;
use crate::manifest::WorkspaceSettings;
use crate::queue::RebuildTarget;
use crate::registration::{Registries, render_registries};
use crate::registry::{Catalog, PackageRegistry};
use crate::routes::{Route, RouteCompiler, discover_routes};

static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("invalid progress bar template")
        .progress_chars("#>-")
});

/// Anything a batch can run for.
trait Target: Sync {
    fn name(&self) -> &str;
}

impl Target for ArcStr {
    fn name(&self) -> &str {
        self
    }
}

impl Target for Route {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A loaded workspace together with the latest artifacts of every target.
pub struct Orchestrator {
    config: BuildConfig,
    registry: PackageRegistry,
    settings: WorkspaceSettings,
    catalog: Catalog,
    graph: DependencyGraph,
    routes: Vec<Route>,
    backend: Box<dyn Backend>,
    store: ArtifactStore,
}

impl Orchestrator {
    /// Scans packages and routes and builds the dependency graph. Nothing is
    /// compiled yet.
    pub fn load(config: BuildConfig, backend: Box<dyn Backend>) -> Result<Self, BuildError> {
        let s = Instant::now();

        let registry = PackageRegistry::new();
        let catalog = registry.scan(&config.packages_root())?;
        let settings = WorkspaceSettings::load(&config.root)?;
        let graph = DependencyGraph::build(&catalog, &registry);

        let routes = discover_routes(&config.routes_root())
            .map_err(|e| BuildError::Route(config.routes_dir.to_string(), e.into()))?;

        tracing::info!(
            "loaded {} packages in {} levels {}",
            catalog.len(),
            graph.levels().len(),
            as_overhead(s)
        );

        Ok(Self {
            config,
            registry,
            settings,
            catalog,
            graph,
            routes,
            backend,
            store: ArtifactStore::new(),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Builds everything from scratch.
    pub fn build_all(&mut self) -> Result<Registries, BuildError> {
        let s = Instant::now();

        self.graph.check_acyclic()?;
        self.store = ArtifactStore::new();

        let policy = self.config.policy;
        let compiler = PackageCompiler::new(
            &self.config,
            &self.settings,
            &self.catalog,
            &self.graph,
            self.backend.as_ref(),
        );

        // Phase 1
        let bar = progress(self.catalog.len());
        for level in self.graph.levels() {
            let level: Vec<ArcStr> = level.iter().cloned().collect();
            let done = batch(&bar, policy, &level, BuildError::Package, |name| {
                Ok(compiler.compile_phase(name, StepPhase::Transpile)?)
            })?;

            for (name, artifact) in done {
                self.store
                    .replace_package(&name, StepPhase::Transpile.kinds(), artifact);
            }
        }
        bar.finish_with_message(format!("Transpiled packages {}", as_overhead(s)));

        // Phase 2
        let bundlers: Vec<ArcStr> = self
            .catalog
            .iter()
            .filter(|package| {
                plan_steps(package)
                    .iter()
                    .any(|step| step.phase() == StepPhase::Bundle)
            })
            .map(|package| package.full.clone())
            .collect();

        let bar = progress(bundlers.len());
        let done = batch(&bar, policy, &bundlers, BuildError::Package, |name| {
            Ok(compiler.compile_phase(name, StepPhase::Bundle)?)
        })?;
        for (name, artifact) in done {
            self.store
                .replace_package(&name, StepPhase::Bundle.kinds(), artifact);
        }
        bar.finish_with_message(format!("Bundled packages {}", as_overhead(s)));

        // Phase 3
        let routes = RouteCompiler::new(&self.config, self.backend.as_ref());

        let bar = progress(self.routes.len());
        let done = batch(&bar, policy, &self.routes, BuildError::Route, |route| {
            Ok(routes.compile_route(route)?)
        })?;
        for (name, artifact) in done {
            self.store.insert_route(&name, artifact);
        }
        bar.finish_with_message(format!("Compiled routes {}", as_overhead(s)));

        let pages = routes
            .compile_pages(&self.routes, &self.settings)
            .map_err(BuildError::Pages)?;
        self.store.set_pages(pages);

        // Phase 4
        let registries = self.register()?;

        tracing::info!("build finished {}", as_overhead(s));
        Ok(registries)
    }

    /// Rebuilds one watch target and everything it reaches, then refreshes
    /// the page loaders and registration data. Returns what was rebuilt, in
    /// order.
    pub fn rebuild(&mut self, target: &RebuildTarget) -> Result<Vec<String>, BuildError> {
        let s = Instant::now();

        let rebuilt = match target {
            RebuildTarget::Package(name) => self.rebuild_package(name)?,
            RebuildTarget::Route(name) => {
                self.rebuild_route(name)?;
                vec![target.to_string()]
            }
        };

        let pages = RouteCompiler::new(&self.config, self.backend.as_ref())
            .compile_pages(&self.routes, &self.settings)
            .map_err(BuildError::Pages)?;
        self.store.set_pages(pages);

        self.register()?;

        tracing::info!("rebuilt {} {}", rebuilt.join(", "), as_overhead(s));
        Ok(rebuilt)
    }

    /// The changed package, the packages up to the first terminal boundary,
    /// and every route reaching the changed package.
    fn rebuild_package(&mut self, changed: &str) -> Result<Vec<String>, BuildError> {
        if !self.graph.contains(changed) {
            return Err(GraphError::UnknownPackage(changed.to_string()).into());
        }

        let plan = self.graph.plan_rebuild(changed);
        let ordered: Vec<String> = plan
            .ordered(&self.graph)
            .into_iter()
            .map(str::to_string)
            .collect();

        let compiler = PackageCompiler::new(
            &self.config,
            &self.settings,
            &self.catalog,
            &self.graph,
            self.backend.as_ref(),
        );

        for phase in [StepPhase::Transpile, StepPhase::Bundle] {
            for name in &ordered {
                let artifact = compiler
                    .compile_phase(name, phase)
                    .map_err(|e| BuildError::Package(name.clone(), e.into()))?;

                self.store.replace_package(name, phase.kinds(), artifact);
            }
        }

        let affected: Vec<String> = self
            .graph
            .routes_reaching(
                changed,
                self.routes
                    .iter()
                    .map(|route| (route.name.as_str(), route.dependencies())),
            )
            .into_iter()
            .map(str::to_string)
            .collect();

        let routes = RouteCompiler::new(&self.config, self.backend.as_ref());
        let mut rebuilt = ordered;

        for name in affected {
            let Some(route) = self.routes.iter().find(|route| route.name == name) else {
                continue;
            };

            let artifact = routes
                .compile_route(route)
                .map_err(|e| BuildError::Route(name.clone(), e.into()))?;

            self.store.insert_route(&name, artifact);
            rebuilt.push(RebuildTarget::Route(name).to_string());
        }

        Ok(rebuilt)
    }

    /// Reloads a route from disk, its content roles may have changed. A
    /// route whose manifest is gone is dropped.
    fn rebuild_route(&mut self, name: &str) -> Result<(), BuildError> {
        let Some(index) = self.routes.iter().position(|route| route.name == name) else {
            return Err(BuildError::Route(name.to_string(), anyhow!("route is not part of the workspace")));
        };

        let dir = self.routes[index].dir.clone();
        if !dir.join("package.json").is_file() {
            tracing::warn!("route {name} was removed");
            self.routes.remove(index);
            self.store.remove_route(name);
            return Ok(());
        }

        let route = Route::load(&dir).map_err(|e| BuildError::Route(name.to_string(), e.into()))?;
        let artifact = RouteCompiler::new(&self.config, self.backend.as_ref())
            .compile_route(&route)
            .map_err(|e| BuildError::Route(name.to_string(), e.into()))?;

        self.routes[index] = route;
        self.store.insert_route(name, artifact);
        Ok(())
    }

    fn register(&self) -> Result<Registries, BuildError> {
        let registries = Registries::collect(&self.store, &self.routes);
        render_registries(&registries, &self.config).map_err(BuildError::Registration)?;
        Ok(registries)
    }
}

fn progress(len: usize) -> ProgressBar {
    ProgressBar::new(len as u64).with_style(PROGRESS_STYLE.clone())
}

/// Runs `run` for every target on the rayon pool and waits for all of them.
///
/// Under [`FailurePolicy::FailFast`] the first failure is returned through
/// `wrap`, targets already running still finish. Under
/// [`FailurePolicy::CollectAll`] every target runs and all failures are
/// returned together.
fn batch<T, F>(
    bar: &ProgressBar,
    policy: FailurePolicy,
    targets: &[T],
    wrap: fn(String, anyhow::Error) -> BuildError,
    run: F,
) -> Result<Vec<(String, BuildArtifact)>, BuildError>
where
    T: Target,
    F: Fn(&T) -> anyhow::Result<BuildArtifact> + Sync,
{
    let set = Mutex::new(HashSet::new());

    let task = |target: &T| -> Result<(String, BuildArtifact), TargetFailure> {
        let s = Instant::now();
        let name = target.name().to_owned();

        {
            let mut active = set.lock().unwrap();
            active.insert(name.clone());
            bar.set_message(format_active(&active));
        }

        let result = run(target);

        {
            let mut active = set.lock().unwrap();
            active.remove(&name);
            bar.set_message(format_active(&active));
            bar.inc(1);
        }

        match result {
            Ok(artifact) => {
                tracing::info!("built {name} {}", as_overhead(s));
                Ok((name, artifact))
            }
            Err(error) => Err(TargetFailure {
                target: name,
                error,
            }),
        }
    };

    match policy {
        FailurePolicy::FailFast => targets
            .par_iter()
            .map(task)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|failure| wrap(failure.target, failure.error)),
        FailurePolicy::CollectAll => {
            let results: Vec<_> = targets.par_iter().map(task).collect();
            let mut done = Vec::new();
            let mut failures = Vec::new();

            for result in results {
                match result {
                    Ok(ok) => done.push(ok),
                    Err(failure) => failures.push(failure),
                }
            }

            if failures.is_empty() {
                Ok(done)
            } else {
                Err(BuildError::Batch(failures))
            }
        }
    }
}

fn format_active(active: &HashSet<String>) -> String {
    const MAX: usize = 5;
    let mut names: Vec<&str> = active.iter().map(String::as_str).collect();
    names.sort();

    if names.len() <= MAX {
        names.join(", ")
    } else {
        format!("{}… ({} total)", names[..MAX].join(", "), names.len())
    }
}
