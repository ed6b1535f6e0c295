#![forbid(unsafe_code)]
//! Dependency-ordered builds for JavaScript monorepos.
//!
//! A workspace is a `packages/` directory with one package per
//! sub-directory and an optional `routes/` directory. Packages are
//! transpiled in depth order, terminal packages are bundled for the
//! browser, routes are bundled next to them, and the result is described in
//! registration data under `build/registration/`. In watch mode only the
//! changed package and what it reaches up to the first terminal boundary is
//! rebuilt.

pub mod artifact;
pub mod backend;
mod build;
pub mod compile;
mod core;
mod error;
pub mod graph;
pub mod manifest;
pub mod queue;
pub mod registration;
pub mod registry;
pub mod routes;
pub mod styles;
#[cfg(feature = "live")]
mod watch;

use console::style;

pub use crate::backend::{Backend, CompileRequest, EsbuildBackend, Format};
pub use crate::build::Orchestrator;
pub use crate::core::{BuildConfig, FailurePolicy, FeatureFlags};
pub use crate::error::*;
pub use crate::graph::DependencyGraph;
pub use crate::queue::{PathMapper, QueueState, RebuildTarget, WatchQueue};
pub use crate::registration::Registries;
pub use crate::registry::{Catalog, Package, PackageRegistry};

/// Runs a one-shot build of the workspace described by `config`.
///
/// This will:
/// 1. Scan packages and routes, and build the dependency graph.
/// 2. Transpile packages level by level, then bundle terminal packages.
/// 3. Compile routes and page loaders.
/// 4. Write registration data to `build/registration`.
pub fn build(config: BuildConfig, backend: impl Backend + 'static) -> Result<Registries, MonobuildError> {
    eprintln!(
        "Running {} in {} mode.",
        style("monobuild").red(),
        style("build").blue()
    );

    let mut orchestrator = Orchestrator::load(config, Box::new(backend))?;
    Ok(orchestrator.build_all()?)
}

/// Builds once, then keeps rebuilding affected targets as files change.
/// Only returns on a watcher failure.
#[cfg(feature = "live")]
pub fn watch(config: BuildConfig, backend: impl Backend + 'static) -> Result<(), MonobuildError> {
    eprintln!(
        "Running {} in {} mode.",
        style("monobuild").red(),
        style("watch").blue()
    );

    let mut orchestrator = Orchestrator::load(config, Box::new(backend))?;
    crate::watch::watch(&mut orchestrator)?;
    Ok(())
}
