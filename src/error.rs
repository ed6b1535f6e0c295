use camino::Utf8PathBuf;
use thiserror::Error;

/// Problems with a package or route manifest. Always fatal for the build.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Couldn't read manifest '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse manifest '{0}'.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),

    #[error("Directory '{0}' is expected to be a package but has no package.json")]
    Missing(Utf8PathBuf),

    #[error("Manifest '{0}' is missing the field '{1}'")]
    MissingField(Utf8PathBuf, &'static str),

    #[error("Couldn't list directory '{0}'.\n{1}")]
    Scan(Utf8PathBuf, std::io::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Packages '{0}' and '{1}' both declare the name '{2}'")]
    DuplicateName(String, String, String),

    /// Resolution miss. Callers treat it as "external dependency".
    #[error("Package '{0}' not found from '{1}'")]
    NotFound(String, Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Package '{0}' is not part of the workspace")]
    UnknownPackage(String),
}

/// A failure while compiling a single package.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Package '{0}' is not part of the workspace")]
    UnknownPackage(String),

    #[error("Entry point '{1}' of step '{0}' does not exist")]
    MissingEntry(&'static str, Utf8PathBuf),

    #[error("Style '{0}':\n{1}")]
    Style(Utf8PathBuf, anyhow::Error),

    #[error("Couldn't write asset metadata for '{0}':\n{1}")]
    Asset(Utf8PathBuf, anyhow::Error),

    #[error("Backend failed on '{0}':\n{1}")]
    Backend(Utf8PathBuf, anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Route '{0}' declares unknown page '{1}'")]
    UnknownPage(String, String),
}

/// One failed target inside a parallel batch.
#[derive(Debug, Error)]
#[error("'{target}':\n{error}")]
pub struct TargetFailure {
    pub target: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Package '{0}':\n{1}")]
    Package(String, anyhow::Error),

    #[error("Route '{0}':\n{1}")]
    Route(String, anyhow::Error),

    #[error("Couldn't compile page loaders.\n{0}")]
    Pages(RouteError),

    #[error("{} targets failed:\n{}", .0.len(), render_failures(.0))]
    Batch(Vec<TargetFailure>),

    #[error("Couldn't write registration data.\n{0}")]
    Registration(anyhow::Error),
}

fn render_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(
        "Ran out of file watch handles while watching '{0}'.\n\
         Raise the limit, e.g. `sysctl fs.inotify.max_user_watches=524288` on Linux, \
         or `ulimit -n` for open files, then restart the watcher."
    )]
    Exhausted(Utf8PathBuf),

    #[error("The file watcher channel closed unexpectedly")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum MonobuildError {
    #[error("Error while loading the workspace:\n{0}")]
    Manifest(#[from] ManifestError),

    #[error("Error while building the workspace.\n{0}")]
    Build(#[from] BuildError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}
