//! Watch-mode bookkeeping: which target a changed path belongs to, and what
//! to rebuild next.

use std::collections::BTreeSet;
use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};

use crate::compile::is_excluded_source;
use crate::core::ArcStr;
use crate::registry::Catalog;
use crate::routes::{ROUTE_ENTRY, Route};

/// Something the watcher can rebuild.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RebuildTarget {
    /// A package, by full name.
    Package(ArcStr),
    /// A route, by directory name.
    Route(String),
}

impl Display for RebuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebuildTarget::Package(name) => write!(f, "{name}"),
            RebuildTarget::Route(name) => write!(f, "route:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    #[default]
    Idle,
    Rebuilding,
}

/// Serializes rebuilds. While one is in flight, new targets collect in a
/// set, so repeated changes to the same target coalesce into one rebuild.
#[derive(Debug, Default)]
pub struct WatchQueue {
    state: QueueState,
    pending: BTreeSet<RebuildTarget>,
}

impl WatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == QueueState::Idle
    }

    pub fn pending(&self) -> impl Iterator<Item = &RebuildTarget> {
        self.pending.iter()
    }

    /// A change arrived. Returns the target to start rebuilding right away,
    /// or `None` if a rebuild is already in flight and the target was queued.
    pub fn notify(&mut self, target: RebuildTarget) -> Option<RebuildTarget> {
        match self.state {
            QueueState::Idle => {
                self.state = QueueState::Rebuilding;
                Some(target)
            }
            QueueState::Rebuilding => {
                self.pending.insert(target);
                None
            }
        }
    }

    /// The in-flight rebuild finished. Returns the next target to rebuild,
    /// or `None` once nothing is pending and the queue is idle again.
    pub fn complete(&mut self) -> Option<RebuildTarget> {
        match self.pending.pop_first() {
            Some(next) => Some(next),
            None => {
                self.state = QueueState::Idle;
                None
            }
        }
    }
}

/// Maps changed paths to rebuild targets.
#[derive(Debug, Clone)]
pub struct PathMapper {
    /// Package source directories, longest first.
    packages: Vec<(Utf8PathBuf, ArcStr)>,
    routes: Vec<(Utf8PathBuf, String)>,
}

impl PathMapper {
    pub fn new(catalog: &Catalog, routes: &[Route]) -> Self {
        let mut packages: Vec<_> = catalog
            .iter()
            .map(|package| (package.src_dir(), package.full.clone()))
            .collect();
        packages.sort_by_key(|(dir, _)| std::cmp::Reverse(dir.as_str().len()));

        let routes = routes
            .iter()
            .map(|route| (route.dir.clone(), route.name.clone()))
            .collect();

        Self { packages, routes }
    }

    /// The target owning `path`, if any. Generated route entries and
    /// excluded sources map to nothing.
    pub fn target_for(&self, path: &Utf8Path) -> Option<RebuildTarget> {
        if path.file_name() == Some(ROUTE_ENTRY) {
            return None;
        }

        let owned = |dir: &Utf8Path| {
            path.strip_prefix(dir)
                .is_ok_and(|relative| !is_excluded_source(relative))
        };

        if let Some((dir, name)) = self.packages.iter().find(|(dir, _)| path.starts_with(dir)) {
            return owned(dir).then(|| RebuildTarget::Package(name.clone()));
        }

        self.routes
            .iter()
            .find(|(dir, _)| path.starts_with(dir))
            .filter(|(dir, _)| owned(dir))
            .map(|(_, name)| RebuildTarget::Route(name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(name: &str) -> RebuildTarget {
        RebuildTarget::Package(name.into())
    }

    #[test]
    fn test_idle_starts_immediately() {
        let mut queue = WatchQueue::new();
        assert!(queue.is_idle());

        assert_eq!(queue.notify(package("a")), Some(package("a")));
        assert_eq!(queue.state(), QueueState::Rebuilding);

        assert_eq!(queue.complete(), None);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_changes_during_rebuild_coalesce() {
        let mut queue = WatchQueue::new();
        queue.notify(package("a"));

        assert_eq!(queue.notify(package("b")), None);
        assert_eq!(queue.notify(RebuildTarget::Route("home".into())), None);
        assert_eq!(queue.notify(package("b")), None);
        assert_eq!(queue.pending().count(), 2);

        assert_eq!(queue.complete(), Some(package("b")));
        assert_eq!(queue.state(), QueueState::Rebuilding);

        // A change while draining is picked up in the same drain.
        assert_eq!(queue.notify(package("a")), None);

        assert_eq!(queue.complete(), Some(package("a")));
        assert_eq!(queue.complete(), Some(RebuildTarget::Route("home".into())));
        assert_eq!(queue.complete(), None);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_target_display() {
        assert_eq!(package("@acme/ui").to_string(), "@acme/ui");
        assert_eq!(RebuildTarget::Route("home".into()).to_string(), "route:home");
    }

    mod mapping {
        use super::*;
        use crate::compile::fixture::Workspace;
        use crate::routes::discover_routes;

        fn mapper(ws: &Workspace) -> PathMapper {
            let (_, _, catalog, _) = ws.load();
            let routes = discover_routes(&ws.path("routes")).unwrap();
            PathMapper::new(&catalog, &routes)
        }

        #[test]
        fn test_prefix_matches_whole_components() {
            let ws = Workspace::new();
            ws.write("packages/ui/package.json", r#"{ "name": "@acme/ui" }"#);
            ws.write("packages/ui-kit/package.json", r#"{ "name": "@acme/ui-kit" }"#);

            let mapper = mapper(&ws);

            assert_eq!(
                mapper.target_for(&ws.path("packages/ui/src/button.js")),
                Some(package("@acme/ui"))
            );
            assert_eq!(
                mapper.target_for(&ws.path("packages/ui-kit/src/index.js")),
                Some(package("@acme/ui-kit"))
            );
        }

        #[test]
        fn test_ignored_paths() {
            let ws = Workspace::new();
            ws.write("packages/ui/package.json", r#"{ "name": "@acme/ui" }"#);
            ws.write("routes/home/package.json", r#"{ "route": { "path": "/" } }"#);

            let mapper = mapper(&ws);

            assert_eq!(mapper.target_for(&ws.path("packages/ui/package.json")), None);
            assert_eq!(mapper.target_for(&ws.path("packages/ui/src/a.test.js")), None);
            assert_eq!(mapper.target_for(&ws.path("packages/ui/src/stories/a.js")), None);
            assert_eq!(mapper.target_for(&ws.path("packages/ui/src/a.ios.js")), None);
            assert_eq!(mapper.target_for(&ws.path("README.md")), None);
            assert_eq!(
                mapper.target_for(&ws.path("routes/home/.route-entry.generated.js")),
                None
            );
            assert_eq!(
                mapper.target_for(&ws.path("routes/home/stage.tsx")),
                Some(RebuildTarget::Route("home".into()))
            );
        }
    }
}
