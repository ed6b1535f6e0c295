//! The package dependency graph.
//!
//! Edges point from a dependency to its consumer, the same direction data
//! flows during a build. Depth-levels drive the full build, the reverse index
//! drives incremental rebuilds.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Display;

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::ArcStr;
use crate::error::GraphError;
use crate::registry::{Catalog, PackageRegistry};

/// One package as seen by the graph: its name, its declared in-workspace
/// dependencies, and whether it is terminal.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: ArcStr,
    pub dependencies: Vec<ArcStr>,
    pub terminal: bool,
}

#[derive(Debug)]
pub struct DependencyGraph {
    graph: Graph<ArcStr, ()>,
    indices: HashMap<ArcStr, NodeIndex>,
    terminal: HashSet<ArcStr>,
    depths: BTreeMap<ArcStr, usize>,
    levels: Vec<BTreeSet<ArcStr>>,
    dependents: HashMap<ArcStr, BTreeSet<ArcStr>>,
}

impl DependencyGraph {
    /// Builds the graph over a scanned catalog. Declared dependencies that do
    /// not resolve to a workspace package are external and left out.
    pub fn build(catalog: &Catalog, registry: &PackageRegistry) -> Self {
        let nodes = catalog.iter().map(|package| {
            let dependencies = package
                .manifest
                .dependencies
                .keys()
                .filter(|dep| registry.resolves_to_workspace(catalog, package, dep))
                .map(|dep| ArcStr::from(dep.as_str()))
                .collect();

            Node {
                name: package.full.clone(),
                dependencies,
                terminal: package.manifest.is_terminal(),
            }
        });

        Self::from_nodes(nodes)
    }

    /// Builds the graph from already-filtered nodes. Dependencies naming
    /// unknown nodes are dropped.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let nodes: Vec<Node> = nodes.into_iter().collect();

        let mut graph = Graph::new();
        let mut indices = HashMap::new();
        let mut terminal = HashSet::new();

        for node in &nodes {
            let index = graph.add_node(node.name.clone());
            indices.insert(node.name.clone(), index);
            if node.terminal {
                terminal.insert(node.name.clone());
            }
        }

        let mut dependents: HashMap<ArcStr, BTreeSet<ArcStr>> = HashMap::new();
        for node in &nodes {
            let consumer = indices[&node.name];
            for dependency in &node.dependencies {
                let Some(&index) = indices.get(dependency) else {
                    continue;
                };

                if graph.find_edge(index, consumer).is_none() {
                    graph.add_edge(index, consumer, ());
                }

                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(node.name.clone());
            }
        }

        let mut this = Self {
            graph,
            indices,
            terminal,
            depths: BTreeMap::new(),
            levels: Vec::new(),
            dependents,
        };

        this.compute_depth_levels();
        this
    }

    /// Memoized longest-chain depth for every package, grouped into
    /// ascending levels.
    ///
    /// A package reached again while its own depth is still being computed
    /// counts as depth 0. This keeps the walk finite on cyclic input, the
    /// cycle itself is reported by [`DependencyGraph::check_acyclic`].
    fn compute_depth_levels(&mut self) {
        let mut memo = HashMap::new();
        let mut visiting = HashSet::new();

        for index in self.graph.node_indices() {
            self.depth_of(index, &mut memo, &mut visiting);
        }

        let mut grouped: BTreeMap<usize, BTreeSet<ArcStr>> = BTreeMap::new();
        for (index, depth) in memo {
            let name = self.graph[index].clone();
            self.depths.insert(name.clone(), depth);
            grouped.entry(depth).or_default().insert(name);
        }

        self.levels = grouped.into_values().collect();
    }

    fn depth_of(
        &self,
        index: NodeIndex,
        memo: &mut HashMap<NodeIndex, usize>,
        visiting: &mut HashSet<NodeIndex>,
    ) -> usize {
        if let Some(&depth) = memo.get(&index) {
            return depth;
        }

        if !visiting.insert(index) {
            return 0;
        }

        let dependencies: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();

        let depth = dependencies
            .into_iter()
            .map(|dependency| 1 + self.depth_of(dependency, memo, visiting))
            .max()
            .unwrap_or(0);

        visiting.remove(&index);
        memo.insert(index, depth);
        depth
    }

    /// Fails with the members of the first dependency cycle found.
    pub fn check_acyclic(&self) -> Result<(), GraphError> {
        let Err(cycle) = petgraph::algo::toposort(&self.graph, None) else {
            return Ok(());
        };

        let start = cycle.node_id();
        let component = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .find(|component| component.contains(&start))
            .unwrap_or_else(|| vec![start]);

        let mut names: Vec<String> = component
            .iter()
            .map(|&index| self.graph[index].to_string())
            .collect();
        names.sort();
        if let Some(first) = names.first().cloned() {
            names.push(first);
        }

        Err(GraphError::Cycle(names))
    }

    /// Ascending depth-levels, each a set of full names.
    pub fn levels(&self) -> &[BTreeSet<ArcStr>] {
        &self.levels
    }

    pub fn depth(&self, full: &str) -> Option<usize> {
        self.depths.get(full).copied()
    }

    pub fn contains(&self, full: &str) -> bool {
        self.indices.contains_key(full)
    }

    pub fn is_terminal(&self, full: &str) -> bool {
        self.terminal.contains(full)
    }

    /// In-workspace dependencies of `full`.
    pub fn dependencies(&self, full: &str) -> BTreeSet<ArcStr> {
        let Some(&index) = self.indices.get(full) else {
            return BTreeSet::new();
        };

        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|dependency| self.graph[dependency].clone())
            .collect()
    }

    /// Packages that declare `full` as a dependency.
    pub fn reverse_dependents(&self, full: &str) -> BTreeSet<ArcStr> {
        self.dependents.get(full).cloned().unwrap_or_default()
    }

    /// Everything that transitively depends on `full`, including `full`.
    pub fn dependents_closure(&self, full: &str) -> BTreeSet<ArcStr> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([ArcStr::from(full)]);

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(dependents) = self.dependents.get(&name) {
                queue.extend(dependents.iter().cloned());
            }
        }

        seen
    }

    /// Terminal packages reached from `changed` over reverse dependencies,
    /// without expanding past any terminal package.
    pub fn closure_to_terminal(
        &self,
        changed: &str,
        is_terminal: impl Fn(&str) -> bool,
    ) -> BTreeSet<ArcStr> {
        self.walk_to_terminal(changed, is_terminal).1
    }

    fn walk_to_terminal(
        &self,
        changed: &str,
        is_terminal: impl Fn(&str) -> bool,
    ) -> (Vec<ArcStr>, BTreeSet<ArcStr>) {
        let mut visited = HashSet::new();
        let mut passed = Vec::new();
        let mut terminals = BTreeSet::new();
        let mut queue = VecDeque::from([ArcStr::from(changed)]);

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }

            if is_terminal(&name) {
                terminals.insert(name);
                continue;
            }

            if let Some(dependents) = self.dependents.get(&name) {
                queue.extend(dependents.iter().cloned());
            }
            passed.push(name);
        }

        (passed, terminals)
    }

    /// The packages to reprocess after `changed` was modified, in dependency
    /// order.
    pub fn plan_rebuild(&self, changed: &str) -> RebuildPlan {
        let (passed, terminals) = self.walk_to_terminal(changed, |name| self.is_terminal(name));

        let mut intermediates: Vec<ArcStr> = passed
            .into_iter()
            .filter(|name| name.as_ref() != changed)
            .collect();
        let mut terminals: Vec<ArcStr> = terminals
            .into_iter()
            .filter(|name| name.as_ref() != changed)
            .collect();

        let key = |name: &ArcStr| (self.depth(name).unwrap_or(0), name.clone());
        intermediates.sort_by_key(key);
        terminals.sort_by_key(key);

        RebuildPlan {
            changed: ArcStr::from(changed),
            intermediates,
            terminals,
        }
    }

    /// Routes whose declared dependencies transitively include `changed`.
    /// Routes are leaves, every reachable route is returned.
    pub fn routes_reaching<'a, I, D>(&self, changed: &str, routes: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let affected = self.dependents_closure(changed);

        routes
            .into_iter()
            .filter_map(|(route, dependencies)| {
                dependencies
                    .into_iter()
                    .any(|dependency| affected.contains(dependency))
                    .then_some(route)
            })
            .collect()
    }
}

/// Result of [`DependencyGraph::plan_rebuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub changed: ArcStr,
    /// Non-terminal packages passed through on the way to terminals.
    pub intermediates: Vec<ArcStr>,
    /// First terminal boundary on every path.
    pub terminals: Vec<ArcStr>,
}

impl RebuildPlan {
    /// The changed package first, then everything else by depth.
    pub fn ordered<'a>(&'a self, graph: &DependencyGraph) -> Vec<&'a str> {
        let mut rest: Vec<&ArcStr> = self.intermediates.iter().chain(&self.terminals).collect();
        rest.sort_by_key(|name| (graph.depth(name).unwrap_or(0), (*name).clone()));

        std::iter::once(self.changed.as_ref())
            .chain(rest.into_iter().map(AsRef::as_ref))
            .collect()
    }
}

impl Display for DependencyGraph {
    /// Mermaid rendering, handy when debugging build order.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].replace('"', "\\\"");
            let depth = self.depth(&self.graph[index]).unwrap_or(0);
            writeln!(f, "    {:?}[\"{}\\n{}\"]", index.index(), name, depth)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
