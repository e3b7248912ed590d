//! Breadth-first expansion of a root request into a dependency tree.

use super::{
    Diagnostic, DiagnosticKind, DependencyGraph, FrameworkId, GraphItem, LibraryProvider,
    LibraryRange, NodeId,
};
use crate::cache::Cache;
use rayon::prelude::*;
use semver::Version;
use std::sync::Arc;
use tracing::{debug, trace};

/// Options for graph expansion.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Maximum expansion depth (default 100). The root is depth 0.
    pub max_depth: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self { max_depth: 100 }
    }
}

/// Builds dependency trees from an ordered list of providers.
///
/// Provider answers are memoized per range (name, version requirement and
/// framework) for the walker's lifetime, and clones share them. A range
/// requested from many places in the tree is resolved once.
#[derive(Debug, Clone, Default)]
pub struct DependencyWalker {
    providers: Vec<Arc<dyn LibraryProvider>>,
    options: WalkOptions,
    lookups: Arc<Cache<LibraryRange, Lookup>>,
}

/// Outcome of asking every provider about one range.
#[derive(Debug, Clone)]
struct Lookup {
    item: Option<GraphItem>,
    failures: Vec<Diagnostic>,
}

impl DependencyWalker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Providers are kept sorted by priority; equal
    /// priorities keep registration order.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn LibraryProvider>) -> Self {
        self.providers.push(provider);
        self.providers.sort_by_key(|p| p.priority());
        self.lookups = Arc::default();
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: WalkOptions) -> Self {
        self.options = options;
        self
    }

    /// Forget memoized provider answers, e.g. after packages were installed.
    pub fn clear_lookups(&self) {
        self.lookups.clear();
    }

    /// Providers in the order they are consulted.
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn LibraryProvider>] {
        &self.providers
    }

    /// Expand `name` at exactly `version` for `framework`.
    #[must_use]
    pub fn walk(&self, name: &str, version: &Version, framework: &FrameworkId) -> DependencyGraph {
        self.walk_range(LibraryRange::exact(name, version, framework.clone()))
    }

    /// Expand an arbitrary root request.
    ///
    /// Each breadth-first level is resolved in parallel, then attached in
    /// order, so the resulting arena is identical across runs. A dependency
    /// whose name is already on the path from the root is not added.
    #[must_use]
    pub fn walk_range(&self, root: LibraryRange) -> DependencyGraph {
        let mut graph = DependencyGraph::new(root);
        let mut frontier = vec![graph.root()];

        while !frontier.is_empty() {
            let lookups: Vec<Lookup> = frontier
                .par_iter()
                .map(|id| {
                    let range = &graph.node(*id).range;
                    self.lookups.get(range.clone(), |_| self.lookup(range))
                })
                .collect();

            let mut next = Vec::new();
            for (id, lookup) in frontier.into_iter().zip(lookups) {
                for failure in lookup.failures {
                    graph.push_diagnostic(failure);
                }
                self.attach(&mut graph, id, lookup.item, &mut next);
            }
            frontier = next;
        }

        graph.sort_diagnostics();
        debug!(
            root = %graph.root_node().range,
            nodes = graph.len(),
            diagnostics = graph.diagnostics().len(),
            "Expanded dependency graph"
        );
        graph
    }

    fn lookup(&self, range: &LibraryRange) -> Lookup {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.try_resolve(range) {
                Ok(Some(item)) => {
                    trace!(library = %item.identity(), provider = provider.name(), "Resolved");
                    return Lookup {
                        item: Some(item),
                        failures,
                    };
                }
                Ok(None) => {}
                Err(e) => failures.push(Diagnostic::new(
                    DiagnosticKind::ProviderFailed,
                    &range.name,
                    format!("Provider {} failed: {e}", provider.name()),
                )),
            }
        }
        Lookup {
            item: None,
            failures,
        }
    }

    fn attach(
        &self,
        graph: &mut DependencyGraph,
        id: NodeId,
        item: Option<GraphItem>,
        next: &mut Vec<NodeId>,
    ) {
        let Some(item) = item else {
            let range = &graph.node(id).range;
            let diagnostic = Diagnostic::new(
                DiagnosticKind::Unresolved,
                &range.name,
                format!("Unable to resolve {range}"),
            );
            graph.push_diagnostic(diagnostic);
            return;
        };

        let dependencies = item.dependencies.clone();
        let depth = graph.node(id).depth;
        graph.node_mut(id).item = Some(item);

        if dependencies.is_empty() {
            return;
        }

        if depth >= self.options.max_depth {
            let name = graph.node(id).name().to_string();
            graph.push_diagnostic(Diagnostic::new(
                DiagnosticKind::DepthLimitReached,
                &name,
                format!(
                    "Depth limit {} reached, dependencies of {name} not expanded",
                    self.options.max_depth
                ),
            ));
            return;
        }

        for range in dependencies {
            if graph.on_path(id, &range.name) {
                trace!(library = %range.name, "Skipping cyclic dependency");
                continue;
            }
            next.push(graph.push_node(range, Some(id)));
        }
    }
}
