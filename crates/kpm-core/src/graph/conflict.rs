use super::{DependencyGraph, Diagnostic, DiagnosticKind, Disposition, NodeId};
use crate::config::ConflictPolicy;
use std::cmp::Ordering;
use tracing::debug;

/// Settle one accepted node per library name.
///
/// Names are settled top-down. A name is decided once every pending
/// candidate hangs below accepted ancestors only; the policy then picks a
/// winner among those candidates, which becomes [`Disposition::Accepted`],
/// and every other node with that name becomes [`Disposition::Rejected`].
/// Everything below a rejected node is rejected with it and never takes
/// part in a vote, so a version requested only by a losing library cannot
/// win its name.
///
/// Unresolved nodes are always rejected. A name that a surviving library
/// requests but no provider could supply yields a no-viable-candidate
/// diagnostic.
///
/// Running this again on the same graph gives the same dispositions.
pub fn resolve_conflicts(graph: &mut DependencyGraph, policy: ConflictPolicy) {
    graph.retain_diagnostics(|d| d.kind != DiagnosticKind::NoViableCandidate);

    let ids: Vec<NodeId> = graph.nodes().map(|(id, _)| id).collect();
    for id in &ids {
        let node = graph.node_mut(*id);
        node.disposition = if node.is_resolved() {
            Disposition::Acceptable
        } else {
            Disposition::Rejected
        };
    }

    let names: Vec<String> = graph.names().map(str::to_string).collect();
    let mut undecided: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut passes = 0usize;

    loop {
        reject_orphans(graph, &ids);
        undecided.retain(|name| has_pending(graph, name));
        if undecided.is_empty() {
            break;
        }
        passes += 1;

        let mut decided_any = false;
        for name in &undecided {
            let candidates = graph.candidates(name).to_vec();
            let pending: Vec<NodeId> = candidates
                .iter()
                .copied()
                .filter(|id| graph.node(*id).disposition == Disposition::Acceptable)
                .collect();
            if pending.iter().all(|id| is_ready(graph, *id)) {
                settle(graph, &candidates, &pending, policy);
                decided_any = true;
            }
        }

        if !decided_any {
            // Candidates of every remaining name wait on each other. Settle
            // the name with the shallowest ready candidate among its ready
            // candidates only.
            let Some((name, ready)) = shallowest_ready(graph, &undecided) else {
                break;
            };
            let candidates = graph.candidates(name).to_vec();
            settle(graph, &candidates, &ready, policy);
        }
    }

    let mut rejected = 0usize;
    for name in &names {
        let candidates = graph.candidates(name);
        rejected += candidates
            .iter()
            .filter(|id| graph.node(**id).disposition == Disposition::Rejected)
            .count();
        if graph.accepted(name).is_some() {
            continue;
        }
        let requested: Vec<String> = candidates
            .iter()
            .filter(|id| is_ready(graph, **id))
            .map(|id| graph.node(*id).range.version_req.to_string())
            .collect();
        if requested.is_empty() {
            continue;
        }
        graph.push_diagnostic(Diagnostic::new(
            DiagnosticKind::NoViableCandidate,
            name,
            format!(
                "No viable candidate for {name} (requested {})",
                requested.join(", ")
            ),
        ));
    }

    graph.sort_diagnostics();
    debug!(?policy, rejected, passes, "Resolved version conflicts");
}

/// Reject every node whose parent is rejected. Parents always precede
/// their children in the arena, so one forward sweep covers whole subtrees.
fn reject_orphans(graph: &mut DependencyGraph, ids: &[NodeId]) {
    for id in ids {
        let Some(parent) = graph.node(*id).parent else {
            continue;
        };
        if graph.node(parent).disposition == Disposition::Rejected {
            graph.node_mut(*id).disposition = Disposition::Rejected;
        }
    }
}

fn has_pending(graph: &DependencyGraph, name: &str) -> bool {
    graph
        .candidates(name)
        .iter()
        .any(|id| graph.node(*id).disposition == Disposition::Acceptable)
}

/// Whether the node's whole ancestor chain is accepted.
fn is_ready(graph: &DependencyGraph, id: NodeId) -> bool {
    let mut current = graph.node(id).parent;
    while let Some(parent) = current {
        let node = graph.node(parent);
        if node.disposition != Disposition::Accepted {
            return false;
        }
        current = node.parent;
    }
    true
}

fn shallowest_ready<'a>(
    graph: &DependencyGraph,
    undecided: &[&'a str],
) -> Option<(&'a str, Vec<NodeId>)> {
    undecided
        .iter()
        .filter_map(|name| {
            let ready: Vec<NodeId> = graph
                .candidates(name)
                .iter()
                .copied()
                .filter(|id| {
                    graph.node(*id).disposition == Disposition::Acceptable && is_ready(graph, *id)
                })
                .collect();
            let depth = ready.iter().map(|id| graph.node(*id).depth).min()?;
            Some((depth, *name, ready))
        })
        .min_by_key(|(depth, _, _)| *depth)
        .map(|(_, name, ready)| (name, ready))
}

/// Accept the policy's pick among `eligible` and reject every other
/// candidate of the name.
fn settle(
    graph: &mut DependencyGraph,
    candidates: &[NodeId],
    eligible: &[NodeId],
    policy: ConflictPolicy,
) {
    let winner = pick_winner(graph, eligible, policy);
    for id in candidates {
        let node = graph.node_mut(*id);
        node.disposition = if Some(*id) == winner {
            Disposition::Accepted
        } else {
            Disposition::Rejected
        };
    }
}

/// Candidates arrive in discovery order, so "first" means shallowest and
/// leftmost in the tree.
fn pick_winner(
    graph: &DependencyGraph,
    candidates: &[NodeId],
    policy: ConflictPolicy,
) -> Option<NodeId> {
    let mut best: Option<NodeId> = None;

    for id in candidates.iter().copied() {
        let node = graph.node(id);
        let Some(version) = node.version() else {
            continue;
        };

        let Some(current) = best else {
            best = Some(id);
            continue;
        };
        let current_node = graph.node(current);
        let current_version = current_node.version();

        let better = match policy {
            ConflictPolicy::Highest => Some(version) > current_version,
            ConflictPolicy::Nearest => match node.depth.cmp(&current_node.depth) {
                Ordering::Less => true,
                Ordering::Equal => Some(version) > current_version,
                Ordering::Greater => false,
            },
        };
        if better {
            best = Some(id);
        }
    }

    best
}
