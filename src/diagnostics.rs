// Debug-build safety checks. Release builds compile these away; the runtime
// cycle guard in the computed read path stays on in all builds.

cfg_if::cfg_if! {
    if #[cfg(debug_assertions)] {
        use crate::{
            node::NodeId,
            runtime::{Runtime, MAX_DEPENDENCIES},
        };
        use rustc_hash::FxHashSet;
        use std::collections::VecDeque;
    }
}

/// Bounded BFS over recorded dependencies: true when `id` reaches itself.
/// Nodes without a dependency record are skipped without error, and the
/// search gives up (reporting no cycle) past [`MAX_DEPENDENCIES`] visits.
#[cfg(debug_assertions)]
pub(crate) fn check_circular(runtime: &Runtime, id: NodeId) -> bool {
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut queue: VecDeque<NodeId> = VecDeque::new();

    if let Some(sources) = runtime.node_sources.borrow().get(id) {
        for (source, _) in sources.borrow().iter() {
            queue.push_back(*source);
        }
    }

    while let Some(next) = queue.pop_front() {
        if next == id {
            return true;
        }
        if !visited.insert(next) {
            continue;
        }
        if visited.len() > MAX_DEPENDENCIES {
            return false;
        }
        if let Some(sources) = runtime.node_sources.borrow().get(next) {
            for (source, _) in sources.borrow().iter() {
                queue.push_back(*source);
            }
        }
    }
    false
}

/// Cross-checks a handle's claimed kind against the node it points at.
#[cfg(debug_assertions)]
pub(crate) fn assert_kind(
    runtime: &Runtime,
    id: NodeId,
    expected: crate::ReactiveKind,
) {
    use crate::node::NodeKind;
    let nodes = runtime.nodes.borrow();
    if let Some(node) = nodes.get(id) {
        let actual = match node.kind {
            NodeKind::Atom { .. } => crate::ReactiveKind::Atom,
            NodeKind::Computed(_) => crate::ReactiveKind::Computed,
            NodeKind::Effect(_) => crate::ReactiveKind::Effect,
        };
        debug_assert_eq!(
            actual, expected,
            "reactive handle kind does not match its node"
        );
    }
}
