//! Cycle-aware freshness check of a unit's transitive dependencies.
//!
//! The walk runs over the *old* snapshot's index space with an explicit
//! stack, so deep or circular graphs never recurse. Units that reach each
//! other form a component that is finalized as a whole: either every member
//! becomes [`Freshness::Ok`] once the component's root is done, or every unit
//! still pending on the stack becomes [`Freshness::Outdated`] the moment one
//! changed dependency is found.

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::Snapshot;
use crate::resolver::Dependencies;

/// Per-unit status within one run, indexed by old snapshot position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    Unknown,
    Outdated,
    Ok,
}

/// What the walk needs to know about the current program
pub(crate) trait CurrentGraph {
    fn dependencies(&mut self, unit: &Path) -> Rc<Dependencies>;

    /// `units` deduplicated and ordered by (identity, path), paired with their identity
    fn sorted_by_identity(&mut self, units: &[PathBuf]) -> Vec<(PathBuf, String)>;
}

/// A unit whose children are being walked
struct Frame {
    index: u32,
    /// Discovery order within this walk
    order: u32,
    /// Earliest discovery order reachable through back edges of the subtree
    low: u32,
    children: std::vec::IntoIter<(u32, PathBuf)>,
}

/// Compare the recorded dependencies of `index` with the current ones.
///
/// Returns the children to walk, or `None` when the dependency set changed
/// structurally or a target's identity differs.
fn expand<R, G: CurrentGraph>(
    graph: &mut G,
    snapshot: &Snapshot<R>,
    unit: &Path,
    index: u32,
    direct_only: bool,
) -> Option<Vec<(u32, PathBuf)>> {
    let entry = snapshot.entry(index as usize)?;
    let current = graph.dependencies(unit);
    if current.len() != entry.dependency_count() {
        return None;
    }
    let mut children = Vec::new();
    let Some(recorded) = &entry.dependencies else {
        return Some(children);
    };
    for (identifier, old_targets) in recorded {
        let new_targets = current.get(identifier)?.units();
        let (old_targets, new_targets) = match (old_targets, new_targets) {
            (None, None) => continue,
            (Some(old), Some(new)) => (old, new),
            _ => return None,
        };
        let new_targets = graph.sorted_by_identity(new_targets);
        if new_targets.len() != old_targets.len() {
            return None;
        }
        for (&old_index, (path, identity)) in old_targets.iter().zip(new_targets) {
            let old_entry = snapshot.entry(old_index as usize)?;
            if old_entry.identity != identity {
                return None;
            }
            if !direct_only {
                children.push((old_index, path));
            }
        }
    }
    Some(children)
}

/// Whether every dependency of `unit` (old snapshot position `index`) is unchanged.
///
/// The identity of `unit` itself is the caller's responsibility; identities
/// of dependencies are compared by their parents. Results are memoized in
/// `status`, which must have one slot per snapshot file.
pub(crate) fn dependencies_up_to_date<R, G: CurrentGraph>(
    graph: &mut G,
    snapshot: &Snapshot<R>,
    status: &mut [Freshness],
    unit: &Path,
    index: u32,
    direct_only: bool,
) -> bool {
    match status.get(index as usize) {
        Some(Freshness::Ok) => return true,
        Some(Freshness::Outdated) | None => return false,
        Some(Freshness::Unknown) => {}
    }

    // units discovered in this walk whose component is not finished yet
    let mut pending: Vec<u32> = Vec::new();
    let mut discovered: FxHashMap<u32, u32> = FxHashMap::default();
    let mut parents: Vec<Frame> = Vec::new();
    let mut next_order = 0u32;

    let mut visit = |graph: &mut G,
                     pending: &mut Vec<u32>,
                     discovered: &mut FxHashMap<u32, u32>,
                     unit: &Path,
                     index: u32|
     -> Option<Frame> {
        let order = next_order;
        next_order += 1;
        discovered.insert(index, order);
        pending.push(index);
        let children = expand(graph, snapshot, unit, index, direct_only)?;
        Some(Frame {
            index,
            order,
            low: order,
            children: children.into_iter(),
        })
    };

    match visit(graph, &mut pending, &mut discovered, unit, index) {
        Some(frame) => parents.push(frame),
        None => return mark_outdated(status, &pending),
    }

    loop {
        let Some(frame) = parents.last_mut() else {
            return true;
        };

        if let Some((child, path)) = frame.children.next() {
            match status.get(child as usize) {
                Some(Freshness::Ok) => continue,
                Some(Freshness::Outdated) | None => return mark_outdated(status, &pending),
                Some(Freshness::Unknown) => {}
            }
            if let Some(&order) = discovered.get(&child) {
                // still pending, so this edge closes a cycle
                frame.low = frame.low.min(order);
                continue;
            }
            match visit(graph, &mut pending, &mut discovered, &path, child) {
                Some(frame) => parents.push(frame),
                None => return mark_outdated(status, &pending),
            }
            continue;
        }

        let Some(frame) = parents.pop() else {
            return true;
        };
        if frame.low == frame.order {
            // root of its component: all members are verified together
            while let Some(member) = pending.pop() {
                status[member as usize] = Freshness::Ok;
                if member == frame.index {
                    break;
                }
            }
        } else if let Some(parent) = parents.last_mut() {
            parent.low = parent.low.min(frame.low);
        }
    }
}

/// Everything still pending can reach the changed unit
fn mark_outdated(status: &mut [Freshness], pending: &[u32]) -> bool {
    for &index in pending {
        if let Some(slot) = status.get_mut(index as usize) {
            *slot = Freshness::Outdated;
        }
    }
    false
}
