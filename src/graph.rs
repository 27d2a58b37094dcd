use std::collections::{HashMap, HashSet};

use crate::error::{CleoError, Result};
use crate::model::{Status, Task, format_task_id};

/// Dependency adjacency indexed by task id.
pub fn dependency_adjacency(tasks: &[Task]) -> HashMap<u64, HashSet<u64>> {
    let mut adjacency = HashMap::new();
    for task in tasks {
        adjacency.entry(task.id).or_insert_with(HashSet::new);
        for &dep in &task.depends {
            adjacency
                .entry(task.id)
                .or_insert_with(HashSet::new)
                .insert(dep);
            adjacency.entry(dep).or_insert_with(HashSet::new);
        }
    }
    adjacency
}

fn has_path(
    adjacency: &HashMap<u64, HashSet<u64>>,
    start: u64,
    target: u64,
    visited: &mut HashSet<u64>,
) -> bool {
    if start == target {
        return true;
    }
    if !visited.insert(start) {
        return false;
    }
    adjacency.get(&start).is_some_and(|deps| {
        deps.iter()
            .copied()
            .any(|next| has_path(adjacency, next, target, visited))
    })
}

/// Reject a planned edge set that would close a cycle. Accepted edges
/// are folded into the adjacency so multi-edge plans are checked as a
/// whole.
pub fn validate_new_edges(
    target_id: u64,
    dep_ids: &[u64],
    adjacency: &mut HashMap<u64, HashSet<u64>>,
) -> Result<()> {
    for &dep_id in dep_ids {
        if target_id == dep_id {
            return Err(CleoError::CycleDetected(format!(
                "{} -> {}",
                format_task_id(target_id),
                format_task_id(dep_id)
            )));
        }
        let already = adjacency
            .get(&target_id)
            .is_some_and(|deps| deps.contains(&dep_id));
        if already {
            continue;
        }
        let mut visited = HashSet::new();
        if has_path(adjacency, dep_id, target_id, &mut visited) {
            return Err(CleoError::CycleDetected(format!(
                "{} -> {} -> {}",
                format_task_id(target_id),
                format_task_id(dep_id),
                format_task_id(target_id)
            )));
        }
        adjacency
            .entry(target_id)
            .or_insert_with(HashSet::new)
            .insert(dep_id);
    }
    Ok(())
}

/// Find any dependency cycle among the live tasks; returns the chain of
/// ids forming it.
pub fn find_cycle(tasks: &[Task]) -> Option<Vec<u64>> {
    let adjacency = dependency_adjacency(tasks);
    let mut state: HashMap<u64, u8> = HashMap::new(); // 1 = visiting, 2 = done
    let mut stack = Vec::new();

    fn visit(
        node: u64,
        adjacency: &HashMap<u64, HashSet<u64>>,
        state: &mut HashMap<u64, u8>,
        stack: &mut Vec<u64>,
    ) -> Option<Vec<u64>> {
        match state.get(&node) {
            Some(2) => return None,
            Some(1) => {
                let start = stack.iter().position(|&n| n == node).unwrap_or(0);
                let mut chain = stack[start..].to_vec();
                chain.push(node);
                return Some(chain);
            }
            _ => {}
        }
        state.insert(node, 1);
        stack.push(node);
        if let Some(deps) = adjacency.get(&node) {
            let mut ordered: Vec<u64> = deps.iter().copied().collect();
            ordered.sort_unstable();
            for dep in ordered {
                if let Some(chain) = visit(dep, adjacency, state, stack) {
                    return Some(chain);
                }
            }
        }
        stack.pop();
        state.insert(node, 2);
        None
    }

    let mut ids: Vec<u64> = adjacency.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        if let Some(chain) = visit(id, &adjacency, &mut state, &mut stack) {
            return Some(chain);
        }
    }
    None
}

/// Topological layers of the live dependency graph. Wave 0 holds tasks
/// with no unresolved depends; wave N tasks whose depends all sit in
/// earlier waves. Done and cancelled dependencies count as resolved.
/// A cycle is a validation error, never an infinite wave.
pub fn dependency_waves(tasks: &[Task]) -> Result<Vec<Vec<u64>>> {
    if let Some(chain) = find_cycle(tasks) {
        let rendered: Vec<String> = chain.iter().map(|&id| format_task_id(id)).collect();
        return Err(CleoError::CycleDetected(rendered.join(" -> ")));
    }

    let by_id: HashMap<u64, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
    let unresolved = |id: u64| -> bool {
        by_id
            .get(&id)
            .is_some_and(|t| !matches!(t.status, Status::Done | Status::Cancelled))
    };

    let mut assigned: HashMap<u64, usize> = HashMap::new();
    let mut remaining: Vec<&Task> = tasks
        .iter()
        .filter(|t| !matches!(t.status, Status::Done | Status::Cancelled))
        .collect();
    remaining.sort_by_key(|t| t.id);

    let mut waves: Vec<Vec<u64>> = Vec::new();
    while !remaining.is_empty() {
        let wave_index = waves.len();
        let mut wave = Vec::new();
        for task in &remaining {
            let ready = task.depends.iter().all(|&dep| {
                !unresolved(dep) || assigned.get(&dep).is_some_and(|&w| w < wave_index)
            });
            if ready {
                wave.push(task.id);
            }
        }
        if wave.is_empty() {
            // Unreachable once find_cycle passed, kept as a hard stop.
            return Err(CleoError::ValidationError(
                "dependency waves did not converge".into(),
            ));
        }
        for &id in &wave {
            assigned.insert(id, wave_index);
        }
        remaining.retain(|t| !assigned.contains_key(&t.id));
        waves.push(wave);
    }
    Ok(waves)
}

/// Cache key for wave/tree projections: digest over the sorted
/// `(id, status, parent, depends)` tuples.
pub fn projection_digest(tasks: &[Task]) -> String {
    let mut entries: Vec<String> = tasks
        .iter()
        .map(|t| {
            let deps: Vec<String> = t.depends.iter().map(|d| d.to_string()).collect();
            format!(
                "{}:{}:{}:{}",
                t.id,
                t.status,
                t.parent_id.map(|p| p.to_string()).unwrap_or_default(),
                deps.join("+")
            )
        })
        .collect();
    entries.sort();
    crate::platform::sha256_string(&entries.join(","))
}

/// Parent/child index answering descendants, children, and siblings in
/// amortized linear time over the task list.
pub struct Hierarchy {
    children: HashMap<u64, Vec<u64>>,
    parent: HashMap<u64, u64>,
}

impl Hierarchy {
    pub fn build(tasks: &[Task]) -> Self {
        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut parent = HashMap::new();
        for task in tasks {
            if let Some(pid) = task.parent_id {
                children.entry(pid).or_default().push(task.id);
                parent.insert(task.id, pid);
            }
        }
        for list in children.values_mut() {
            list.sort_unstable();
        }
        Self { children, parent }
    }

    pub fn children_of(&self, id: u64) -> &[u64] {
        self.children.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn descendants_of(&self, id: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut queue: Vec<u64> = self.children_of(id).to_vec();
        let mut seen = HashSet::new();
        while let Some(next) = queue.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            queue.extend_from_slice(self.children_of(next));
        }
        out.sort_unstable();
        out
    }

    pub fn siblings_of(&self, id: u64) -> Vec<u64> {
        match self.parent.get(&id) {
            Some(&pid) => self
                .children_of(pid)
                .iter()
                .copied()
                .filter(|&c| c != id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Detects parent chains that loop back on themselves.
    pub fn has_parent_cycle(&self, id: u64) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if !seen.insert(node) {
                return true;
            }
            current = self.parent.get(&node).copied();
        }
        false
    }
}
