//! Dependency resolution.
//!
//! Orders a batch so that every indicator comes after the indicators it
//! reads. Depth-first topological sort with three colours; reaching a node
//! that is still on the DFS path is a cycle, and the whole batch fails.

use crate::domain::definition::IndicatorSpec;
use crate::domain::error::IndicatorError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Return `specs` in evaluation order. References to names outside the batch
/// are not edges; the engine reports those as failed dependencies.
pub fn resolve(specs: Vec<IndicatorSpec>) -> Result<Vec<IndicatorSpec>, IndicatorError> {
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, spec) in specs.iter().enumerate() {
        if index.insert(spec.name.as_str(), i).is_some() {
            return Err(IndicatorError::DuplicateIndicator {
                name: spec.name.clone(),
            });
        }
    }

    let edges: Vec<Vec<usize>> = specs
        .iter()
        .map(|spec| {
            spec.dependencies()
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .collect()
        })
        .collect();

    let mut sorter = Sorter {
        edges: &edges,
        marks: vec![Mark::Unvisited; specs.len()],
        path: Vec::new(),
        order: Vec::with_capacity(specs.len()),
    };
    for start in 0..specs.len() {
        if let Err(cycle) = sorter.visit(start) {
            let members = cycle.into_iter().map(|i| specs[i].name.clone()).collect();
            return Err(IndicatorError::CycleError { members });
        }
    }

    let order = sorter.order;
    let mut slots: Vec<Option<IndicatorSpec>> = specs.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

struct Sorter<'a> {
    edges: &'a [Vec<usize>],
    marks: Vec<Mark>,
    /// Current DFS path, each node with the index of its next unexplored edge.
    path: Vec<(usize, usize)>,
    order: Vec<usize>,
}

impl Sorter<'_> {
    /// Post-order DFS from `root` on an explicit stack. On a back edge,
    /// returns the cycle as indices with the first member repeated at the end.
    fn visit(&mut self, root: usize) -> Result<(), Vec<usize>> {
        if self.marks[root] != Mark::Unvisited {
            return Ok(());
        }
        self.marks[root] = Mark::OnPath;
        self.path.push((root, 0));

        while let Some(top) = self.path.last_mut() {
            let (node, cursor) = *top;
            top.1 += 1;
            let Some(&next) = self.edges[node].get(cursor) else {
                self.path.pop();
                self.marks[node] = Mark::Done;
                self.order.push(node);
                continue;
            };
            match self.marks[next] {
                Mark::Done => {}
                Mark::OnPath => {
                    let start = self.path.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let mut cycle: Vec<usize> = self.path[start..].iter().map(|&(n, _)| n).collect();
                    cycle.push(next);
                    return Err(cycle);
                }
                Mark::Unvisited => {
                    self.marks[next] = Mark::OnPath;
                    self.path.push((next, 0));
                }
            }
        }
        Ok(())
    }
}
