//! Breadth-first traversal over the adjacency index.

use crate::adjacency::AdjacencyIndex;
use neurograph_core::{Deadline, Direction, NounId, Result, VerbType};
use std::collections::{HashMap, HashSet, VecDeque};

/// Configuration for one traversal.
#[derive(Debug, Clone)]
pub struct TraversalSpec {
    pub max_depth: usize,
    pub max_nodes: Option<usize>,
    pub direction: Option<Direction>,
    pub verb_type: Option<VerbType>,
    pub include_start: bool,
}

impl Default for TraversalSpec {
    fn default() -> Self {
        Self {
            max_depth: 1,
            max_nodes: None,
            direction: None,
            verb_type: None,
            include_start: false,
        }
    }
}

/// BFS from `start`, returning each reached noun with its hop distance.
/// The cancellation token is checked once per frontier.
pub fn bfs(
    graph: &AdjacencyIndex,
    start: NounId,
    spec: &TraversalSpec,
    deadline: &Deadline,
) -> Result<HashMap<NounId, usize>> {
    let mut reached: HashMap<NounId, usize> = HashMap::new();
    let mut visited: HashSet<NounId> = HashSet::from([start]);
    let mut frontier: VecDeque<(NounId, usize)> = VecDeque::from([(start, 0)]);

    if spec.include_start {
        reached.insert(start, 0);
    }

    while let Some((current, depth)) = frontier.pop_front() {
        deadline.checkpoint()?;
        if depth >= spec.max_depth {
            continue;
        }
        for entry in graph.neighbors(&current, spec.direction, spec.verb_type) {
            if !visited.insert(entry.neighbor) {
                continue;
            }
            reached.insert(entry.neighbor, depth + 1);
            if let Some(max_nodes) = spec.max_nodes {
                if reached.len() >= max_nodes {
                    return Ok(reached);
                }
            }
            frontier.push_back((entry.neighbor, depth + 1));
        }
    }
    Ok(reached)
}

/// Nouns within `depth` hops of `target`, nearest first. The planner's graph
/// signal ranks by hop distance, ties broken by id for determinism.
pub fn connected_ranked(
    graph: &AdjacencyIndex,
    target: NounId,
    spec: &TraversalSpec,
    deadline: &Deadline,
) -> Result<Vec<(NounId, usize)>> {
    let reached = bfs(graph, target, spec, deadline)?;
    let mut ranked: Vec<(NounId, usize)> = reached.into_iter().collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(ranked)
}
