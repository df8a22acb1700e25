//! Stage dependency graph
//!
//! Nodes are stages, edges are "must precede". The graph is validated when it
//! is built: duplicate names, references to unknown stages and cycles are all
//! rejected, so an orchestrator only ever holds an executable order.

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::stage::StageSpec;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("stage '{0}' is defined more than once")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Validated stage graph with a fixed execution order
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<StageSpec>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
}

impl StageGraph {
    /// Build and validate. Declaration order breaks ties between stages that
    /// become ready at the same time, so a plain chain runs as written.
    pub fn new(stages: Vec<StageSpec>) -> Result<Self, GraphError> {
        if stages.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(stage.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
        }

        for stage in &stages {
            for dependency in &stage.after {
                if !index.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let order = topological_order(&stages, &index)?;
        Ok(Self {
            stages,
            index,
            order,
        })
    }

    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Stages in execution order
    pub fn ordered(&self) -> impl Iterator<Item = &StageSpec> {
        self.order.iter().map(|&i| &self.stages[i])
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// Kahn's algorithm; the ready set is ordered by declaration index.
fn topological_order(
    stages: &[StageSpec],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, GraphError> {
    let mut in_degree = vec![0usize; stages.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];

    for (i, stage) in stages.iter().enumerate() {
        let deps: BTreeSet<usize> = stage.after.iter().filter_map(|d| index.get(d).copied()).collect();
        in_degree[i] = deps.len();
        for dep in deps {
            successors[dep].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..stages.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(stages.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() < stages.len() {
        return Err(GraphError::Cycle(find_cycle(stages, index, &in_degree)));
    }

    Ok(order)
}

// Walk predecessor edges among the stages Kahn could not schedule until a
// stage repeats; that loop is the reported cycle.
fn find_cycle(
    stages: &[StageSpec],
    index: &HashMap<String, usize>,
    in_degree: &[usize],
) -> Vec<String> {
    let Some(start) = (0..stages.len()).find(|&i| in_degree[i] > 0) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(prev) = stages[current]
            .after
            .iter()
            .filter_map(|d| index.get(d).copied())
            .find(|&d| in_degree[d] > 0)
        else {
            return Vec::new();
        };

        if let Some(pos) = path.iter().position(|&p| p == prev) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .rev()
                .map(|&i| stages[i].name.clone())
                .collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }
        path.push(prev);
        current = prev;
    }
}
