// src/stage/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::stage::Stage;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct StageNode {
    /// Direct dependencies: stages that must finish before this one can run.
    deps: Vec<Stage>,
    /// Direct dependents: stages that depend on this one.
    dependents: Vec<Stage>,
}

/// The fixed processing DAG over the eight pipeline stages.
///
/// The topology is configuration-independent; configuration only decides
/// which optional stages are Skipped. Construction runs a topological sort
/// as a sanity pass and keeps the resulting order for display and iteration.
#[derive(Debug, Clone)]
pub struct StageGraph {
    nodes: HashMap<Stage, StageNode>,
    order: Vec<Stage>,
}

/// (stage, its direct dependencies)
const EDGES: [(Stage, &[Stage]); 8] = [
    (Stage::MotionCorrection, &[]),
    (Stage::CtfEstimation, &[Stage::MotionCorrection]),
    (Stage::Tracking, &[Stage::MotionCorrection]),
    (
        Stage::FinalAlignment,
        &[Stage::Tracking, Stage::CtfEstimation],
    ),
    (
        Stage::DoseWeighting,
        &[Stage::FinalAlignment, Stage::CtfEstimation],
    ),
    (
        Stage::Reconstruction,
        &[Stage::FinalAlignment, Stage::DoseWeighting],
    ),
    (Stage::PostProcess, &[Stage::Reconstruction]),
    (
        Stage::Denoising,
        &[Stage::Reconstruction, Stage::PostProcess],
    ),
];

impl StageGraph {
    pub fn new() -> Self {
        let mut nodes: HashMap<Stage, StageNode> = HashMap::new();

        for (stage, deps) in EDGES {
            nodes.insert(
                stage,
                StageNode {
                    deps: deps.to_vec(),
                    dependents: Vec::new(),
                },
            );
        }

        for (stage, deps) in EDGES {
            for dep in deps {
                if let Some(node) = nodes.get_mut(dep) {
                    node.dependents.push(stage);
                }
            }
        }

        let order = sorted_order();

        Self { nodes, order }
    }

    /// All stages in dependency (topological) order.
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.order.iter().copied()
    }

    /// Immediate dependencies of a stage.
    pub fn dependencies_of(&self, stage: Stage) -> &[Stage] {
        self.nodes
            .get(&stage)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a stage.
    pub fn dependents_of(&self, stage: Stage) -> &[Stage] {
        self.nodes
            .get(&stage)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Topologically sort the fixed edge set.
///
/// The topology is a compile-time constant, so a cycle here is a programmer
/// error rather than a user error.
fn sorted_order() -> Vec<Stage> {
    let mut graph: DiGraphMap<Stage, ()> = DiGraphMap::new();

    for (stage, deps) in EDGES {
        graph.add_node(stage);
        for dep in deps {
            graph.add_edge(*dep, stage, ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order,
        Err(cycle) => unreachable!(
            "cycle in the fixed stage graph involving {:?}",
            cycle.node_id()
        ),
    }
}
