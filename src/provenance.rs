use crate::state::{ContainerId, ProcessId};
use serde::{Deserialize, Serialize};

/// One "process touched container" event. Edges are append-only; the
/// explicit `seq` is the ordering authority, so "latest" survives
/// serialization round trips and any future parallel writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEdge {
    pub container: ContainerId,
    pub process: ProcessId,
    pub seq: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceGraph {
    pub edges: Vec<ProvenanceEdge>,
    next_edge_seq: u64,
}

impl ProvenanceGraph {
    pub fn record(&mut self, container: &ContainerId, process: &ProcessId) -> u64 {
        self.next_edge_seq += 1;
        self.edges.push(ProvenanceEdge {
            container: container.clone(),
            process: process.clone(),
            seq: self.next_edge_seq,
        });
        self.next_edge_seq
    }

    /// The most recent process that touched the container, computed from
    /// the edge list rather than stored and overwritten.
    pub fn latest_process(&self, container: &ContainerId) -> Option<&ProcessId> {
        self.edges
            .iter()
            .filter(|edge| &edge.container == container)
            .max_by_key(|edge| edge.seq)
            .map(|edge| &edge.process)
    }

    /// Every process that touched the container, oldest first.
    pub fn history(&self, container: &ContainerId) -> Vec<&ProcessId> {
        let mut touches: Vec<&ProvenanceEdge> = self
            .edges
            .iter()
            .filter(|edge| &edge.container == container)
            .collect();
        touches.sort_by_key(|edge| edge.seq);
        touches.into_iter().map(|edge| &edge.process).collect()
    }

    /// Distinct containers a process touched, in first-touch order.
    pub fn containers_touched(&self, process: &ProcessId) -> Vec<&ContainerId> {
        let mut ret: Vec<&ContainerId> = vec![];
        for edge in &self.edges {
            if &edge.process == process && !ret.contains(&&edge.container) {
                ret.push(&edge.container);
            }
        }
        ret
    }
}
