//! Pass graph: an owned node arena connected by integer edges.
//!
//! Nodes may only reference earlier nodes, so the arena order is a valid
//! execution order and cycles cannot be constructed. Every node owns its
//! parameters; no node outlives the arena. The graph shape is designed to
//! map one draw call per node onto a GL backend; the crate ships a software
//! executor with the same per-texel semantics.
use super::passes::{run_pass, PassKind};
use crate::error::{DetectorError, Result};
use crate::image::PlanarImage;

/// Work surface exchanged between passes: up to four planes of f32 texels.
pub type Texture = PlanarImage<f32>;

pub type NodeId = usize;

#[derive(Clone, Debug)]
pub struct PassNode {
    pub pass: PassKind,
    pub inputs: Vec<NodeId>,
}

#[derive(Clone, Debug, Default)]
pub struct PassGraph {
    nodes: Vec<PassNode>,
    outputs: Vec<NodeId>,
}

impl PassGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node fed by `inputs`; edges must point at earlier nodes.
    pub fn add(&mut self, pass: PassKind, inputs: &[NodeId]) -> Result<NodeId> {
        let id = self.nodes.len();
        for &input in inputs {
            if input >= id {
                return Err(DetectorError::config(format!(
                    "pass node {id} references later node {input}"
                )));
            }
        }
        self.nodes.push(PassNode {
            pass,
            inputs: inputs.to_vec(),
        });
        Ok(id)
    }

    /// Mark a node whose texture is collected by `execute`.
    pub fn mark_output(&mut self, id: NodeId) {
        self.outputs.push(id);
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Evaluate every node in arena order against a source frame and return
    /// the marked output textures.
    pub fn execute(&self, source: &Texture) -> Result<Vec<Texture>> {
        let mut results: Vec<Option<Texture>> = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.nodes.iter().enumerate() {
            let inputs: Vec<&Texture> = node
                .inputs
                .iter()
                .map(|&i| {
                    results[i]
                        .as_ref()
                        .ok_or_else(|| DetectorError::gpu(format!("node {i} produced no texture")))
                })
                .collect::<Result<_>>()?;
            let out = run_pass(&node.pass, &inputs, source)
                .map_err(|e| DetectorError::gpu(format!("pass node {id}: {e}")))?;
            results.push(Some(out));
        }
        self.outputs
            .iter()
            .map(|&id| {
                results[id]
                    .clone()
                    .ok_or_else(|| DetectorError::gpu(format!("output node {id} missing")))
            })
            .collect()
    }
}
