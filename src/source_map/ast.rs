//! Arena-indexed script syntax tree.
//!
//! Nodes never own each other: a push or an evaluation refers to its nested
//! nodes through [`NodeId`]s into the same [`ScriptTree`].

use crate::types::range::Range;
use crate::virtual_machine::state::VmState;

/// Index of a node in its [`ScriptTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Nested script of a push or of a compile-time evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NestedScript {
    /// Bytecode the nested nodes compile to.
    pub bytecode: Vec<u8>,
    pub range: Range,
    pub script: Vec<NodeId>,
}

/// One source fragment and the bytecode it resolved to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptNode {
    pub bytecode: Vec<u8>,
    pub range: Range,
    /// Contents of a push, whose bytecode this node pushes.
    pub push: Option<NestedScript>,
    /// Source of a compile-time evaluation whose result became `bytecode`.
    pub source: Option<NestedScript>,
    /// Trace recorded while evaluating `source`.
    pub trace: Option<Vec<VmState>>,
}

impl ScriptNode {
    pub fn new(bytecode: Vec<u8>, range: Range) -> Self {
        Self {
            bytecode,
            range,
            ..Self::default()
        }
    }

    /// Returns the nested evaluation source and its trace, if this node has both.
    pub fn evaluation(&self) -> Option<(&NestedScript, &[VmState])> {
        Some((self.source.as_ref()?, self.trace.as_deref()?))
    }
}

/// Owner of every node of a compiled script.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptTree {
    nodes: Vec<ScriptNode>,
}

impl ScriptTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: ScriptNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Panics if `id` belongs to another tree.
    pub fn get(&self, id: NodeId) -> &ScriptNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Concatenated bytecode of `script`.
    pub fn bytecode(&self, script: &[NodeId]) -> Vec<u8> {
        script
            .iter()
            .flat_map(|&id| self.get(id).bytecode.iter().copied())
            .collect()
    }

    /// Every node reachable from `script`, depth first, nested nodes before
    /// the node that holds them.
    pub fn walk(&self, script: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &id in script {
            let node = self.get(id);
            for nested in [&node.push, &node.source].into_iter().flatten() {
                out.extend(self.walk(&nested.script));
            }
            out.push(id);
        }
        out
    }
}
