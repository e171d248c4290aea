//! Evaluation sample extraction.
//!
//! Re-associates the flat trace of an evaluation with the source nodes that
//! produced each instruction. Instructions are matched to nodes by byte
//! offset: a node owns the instructions whose bytes fall inside its
//! bytecode, and an instruction straddling several nodes is owned by all of
//! them.
//!
//! A new sample starts whenever an instruction begins at the first byte of a
//! node. Later instructions of the same node extend that sample, moving the
//! state it held into `internal_states`.

use crate::source_map::ast::{NodeId, ScriptTree};
use crate::types::range::{self, Range};
use crate::virtual_machine::instruction::{Instruction, serialize};
use crate::virtual_machine::state::VmState;

/// Intermediate state of a multi-instruction sample.
#[derive(Clone, Debug, PartialEq)]
pub struct InternalState {
    pub instruction: Instruction,
    pub state: VmState,
}

/// A source range paired with the state its instructions produced.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationSample {
    pub evaluation_range: Range,
    pub range: Range,
    pub state: VmState,
    /// `None` for the state preceding the first instruction.
    pub instruction: Option<Instruction>,
    pub internal_states: Vec<InternalState>,
    /// `false` when every instruction of the sample was stepped over inside
    /// an unexecuted branch.
    pub executed: bool,
}

/// Samples of one evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub samples: Vec<EvaluationSample>,
    /// States that could not be attributed to any node.
    pub unmatched_states: Vec<VmState>,
    /// Extractions of compile-time evaluations, filled by [`extract_recursive`].
    pub nested: Vec<NestedEvaluation>,
}

/// Extraction of the evaluation that produced a node's bytecode.
#[derive(Clone, Debug, PartialEq)]
pub struct NestedEvaluation {
    pub node: NodeId,
    pub extraction: Extraction,
}

impl Extraction {
    /// Every sample of this evaluation and of its nested evaluations, nested
    /// evaluations first since they ran before it.
    pub fn flatten(&self) -> Vec<&EvaluationSample> {
        let mut out = Vec::new();
        for nested in &self.nested {
            out.extend(nested.extraction.flatten());
        }
        out.extend(&self.samples);
        out
    }

    /// Unmatched states of this evaluation and of its nested evaluations.
    pub fn all_unmatched_states(&self) -> Vec<&VmState> {
        let mut out: Vec<&VmState> = self
            .nested
            .iter()
            .flat_map(|nested| nested.extraction.all_unmatched_states())
            .collect();
        out.extend(&self.unmatched_states);
        out
    }
}

/// Byte span of one node within the evaluated bytecode.
struct Span {
    start: usize,
    end: usize,
    range: Range,
}

/// Where an instruction sits relative to the nodes that own it.
struct Location {
    range: Range,
    /// The instruction starts after the first byte of its first owner.
    continues_node: bool,
}

struct NodeMap {
    spans: Vec<Span>,
    /// Start offset of every instruction, plus the end of the last.
    offsets: Vec<usize>,
    /// Bytes of the evaluated bytecode that the nodes account for.
    matched_len: usize,
}

impl NodeMap {
    fn new(tree: &ScriptTree, nodes: &[NodeId], instructions: &[Instruction]) -> Self {
        let mut spans = Vec::with_capacity(nodes.len());
        let mut offset = 0;
        for &id in nodes {
            let node = tree.get(id);
            let end = offset + node.bytecode.len();
            if end > offset {
                spans.push(Span {
                    start: offset,
                    end,
                    range: node.range,
                });
            }
            offset = end;
        }

        let mut offsets = Vec::with_capacity(instructions.len() + 1);
        let mut position = 0;
        offsets.push(position);
        for instruction in instructions {
            position += instruction.encoded_len();
            offsets.push(position);
        }

        let node_bytes = tree.bytecode(nodes);
        let matched_len = if serialize(instructions).starts_with(&node_bytes) {
            node_bytes.len()
        } else {
            0
        };
        Self {
            spans,
            offsets,
            matched_len,
        }
    }

    fn locate(&self, index: usize) -> Option<Location> {
        let (&start, &end) = (self.offsets.get(index)?, self.offsets.get(index + 1)?);
        if end > self.matched_len {
            return None;
        }
        let owners: Vec<&Span> = self
            .spans
            .iter()
            .filter(|span| span.start < end && start < span.end)
            .collect();
        let first = owners.first()?;
        let ranges: Vec<Range> = owners.iter().map(|span| span.range).collect();
        Some(Location {
            range: range::merge_all(&ranges)?,
            continues_node: start > first.start,
        })
    }
}

/// Pairs every step of `trace` with the nodes of `nodes` that produced it.
///
/// The first state becomes a zero-width sample at the start of
/// `evaluation_range`. The duplicated completion state that ends a trace is
/// not sampled. A step failing on an instruction that begins a node is not
/// sampled either: that node never ran.
pub fn extract(
    tree: &ScriptTree,
    evaluation_range: Range,
    nodes: &[NodeId],
    trace: &[VmState],
) -> Extraction {
    let mut extraction = Extraction::default();
    let trace = match trace.len() {
        0 | 1 => trace,
        len => &trace[..len - 1],
    };
    let Some(initial) = trace.first() else {
        return extraction;
    };
    extraction.samples.push(EvaluationSample {
        evaluation_range,
        range: Range::point(evaluation_range.start()),
        state: initial.clone(),
        instruction: None,
        internal_states: Vec::new(),
        executed: true,
    });

    let map = NodeMap::new(tree, nodes, &initial.instructions);
    let mut previous: Option<usize> = None;
    for (step, pair) in trace.windows(2).enumerate() {
        let (before, after) = (&pair[0], &pair[1]);
        let index = before.instruction_pointer;
        let (Some(instruction), Some(location)) =
            (before.instructions.get(index), map.locate(index))
        else {
            extraction
                .unmatched_states
                .extend(trace[step + 1..].iter().cloned());
            break;
        };
        let executed = after.error.is_some() || before.executes_next();
        let continues = location.continues_node && previous.is_some_and(|p| p + 1 == index);

        match extraction.samples.last_mut() {
            Some(sample) if continues => {
                let prior_state = std::mem::replace(&mut sample.state, after.clone());
                if let Some(prior) = sample.instruction.replace(instruction.clone()) {
                    sample.internal_states.push(InternalState {
                        instruction: prior,
                        state: prior_state,
                    });
                }
                sample.range = sample.range.merge(&location.range);
                sample.executed |= executed;
            }
            _ if after.error.is_some() => break,
            _ => extraction.samples.push(EvaluationSample {
                evaluation_range,
                range: location.range,
                state: after.clone(),
                instruction: Some(instruction.clone()),
                internal_states: Vec::new(),
                executed,
            }),
        }
        if after.error.is_some() {
            break;
        }
        previous = Some(index);
    }
    extraction
}

/// Like [`extract`], also extracting every compile-time evaluation reachable
/// from `nodes`, including those nested inside pushes.
///
/// Nested samples keep the ranges of their own evaluation and never consume
/// states of the outer trace.
pub fn extract_recursive(
    tree: &ScriptTree,
    evaluation_range: Range,
    nodes: &[NodeId],
    trace: &[VmState],
) -> Extraction {
    let nested = nested_evaluations(tree, nodes);
    let mut extraction = extract(tree, evaluation_range, nodes, trace);
    extraction.nested = nested;
    extraction
}

fn nested_evaluations(tree: &ScriptTree, nodes: &[NodeId]) -> Vec<NestedEvaluation> {
    let mut nested = Vec::new();
    for &id in nodes {
        let node = tree.get(id);
        if let Some((source, trace)) = node.evaluation() {
            nested.push(NestedEvaluation {
                node: id,
                extraction: extract_recursive(tree, source.range, &source.script, trace),
            });
        }
        if let Some(push) = &node.push {
            nested.extend(nested_evaluations(tree, &push.script));
        }
    }
    nested
}
