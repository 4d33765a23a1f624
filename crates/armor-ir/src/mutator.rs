//! Structural insertion into an instruction graph.
//!
//! Nothing here checks that inserted code leaves the operand stack as it found
//! it; callers choose stack-neutral payloads. [`Mutator`] can verify its own
//! payload with [`check_stack_neutral`](crate::validation::check_stack_neutral)
//! before touching the graph.

use crate::graph::{Graph, NodeId};
use crate::instruction::Instruction;
use crate::opcode::InstructionSet;
use crate::validation::{check_stack_neutral, PAYLOAD_MIN_DEPTH};
use armor_core::{MutatorError, RecipeConfig};
use tracing::{debug, info};

/// Mnemonics of the canonical decoy payload.
///
/// Two swaps cancel, three rotations of the top three values cancel.
pub const CANONICAL_PAYLOAD: [&str; 7] = [
    "NOP",
    "ROT_TWO",
    "ROT_TWO",
    "NOP",
    "ROT_THREE",
    "ROT_THREE",
    "ROT_THREE",
];

/// Splice `instruction` in directly after `reference`.
///
/// Repeated calls with the same reference stack up innermost-first: the
/// newest node always sits right after the reference.
pub fn insert_after(
    graph: &mut Graph,
    reference: NodeId,
    instruction: Instruction,
) -> Result<NodeId, MutatorError> {
    graph.splice_after(reference, instruction)
}

/// Splice a whole payload after `reference` so that it reads in payload
/// order. Returns the new nodes in that order.
pub fn insert_sequence_after(
    graph: &mut Graph,
    reference: NodeId,
    payload: &[Instruction],
) -> Result<Vec<NodeId>, MutatorError> {
    let mut inserted = Vec::with_capacity(payload.len());
    for instruction in payload.iter().rev() {
        inserted.push(insert_after(graph, reference, *instruction)?);
    }
    inserted.reverse();
    Ok(inserted)
}

/// The canonical payload in the given instruction set
pub fn canonical_payload(isa: &InstructionSet) -> Result<Vec<Instruction>, MutatorError> {
    CANONICAL_PAYLOAD
        .iter()
        .map(|name| isa.instruction(name, 0))
        .collect()
}

/// Applies the fixed decoy recipe to freshly decoded graphs
pub struct Mutator<'a> {
    isa: &'a InstructionSet,
    config: RecipeConfig,
}

impl<'a> Mutator<'a> {
    pub fn new(isa: &'a InstructionSet, config: RecipeConfig) -> Self {
        Self { isa, config }
    }

    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }

    /// Insert `repetitions` copies of the canonical payload after the node at
    /// `anchor_index`. Returns the number of inserted nodes.
    ///
    /// The payload needs [`PAYLOAD_MIN_DEPTH`] live stack values at the
    /// anchor. Nothing here checks the anchor's actual depth, and the default
    /// anchor (the second instruction) usually has fewer, so the recipe
    /// itself does not meet that precondition.
    pub fn apply(&self, graph: &mut Graph) -> Result<usize, MutatorError> {
        let payload = canonical_payload(self.isa)?;
        if self.config.verify_payload {
            check_stack_neutral(self.isa, &payload, PAYLOAD_MIN_DEPTH)?;
        }

        let anchor = graph
            .nth(self.config.anchor_index)
            .ok_or(MutatorError::AnchorOutOfRange {
                index: self.config.anchor_index,
                len: graph.len(),
            })?;

        let mut inserted = 0;
        for copy in 0..self.config.repetitions {
            let nodes = insert_sequence_after(graph, anchor, &payload)?;
            debug!(copy, anchor = %anchor, nodes = nodes.len(), "inserted payload");
            inserted += nodes.len();
        }

        info!(
            anchor = self.config.anchor_index,
            inserted,
            total = graph.len(),
            "applied decoy recipe"
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;

    fn names(isa: &InstructionSet, graph: &Graph) -> Vec<&'static str> {
        graph
            .instructions()
            .iter()
            .map(|inst| isa.name(inst.opcode()).unwrap())
            .collect()
    }

    #[test]
    fn test_insert_after_is_innermost_first() {
        let isa = InstructionSet::python27();
        let mut graph = Decoder::new(&isa).decode(&[100, 0, 0, 83]).unwrap();
        let load = graph.first().unwrap();

        let first = insert_after(&mut graph, load, isa.instruction("NOP", 0).unwrap()).unwrap();
        let second =
            insert_after(&mut graph, load, isa.instruction("ROT_TWO", 0).unwrap()).unwrap();

        assert_eq!(names(&isa, &graph), vec!["LOAD_CONST", "ROT_TWO", "NOP", "RETURN_VALUE"]);
        assert_eq!(graph.next(load), Some(second));
        assert_eq!(graph.next(second), Some(first));
    }

    #[test]
    fn test_insert_sequence_keeps_payload_order() {
        let isa = InstructionSet::python27();
        let mut graph = Decoder::new(&isa).decode(&[100, 0, 0, 83]).unwrap();
        let load = graph.first().unwrap();
        let payload = canonical_payload(&isa).unwrap();

        let nodes = insert_sequence_after(&mut graph, load, &payload).unwrap();

        assert_eq!(nodes.len(), 7);
        assert_eq!(graph.next(load), Some(nodes[0]));
        assert_eq!(
            names(&isa, &graph),
            vec![
                "LOAD_CONST",
                "NOP",
                "ROT_TWO",
                "ROT_TWO",
                "NOP",
                "ROT_THREE",
                "ROT_THREE",
                "ROT_THREE",
                "RETURN_VALUE"
            ]
        );
    }

    #[test]
    fn test_apply_recipe() {
        let isa = InstructionSet::python27();
        // LOAD_CONST 0; LOAD_CONST 1; BUILD_TUPLE 2; RETURN_VALUE
        let code = [100, 0, 0, 100, 1, 0, 102, 2, 0, 83];
        let mut graph = Decoder::new(&isa).decode(&code).unwrap();
        let anchor = graph.nth(1).unwrap();

        let mutator = Mutator::new(&isa, RecipeConfig::default());
        let inserted = mutator.apply(&mut graph).unwrap();

        assert_eq!(inserted, 14);
        assert_eq!(graph.len(), 18);
        assert_eq!(graph.nth(1), Some(anchor));
        assert_eq!(names(&isa, &graph)[2], "NOP");
        assert_eq!(names(&isa, &graph)[16], "BUILD_TUPLE");
    }

    #[test]
    fn test_recipe_does_not_check_live_depth() {
        let isa = InstructionSet::python27();
        // Two values are live after the second LOAD_CONST
        let code = [100, 0, 0, 100, 0, 0, 23, 83];
        let mut graph = Decoder::new(&isa).decode(&code).unwrap();
        let payload = canonical_payload(&isa).unwrap();
        assert!(check_stack_neutral(&isa, &payload, 2).is_err());

        let mutator = Mutator::new(&isa, RecipeConfig::default());
        assert_eq!(mutator.apply(&mut graph), Ok(14));
    }

    #[test]
    fn test_anchor_out_of_range() {
        let isa = InstructionSet::python27();
        let mut graph = Decoder::new(&isa).decode(&[83]).unwrap();
        let mutator = Mutator::new(&isa, RecipeConfig::default());

        assert_eq!(
            mutator.apply(&mut graph),
            Err(MutatorError::AnchorOutOfRange { index: 1, len: 1 })
        );
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_unknown_reference() {
        let isa = InstructionSet::python27();
        let mut graph = Decoder::new(&isa).decode(&[83]).unwrap();
        let other = Decoder::new(&isa).decode(&[83]).unwrap();

        let result = insert_after(&mut graph, other.first().unwrap(), Instruction::simple(9));
        assert!(matches!(result, Err(MutatorError::UnknownNode(_))));
    }
}
