//! Linearizing a graph back into instruction bytes.

use crate::graph::{Graph, NodeId};
use crate::opcode::JumpKind;
use armor_core::{CodeShell, EncodeError};
use std::collections::HashMap;
use tracing::debug;

/// The terminal form of a graph: final bytes plus the layout they came from
#[derive(Debug, Clone)]
pub struct Linearized {
    bytes: Vec<u8>,
    order: Vec<NodeId>,
    offsets: HashMap<NodeId, usize>,
}

impl Linearized {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Final byte offset of a node
    pub fn offset_of(&self, node: NodeId) -> Option<usize> {
        self.offsets.get(&node).copied()
    }

    /// Nodes in the order they were emitted
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn instruction_count(&self) -> usize {
        self.order.len()
    }
}

/// Assign final offsets, re-resolve every jump and emit the byte stream.
///
/// Consumes the graph: once linearized it accepts no further mutation.
pub fn linearize(graph: Graph) -> Result<Linearized, EncodeError> {
    // Fixed-width operands: one pass yields final offsets.
    let mut order = Vec::with_capacity(graph.len());
    let mut offsets = HashMap::with_capacity(graph.len());
    let mut instructions = Vec::with_capacity(graph.len());
    let mut offset = 0;
    for (node, instruction) in graph.iter() {
        order.push(node);
        offsets.insert(node, offset);
        instructions.push(*instruction);
        offset += instruction.encoded_len();
    }

    let mut position: HashMap<NodeId, usize> = HashMap::with_capacity(order.len());
    for (i, node) in order.iter().enumerate() {
        position.insert(*node, i);
    }

    for edge in graph.edges() {
        let target_offset = offsets
            .get(&edge.target)
            .copied()
            .ok_or_else(|| EncodeError::DanglingTarget {
                jump: edge.source.to_string(),
                target: edge.target.to_string(),
            })?;
        let (jump_offset, slot) = match (offsets.get(&edge.source), position.get(&edge.source)) {
            (Some(&jump_offset), Some(&slot)) => (jump_offset, slot),
            _ => {
                return Err(EncodeError::DanglingTarget {
                    jump: edge.source.to_string(),
                    target: edge.target.to_string(),
                })
            }
        };

        let jump = instructions[slot];
        let value = match edge.kind {
            JumpKind::Absolute => target_offset,
            JumpKind::Relative => {
                let origin = jump_offset + jump.encoded_len();
                target_offset
                    .checked_sub(origin)
                    .ok_or_else(|| EncodeError::NegativeRelativeJump {
                        jump: edge.source.to_string(),
                    })?
            }
        };
        let operand = u16::try_from(value).map_err(|_| EncodeError::OperandOverflow {
            jump: edge.source.to_string(),
            value,
        })?;
        instructions[slot] = jump.retarget(operand);
    }

    let mut bytes = Vec::with_capacity(offset);
    for instruction in &instructions {
        instruction.encode_into(&mut bytes);
    }

    debug!(
        nodes = order.len(),
        bytes = bytes.len(),
        jumps = graph.edges().count(),
        "linearized graph"
    );

    Ok(Linearized {
        bytes,
        order,
        offsets,
    })
}

/// Linearize `graph` and rebuild `shell` around the new instruction bytes
pub fn encode<S: CodeShell>(graph: Graph, shell: &S) -> Result<S, EncodeError> {
    let linearized = linearize(graph)?;
    Ok(shell.with_code(linearized.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::instruction::Instruction;
    use crate::mutator::insert_after;
    use crate::opcode::InstructionSet;

    #[derive(Debug, Clone, PartialEq)]
    struct FakeShell {
        code: Vec<u8>,
        names: Vec<String>,
    }

    impl CodeShell for FakeShell {
        fn code(&self) -> &[u8] {
            &self.code
        }

        fn with_code(&self, code: Vec<u8>) -> Self {
            Self {
                code,
                names: self.names.clone(),
            }
        }
    }

    #[test]
    fn test_unmodified_graph_round_trips() {
        let isa = InstructionSet::python27();
        // SETUP_LOOP 10; LOAD_NAME 0; POP_JUMP_IF_FALSE 12; JUMP_ABSOLUTE 3;
        // POP_BLOCK; LOAD_CONST 0; RETURN_VALUE
        let code = vec![
            120, 10, 0, 101, 0, 0, 114, 12, 0, 113, 3, 0, 87, 100, 0, 0, 83,
        ];
        let graph = Decoder::new(&isa).decode(&code).unwrap();
        let linearized = linearize(graph).unwrap();
        assert_eq!(linearized.bytes(), &code[..]);
        assert_eq!(linearized.instruction_count(), 7);
    }

    #[test]
    fn test_jumps_follow_inserted_nodes() {
        let isa = InstructionSet::python27();
        // JUMP_FORWARD 3; LOAD_CONST 0; RETURN_VALUE
        let code = vec![110, 3, 0, 100, 0, 0, 83];
        let mut graph = Decoder::new(&isa).decode(&code).unwrap();
        let first = graph.first().unwrap();
        let load = graph.nth(1).unwrap();
        let ret = graph.last().unwrap();

        insert_after(&mut graph, first, Instruction::simple(9)).unwrap();
        insert_after(&mut graph, load, Instruction::simple(9)).unwrap();

        let linearized = linearize(graph).unwrap();
        assert_eq!(linearized.offset_of(ret), Some(8));
        // The forward jump now skips one NOP, the LOAD_CONST and another NOP
        assert_eq!(linearized.bytes(), &[110, 5, 0, 9, 100, 0, 0, 9, 83][..]);
        assert_eq!(linearized.offset_of(load), Some(4));
    }

    #[test]
    fn test_encode_rebuilds_shell() {
        let isa = InstructionSet::python27();
        let shell = FakeShell {
            code: vec![100, 0, 0, 83],
            names: vec!["x".to_string()],
        };
        let mut graph = Decoder::new(&isa).decode(shell.code()).unwrap();
        let first = graph.first().unwrap();
        insert_after(&mut graph, first, Instruction::simple(9)).unwrap();

        let rebuilt = encode(graph, &shell).unwrap();
        assert_eq!(rebuilt.code, vec![100, 0, 0, 9, 83]);
        assert_eq!(rebuilt.names, shell.names);
    }

    #[test]
    fn test_absolute_operand_overflow() {
        let isa = InstructionSet::python27();
        // JUMP_ABSOLUTE 3; RETURN_VALUE, padded until the target sits past 0xffff
        let code = vec![113, 3, 0, 83];
        let mut graph = Decoder::new(&isa).decode(&code).unwrap();
        let first = graph.first().unwrap();
        for _ in 0..0x10000 {
            insert_after(&mut graph, first, Instruction::simple(9)).unwrap();
        }

        let err = linearize(graph).unwrap_err();
        assert!(matches!(err, EncodeError::OperandOverflow { value: 0x10003, .. }));
    }
}
