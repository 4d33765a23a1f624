//! Decoding raw instruction bytes into a graph.

use crate::graph::{Graph, NodeId};
use crate::instruction::Instruction;
use crate::opcode::{InstructionSet, JumpKind};
use armor_core::DecodeError;
use std::collections::HashMap;
use tracing::debug;

/// A jump seen during the scan, resolved once every node exists
struct PendingJump {
    source: NodeId,
    offset: usize,
    target: usize,
    kind: JumpKind,
}

pub struct Decoder<'a> {
    isa: &'a InstructionSet,
}

impl<'a> Decoder<'a> {
    pub fn new(isa: &'a InstructionSet) -> Self {
        Self { isa }
    }

    pub fn instruction_set(&self) -> &InstructionSet {
        self.isa
    }

    /// Decode `code` into a graph whose node order mirrors byte order
    pub fn decode(&self, code: &[u8]) -> Result<Graph, DecodeError> {
        let mut graph = Graph::with_capacity(code.len());
        let mut at_offset: HashMap<usize, NodeId> = HashMap::new();
        let mut pending = Vec::new();
        let mut after_extended_arg = false;
        let mut offset = 0;

        while offset < code.len() {
            let opcode = code[offset];
            let info = self
                .isa
                .info(opcode)
                .ok_or(DecodeError::UnknownOpcode { opcode, offset })?;

            let instruction = if opcode >= self.isa.have_argument() {
                if offset + 3 > code.len() {
                    return Err(DecodeError::TruncatedOperand { opcode, offset });
                }
                let operand = u16::from_le_bytes([code[offset + 1], code[offset + 2]]);
                Instruction::with_operand(opcode, operand)
            } else {
                Instruction::simple(opcode)
            };

            let node = graph.push_back(instruction);
            at_offset.insert(offset, node);
            let next_offset = offset + instruction.encoded_len();

            if let Some(kind) = info.jump {
                if after_extended_arg {
                    return Err(DecodeError::ExtendedJump { offset });
                }
                let operand = usize::from(instruction.operand().unwrap_or(0));
                let target = match kind {
                    JumpKind::Absolute => operand,
                    JumpKind::Relative => next_offset + operand,
                };
                pending.push(PendingJump {
                    source: node,
                    offset,
                    target,
                    kind,
                });
            }

            after_extended_arg = self.isa.is_extended_arg(opcode);
            offset = next_offset;
        }

        for jump in &pending {
            let target = at_offset
                .get(&jump.target)
                .copied()
                .ok_or(DecodeError::DanglingJump {
                    offset: jump.offset,
                    target: jump.target,
                })?;
            graph.add_edge(jump.source, target, jump.kind);
        }

        debug!(
            version = %self.isa.version(),
            bytes = code.len(),
            nodes = graph.len(),
            jumps = pending.len(),
            "decoded instruction stream"
        );

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // LOAD_CONST 0; POP_JUMP_IF_FALSE 10; LOAD_CONST 1; RETURN_VALUE;
    // LOAD_CONST 2; RETURN_VALUE
    const BRANCHY: [u8; 14] = [100, 0, 0, 114, 10, 0, 100, 1, 0, 83, 100, 2, 0, 83];

    #[test]
    fn test_decode_simple_stream() {
        let isa = InstructionSet::python27();
        let graph = Decoder::new(&isa).decode(&[100, 0, 0, 83]).unwrap();

        assert_eq!(
            graph.instructions(),
            vec![Instruction::with_operand(100, 0), Instruction::simple(83)]
        );
        assert_eq!(graph.edges().count(), 0);
    }

    #[test]
    fn test_decode_resolves_absolute_jump() {
        let isa = InstructionSet::python27();
        let graph = Decoder::new(&isa).decode(&BRANCHY[..]).unwrap();

        let jump = graph.nth(1).unwrap();
        let target = graph.jump_target(jump).unwrap();
        assert_eq!(graph.nth(4), Some(target));
        assert_eq!(graph.instruction(target), Some(&Instruction::with_operand(100, 2)));
    }

    #[test]
    fn test_decode_resolves_relative_jump() {
        let isa = InstructionSet::python27();
        // JUMP_FORWARD 1; NOP; RETURN_VALUE
        let graph = Decoder::new(&isa).decode(&[110, 1, 0, 9, 83]).unwrap();

        let jump = graph.first().unwrap();
        assert_eq!(graph.jump_target(jump), graph.nth(2));
        let edge = graph.edges().next().unwrap();
        assert_eq!(edge.kind, JumpKind::Relative);
    }

    #[test]
    fn test_truncated_operand() {
        let isa = InstructionSet::python27();
        let result = Decoder::new(&isa).decode(&[9, 100, 0]);
        assert_eq!(
            result.unwrap_err(),
            DecodeError::TruncatedOperand {
                opcode: 100,
                offset: 1
            }
        );
    }

    #[test]
    fn test_unknown_opcode() {
        let isa = InstructionSet::python27();
        let result = Decoder::new(&isa).decode(&[9, 6]);
        assert_eq!(
            result.unwrap_err(),
            DecodeError::UnknownOpcode { opcode: 6, offset: 1 }
        );
    }

    #[test]
    fn test_dangling_jump() {
        let isa = InstructionSet::python27();
        // JUMP_ABSOLUTE 1 lands inside its own operand
        let result = Decoder::new(&isa).decode(&[113, 1, 0, 83]);
        assert_eq!(
            result.unwrap_err(),
            DecodeError::DanglingJump {
                offset: 0,
                target: 1
            }
        );
    }

    #[test]
    fn test_extended_jump_is_rejected() {
        let isa = InstructionSet::python27();
        let result = Decoder::new(&isa).decode(&[145, 1, 0, 113, 0, 0]);
        assert_eq!(result.unwrap_err(), DecodeError::ExtendedJump { offset: 3 });

        // EXTENDED_ARG before an ordinary instruction passes through
        let graph = Decoder::new(&isa).decode(&[145, 1, 0, 100, 0, 0]).unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_empty_stream() {
        let isa = InstructionSet::python27();
        let graph = Decoder::new(&isa).decode(&[]).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.first(), None);
    }
}
