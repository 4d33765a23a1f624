//! Bytecode graph engine.
//!
//! Turns a flat CPython instruction stream into an addressable graph,
//! splices stack-neutral instructions into it, and linearizes it back into
//! bytes with every jump re-resolved against its target node.
//! The graph engine is:
//! - Identity based: jumps point at nodes, never at offsets
//! - Append only: nodes are inserted, never removed
//! - Byte exact: an unmodified graph encodes to its input

pub mod decoder;
pub mod encoder;
pub mod graph;
pub mod instruction;
pub mod mutator;
pub mod opcode;
pub mod validation;

pub use decoder::Decoder;
pub use encoder::{encode, linearize, Linearized};
pub use graph::{Graph, GraphState, JumpEdge, NodeId};
pub use instruction::Instruction;
pub use mutator::{canonical_payload, insert_after, insert_sequence_after, Mutator};
pub use opcode::{InstructionSet, JumpKind, OpcodeInfo};
pub use validation::check_stack_neutral;
