//! Single CPython instructions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single instruction: an opcode and, for opcodes at or above
/// `HAVE_ARGUMENT`, a 16-bit operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    opcode: u8,
    operand: Option<u16>,
}

impl Instruction {
    pub fn new(opcode: u8, operand: Option<u16>) -> Self {
        Self { opcode, operand }
    }

    /// An instruction without operand
    pub fn simple(opcode: u8) -> Self {
        Self {
            opcode,
            operand: None,
        }
    }

    pub fn with_operand(opcode: u8, operand: u16) -> Self {
        Self {
            opcode,
            operand: Some(operand),
        }
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn operand(&self) -> Option<u16> {
        self.operand
    }

    pub fn has_operand(&self) -> bool {
        self.operand.is_some()
    }

    /// Same opcode, different operand. Used when jumps are re-resolved.
    pub fn retarget(&self, operand: u16) -> Self {
        Self::with_operand(self.opcode, operand)
    }

    /// Encoded size in bytes: 1, or 3 with an operand
    pub fn encoded_len(&self) -> usize {
        if self.operand.is_some() {
            3
        } else {
            1
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode);
        if let Some(operand) = self.operand {
            out.extend_from_slice(&operand.to_le_bytes());
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Some(operand) => write!(f, "{} {}", self.opcode, operand),
            None => write!(f, "{}", self.opcode),
        }
    }
}
