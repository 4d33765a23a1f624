//! CPython instruction sets.
//!
//! Each supported interpreter version gets an [`InstructionSet`] assembled
//! from the constant tables below. The tables are plain data; nothing here is
//! global or mutable, so callers pass the set they resolved explicitly.

use crate::instruction::Instruction;
use armor_core::{Error, MutatorError, PythonVersion};
use serde::{Deserialize, Serialize};

/// Opcodes at or above this value carry a 16-bit operand
pub const HAVE_ARGUMENT: u8 = 90;

/// How a jump instruction encodes its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JumpKind {
    /// Operand is the target's byte offset
    Absolute,
    /// Operand is the distance from the end of the jump instruction
    Relative,
}

/// One entry of an instruction set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub code: u8,
    pub name: &'static str,
    pub jump: Option<JumpKind>,
}

#[derive(Clone, Copy)]
struct Entry {
    code: u8,
    name: &'static str,
    jump: Option<JumpKind>,
    first_minor: u8,
    last_minor: u8,
}

impl Entry {
    const fn minors(self, first_minor: u8, last_minor: u8) -> Self {
        Self {
            first_minor,
            last_minor,
            ..self
        }
    }
}

const fn op(code: u8, name: &'static str) -> Entry {
    Entry {
        code,
        name,
        jump: None,
        first_minor: 0,
        last_minor: u8::MAX,
    }
}

const fn jrel(code: u8, name: &'static str) -> Entry {
    Entry {
        jump: Some(JumpKind::Relative),
        ..op(code, name)
    }
}

const fn jabs(code: u8, name: &'static str) -> Entry {
    Entry {
        jump: Some(JumpKind::Absolute),
        ..op(code, name)
    }
}

const PYTHON2_OPCODES: &[Entry] = &[
    op(0, "STOP_CODE"),
    op(1, "POP_TOP"),
    op(2, "ROT_TWO"),
    op(3, "ROT_THREE"),
    op(4, "DUP_TOP"),
    op(5, "ROT_FOUR"),
    op(9, "NOP"),
    op(10, "UNARY_POSITIVE"),
    op(11, "UNARY_NEGATIVE"),
    op(12, "UNARY_NOT"),
    op(13, "UNARY_CONVERT"),
    op(15, "UNARY_INVERT"),
    op(19, "BINARY_POWER"),
    op(20, "BINARY_MULTIPLY"),
    op(21, "BINARY_DIVIDE"),
    op(22, "BINARY_MODULO"),
    op(23, "BINARY_ADD"),
    op(24, "BINARY_SUBTRACT"),
    op(25, "BINARY_SUBSCR"),
    op(26, "BINARY_FLOOR_DIVIDE"),
    op(27, "BINARY_TRUE_DIVIDE"),
    op(28, "INPLACE_FLOOR_DIVIDE"),
    op(29, "INPLACE_TRUE_DIVIDE"),
    op(30, "SLICE+0"),
    op(31, "SLICE+1"),
    op(32, "SLICE+2"),
    op(33, "SLICE+3"),
    op(40, "STORE_SLICE+0"),
    op(41, "STORE_SLICE+1"),
    op(42, "STORE_SLICE+2"),
    op(43, "STORE_SLICE+3"),
    op(50, "DELETE_SLICE+0"),
    op(51, "DELETE_SLICE+1"),
    op(52, "DELETE_SLICE+2"),
    op(53, "DELETE_SLICE+3"),
    op(54, "STORE_MAP"),
    op(55, "INPLACE_ADD"),
    op(56, "INPLACE_SUBTRACT"),
    op(57, "INPLACE_MULTIPLY"),
    op(58, "INPLACE_DIVIDE"),
    op(59, "INPLACE_MODULO"),
    op(60, "STORE_SUBSCR"),
    op(61, "DELETE_SUBSCR"),
    op(62, "BINARY_LSHIFT"),
    op(63, "BINARY_RSHIFT"),
    op(64, "BINARY_AND"),
    op(65, "BINARY_XOR"),
    op(66, "BINARY_OR"),
    op(67, "INPLACE_POWER"),
    op(68, "GET_ITER"),
    op(70, "PRINT_EXPR"),
    op(71, "PRINT_ITEM"),
    op(72, "PRINT_NEWLINE"),
    op(73, "PRINT_ITEM_TO"),
    op(74, "PRINT_NEWLINE_TO"),
    op(75, "INPLACE_LSHIFT"),
    op(76, "INPLACE_RSHIFT"),
    op(77, "INPLACE_AND"),
    op(78, "INPLACE_XOR"),
    op(79, "INPLACE_OR"),
    op(80, "BREAK_LOOP"),
    op(81, "WITH_CLEANUP"),
    op(82, "LOAD_LOCALS"),
    op(83, "RETURN_VALUE"),
    op(84, "IMPORT_STAR"),
    op(85, "EXEC_STMT"),
    op(86, "YIELD_VALUE"),
    op(87, "POP_BLOCK"),
    op(88, "END_FINALLY"),
    op(89, "BUILD_CLASS"),
    op(90, "STORE_NAME"),
    op(91, "DELETE_NAME"),
    op(92, "UNPACK_SEQUENCE"),
    jrel(93, "FOR_ITER"),
    op(94, "LIST_APPEND"),
    op(95, "STORE_ATTR"),
    op(96, "DELETE_ATTR"),
    op(97, "STORE_GLOBAL"),
    op(98, "DELETE_GLOBAL"),
    op(99, "DUP_TOPX"),
    op(100, "LOAD_CONST"),
    op(101, "LOAD_NAME"),
    op(102, "BUILD_TUPLE"),
    op(103, "BUILD_LIST"),
    op(104, "BUILD_SET"),
    op(105, "BUILD_MAP"),
    op(106, "LOAD_ATTR"),
    op(107, "COMPARE_OP"),
    op(108, "IMPORT_NAME"),
    op(109, "IMPORT_FROM"),
    jrel(110, "JUMP_FORWARD"),
    jabs(111, "JUMP_IF_FALSE_OR_POP"),
    jabs(112, "JUMP_IF_TRUE_OR_POP"),
    jabs(113, "JUMP_ABSOLUTE"),
    jabs(114, "POP_JUMP_IF_FALSE"),
    jabs(115, "POP_JUMP_IF_TRUE"),
    op(116, "LOAD_GLOBAL"),
    jabs(119, "CONTINUE_LOOP"),
    jrel(120, "SETUP_LOOP"),
    jrel(121, "SETUP_EXCEPT"),
    jrel(122, "SETUP_FINALLY"),
    op(124, "LOAD_FAST"),
    op(125, "STORE_FAST"),
    op(126, "DELETE_FAST"),
    op(130, "RAISE_VARARGS"),
    op(131, "CALL_FUNCTION"),
    op(132, "MAKE_FUNCTION"),
    op(133, "BUILD_SLICE"),
    op(134, "MAKE_CLOSURE"),
    op(135, "LOAD_CLOSURE"),
    op(136, "LOAD_DEREF"),
    op(137, "STORE_DEREF"),
    op(140, "CALL_FUNCTION_VAR"),
    op(141, "CALL_FUNCTION_KW"),
    op(142, "CALL_FUNCTION_VAR_KW"),
    jrel(143, "SETUP_WITH"),
    op(145, "EXTENDED_ARG"),
    op(146, "SET_ADD"),
    op(147, "MAP_ADD"),
];

/// Python 3.2 through 3.5, gated by minor version
const PYTHON3_OPCODES: &[Entry] = &[
    op(0, "STOP_CODE").minors(2, 3),
    op(1, "POP_TOP"),
    op(2, "ROT_TWO"),
    op(3, "ROT_THREE"),
    op(4, "DUP_TOP"),
    op(5, "DUP_TOP_TWO"),
    op(9, "NOP"),
    op(10, "UNARY_POSITIVE"),
    op(11, "UNARY_NEGATIVE"),
    op(12, "UNARY_NOT"),
    op(15, "UNARY_INVERT"),
    op(16, "BINARY_MATRIX_MULTIPLY").minors(5, 5),
    op(17, "INPLACE_MATRIX_MULTIPLY").minors(5, 5),
    op(19, "BINARY_POWER"),
    op(20, "BINARY_MULTIPLY"),
    op(22, "BINARY_MODULO"),
    op(23, "BINARY_ADD"),
    op(24, "BINARY_SUBTRACT"),
    op(25, "BINARY_SUBSCR"),
    op(26, "BINARY_FLOOR_DIVIDE"),
    op(27, "BINARY_TRUE_DIVIDE"),
    op(28, "INPLACE_FLOOR_DIVIDE"),
    op(29, "INPLACE_TRUE_DIVIDE"),
    op(50, "GET_AITER").minors(5, 5),
    op(51, "GET_ANEXT").minors(5, 5),
    op(52, "BEFORE_ASYNC_WITH").minors(5, 5),
    op(54, "STORE_MAP").minors(2, 4),
    op(55, "INPLACE_ADD"),
    op(56, "INPLACE_SUBTRACT"),
    op(57, "INPLACE_MULTIPLY"),
    op(59, "INPLACE_MODULO"),
    op(60, "STORE_SUBSCR"),
    op(61, "DELETE_SUBSCR"),
    op(62, "BINARY_LSHIFT"),
    op(63, "BINARY_RSHIFT"),
    op(64, "BINARY_AND"),
    op(65, "BINARY_XOR"),
    op(66, "BINARY_OR"),
    op(67, "INPLACE_POWER"),
    op(68, "GET_ITER"),
    op(69, "STORE_LOCALS").minors(2, 3),
    op(69, "GET_YIELD_FROM_ITER").minors(5, 5),
    op(70, "PRINT_EXPR"),
    op(71, "LOAD_BUILD_CLASS"),
    op(72, "YIELD_FROM").minors(3, 5),
    op(73, "GET_AWAITABLE").minors(5, 5),
    op(75, "INPLACE_LSHIFT"),
    op(76, "INPLACE_RSHIFT"),
    op(77, "INPLACE_AND"),
    op(78, "INPLACE_XOR"),
    op(79, "INPLACE_OR"),
    op(80, "BREAK_LOOP"),
    op(81, "WITH_CLEANUP").minors(2, 4),
    op(81, "WITH_CLEANUP_START").minors(5, 5),
    op(82, "WITH_CLEANUP_FINISH").minors(5, 5),
    op(83, "RETURN_VALUE"),
    op(84, "IMPORT_STAR"),
    op(86, "YIELD_VALUE"),
    op(87, "POP_BLOCK"),
    op(88, "END_FINALLY"),
    op(89, "POP_EXCEPT"),
    op(90, "STORE_NAME"),
    op(91, "DELETE_NAME"),
    op(92, "UNPACK_SEQUENCE"),
    jrel(93, "FOR_ITER"),
    op(94, "UNPACK_EX"),
    op(95, "STORE_ATTR"),
    op(96, "DELETE_ATTR"),
    op(97, "STORE_GLOBAL"),
    op(98, "DELETE_GLOBAL"),
    op(100, "LOAD_CONST"),
    op(101, "LOAD_NAME"),
    op(102, "BUILD_TUPLE"),
    op(103, "BUILD_LIST"),
    op(104, "BUILD_SET"),
    op(105, "BUILD_MAP"),
    op(106, "LOAD_ATTR"),
    op(107, "COMPARE_OP"),
    op(108, "IMPORT_NAME"),
    op(109, "IMPORT_FROM"),
    jrel(110, "JUMP_FORWARD"),
    jabs(111, "JUMP_IF_FALSE_OR_POP"),
    jabs(112, "JUMP_IF_TRUE_OR_POP"),
    jabs(113, "JUMP_ABSOLUTE"),
    jabs(114, "POP_JUMP_IF_FALSE"),
    jabs(115, "POP_JUMP_IF_TRUE"),
    op(116, "LOAD_GLOBAL"),
    jabs(119, "CONTINUE_LOOP"),
    jrel(120, "SETUP_LOOP"),
    jrel(121, "SETUP_EXCEPT"),
    jrel(122, "SETUP_FINALLY"),
    op(124, "LOAD_FAST"),
    op(125, "STORE_FAST"),
    op(126, "DELETE_FAST"),
    op(130, "RAISE_VARARGS"),
    op(131, "CALL_FUNCTION"),
    op(132, "MAKE_FUNCTION"),
    op(133, "BUILD_SLICE"),
    op(134, "MAKE_CLOSURE"),
    op(135, "LOAD_CLOSURE"),
    op(136, "LOAD_DEREF"),
    op(137, "STORE_DEREF"),
    op(138, "DELETE_DEREF"),
    op(140, "CALL_FUNCTION_VAR"),
    op(141, "CALL_FUNCTION_KW"),
    op(142, "CALL_FUNCTION_VAR_KW"),
    jrel(143, "SETUP_WITH"),
    op(144, "EXTENDED_ARG"),
    op(145, "LIST_APPEND"),
    op(146, "SET_ADD"),
    op(147, "MAP_ADD"),
    op(148, "LOAD_CLASSDEREF").minors(4, 5),
    op(149, "BUILD_LIST_UNPACK").minors(5, 5),
    op(150, "BUILD_MAP_UNPACK").minors(5, 5),
    op(151, "BUILD_MAP_UNPACK_WITH_CALL").minors(5, 5),
    op(152, "BUILD_TUPLE_UNPACK").minors(5, 5),
    op(153, "BUILD_SET_UNPACK").minors(5, 5),
    jrel(154, "SETUP_ASYNC_WITH").minors(5, 5),
];

/// The opcode table of one interpreter version
#[derive(Debug, Clone)]
pub struct InstructionSet {
    version: PythonVersion,
    ops: Vec<Option<OpcodeInfo>>,
}

impl InstructionSet {
    /// Resolve the instruction set for an interpreter version.
    ///
    /// Only fixed-width encodings are supported: Python 2.7 and 3.2 to 3.5.
    /// Python 3.6 switched to two-byte wordcode and is rejected.
    pub fn for_version(version: PythonVersion) -> armor_core::Result<Self> {
        match (version.major, version.minor) {
            (2, 7) => Ok(Self::from_table(version, PYTHON2_OPCODES)),
            (3, 2..=5) => Ok(Self::from_table(version, PYTHON3_OPCODES)),
            _ => Err(Error::UnsupportedVersion(format!("python {}", version))),
        }
    }

    pub fn python27() -> Self {
        Self::from_table(PythonVersion::new(2, 7), PYTHON2_OPCODES)
    }

    fn from_table(version: PythonVersion, table: &[Entry]) -> Self {
        let mut ops = vec![None; 256];
        for entry in table {
            if version.minor < entry.first_minor || version.minor > entry.last_minor {
                continue;
            }
            ops[entry.code as usize] = Some(OpcodeInfo {
                code: entry.code,
                name: entry.name,
                jump: entry.jump,
            });
        }
        Self { version, ops }
    }

    pub fn version(&self) -> PythonVersion {
        self.version
    }

    pub fn have_argument(&self) -> u8 {
        HAVE_ARGUMENT
    }

    pub fn info(&self, opcode: u8) -> Option<&OpcodeInfo> {
        self.ops[opcode as usize].as_ref()
    }

    pub fn contains(&self, opcode: u8) -> bool {
        self.info(opcode).is_some()
    }

    pub fn name(&self, opcode: u8) -> Option<&'static str> {
        self.info(opcode).map(|info| info.name)
    }

    pub fn opcode(&self, name: &str) -> Option<u8> {
        self.ops.iter().flatten().find(|info| info.name == name).map(|info| info.code)
    }

    pub fn jump_kind(&self, opcode: u8) -> Option<JumpKind> {
        self.info(opcode).and_then(|info| info.jump)
    }

    pub fn is_extended_arg(&self, opcode: u8) -> bool {
        self.name(opcode) == Some("EXTENDED_ARG")
    }

    /// Number of opcodes defined for this version
    pub fn len(&self) -> usize {
        self.ops.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build an instruction by mnemonic. `arg` is used only when the opcode
    /// takes an operand.
    pub fn instruction(&self, name: &str, arg: u16) -> Result<Instruction, MutatorError> {
        let code = self
            .opcode(name)
            .ok_or_else(|| MutatorError::UnknownMnemonic(name.to_string()))?;
        if code >= HAVE_ARGUMENT {
            Ok(Instruction::with_operand(code, arg))
        } else {
            Ok(Instruction::simple(code))
        }
    }

    /// Net stack effect of an instruction on its fall-through path.
    ///
    /// Returns `None` for opcodes outside this set.
    pub fn stack_effect(&self, instruction: &Instruction) -> Option<i32> {
        let name = self.name(instruction.opcode())?;
        let arg = i32::from(instruction.operand().unwrap_or(0));
        let python2 = self.version.major == 2;
        let nargs = (arg & 0xff) + 2 * ((arg >> 8) & 0xff);

        let effect = match name {
            "STOP_CODE" | "NOP" | "ROT_TWO" | "ROT_THREE" | "ROT_FOUR" => 0,
            "POP_TOP" => -1,
            "DUP_TOP" => 1,
            "DUP_TOP_TWO" => 2,
            "DUP_TOPX" => arg,
            "EXTENDED_ARG" => 0,

            "UNARY_POSITIVE" | "UNARY_NEGATIVE" | "UNARY_NOT" | "UNARY_CONVERT"
            | "UNARY_INVERT" | "GET_ITER" | "GET_YIELD_FROM_ITER" | "GET_AITER"
            | "GET_AWAITABLE" => 0,

            "SLICE+0" => 0,
            "SLICE+1" | "SLICE+2" => -1,
            "SLICE+3" => -2,
            "STORE_SLICE+0" => -2,
            "STORE_SLICE+1" | "STORE_SLICE+2" => -3,
            "STORE_SLICE+3" => -4,
            "DELETE_SLICE+0" => -1,
            "DELETE_SLICE+1" | "DELETE_SLICE+2" => -2,
            "DELETE_SLICE+3" => -3,

            "STORE_SUBSCR" => -3,
            "STORE_MAP" | "DELETE_SUBSCR" => -2,
            "PRINT_EXPR" | "PRINT_ITEM" => -1,
            "PRINT_NEWLINE" => 0,
            "PRINT_ITEM_TO" => -2,
            "PRINT_NEWLINE_TO" => -1,

            "BREAK_LOOP" | "POP_BLOCK" | "POP_EXCEPT" | "YIELD_VALUE" => 0,
            "WITH_CLEANUP" | "WITH_CLEANUP_FINISH" => -1,
            "WITH_CLEANUP_START" => 1,
            "LOAD_LOCALS" | "LOAD_BUILD_CLASS" | "GET_ANEXT" | "BEFORE_ASYNC_WITH" => 1,
            "STORE_LOCALS" | "RETURN_VALUE" | "IMPORT_STAR" | "YIELD_FROM" => -1,
            "EXEC_STMT" => -3,
            "END_FINALLY" => {
                if python2 {
                    -3
                } else {
                    -1
                }
            }
            "BUILD_CLASS" => -2,

            "STORE_NAME" | "STORE_GLOBAL" | "STORE_FAST" | "STORE_DEREF" => -1,
            "DELETE_NAME" | "DELETE_GLOBAL" | "DELETE_FAST" | "DELETE_DEREF" => 0,
            "STORE_ATTR" => -2,
            "DELETE_ATTR" => -1,
            "UNPACK_SEQUENCE" => arg - 1,
            "UNPACK_EX" => (arg & 0xff) + (arg >> 8),
            "FOR_ITER" => 1,
            "LIST_APPEND" | "SET_ADD" => -1,
            "MAP_ADD" => -2,

            "LOAD_CONST" | "LOAD_NAME" | "LOAD_GLOBAL" | "LOAD_FAST" | "LOAD_CLOSURE"
            | "LOAD_DEREF" | "LOAD_CLASSDEREF" | "IMPORT_FROM" => 1,
            "LOAD_ATTR" => 0,
            "COMPARE_OP" | "IMPORT_NAME" => -1,

            "BUILD_TUPLE" | "BUILD_LIST" | "BUILD_SET" | "BUILD_LIST_UNPACK"
            | "BUILD_TUPLE_UNPACK" | "BUILD_SET_UNPACK" | "BUILD_MAP_UNPACK" => 1 - arg,
            "BUILD_MAP_UNPACK_WITH_CALL" => 1 - (arg & 0xff),
            "BUILD_MAP" => {
                if self.version >= PythonVersion::new(3, 5) {
                    1 - 2 * arg
                } else {
                    1
                }
            }
            "BUILD_SLICE" => {
                if arg == 3 {
                    -2
                } else {
                    -1
                }
            }

            "JUMP_FORWARD" | "JUMP_ABSOLUTE" | "CONTINUE_LOOP" => 0,
            "JUMP_IF_FALSE_OR_POP" | "JUMP_IF_TRUE_OR_POP" => -1,
            "POP_JUMP_IF_FALSE" | "POP_JUMP_IF_TRUE" => -1,
            "SETUP_LOOP" | "SETUP_EXCEPT" | "SETUP_FINALLY" | "SETUP_ASYNC_WITH" => 0,
            "SETUP_WITH" => 1,

            "RAISE_VARARGS" => -arg,
            "CALL_FUNCTION" => -nargs,
            "CALL_FUNCTION_VAR" | "CALL_FUNCTION_KW" => -nargs - 1,
            "CALL_FUNCTION_VAR_KW" => -nargs - 2,
            "MAKE_FUNCTION" => {
                if python2 {
                    -arg
                } else if self.version >= PythonVersion::new(3, 3) {
                    -1 - nargs
                } else {
                    -nargs
                }
            }
            "MAKE_CLOSURE" => {
                if python2 {
                    -arg - 1
                } else if self.version >= PythonVersion::new(3, 3) {
                    -2 - nargs
                } else {
                    -1 - nargs
                }
            }
            _ => return None,
        };
        Some(effect)
    }
}
