//! Reader and writer for CPython's marshal format.
//!
//! Values keep their exact wire representation (type code, reference flag,
//! interned-string back references) so that writing a value read from a file
//! reproduces the original bytes.

pub mod code;
pub mod reader;
pub mod value;
pub mod writer;

use armor_core::MarshalError;
use std::{panic, thread};

pub use code::CodeObject;
pub use reader::{load, Reader, MAX_DEPTH};
pub use value::{StrKind, Value};
pub use writer::{dump, Writer};

/// Stack reserved for the recursive reader and writer. Values nested
/// [`MAX_DEPTH`] deep fit with room to spare in unoptimized builds.
pub const CODEC_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Run `task` on a scoped thread with [`CODEC_STACK_SIZE`] bytes of stack,
/// independent of the caller's own stack
pub(crate) fn with_codec_stack<T, F>(task: F) -> Result<T, MarshalError>
where
    T: Send,
    F: FnOnce() -> Result<T, MarshalError> + Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("marshal-codec".into())
            .stack_size(CODEC_STACK_SIZE)
            .spawn_scoped(scope, task)?;
        handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
    })
}

/// Wire dialect, chosen by the interpreter major version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Python2,
    Python3,
}

impl Dialect {
    pub fn for_version(version: armor_core::PythonVersion) -> Self {
        if version.major >= 3 {
            Dialect::Python3
        } else {
            Dialect::Python2
        }
    }
}

pub(crate) mod tag {
    pub const NULL: u8 = b'0';
    pub const NONE: u8 = b'N';
    pub const FALSE: u8 = b'F';
    pub const TRUE: u8 = b'T';
    pub const STOPITER: u8 = b'S';
    pub const ELLIPSIS: u8 = b'.';
    pub const INT: u8 = b'i';
    pub const INT64: u8 = b'I';
    pub const FLOAT: u8 = b'f';
    pub const BINARY_FLOAT: u8 = b'g';
    pub const COMPLEX: u8 = b'x';
    pub const BINARY_COMPLEX: u8 = b'y';
    pub const LONG: u8 = b'l';
    pub const STRING: u8 = b's';
    pub const INTERNED: u8 = b't';
    pub const STRINGREF: u8 = b'R';
    pub const REF: u8 = b'r';
    pub const UNICODE: u8 = b'u';
    pub const ASCII: u8 = b'a';
    pub const ASCII_INTERNED: u8 = b'A';
    pub const SHORT_ASCII: u8 = b'z';
    pub const SHORT_ASCII_INTERNED: u8 = b'Z';
    pub const TUPLE: u8 = b'(';
    pub const SMALL_TUPLE: u8 = b')';
    pub const LIST: u8 = b'[';
    pub const DICT: u8 = b'{';
    pub const CODE: u8 = b'c';
    pub const SET: u8 = b'<';
    pub const FROZENSET: u8 = b'>';
    pub const FLAG_REF: u8 = 0x80;
}
