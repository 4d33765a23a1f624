//! Code objects.

use crate::value::{StrKind, Value};
use armor_core::CodeShell;
use std::fmt;

/// How the instruction string of a code object was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeTag {
    pub kind: StrKind,
    pub flagged: bool,
}

impl Default for CodeTag {
    fn default() -> Self {
        Self {
            kind: StrKind::Bytes,
            flagged: false,
        }
    }
}

/// A marshalled code object.
///
/// Everything except the instruction string is kept as read, including
/// nested code objects inside `consts`.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    pub argcount: i32,
    /// Present only in the Python 3 layout
    pub kwonlyargcount: Option<i32>,
    pub nlocals: i32,
    pub stacksize: i32,
    pub flags: i32,
    pub code: Vec<u8>,
    pub code_tag: CodeTag,
    pub consts: Value,
    pub names: Value,
    pub varnames: Value,
    pub freevars: Value,
    pub cellvars: Value,
    pub filename: Value,
    pub name: Value,
    pub firstlineno: i32,
    pub lnotab: Value,
}

impl CodeObject {
    /// Number of entries in `consts`, if it is a plain tuple
    pub fn const_count(&self) -> Option<usize> {
        match self.consts.unflagged() {
            Value::Tuple(items) | Value::SmallTuple(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Code objects nested directly in `consts`
    pub fn nested(&self) -> impl Iterator<Item = &CodeObject> {
        let items: &[Value] = match self.consts.unflagged() {
            Value::Tuple(items) | Value::SmallTuple(items) => items,
            _ => &[],
        };
        items.iter().filter_map(Value::as_code)
    }
}

impl CodeShell for CodeObject {
    fn code(&self) -> &[u8] {
        &self.code
    }

    fn with_code(&self, code: Vec<u8>) -> Self {
        Self {
            code,
            ..self.clone()
        }
    }
}

impl fmt::Display for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "code object {}", self.name)?;
        writeln!(f, "  filename:    {}", self.filename)?;
        writeln!(f, "  firstlineno: {}", self.firstlineno)?;
        write!(f, "  argcount:    {}", self.argcount)?;
        if let Some(kwonly) = self.kwonlyargcount {
            write!(f, " (+{} keyword-only)", kwonly)?;
        }
        writeln!(f)?;
        writeln!(f, "  nlocals:     {}", self.nlocals)?;
        writeln!(f, "  stacksize:   {}", self.stacksize)?;
        writeln!(f, "  flags:       {:#06x}", self.flags)?;
        write!(f, "  code:        {} bytes", self.code.len())?;
        if let Some(consts) = self.const_count() {
            write!(f, "\n  consts:      {}", consts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(code: &[u8]) -> CodeObject {
        let text = |s: &str| Value::Str(StrKind::Interned, s.as_bytes().to_vec());
        CodeObject {
            argcount: 0,
            kwonlyargcount: None,
            nlocals: 0,
            stacksize: 1,
            flags: 0x40,
            code: code.to_vec(),
            code_tag: CodeTag::default(),
            consts: Value::Tuple(vec![Value::None]),
            names: Value::Tuple(vec![]),
            varnames: Value::Tuple(vec![]),
            freevars: Value::Tuple(vec![]),
            cellvars: Value::Tuple(vec![]),
            filename: text("demo.py"),
            name: text("<module>"),
            firstlineno: 1,
            lnotab: Value::Str(StrKind::Bytes, vec![]),
        }
    }

    #[test]
    fn test_with_code_only_replaces_instructions() {
        let original = sample(&[100, 0, 0, 83]);
        let rebuilt = original.with_code(vec![9, 83]);

        assert_eq!(rebuilt.code(), &[9, 83]);
        assert_eq!(rebuilt.consts, original.consts);
        assert_eq!(rebuilt.name, original.name);
        assert_eq!(rebuilt.code_tag, original.code_tag);
        assert_eq!(original.code(), &[100, 0, 0, 83]);
    }

    #[test]
    fn test_summary() {
        let summary = sample(&[100, 0, 0, 83]).to_string();
        assert!(summary.starts_with("code object <module>"));
        assert!(summary.contains("demo.py"));
        assert!(summary.contains("4 bytes"));
        assert!(summary.contains("consts:      1"));
    }

    #[test]
    fn test_nested_code_objects() {
        let mut outer = sample(&[83]);
        outer.consts = Value::Tuple(vec![
            Value::None,
            Value::Code(Box::new(sample(&[100, 0, 0, 83]))),
        ]);
        let nested: Vec<_> = outer.nested().collect();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].code.len(), 4);
    }
}
