use crate::code::CodeObject;
use crate::tag;
use std::fmt;

/// Which string type code a string was stored under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrKind {
    /// `s`: byte string (py2 `str`, py3 `bytes`)
    Bytes,
    /// `t`: interned string
    Interned,
    /// `u`: UTF-8 text
    Unicode,
    /// `a`
    Ascii,
    /// `A`
    AsciiInterned,
    /// `z`, one-byte length
    ShortAscii,
    /// `Z`, one-byte length
    ShortAsciiInterned,
}

impl StrKind {
    pub(crate) fn from_tag(code: u8) -> Option<Self> {
        let kind = match code {
            tag::STRING => StrKind::Bytes,
            tag::INTERNED => StrKind::Interned,
            tag::UNICODE => StrKind::Unicode,
            tag::ASCII => StrKind::Ascii,
            tag::ASCII_INTERNED => StrKind::AsciiInterned,
            tag::SHORT_ASCII => StrKind::ShortAscii,
            tag::SHORT_ASCII_INTERNED => StrKind::ShortAsciiInterned,
            _ => return None,
        };
        Some(kind)
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            StrKind::Bytes => tag::STRING,
            StrKind::Interned => tag::INTERNED,
            StrKind::Unicode => tag::UNICODE,
            StrKind::Ascii => tag::ASCII,
            StrKind::AsciiInterned => tag::ASCII_INTERNED,
            StrKind::ShortAscii => tag::SHORT_ASCII,
            StrKind::ShortAsciiInterned => tag::SHORT_ASCII_INTERNED,
        }
    }

    /// Length prefix is a single byte instead of an `i32`
    pub(crate) fn is_short(self) -> bool {
        matches!(self, StrKind::ShortAscii | StrKind::ShortAsciiInterned)
    }
}

/// A marshalled object in its exact wire form.
///
/// Reference bookkeeping is not resolved: `Ref` and `StringRef` keep the
/// index they were written with, and `Flagged` marks objects that were stored
/// with the reference flag set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    None,
    False,
    True,
    StopIteration,
    Ellipsis,
    Int(i32),
    Int64(i64),
    /// Arbitrary precision integer: signed digit count, 15-bit digits
    Long { size: i32, digits: Vec<u16> },
    /// Float stored as its decimal repr
    Float(Vec<u8>),
    /// Float stored as IEEE 754 bits
    BinaryFloat(u64),
    Complex { real: Vec<u8>, imag: Vec<u8> },
    BinaryComplex { real: u64, imag: u64 },
    Str(StrKind, Vec<u8>),
    /// Back reference into the interned string table (Python 2)
    StringRef(u32),
    /// Back reference to a flagged object (Python 3.4+)
    Ref(u32),
    Tuple(Vec<Value>),
    SmallTuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    Code(Box<CodeObject>),
    Flagged(Box<Value>),
}

impl Value {
    /// Strip any reference flag
    pub fn unflagged(&self) -> &Value {
        match self {
            Value::Flagged(inner) => inner.unflagged(),
            other => other,
        }
    }

    pub fn unflagged_mut(&mut self) -> &mut Value {
        match self {
            Value::Flagged(inner) => inner.unflagged_mut(),
            other => other,
        }
    }

    pub fn is_flagged(&self) -> bool {
        matches!(self, Value::Flagged(_))
    }

    pub fn as_code(&self) -> Option<&CodeObject> {
        match self.unflagged() {
            Value::Code(code) => Some(code),
            _ => None,
        }
    }

    pub fn as_code_mut(&mut self) -> Option<&mut CodeObject> {
        match self.unflagged_mut() {
            Value::Code(code) => Some(code),
            _ => None,
        }
    }

    /// Take the code object out of this value, dropping any reference flag
    pub fn into_code(self) -> Option<CodeObject> {
        match self {
            Value::Flagged(inner) => inner.into_code(),
            Value::Code(code) => Some(*code),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self.unflagged() {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// String payload of any string kind
    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self.unflagged() {
            Value::Str(_, data) => Some(data),
            _ => None,
        }
    }

    /// Short name of the wire type, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::None => "None",
            Value::False | Value::True => "bool",
            Value::StopIteration => "StopIteration",
            Value::Ellipsis => "Ellipsis",
            Value::Int(_) | Value::Int64(_) | Value::Long { .. } => "int",
            Value::Float(_) | Value::BinaryFloat(_) => "float",
            Value::Complex { .. } | Value::BinaryComplex { .. } => "complex",
            Value::Str(StrKind::Bytes, _) => "bytes",
            Value::Str(..) => "str",
            Value::StringRef(_) => "string reference",
            Value::Ref(_) => "reference",
            Value::Tuple(_) | Value::SmallTuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Code(_) => "code",
            Value::Flagged(inner) => inner.kind(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unflagged() {
            Value::Str(_, data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Value::Int(value) => write!(f, "{}", value),
            Value::Int64(value) => write!(f, "{}", value),
            Value::StringRef(index) => write!(f, "<interned #{}>", index),
            Value::Ref(index) => write!(f, "<ref #{}>", index),
            Value::Code(code) => write!(f, "<code object {}>", code.name),
            other => write!(f, "<{}>", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_code_drops_the_flag() {
        let code = crate::code::tests::sample(&[100, 0, 0, 83]);
        let flagged = Value::Flagged(Box::new(Value::Code(Box::new(code.clone()))));
        assert_eq!(flagged.into_code(), Some(code));
        assert_eq!(Value::None.into_code(), None);
    }

    #[test]
    fn test_flag_is_transparent_to_accessors() {
        let value = Value::Flagged(Box::new(Value::Str(StrKind::ShortAscii, b"foo".to_vec())));
        assert!(value.is_flagged());
        assert_eq!(value.as_str_bytes(), Some(&b"foo"[..]));
        assert_eq!(value.kind(), "str");
        assert_eq!(value.to_string(), "foo");
    }

    #[test]
    fn test_str_kind_tags() {
        for code in b"stuaAzZ" {
            let kind = StrKind::from_tag(*code).unwrap();
            assert_eq!(kind.tag(), *code);
        }
        assert!(StrKind::from_tag(b'i').is_none());
        assert!(StrKind::Bytes.tag() == b's' && !StrKind::Bytes.is_short());
    }
}
