//! Marshal deserialization.

use crate::code::{CodeObject, CodeTag};
use crate::tag;
use crate::value::{StrKind, Value};
use crate::{with_codec_stack, Dialect};
use armor_core::MarshalError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};
use tracing::trace;

/// Nesting limit, matching the interpreter's marshal stack depth
pub const MAX_DEPTH: usize = 2000;

/// Read exactly one value from `data`, rejecting leftover bytes
pub fn load(data: &[u8], dialect: Dialect) -> Result<Value, MarshalError> {
    let mut reader = Reader::new(data, dialect);
    let value = reader.read_value()?;
    match reader.remaining() {
        0 => Ok(value),
        n => Err(MarshalError::TrailingData(n)),
    }
}

/// Streaming marshal reader over a byte slice
pub struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
    dialect: Dialect,
    /// Interned strings seen so far (Python 2 `R` targets)
    interned: u32,
    /// Flagged objects seen so far (Python 3 `r` targets)
    flagged: u32,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], dialect: Dialect) -> Self {
        Self {
            cursor: Cursor::new(data),
            dialect,
            interned: 0,
            flagged: 0,
            depth: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    /// Read the next value. Recursion runs on a dedicated codec stack, so
    /// the caller's stack size does not bound the accepted nesting.
    pub fn read_value(&mut self) -> Result<Value, MarshalError> {
        with_codec_stack(|| self.value())
    }

    fn value(&mut self) -> Result<Value, MarshalError> {
        if self.depth >= MAX_DEPTH {
            return Err(MarshalError::UnexpectedValue {
                expected: "nesting shallower than the marshal depth limit",
                found: format!("depth {}", self.depth),
            });
        }
        self.depth += 1;
        let value = self.read_tagged();
        self.depth -= 1;
        value
    }

    fn read_tagged(&mut self) -> Result<Value, MarshalError> {
        let offset = self.position();
        let byte = self.u8()?;

        let (code, flagged) = match self.dialect {
            Dialect::Python3 => (byte & !tag::FLAG_REF, byte & tag::FLAG_REF != 0),
            Dialect::Python2 => (byte, false),
        };
        if flagged {
            // Indices are handed out before children are read
            self.flagged += 1;
        }

        let value = self.read_body(code, offset)?;
        trace!(offset, code = %char::from(code), flagged, "read value");

        Ok(if flagged {
            Value::Flagged(Box::new(value))
        } else {
            value
        })
    }

    fn read_body(&mut self, code: u8, offset: u64) -> Result<Value, MarshalError> {
        let value = match code {
            tag::NULL => Value::Null,
            tag::NONE => Value::None,
            tag::FALSE => Value::False,
            tag::TRUE => Value::True,
            tag::STOPITER => Value::StopIteration,
            tag::ELLIPSIS => Value::Ellipsis,
            tag::INT => Value::Int(self.i32()?),
            tag::INT64 => Value::Int64(self.cursor.read_i64::<LittleEndian>().map_err(eof)?),
            tag::LONG => self.long()?,
            tag::FLOAT => Value::Float(self.short_bytes()?),
            tag::BINARY_FLOAT => Value::BinaryFloat(self.u64()?),
            tag::COMPLEX => Value::Complex {
                real: self.short_bytes()?,
                imag: self.short_bytes()?,
            },
            tag::BINARY_COMPLEX => Value::BinaryComplex {
                real: self.u64()?,
                imag: self.u64()?,
            },
            tag::STRINGREF if self.dialect == Dialect::Python2 => {
                let index = self.u32()?;
                if index >= self.interned {
                    return Err(MarshalError::BadReference(index));
                }
                Value::StringRef(index)
            }
            tag::REF if self.dialect == Dialect::Python3 => {
                let index = self.u32()?;
                if index >= self.flagged {
                    return Err(MarshalError::BadReference(index));
                }
                Value::Ref(index)
            }
            tag::TUPLE => Value::Tuple(self.sequence_i32()?),
            tag::SMALL_TUPLE if self.dialect == Dialect::Python3 => {
                let len = usize::from(self.u8()?);
                Value::SmallTuple(self.items(len)?)
            }
            tag::LIST => Value::List(self.sequence_i32()?),
            tag::SET => Value::Set(self.sequence_i32()?),
            tag::FROZENSET => Value::FrozenSet(self.sequence_i32()?),
            tag::DICT => Value::Dict(self.dict()?),
            tag::CODE => Value::Code(Box::new(self.code_object()?)),
            other => match StrKind::from_tag(other) {
                Some(kind) if self.accepts(kind) => {
                    let len = if kind.is_short() {
                        usize::from(self.u8()?)
                    } else {
                        self.length()?
                    };
                    let data = self.bytes(len)?;
                    if kind == StrKind::Interned && self.dialect == Dialect::Python2 {
                        self.interned += 1;
                    }
                    Value::Str(kind, data)
                }
                _ => return Err(MarshalError::UnknownType { code: other, offset }),
            },
        };
        Ok(value)
    }

    #[inline(never)]
    fn long(&mut self) -> Result<Value, MarshalError> {
        let size = self.i32()?;
        let count = size.unsigned_abs() as usize;
        self.ensure(count * 2)?;
        let digits = (0..count)
            .map(|_| self.cursor.read_u16::<LittleEndian>().map_err(eof))
            .collect::<Result<_, _>>()?;
        Ok(Value::Long { size, digits })
    }

    #[inline(never)]
    fn dict(&mut self) -> Result<Vec<(Value, Value)>, MarshalError> {
        let mut pairs = Vec::new();
        loop {
            let key = self.value()?;
            if key == Value::Null {
                return Ok(pairs);
            }
            let value = self.value()?;
            pairs.push((key, value));
        }
    }

    #[inline(never)]
    fn code_object(&mut self) -> Result<CodeObject, MarshalError> {
        let argcount = self.i32()?;
        let kwonlyargcount = match self.dialect {
            Dialect::Python3 => Some(self.i32()?),
            Dialect::Python2 => None,
        };
        let nlocals = self.i32()?;
        let stacksize = self.i32()?;
        let flags = self.i32()?;

        let (code, code_tag) = match self.value()? {
            Value::Str(kind, data) => (data, CodeTag { kind, flagged: false }),
            Value::Flagged(inner) => match *inner {
                Value::Str(kind, data) => (data, CodeTag { kind, flagged: true }),
                other => return Err(not_code_string(&other)),
            },
            other => return Err(not_code_string(&other)),
        };

        Ok(CodeObject {
            argcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            code_tag,
            consts: self.value()?,
            names: self.value()?,
            varnames: self.value()?,
            freevars: self.value()?,
            cellvars: self.value()?,
            filename: self.value()?,
            name: self.value()?,
            firstlineno: self.i32()?,
            lnotab: self.value()?,
        })
    }

    fn accepts(&self, kind: StrKind) -> bool {
        match kind {
            StrKind::Bytes | StrKind::Interned | StrKind::Unicode => true,
            _ => self.dialect == Dialect::Python3,
        }
    }

    #[inline(never)]
    fn sequence_i32(&mut self) -> Result<Vec<Value>, MarshalError> {
        let len = self.length()?;
        self.items(len)
    }

    #[inline(never)]
    fn items(&mut self, len: usize) -> Result<Vec<Value>, MarshalError> {
        // Every item takes at least one byte
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.value()?);
        }
        Ok(items)
    }

    fn length(&mut self) -> Result<usize, MarshalError> {
        let len = self.i32()?;
        usize::try_from(len).map_err(|_| MarshalError::NegativeLength(len))
    }

    fn short_bytes(&mut self) -> Result<Vec<u8>, MarshalError> {
        let len = usize::from(self.u8()?);
        self.bytes(len)
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>, MarshalError> {
        self.ensure(len)?;
        let mut data = vec![0; len];
        self.cursor.read_exact(&mut data).map_err(eof)?;
        Ok(data)
    }

    fn ensure(&self, len: usize) -> Result<(), MarshalError> {
        if len > self.remaining() {
            return Err(MarshalError::UnexpectedEof);
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, MarshalError> {
        self.cursor.read_u8().map_err(eof)
    }

    fn i32(&mut self) -> Result<i32, MarshalError> {
        self.cursor.read_i32::<LittleEndian>().map_err(eof)
    }

    fn u32(&mut self) -> Result<u32, MarshalError> {
        self.cursor.read_u32::<LittleEndian>().map_err(eof)
    }

    fn u64(&mut self) -> Result<u64, MarshalError> {
        self.cursor.read_u64::<LittleEndian>().map_err(eof)
    }
}

fn eof(err: io::Error) -> MarshalError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        MarshalError::UnexpectedEof
    } else {
        MarshalError::Io(err)
    }
}

fn not_code_string(value: &Value) -> MarshalError {
    MarshalError::UnexpectedValue {
        expected: "instruction string",
        found: value.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(load(b"N", Dialect::Python2).unwrap(), Value::None);
        assert_eq!(
            load(&[b'i', 0xfe, 0xff, 0xff, 0xff], Dialect::Python2).unwrap(),
            Value::Int(-2)
        );
        assert_eq!(
            load(b"s\x03\x00\x00\x00abc", Dialect::Python2).unwrap(),
            Value::Str(StrKind::Bytes, b"abc".to_vec())
        );
        assert_eq!(
            load(b"l\xfe\xff\xff\xff\x01\x00\x02\x00", Dialect::Python2).unwrap(),
            Value::Long { size: -2, digits: vec![1, 2] }
        );
    }

    #[test]
    fn test_python2_string_refs() {
        // ('foo', <ref to 'foo'>)
        let data = b"(\x02\x00\x00\x00t\x03\x00\x00\x00fooR\x00\x00\x00\x00";
        let value = load(data, Dialect::Python2).unwrap();
        assert_eq!(
            value,
            Value::Tuple(vec![
                Value::Str(StrKind::Interned, b"foo".to_vec()),
                Value::StringRef(0),
            ])
        );

        let dangling = b"R\x00\x00\x00\x00";
        assert!(matches!(
            load(dangling, Dialect::Python2),
            Err(MarshalError::BadReference(0))
        ));
    }

    #[test]
    fn test_python3_flags_and_refs() {
        // small tuple of a flagged short ascii string and a reference to it
        let data = [b')', 2, b'z' | 0x80, 1, b'x', b'r', 0, 0, 0, 0];
        let value = load(&data, Dialect::Python3).unwrap();
        assert_eq!(
            value,
            Value::SmallTuple(vec![
                Value::Flagged(Box::new(Value::Str(StrKind::ShortAscii, b"x".to_vec()))),
                Value::Ref(0),
            ])
        );

        // py2 has no reference flag
        assert!(matches!(
            load(&[b'N' | 0x80], Dialect::Python2),
            Err(MarshalError::UnknownType { code: 0xce, offset: 0 })
        ));
    }

    #[test]
    fn test_dict_is_null_terminated() {
        let data = b"{i\x01\x00\x00\x00N0";
        assert_eq!(
            load(data, Dialect::Python2).unwrap(),
            Value::Dict(vec![(Value::Int(1), Value::None)])
        );
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(load(b"", Dialect::Python2), Err(MarshalError::UnexpectedEof)));
        assert!(matches!(
            load(b"s\x10\x00\x00\x00ab", Dialect::Python2),
            Err(MarshalError::UnexpectedEof)
        ));
        assert!(matches!(
            load(b"(\xff\xff\xff\xff", Dialect::Python2),
            Err(MarshalError::NegativeLength(-1))
        ));
        assert!(matches!(
            load(b"?", Dialect::Python2),
            Err(MarshalError::UnknownType { code: b'?', offset: 0 })
        ));
        assert!(matches!(load(b"NN", Dialect::Python2), Err(MarshalError::TrailingData(1))));
    }

    #[test]
    fn test_reader_reports_leftover() {
        let mut reader = Reader::new(b"NTF", Dialect::Python2);
        assert_eq!(reader.read_value().unwrap(), Value::None);
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.position(), 1);
    }

    fn nested_lists(depth: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..depth {
            data.extend_from_slice(b"[\x01\x00\x00\x00");
        }
        data.push(b'N');
        data
    }

    #[test]
    fn test_nesting_limit() {
        // MAX_DEPTH levels counting the innermost None
        let value = load(&nested_lists(MAX_DEPTH - 1), Dialect::Python2).unwrap();
        assert_eq!(value.kind(), "list");

        assert!(matches!(
            load(&nested_lists(MAX_DEPTH), Dialect::Python2),
            Err(MarshalError::UnexpectedValue { .. })
        ));
    }
}
