//! Marshal serialization.

use crate::code::CodeObject;
use crate::tag;
use crate::value::{StrKind, Value};
use crate::{with_codec_stack, Dialect};
use armor_core::MarshalError;
use byteorder::{LittleEndian, WriteBytesExt};

/// Serialize `value` into a fresh buffer
pub fn dump(value: &Value, dialect: Dialect) -> Result<Vec<u8>, MarshalError> {
    let mut writer = Writer::new(dialect);
    writer.write_value(value)?;
    Ok(writer.into_bytes())
}

/// Marshal writer emitting each value in the form it was read in
pub struct Writer {
    out: Vec<u8>,
    dialect: Dialect,
}

impl Writer {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            out: Vec::new(),
            dialect,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Append `value`, recursing on the dedicated codec stack
    pub fn write_value(&mut self, value: &Value) -> Result<(), MarshalError> {
        with_codec_stack(|| self.value(value))
    }

    fn value(&mut self, value: &Value) -> Result<(), MarshalError> {
        self.write_flagged(value, false)
    }

    fn write_flagged(&mut self, value: &Value, flagged: bool) -> Result<(), MarshalError> {
        let flag = if flagged { tag::FLAG_REF } else { 0 };
        match value {
            Value::Flagged(inner) => {
                if self.dialect == Dialect::Python2 {
                    return Err(MarshalError::UnexpectedValue {
                        expected: "unflagged value in the Python 2 format",
                        found: format!("flagged {}", inner.kind()),
                    });
                }
                self.write_flagged(inner, true)?;
            }
            Value::Null => self.out.write_u8(tag::NULL | flag)?,
            Value::None => self.out.write_u8(tag::NONE | flag)?,
            Value::False => self.out.write_u8(tag::FALSE | flag)?,
            Value::True => self.out.write_u8(tag::TRUE | flag)?,
            Value::StopIteration => self.out.write_u8(tag::STOPITER | flag)?,
            Value::Ellipsis => self.out.write_u8(tag::ELLIPSIS | flag)?,
            Value::Int(value) => {
                self.out.write_u8(tag::INT | flag)?;
                self.out.write_i32::<LittleEndian>(*value)?;
            }
            Value::Int64(value) => {
                self.out.write_u8(tag::INT64 | flag)?;
                self.out.write_i64::<LittleEndian>(*value)?;
            }
            Value::Long { size, digits } => self.long(*size, digits, flag)?,
            Value::Float(text) => {
                self.out.write_u8(tag::FLOAT | flag)?;
                self.short_bytes(text)?;
            }
            Value::BinaryFloat(bits) => {
                self.out.write_u8(tag::BINARY_FLOAT | flag)?;
                self.out.write_u64::<LittleEndian>(*bits)?;
            }
            Value::Complex { real, imag } => {
                self.out.write_u8(tag::COMPLEX | flag)?;
                self.short_bytes(real)?;
                self.short_bytes(imag)?;
            }
            Value::BinaryComplex { real, imag } => {
                self.out.write_u8(tag::BINARY_COMPLEX | flag)?;
                self.out.write_u64::<LittleEndian>(*real)?;
                self.out.write_u64::<LittleEndian>(*imag)?;
            }
            Value::Str(kind, data) => self.string(*kind, data, flag)?,
            Value::StringRef(index) => {
                self.out.write_u8(tag::STRINGREF)?;
                self.out.write_u32::<LittleEndian>(*index)?;
            }
            Value::Ref(index) => {
                self.out.write_u8(tag::REF)?;
                self.out.write_u32::<LittleEndian>(*index)?;
            }
            Value::Tuple(items) => self.sequence(tag::TUPLE | flag, items)?,
            Value::SmallTuple(items) => self.small_tuple(items, flag)?,
            Value::List(items) => self.sequence(tag::LIST | flag, items)?,
            Value::Set(items) => self.sequence(tag::SET | flag, items)?,
            Value::FrozenSet(items) => self.sequence(tag::FROZENSET | flag, items)?,
            Value::Dict(pairs) => self.dict(pairs, flag)?,
            Value::Code(code) => {
                self.out.write_u8(tag::CODE | flag)?;
                self.code_object(code)?;
            }
        }
        Ok(())
    }

    #[inline(never)]
    fn long(&mut self, size: i32, digits: &[u16], flag: u8) -> Result<(), MarshalError> {
        if size.unsigned_abs() as usize != digits.len() {
            return Err(MarshalError::UnexpectedValue {
                expected: "digit count matching the long size",
                found: format!("size {} with {} digits", size, digits.len()),
            });
        }
        self.out.write_u8(tag::LONG | flag)?;
        self.out.write_i32::<LittleEndian>(size)?;
        for digit in digits {
            self.out.write_u16::<LittleEndian>(*digit)?;
        }
        Ok(())
    }

    #[inline(never)]
    fn small_tuple(&mut self, items: &[Value], flag: u8) -> Result<(), MarshalError> {
        let len = u8::try_from(items.len()).map_err(|_| too_long("small tuple", items.len()))?;
        self.out.write_u8(tag::SMALL_TUPLE | flag)?;
        self.out.write_u8(len)?;
        for item in items {
            self.value(item)?;
        }
        Ok(())
    }

    #[inline(never)]
    fn dict(&mut self, pairs: &[(Value, Value)], flag: u8) -> Result<(), MarshalError> {
        self.out.write_u8(tag::DICT | flag)?;
        for (key, value) in pairs {
            self.value(key)?;
            self.value(value)?;
        }
        self.out.write_u8(tag::NULL)?;
        Ok(())
    }

    #[inline(never)]
    fn code_object(&mut self, code: &CodeObject) -> Result<(), MarshalError> {
        self.out.write_i32::<LittleEndian>(code.argcount)?;
        match (self.dialect, code.kwonlyargcount) {
            (Dialect::Python3, Some(kwonly)) => self.out.write_i32::<LittleEndian>(kwonly)?,
            (Dialect::Python2, None) => {}
            (_, kwonly) => {
                return Err(MarshalError::UnexpectedValue {
                    expected: "code object layout matching the format",
                    found: format!("kwonlyargcount {:?}", kwonly),
                })
            }
        }
        self.out.write_i32::<LittleEndian>(code.nlocals)?;
        self.out.write_i32::<LittleEndian>(code.stacksize)?;
        self.out.write_i32::<LittleEndian>(code.flags)?;

        let flag = if code.code_tag.flagged { tag::FLAG_REF } else { 0 };
        self.string(code.code_tag.kind, &code.code, flag)?;

        self.value(&code.consts)?;
        self.value(&code.names)?;
        self.value(&code.varnames)?;
        self.value(&code.freevars)?;
        self.value(&code.cellvars)?;
        self.value(&code.filename)?;
        self.value(&code.name)?;
        self.out.write_i32::<LittleEndian>(code.firstlineno)?;
        self.value(&code.lnotab)
    }

    fn string(&mut self, kind: StrKind, data: &[u8], flag: u8) -> Result<(), MarshalError> {
        self.out.write_u8(kind.tag() | flag)?;
        if kind.is_short() {
            self.short_bytes(data)
        } else {
            self.long_bytes(data)
        }
    }

    #[inline(never)]
    fn sequence(&mut self, code: u8, items: &[Value]) -> Result<(), MarshalError> {
        self.out.write_u8(code)?;
        self.length(items.len())?;
        for item in items {
            self.value(item)?;
        }
        Ok(())
    }

    fn short_bytes(&mut self, data: &[u8]) -> Result<(), MarshalError> {
        let len = u8::try_from(data.len()).map_err(|_| too_long("short string", data.len()))?;
        self.out.write_u8(len)?;
        self.out.extend_from_slice(data);
        Ok(())
    }

    fn long_bytes(&mut self, data: &[u8]) -> Result<(), MarshalError> {
        self.length(data.len())?;
        self.out.extend_from_slice(data);
        Ok(())
    }

    fn length(&mut self, len: usize) -> Result<(), MarshalError> {
        let len = i32::try_from(len).map_err(|_| too_long("object", len))?;
        self.out.write_i32::<LittleEndian>(len)?;
        Ok(())
    }
}

fn too_long(what: &'static str, len: usize) -> MarshalError {
    MarshalError::UnexpectedValue {
        expected: what,
        found: format!("{} elements", len),
    }
}
