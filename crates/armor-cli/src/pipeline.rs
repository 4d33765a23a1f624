//! Load a compiled module, protect its top-level code object, write it back.

use armor_core::{ArmorConfig, ContainerHeader, Error, MarshalError, RecipeConfig, Result, BASE_HEADER_SIZE};
use armor_ir::{encode, Decoder, InstructionSet, Mutator};
use armor_marshal::{dump, CodeObject, Dialect, Reader, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A compiled module read from disk
#[derive(Debug)]
pub struct Container {
    pub header: ContainerHeader,
    pub code: CodeObject,
    /// Top-level code object carried the reference flag
    flagged: bool,
    dialect: Dialect,
    isa: InstructionSet,
}

/// Output of a successful run, fully serialized in memory
#[derive(Debug, Clone)]
pub struct Protected {
    pub bytes: Vec<u8>,
    pub original_instructions: usize,
    pub instructions: usize,
}

impl Container {
    /// Read and parse the file at `path`.
    ///
    /// Size is checked before anything is parsed, so a file of header size
    /// or less fails with [`Error::FileTooSmall`].
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }
        let size = fs::metadata(path)?.len();
        if size <= BASE_HEADER_SIZE as u64 {
            return Err(Error::FileTooSmall(size));
        }

        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() <= BASE_HEADER_SIZE {
            return Err(Error::FileTooSmall(data.len() as u64));
        }

        let header = ContainerHeader::parse(data)?;
        let isa = InstructionSet::for_version(header.version)?;
        let dialect = Dialect::for_version(header.version);

        let mut reader = Reader::new(&data[header.len()..], dialect);
        let value = reader.read_value().map_err(Error::ContainerDeserialize)?;
        if reader.remaining() > 0 {
            warn!(bytes = reader.remaining(), "ignoring data after the code object");
        }

        let flagged = value.is_flagged();
        let found = value.kind();
        let code = value.into_code().ok_or_else(|| {
            Error::ContainerDeserialize(MarshalError::UnexpectedValue {
                expected: "code object",
                found: found.to_string(),
            })
        })?;
        debug!(version = %header.version, code_bytes = code.code.len(), "loaded container");

        Ok(Self {
            header,
            code,
            flagged,
            dialect,
            isa,
        })
    }

    pub fn instruction_set(&self) -> &InstructionSet {
        &self.isa
    }

    /// Decode, mutate and re-encode the top-level code object, then
    /// serialize the whole container.
    pub fn protect(&self, recipe: &RecipeConfig) -> Result<Protected> {
        let mut graph = Decoder::new(&self.isa).decode(&self.code.code)?;
        let original_instructions = graph.len();
        debug!(nodes = original_instructions, edges = graph.edges().count(), "decoded");

        Mutator::new(&self.isa, recipe.clone()).apply(&mut graph)?;
        let instructions = graph.len();

        let code = encode(graph, &self.code)?;
        debug!(code_bytes = code.code.len(), "encoded");

        let mut value = Value::Code(Box::new(code));
        if self.flagged {
            value = Value::Flagged(Box::new(value));
        }
        let payload = dump(&value, self.dialect).map_err(Error::ContainerSerialize)?;

        let mut bytes = Vec::with_capacity(self.header.len() + payload.len());
        bytes.extend_from_slice(self.header.as_bytes());
        bytes.extend_from_slice(&payload);

        Ok(Protected {
            bytes,
            original_instructions,
            instructions,
        })
    }
}

/// Where the protected copy of `input` goes: next to it, with the configured
/// prefix on the file name
pub fn output_path(input: &Path, config: &ArmorConfig) -> Result<PathBuf> {
    let name = input
        .file_name()
        .ok_or_else(|| Error::FileNotFound(input.display().to_string()))?;
    Ok(input.with_file_name(config.output_name(&name.to_string_lossy())))
}

/// Write the protected bytes next to `input`. Returns the path written.
pub fn write_output(input: &Path, config: &ArmorConfig, protected: &Protected) -> Result<PathBuf> {
    let output = output_path(input, config)?;
    fs::write(&output, &protected.bytes)?;
    info!(path = %output.display(), bytes = protected.bytes.len(), "wrote protected file");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use armor_marshal::StrKind;

    pub(crate) fn python27_container(code: &[u8]) -> Vec<u8> {
        let mut data = 62211u16.to_le_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(&0u32.to_le_bytes());

        let empty = || Value::Tuple(vec![]);
        let object = CodeObject {
            argcount: 0,
            kwonlyargcount: None,
            nlocals: 0,
            stacksize: 2,
            flags: 0x40,
            code: code.to_vec(),
            code_tag: Default::default(),
            consts: Value::Tuple(vec![Value::Int(1)]),
            names: empty(),
            varnames: empty(),
            freevars: empty(),
            cellvars: empty(),
            filename: Value::Str(StrKind::Interned, b"mod.py".to_vec()),
            name: Value::Str(StrKind::Interned, b"<module>".to_vec()),
            firstlineno: 1,
            lnotab: Value::Str(StrKind::Bytes, vec![]),
        };
        data.extend(dump(&Value::Code(Box::new(object)), Dialect::Python2).unwrap());
        data
    }

    #[test]
    fn test_header_sized_input_is_too_small() {
        // Not even a valid header: size is checked first
        let result = Container::from_bytes(&[0xff; 8]);
        assert!(matches!(result, Err(Error::FileTooSmall(8))));
    }

    #[test]
    fn test_protect_inserts_two_payloads() {
        // LOAD_CONST 0; LOAD_CONST 0; BINARY_ADD; RETURN_VALUE
        let data = python27_container(&[100, 0, 0, 100, 0, 0, 23, 83]);
        let container = Container::from_bytes(&data).unwrap();
        let protected = container.protect(&RecipeConfig::default()).unwrap();

        assert_eq!(protected.original_instructions, 4);
        assert_eq!(protected.instructions, 18);
        assert_eq!(&protected.bytes[..8], &data[..8]);

        let reread = Container::from_bytes(&protected.bytes).unwrap();
        let payload = [9, 2, 2, 9, 3, 3, 3];
        let mut expected = vec![100, 0, 0, 100, 0, 0];
        expected.extend_from_slice(&payload);
        expected.extend_from_slice(&payload);
        expected.extend_from_slice(&[23, 83]);
        assert_eq!(reread.code.code, expected);
        assert_eq!(reread.code.consts, container.code.consts);
    }

    #[test]
    fn test_top_level_must_be_code() {
        let mut data = python27_container(&[83]);
        data.truncate(8);
        data.extend_from_slice(b"N");
        assert!(matches!(
            Container::from_bytes(&data),
            Err(Error::ContainerDeserialize(MarshalError::UnexpectedValue { .. }))
        ));
    }

    #[test]
    fn test_single_instruction_has_no_anchor() {
        let data = python27_container(&[83]);
        let container = Container::from_bytes(&data).unwrap();
        assert!(matches!(
            container.protect(&RecipeConfig::default()),
            Err(Error::Mutator(_))
        ));
    }

    #[test]
    fn test_output_path() {
        let config = ArmorConfig::default();
        let path = output_path(Path::new("/tmp/pkg/mod.pyc"), &config).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/pkg/NEW-mod.pyc"));
    }
}
