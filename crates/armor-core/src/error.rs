//! Error types for the obfuscation pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("can't find file - {0}")]
    FileNotFound(String),

    #[error("File too small: {0} bytes")]
    FileTooSmall(u64),

    #[error("while parsing header, {0}")]
    HeaderParse(String),

    #[error("unsupported interpreter version: {0}")]
    UnsupportedVersion(String),

    #[error("incorrect marshal format of code object: {0}")]
    ContainerDeserialize(#[source] MarshalError),

    #[error("failed to serialize code object: {0}")]
    ContainerSerialize(#[source] MarshalError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Mutation error: {0}")]
    Mutator(#[from] MutatorError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Failures while turning raw instruction bytes into a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("opcode {opcode} at offset {offset} is missing its 16-bit operand")]
    TruncatedOperand { opcode: u8, offset: usize },

    #[error("unknown opcode {opcode} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("jump at offset {offset} targets offset {target}, which starts no instruction")]
    DanglingJump { offset: usize, target: usize },

    #[error("jump at offset {offset} is widened by EXTENDED_ARG")]
    ExtendedJump { offset: usize },
}

/// Failures while splicing instructions into a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutatorError {
    #[error("node {0} is not a member of this graph")]
    UnknownNode(String),

    #[error("anchor index {index} is out of range for a graph of {len} nodes")]
    AnchorOutOfRange { index: usize, len: usize },

    #[error("payload is not stack neutral: {0}")]
    NotStackNeutral(String),

    #[error("instruction set has no opcode named {0}")]
    UnknownMnemonic(String),
}

/// Failures while linearizing a graph back into bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("jump {jump} targets node {target}, which is no longer in the graph")]
    DanglingTarget { jump: String, target: String },

    #[error("jump {jump} needs operand {value}, which does not fit in 16 bits")]
    OperandOverflow { jump: String, value: usize },

    #[error("relative jump {jump} targets a node before itself")]
    NegativeRelativeJump { jump: String },
}

/// Failures in the marshal value codec.
#[derive(Error, Debug)]
pub enum MarshalError {
    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("unknown type code {code:#04x} at offset {offset}")]
    UnknownType { code: u8, offset: u64 },

    #[error("invalid reference {0}")]
    BadReference(u32),

    #[error("negative length {0}")]
    NegativeLength(i32),

    #[error("expected {expected}, found {found}")]
    UnexpectedValue { expected: &'static str, found: String },

    #[error("{0} trailing bytes after the code object")]
    TrailingData(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::FileNotFound(_) | Error::FileTooSmall(_) => 1,
            Error::HeaderParse(_) | Error::UnsupportedVersion(_) => 1,
            Error::ContainerDeserialize(_) | Error::ContainerSerialize(_) => 1,
            Error::Decode(_) | Error::Mutator(_) | Error::Encode(_) => 2,
            Error::Io(_) | Error::Config(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_cli_wording() {
        let err = Error::FileTooSmall(8);
        assert_eq!(err.to_string(), "File too small: 8 bytes");

        let err = Error::FileNotFound("a.pyc".to_string());
        assert_eq!(err.to_string(), "can't find file - a.pyc");
    }

    #[test]
    fn test_engine_errors_convert() {
        let err: Error = DecodeError::UnknownOpcode { opcode: 255, offset: 4 }.into();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(err.exit_code(), 2);

        let err: Error = MutatorError::UnknownNode("n3".to_string()).into();
        assert!(err.to_string().contains("n3"));
    }
}
