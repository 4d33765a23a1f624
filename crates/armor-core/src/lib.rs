//! Core types shared by the pyc-armor crates.
//!
//! Holds the error taxonomy, configuration, the container header and version
//! model, and the `CodeShell` seam between the bytecode engine and the
//! marshal codec.

pub mod config;
pub mod error;
pub mod shell;
pub mod version;

pub use config::*;
pub use error::{DecodeError, EncodeError, Error, MarshalError, MutatorError, Result};
pub use shell::CodeShell;
pub use version::{ContainerHeader, PythonVersion, BASE_HEADER_SIZE};
