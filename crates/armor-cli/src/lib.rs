//! File-level pipeline behind the `pyc-armor` binary.

pub mod pipeline;

pub use pipeline::{write_output, Container, Protected};
