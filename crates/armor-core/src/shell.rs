//! The seam between the bytecode engine and the container format.

/// Everything in a code object except its instruction stream.
///
/// The engine never looks inside a shell. It hands back the shell it was
/// given, rebuilt around the newly encoded instruction bytes.
pub trait CodeShell: Sized {
    /// The raw instruction stream the shell currently carries
    fn code(&self) -> &[u8];

    /// A copy of this shell carrying `code` as its instruction stream.
    /// Every other field is preserved unchanged.
    fn with_code(&self, code: Vec<u8>) -> Self;
}
