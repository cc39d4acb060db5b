use thiserror::Error;

/// Conditions that abort a code generation pass. No partial listing is
/// returned for any of them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("Refusing to generate code for a program with {count} syntax error(s)")]
    SyntaxErrors { count: usize },
    #[error("Out of registers: expression needs more than {available} live temporaries")]
    RegistersExhausted { available: usize },
    #[error("Undefined function '{name}'")]
    UnknownFunction { name: String },
    #[error("Function '{name}' expected {expected} arguments, got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Duplicate function definition '{name}'")]
    DuplicateFunction { name: String },
    #[error("Return outside of function")]
    ReturnOutsideFunction,
    #[error("Registers still live after code generation: {registers}")]
    LeakedRegisters { registers: String },
}
