pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod machine;
pub mod parser;

use thiserror::Error;

use crate::codegen::{CodeGenerator, CodegenError, GeneratorConfig, Instruction};
use crate::parser::Diagnostics;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Syntax(Diagnostics),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Tokenizes, parses and lowers `source` in one go.
pub fn compile(source: &str, config: &GeneratorConfig) -> Result<Vec<Instruction>, CompileError> {
    let parsed = parser::parse(source);
    if parsed.has_errors() {
        return Err(CompileError::Syntax(Diagnostics(parsed.diagnostics)));
    }
    Ok(CodeGenerator::new(*config).generate(&parsed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_separates_syntax_and_codegen_failures() {
        let config = GeneratorConfig::default();
        match compile("x = \n", &config) {
            Err(CompileError::Syntax(diagnostics)) => assert_eq!(diagnostics.0.len(), 1),
            other => panic!("expected syntax error, got {other:?}"),
        }
        assert!(matches!(
            compile("undefined()\n", &config),
            Err(CompileError::Codegen(CodegenError::UnknownFunction { .. }))
        ));
        assert!(compile("print(1)\n", &config).is_ok());
    }
}
