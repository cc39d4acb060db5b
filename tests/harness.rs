use anyhow::{Context, Result, bail, ensure};
use std::path::Path;

use pyasm::codegen::{CodeGenerator, GeneratorConfig, render};
use pyasm::{CompileError, compile, machine, parser};
use test_support::{Case, CaseClass, load_cases, normalize_output};

fn config_for(case: &Case) -> GeneratorConfig {
    let mut config = GeneratorConfig::default();
    if let Some(registers) = case.spec.registers {
        config.registers = registers;
    }
    config
}

fn ensure_contains(case: &Case, actual: &str, expected: &str) -> Result<()> {
    ensure!(
        actual.contains(expected),
        "Expected error containing '{expected}' in {}, got '{actual}'",
        case.name
    );
    Ok(())
}

fn check_compile_success(case: &Case, source: &str) -> Result<()> {
    ensure!(
        case.spec.expected.exit_code == 0,
        "Case {} expected exit code must be 0 for compile_success",
        case.name
    );
    let listing = compile(source, &config_for(case))
        .with_context(|| format!("Compiling {}", case.name))?;

    if let Some(asm_file) = case.spec.expected.asm_file.as_deref() {
        let expected = case.read_text(asm_file)?;
        assert_eq!(
            normalize_output(&render(&listing)),
            normalize_output(&expected),
            "Listing mismatch for {}",
            case.name
        );
    }

    let stdout_file = case
        .spec
        .expected
        .stdout_file
        .as_deref()
        .with_context(|| format!("Missing stdout_file in {}", case.name))?;
    let expected = case.read_text(stdout_file)?;
    let output = machine::run(&listing).with_context(|| format!("Running {}", case.name))?;
    assert_eq!(
        normalize_output(&output.join("\n")),
        normalize_output(&expected),
        "Output mismatch for {}",
        case.name
    );
    Ok(())
}

fn run_case(case: &Case) -> Result<()> {
    if case.spec.bench.enabled {
        ensure!(
            !case.spec.bench.tags.is_empty(),
            "Case {} has bench enabled but no tags",
            case.name
        );
    }
    let source = case.source()?;

    match case.spec.class {
        CaseClass::CompileSuccess => check_compile_success(case, &source)?,
        CaseClass::SyntaxError => {
            ensure!(
                case.spec.expected.exit_code == 1,
                "Case {} expected exit code must be 1 for syntax_error",
                case.name
            );
            let parsed = parser::parse(&source);
            let Err(diagnostics) = parsed.into_program() else {
                bail!("Expected syntax error in {}, but parsing succeeded", case.name);
            };
            ensure_contains(case, &diagnostics.to_string(), &case.expected_error()?)?;
        }
        CaseClass::CodegenError => {
            ensure!(
                case.spec.expected.exit_code == 1,
                "Case {} expected exit code must be 1 for codegen_error",
                case.name
            );
            match compile(&source, &config_for(case)) {
                Err(CompileError::Codegen(error)) => {
                    ensure_contains(case, &error.to_string(), &case.expected_error()?)?;
                }
                Err(CompileError::Syntax(diagnostics)) => {
                    bail!("Unexpected syntax error in {}: {diagnostics}", case.name)
                }
                Ok(_) => bail!("Expected code generation error in {}", case.name),
            }
        }
        CaseClass::RuntimeError => {
            ensure!(
                case.spec.expected.exit_code == 1,
                "Case {} expected exit code must be 1 for runtime_error",
                case.name
            );
            let listing = compile(&source, &config_for(case))
                .with_context(|| format!("Compiling {}", case.name))?;
            let result = machine::run(&listing);
            let Err(error) = result else {
                bail!("Expected runtime error in {}", case.name);
            };
            ensure_contains(case, &error.to_string(), &case.expected_error()?)?;
        }
    }
    Ok(())
}

#[test]
fn runs_program_fixtures() -> Result<()> {
    for case in load_cases(Path::new("tests/programs"))? {
        run_case(&case)?;
    }
    Ok(())
}

#[test]
fn fixtures_generate_identical_listings_twice() -> Result<()> {
    for case in load_cases(Path::new("tests/programs"))? {
        if case.spec.class != CaseClass::CompileSuccess {
            continue;
        }
        let parsed = parser::parse(&case.source()?);
        let first = CodeGenerator::new(config_for(&case)).generate(&parsed)?;
        let second = CodeGenerator::new(config_for(&case)).generate(&parsed)?;
        assert_eq!(first, second, "Listing differs between runs for {}", case.name);
    }
    Ok(())
}
