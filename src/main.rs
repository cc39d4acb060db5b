use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use tracing_subscriber::EnvFilter;

use pyasm::codegen::{CodeGenerator, GeneratorConfig, render};
use pyasm::{lexer, machine, parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
    Tokens,
    Ast,
    Asm,
}

struct Options {
    emit: Emit,
    run: bool,
    config: GeneratorConfig,
    input_path: Option<String>,
}

fn parse_args() -> Result<Options> {
    let mut args = std::env::args().skip(1);
    let mut options = Options {
        emit: Emit::Asm,
        run: false,
        config: GeneratorConfig::default(),
        input_path: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--emit" | "-e" => {
                let view = args
                    .next()
                    .ok_or_else(|| anyhow!("Missing view name after {arg}"))?;
                options.emit = match view.as_str() {
                    "tokens" => Emit::Tokens,
                    "ast" => Emit::Ast,
                    "asm" => Emit::Asm,
                    _ => bail!("Unknown view '{view}', expected tokens, ast or asm"),
                };
            }
            "--run" | "-r" => options.run = true,
            "--registers" => {
                let count = args
                    .next()
                    .ok_or_else(|| anyhow!("Missing register count after {arg}"))?;
                options.config.registers = count
                    .parse()
                    .with_context(|| format!("Invalid register count '{count}'"))?;
            }
            _ => {
                options.input_path = Some(arg);
                if args.next().is_some() {
                    bail!("Only one input file is supported");
                }
                break;
            }
        }
    }
    Ok(options)
}

fn read_source(path: Option<&str>) -> Result<String> {
    if let Some(path) = path {
        fs::read_to_string(path).with_context(|| format!("Reading {path}"))
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        Ok(buffer)
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let options = parse_args()?;
    let source = read_source(options.input_path.as_deref())?;

    let tokens = lexer::tokenize(&source);
    if options.emit == Emit::Tokens && !options.run {
        for token in &tokens {
            println!("{token}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let parsed = parser::parse_tokens(&tokens);
    if parsed.has_errors() {
        for diagnostic in &parsed.diagnostics {
            eprintln!("{diagnostic}");
        }
        return Ok(ExitCode::FAILURE);
    }
    if options.emit == Emit::Ast && !options.run {
        print!("{}", parsed.program);
        return Ok(ExitCode::SUCCESS);
    }

    let listing = CodeGenerator::new(options.config)
        .generate(&parsed)
        .context("Generating code")?;
    if options.run {
        for line in machine::run(&listing).context("Running listing")? {
            println!("{line}");
        }
    } else {
        print!("{}", render(&listing));
    }
    Ok(ExitCode::SUCCESS)
}
