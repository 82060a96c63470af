//! TypeVM CLI

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use typevm::{CompileError, Vm, VmConfig};

#[derive(Parser)]
#[command(name = "typevm", version, about = "TypeVM - structural type checker on a bytecode VM")]
struct Cli {
    /// Log phase boundaries (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source file and print the disassembled image
    Disasm {
        /// Source file to compile
        file: PathBuf,
        /// Emit the decoded image as JSON
        #[arg(long)]
        json: bool,
    },
    /// Type check a source file
    Check {
        /// Source file to check
        file: PathBuf,
        /// Abort after this many VM instructions
        #[arg(long, default_value_t = 10_000_000)]
        max_steps: u64,
    },
    /// Parse and dump AST (debug)
    Parse {
        /// Source file to parse
        file: PathBuf,
    },
    /// Tokenize and dump tokens (debug)
    Tokens {
        /// Source file to tokenize
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Disasm { file, json } => disasm_file(&file, json),
        Command::Check { file, max_steps } => check_file(&file, max_steps),
        Command::Parse { file } => parse_file(&file),
        Command::Tokens { file } => tokenize_file(&file),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "typevm=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_source(path: &PathBuf) -> Result<String, CompileError> {
    std::fs::read_to_string(path).map_err(|e| CompileError::io_error(format!("{}: {e}", path.display())))
}

/// Build a module, rendering compile errors with their source span.
fn build(path: &PathBuf, source: &str) -> Result<Option<typevm::Module>, Box<dyn std::error::Error>> {
    let filename = path.display().to_string();
    match typevm::build_module(&filename, source) {
        Ok(module) => Ok(Some(module)),
        Err(e) => {
            typevm::error::report_error(&filename, source, &e)?;
            Ok(None)
        }
    }
}

fn disasm_file(path: &PathBuf, json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let source = read_source(path)?;
    let Some(module) = build(path, &source)? else {
        return Ok(false);
    };
    if json {
        let result = typevm::disasm::parse_bin(&module.bin)?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", typevm::disasm::print_bin(&module.bin)?);
    }
    Ok(true)
}

fn check_file(path: &PathBuf, max_steps: u64) -> Result<bool, Box<dyn std::error::Error>> {
    let source = read_source(path)?;
    let Some(mut module) = build(path, &source)? else {
        return Ok(false);
    };

    let mut vm = Vm::new(VmConfig::default().with_step_limit(max_steps));
    vm.run(&mut module)?;

    if module.errors().is_empty() {
        println!("✓ {} type checks successfully", module.file_name);
        return Ok(true);
    }
    module.print_errors()?;
    Ok(false)
}

fn parse_file(path: &PathBuf) -> Result<bool, Box<dyn std::error::Error>> {
    let source = read_source(path)?;
    let filename = path.display().to_string();

    let tokens = typevm::lexer::tokenize(&source)?;
    let ast = typevm::parser::parse(&filename, &source, tokens)?;

    println!("{}", serde_json::to_string_pretty(&ast)?);
    Ok(true)
}

fn tokenize_file(path: &PathBuf) -> Result<bool, Box<dyn std::error::Error>> {
    let source = read_source(path)?;

    let tokens = typevm::lexer::tokenize(&source)?;
    for (tok, span) in &tokens {
        println!("{:?} @ {}..{}", tok, span.start, span.end);
    }

    Ok(true)
}
