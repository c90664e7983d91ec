//! The compiler/interpreter front-of-house: argument parsing, file
//! handling, and dispatch to exactly one of the interpreters or
//! back-ends in `tapec::{interp, back}`.
//!
//! Run with `--help` for the full flag surface (§6 / SPEC_FULL.md §6.1).

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use tapec::back;
use tapec::common::{Error, Result};
use tapec::front;
use tapec::interp;
use tapec::middle::{self, PipelineOptions};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    C,
    Nasm,
    Elf64,
}

/// A compiler for the eight-instruction tape-machine language.
///
/// With none of `--compile`, `--tree`, or `--slow`, the program is
/// JIT-compiled and run immediately in this process.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Source file.
    file: PathBuf,

    /// Code-generator back-end to use with `--compile`.
    #[arg(long, short, value_enum)]
    backend: Option<Backend>,

    /// Compile to the selected `--backend` instead of running the program.
    #[arg(long)]
    compile: bool,

    /// Run the tree-walking interpreter over the optimized IR instead of
    /// compiling or JIT-running it.
    #[arg(long)]
    tree: bool,

    /// Run the straight bytecode interpreter, skipping parsing and
    /// optimization entirely.
    #[arg(long)]
    slow: bool,

    /// Output file. Binary for `--backend elf64`, text otherwise.
    /// Defaults to standard output.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Optimization level, `-O0` through `-O3`.
    #[arg(short = 'O', value_parser = clap::value_parser!(u8).range(0..=3), default_value_t = 0)]
    optimization_level: u8,

    /// Suppress bounds-check insertion.
    #[arg(long = "no-check")]
    no_check: bool,
}

fn write_output(output: &Option<PathBuf>, bytes: &[u8]) -> io::Result<()> {
    match output {
        Some(path) => std::fs::write(path, bytes),
        None => io::stdout().write_all(bytes),
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if [cli.compile, cli.tree, cli.slow].iter().filter(|b| **b).count() > 1 {
        return Err(Error::Internal("--compile, --tree and --slow are mutually exclusive".into()));
    }

    let file = File::open(&cli.file)?;

    if cli.slow {
        interp::slow::run(file, io::stdin(), io::stdout())?;
        return Ok(ExitCode::SUCCESS);
    }

    let tree = front::parser::parse_reader(file)??;

    let options = PipelineOptions::new(cli.optimization_level, cli.no_check);
    let optimized = middle::run(tree, options);

    if cli.tree {
        interp::tree::run(&optimized, io::stdin(), io::stdout())?;
        return Ok(ExitCode::SUCCESS);
    }

    if cli.compile {
        let backend = cli.backend.unwrap_or(Backend::Elf64);
        match backend {
            Backend::C => write_output(&cli.output, back::c::generate(&optimized).as_bytes())?,
            Backend::Nasm => write_output(&cli.output, back::nasm::generate(&optimized)?.as_bytes())?,
            Backend::Elf64 => write_output(&cli.output, &back::elf::build(&optimized)?)?,
        }
        return Ok(ExitCode::SUCCESS);
    }

    let jit = back::jit::build(&optimized)?;
    let code = jit.run();
    Ok(ExitCode::from(code as u8))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
