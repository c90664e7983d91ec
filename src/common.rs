//! Common definitions that are shared between different parts of the compiler.

use derive_more::{Display, From};

/// The tape the generated and interpreted programs operate on has exactly
/// this many cells.
pub const TAPE_SIZE: usize = 30000;

/// Cap on the size of a source file read by the straight bytecode
/// interpreter (`-slow`); larger inputs are a user error rather than an
/// internal one.
pub const SLOW_INTERPRETER_MAX_SOURCE: usize = 16 * 1024 * 1024;

/// Errors raised while turning source bytes into an IR tree.
#[derive(Display)]
#[display("Error: found unmatched '{ch}' on line {line} column {column}")]
pub struct SyntaxError {
    pub ch: char,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Debug for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for SyntaxError {}

/// Errors raised by the x86 pseudo-ISA's per-opcode operand validation.
#[derive(Display)]
#[display("Error (bug): invalid operand combination for instruction '{op}'")]
pub struct IsaError {
    pub op: &'static str,
}

impl std::fmt::Debug for IsaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for IsaError {}

/// Errors raised by the two-pass encoder.
#[derive(Display)]
pub enum EncodeError {
    #[display("Error (bug): encoder referenced an unresolved label {label}")]
    UnresolvedLabel { label: u32 },
    #[display("Error (bug): branch-form selection did not converge after {passes} passes")]
    DidNotConverge { passes: u32 },
}

impl std::fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for EncodeError {}

/// Errors raised while planning or writing the ELF64 image.
#[derive(Display)]
pub enum ElfError {
    #[display("Error (bug): section '{name}' written at offset {actual}, planned offset was {planned}")]
    OffsetMismatch {
        name: &'static str,
        planned: u64,
        actual: u64,
    },
    #[display("Error (bug): PLT encoded to {actual} bytes, planned size was {planned}")]
    PltSizeMismatch { planned: u64, actual: u64 },
}

impl std::fmt::Debug for ElfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for ElfError {}

/// Errors raised by the JIT back-end's anonymous-mapping setup.
#[derive(Display)]
pub enum JitError {
    #[display("Error: memory allocation (mmap failed)")]
    Mmap,
    #[display("Error: memory protection (mprotect failed)")]
    Mprotect,
}

impl std::fmt::Debug for JitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for JitError {}

/// Errors raised while directly executing a program (the tree-walking and
/// straight bytecode interpreters), where a back-end would instead emit a
/// call to a fail-fast helper or a PLT stub. The bound-check wording below
/// matches the back-ends' (`back::symbols::message_text`) verbatim; the
/// straight bytecode interpreter uses its own shorter wording, carried
/// over unchanged from `original_source/src/interpreter/slow.c`.
#[derive(Display)]
pub enum RuntimeError {
    #[display("Error: memory position out of bounds (overflow - too far right)")]
    TooFarRight,
    #[display("Error: memory position out of bounds (underflow - too far left)")]
    TooFarLeft,
    #[display("Error: memory position out of bounds (overflow)")]
    SlowTooFarRight,
    #[display("Error: memory position out of bounds (underflow)")]
    SlowTooFarLeft,
    #[display("Error: reached end of input")]
    EndOfInput,
    #[display("Error when reading input: {_0}")]
    ReadError(std::io::Error),
    #[display("Error: found unmatched '[' at position {position}")]
    UnmatchedOpen { position: usize },
    #[display("Error: found unmatched ']' at position {position}")]
    UnmatchedClose { position: usize },
    #[display("Error: program is too long")]
    ProgramTooLong,
}

impl std::fmt::Debug for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for RuntimeError {}

/// The top-level error type threaded up to `main`. Every fallible stage's
/// error converts into this with `?`; `main` prints the `Display` form to
/// stderr and exits with a non-zero status.
#[derive(Display, From)]
pub enum Error {
    #[display("{_0}")]
    Syntax(SyntaxError),
    #[display("{_0}")]
    Isa(IsaError),
    #[display("{_0}")]
    Encode(EncodeError),
    #[display("{_0}")]
    Elf(ElfError),
    #[display("{_0}")]
    Jit(JitError),
    #[display("{_0}")]
    Runtime(RuntimeError),
    #[display("Error: {_0}")]
    Io(std::io::Error),
    #[display("Error: {_0}")]
    Internal(String),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
