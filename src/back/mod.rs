//! Everything downstream of the optimized IR: the pseudo-ISA, lowering,
//! the two-pass encoder, and the four image-producing back-ends
//! (`-backend elf64`, `-backend c`, `-backend nasm`, and the JIT path
//! taken when the CLI is given none of `-compile`/`-tree`/`-slow`).

pub mod c;
pub mod elf;
pub mod encoder;
pub mod isa;
pub mod jit;
pub mod lowering;
pub mod nasm;
pub mod symbols;
