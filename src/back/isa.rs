//! The x86-64 pseudo-ISA: registers, operand kinds, and instructions.
//!
//! This is a closed, statically validated instruction set: every
//! constructor checks its operand combination against the per-opcode
//! table of admissible `(dst, src)` kinds before building the
//! instruction, and returns [`IsaError`] on a mismatch rather than
//! letting a malformed instruction reach the encoder.

use derive_more::Display;

use crate::back::symbols::{ExternSymbol, LocalSymbol};
use crate::common::{IsaError, Result};

/// An 8-bit general-purpose register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[allow(missing_docs)]
pub enum Reg8 {
    #[display("al")]
    Al,
    #[display("cl")]
    Cl,
    #[display("dl")]
    Dl,
    #[display("bl")]
    Bl,
    #[display("spl")]
    Spl,
    #[display("bpl")]
    Bpl,
    #[display("sil")]
    Sil,
    #[display("dil")]
    Dil,
    #[display("r8b")]
    R8b,
    #[display("r9b")]
    R9b,
    #[display("r10b")]
    R10b,
    #[display("r11b")]
    R11b,
    #[display("r12b")]
    R12b,
    #[display("r13b")]
    R13b,
    #[display("r14b")]
    R14b,
    #[display("r15b")]
    R15b,
}

/// A 32-bit general-purpose register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[allow(missing_docs)]
pub enum Reg32 {
    #[display("eax")]
    Eax,
    #[display("ecx")]
    Ecx,
    #[display("edx")]
    Edx,
    #[display("ebx")]
    Ebx,
    #[display("esp")]
    Esp,
    #[display("ebp")]
    Ebp,
    #[display("esi")]
    Esi,
    #[display("edi")]
    Edi,
    #[display("r8d")]
    R8d,
    #[display("r9d")]
    R9d,
    #[display("r10d")]
    R10d,
    #[display("r11d")]
    R11d,
    #[display("r12d")]
    R12d,
    #[display("r13d")]
    R13d,
    #[display("r14d")]
    R14d,
    #[display("r15d")]
    R15d,
}

/// A 64-bit general-purpose register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[allow(missing_docs)]
pub enum Reg64 {
    #[display("rax")]
    Rax,
    #[display("rcx")]
    Rcx,
    #[display("rdx")]
    Rdx,
    #[display("rbx")]
    Rbx,
    #[display("rsp")]
    Rsp,
    #[display("rbp")]
    Rbp,
    #[display("rsi")]
    Rsi,
    #[display("rdi")]
    Rdi,
    #[display("r8")]
    R8,
    #[display("r9")]
    R9,
    #[display("r10")]
    R10,
    #[display("r11")]
    R11,
    #[display("r12")]
    R12,
    #[display("r13")]
    R13,
    #[display("r14")]
    R14,
    #[display("r15")]
    R15,
}

impl Reg8 {
    pub fn encoding(self) -> u8 {
        self as u8
    }
}

impl Reg32 {
    pub fn encoding(self) -> u8 {
        self as u8
    }
}

impl Reg64 {
    pub fn encoding(self) -> u8 {
        self as u8
    }
}

/// Register discipline fixed by the lowering pass (§4.5): `rbx` is the
/// base of the tape, `r13`/`r13d` the data-pointer displacement into it.
pub const REG_M: Reg64 = Reg64::Rbx;
pub const REG_P: Reg64 = Reg64::R13;
pub const REG_P32: Reg32 = Reg32::R13d;
pub const REG8_TEMP: Reg8 = Reg8::Al;
pub const REG64_TEMP: Reg64 = Reg64::Rax;
pub const REG32_ARG1: Reg32 = Reg32::Edi;
pub const REG64_ARG1: Reg64 = Reg64::Rdi;
pub const REG32_ARG2: Reg32 = Reg32::Esi;
pub const REG64_ARG2: Reg64 = Reg64::Rsi;
pub const REG64_ARG3: Reg64 = Reg64::Rdx;
pub const REG64_ARG4: Reg64 = Reg64::Rcx;
pub const REG64_ARG5: Reg64 = Reg64::R8;
pub const REG64_ARG6: Reg64 = Reg64::R9;
pub const REG8_RETVAL: Reg8 = Reg8::Al;
pub const REG32_RETVAL: Reg32 = Reg32::Eax;
pub const REG64_RETVAL: Reg64 = Reg64::Rax;

/// An instruction operand. Each variant corresponds to one of the
/// closed `X86_OPERAND_*` kinds; the encoder matches on this directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Extern(ExternSymbol),
    Imm8(i32),
    Imm32(i32),
    Label(u32),
    Local(LocalSymbol),
    /// `[base + index + disp]`, an 8-bit memory access.
    Mem8Reg { base: Reg64, index: Reg64, disp: i32 },
    Mem64Extern(ExternSymbol),
    Mem64Local(LocalSymbol),
    /// `[label]` — used only by `lea`, which the lowering never emits
    /// (it has no use for loading a label's address), kept for the
    /// closed operand set's completeness per §4.4.
    Mem64Label(u32),
    /// A raw absolute address, used for the JIT back-end's PLT/GOT
    /// indirection where the target is a host-process pointer rather
    /// than a symbol resolved later by the encoder context.
    Mem64Rel(u64),
    Reg8(Reg8),
    Reg32(Reg32),
    Reg64(Reg64),
}

impl Operand {
    pub fn is_64bit(&self) -> bool {
        matches!(
            self,
            Operand::Mem64Extern(_) | Operand::Mem64Local(_) | Operand::Mem64Label(_) | Operand::Mem64Rel(_) | Operand::Reg64(_)
        )
    }

    pub(crate) fn kind(&self) -> OperandKind {
        match self {
            Operand::Extern(_) => OperandKind::Extern,
            Operand::Imm8(_) => OperandKind::Imm8,
            Operand::Imm32(_) => OperandKind::Imm32,
            Operand::Label(_) => OperandKind::Label,
            Operand::Local(_) => OperandKind::Local,
            Operand::Mem8Reg { .. } => OperandKind::Mem8Reg,
            Operand::Mem64Extern(_) => OperandKind::Mem64Extern,
            Operand::Mem64Local(_) => OperandKind::Mem64Local,
            Operand::Mem64Label(_) => OperandKind::Mem64Label,
            Operand::Mem64Rel(_) => OperandKind::Mem64Rel,
            Operand::Reg8(_) => OperandKind::Reg8,
            Operand::Reg32(_) => OperandKind::Reg32,
            Operand::Reg64(_) => OperandKind::Reg64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OperandKind {
    Extern,
    Imm8,
    Imm32,
    Label,
    Local,
    Mem8Reg,
    Mem64Extern,
    Mem64Local,
    Mem64Label,
    Mem64Rel,
    Reg8,
    Reg32,
    Reg64,
}

fn check_single(op_name: &'static str, operand: &Operand, allowed: &[OperandKind]) -> Result<()> {
    if allowed.contains(&operand.kind()) {
        Ok(())
    } else {
        Err(IsaError { op: op_name }.into())
    }
}

fn check_pair(op_name: &'static str, dst: &Operand, src: &Operand, allowed: &[(OperandKind, OperandKind)]) -> Result<()> {
    let got = (dst.kind(), src.kind());
    if allowed.contains(&got) {
        Ok(())
    } else {
        Err(IsaError { op: op_name }.into())
    }
}

/// One pseudo-instruction in a function's linear instruction list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    /// Pad with `nop` until the address is a multiple of `n` (a power of two).
    Align { n: u32 },
    Add { dst: Operand, src: Operand },
    And { dst: Operand, src: Operand },
    Call { target: Operand },
    Cmp { dst: Operand, src: Operand },
    Jl { target: Operand },
    Jmp { target: Operand },
    Jns { target: Operand },
    Jnz { target: Operand },
    Jz { target: Operand },
    Label { n: u32 },
    Lea { dst: Operand, src: Operand },
    Mov { dst: Operand, src: Operand },
    Movzx { dst: Operand, src: Operand },
    Or { dst: Operand, src: Operand },
    Pop { dst: Operand },
    Push { src: Operand },
    Ret,
    /// `hlt` — used for the `__libc_start_main` no-return guard; encodes
    /// to a privileged instruction that traps if ever actually executed.
    Segfault,
}

macro_rules! alu_ctor {
    ($name:ident, $variant:ident, $desc:literal) => {
        pub fn $name(dst: Operand, src: Operand) -> Result<Instr> {
            use OperandKind::*;
            check_pair(
                $desc,
                &dst,
                &src,
                &[
                    (Mem8Reg, Imm8),
                    (Mem8Reg, Reg8),
                    (Reg8, Reg8),
                    (Reg32, Imm32),
                    (Reg32, Reg32),
                    (Reg64, Imm32),
                    (Reg64, Reg64),
                ],
            )?;
            Ok(Instr::$variant { dst, src })
        }
    };
}

impl Instr {
    pub fn align(n: u32) -> Instr {
        Instr::Align { n }
    }

    alu_ctor!(add, Add, "add");
    alu_ctor!(and, And, "and");
    alu_ctor!(cmp, Cmp, "cmp");
    alu_ctor!(or, Or, "or");

    pub fn call(target: Operand) -> Result<Instr> {
        check_single("call", &target, &[OperandKind::Extern, OperandKind::Local])?;
        Ok(Instr::Call { target })
    }

    pub fn jl(target: Operand) -> Result<Instr> {
        check_single("conditional jump (jl)", &target, &[OperandKind::Label])?;
        Ok(Instr::Jl { target })
    }

    pub fn jmp(target: Operand) -> Result<Instr> {
        check_single("jump (jmp)", &target, &[OperandKind::Label, OperandKind::Mem64Rel])?;
        Ok(Instr::Jmp { target })
    }

    pub fn jns(target: Operand) -> Result<Instr> {
        check_single("conditional jump (jns)", &target, &[OperandKind::Label])?;
        Ok(Instr::Jns { target })
    }

    pub fn jnz(target: Operand) -> Result<Instr> {
        check_single("conditional jump (jnz)", &target, &[OperandKind::Label])?;
        Ok(Instr::Jnz { target })
    }

    pub fn jz(target: Operand) -> Result<Instr> {
        check_single("conditional jump (jz)", &target, &[OperandKind::Label])?;
        Ok(Instr::Jz { target })
    }

    pub fn label(n: u32) -> Instr {
        Instr::Label { n }
    }

    pub fn lea(dst: Operand, src: Operand) -> Result<Instr> {
        use OperandKind::*;
        check_pair("lea", &dst, &src, &[(Reg64, Mem64Label), (Reg64, Mem64Local)])?;
        Ok(Instr::Lea { dst, src })
    }

    pub fn mov(dst: Operand, src: Operand) -> Result<Instr> {
        use OperandKind::*;
        check_pair(
            "mov",
            &dst,
            &src,
            &[
                (Mem8Reg, Reg8),
                (Mem8Reg, Imm8),
                (Reg8, Mem8Reg),
                (Reg32, Imm32),
                (Reg32, Reg32),
                (Reg64, Mem64Extern),
                (Reg64, Mem64Local),
                (Reg64, Reg64),
            ],
        )?;
        Ok(Instr::Mov { dst, src })
    }

    pub fn movzx(dst: Operand, src: Operand) -> Result<Instr> {
        check_pair("movzx", &dst, &src, &[(OperandKind::Reg32, OperandKind::Mem8Reg)])?;
        Ok(Instr::Movzx { dst, src })
    }

    pub fn pop(dst: Operand) -> Result<Instr> {
        check_single("pop", &dst, &[OperandKind::Reg64])?;
        Ok(Instr::Pop { dst })
    }

    pub fn push(src: Operand) -> Result<Instr> {
        check_single("push", &src, &[OperandKind::Imm32, OperandKind::Mem64Rel, OperandKind::Reg64])?;
        Ok(Instr::Push { src })
    }

    pub fn ret() -> Instr {
        Instr::Ret
    }

    pub fn segfault() -> Instr {
        Instr::Segfault
    }

    /// The destination operand, if this instruction has one with a label
    /// that must resolve (used by the encoder's post-convergence check).
    pub(crate) fn dst_operand(&self) -> Option<&Operand> {
        match self {
            Instr::Add { dst, .. }
            | Instr::And { dst, .. }
            | Instr::Cmp { dst, .. }
            | Instr::Lea { dst, .. }
            | Instr::Mov { dst, .. }
            | Instr::Movzx { dst, .. }
            | Instr::Or { dst, .. }
            | Instr::Pop { dst } => Some(dst),
            Instr::Call { target } | Instr::Jl { target } | Instr::Jmp { target } | Instr::Jns { target } | Instr::Jnz { target } | Instr::Jz { target } => {
                Some(target)
            }
            _ => None,
        }
    }

    pub(crate) fn src_operand(&self) -> Option<&Operand> {
        match self {
            Instr::Add { src, .. } | Instr::And { src, .. } | Instr::Cmp { src, .. } | Instr::Lea { src, .. } | Instr::Mov { src, .. } | Instr::Movzx { src, .. } | Instr::Or { src, .. } => Some(src),
            Instr::Push { src } => Some(src),
            _ => None,
        }
    }
}

/// Convenience constructors for operands, mirroring the original's
/// `x86_operand_new_*` family.
pub mod operand {
    use super::*;

    pub fn ext(symbol: ExternSymbol) -> Operand {
        Operand::Extern(symbol)
    }
    pub fn imm8(n: i32) -> Operand {
        Operand::Imm8(n)
    }
    pub fn imm32(n: i32) -> Operand {
        Operand::Imm32(n)
    }
    pub fn label(n: u32) -> Operand {
        Operand::Label(n)
    }
    pub fn local(symbol: LocalSymbol) -> Operand {
        Operand::Local(symbol)
    }
    pub fn mem8(base: Reg64, index: Reg64, disp: i32) -> Operand {
        Operand::Mem8Reg { base, index, disp }
    }
    pub fn mem64_extern(symbol: ExternSymbol) -> Operand {
        Operand::Mem64Extern(symbol)
    }
    pub fn mem64_local(symbol: LocalSymbol) -> Operand {
        Operand::Mem64Local(symbol)
    }
    pub fn mem64_label(n: u32) -> Operand {
        Operand::Mem64Label(n)
    }
    pub fn mem64_rel(address: u64) -> Operand {
        Operand::Mem64Rel(address)
    }
    pub fn reg8(r: Reg8) -> Operand {
        Operand::Reg8(r)
    }
    pub fn reg32(r: Reg32) -> Operand {
        Operand::Reg32(r)
    }
    pub fn reg64(r: Reg64) -> Operand {
        Operand::Reg64(r)
    }
}
