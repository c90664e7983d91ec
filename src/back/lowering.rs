//! IR → pseudo-ISA lowering (§4.5).
//!
//! Maps each IR node to a pseudo-instruction sequence using the fixed
//! register discipline in [`crate::back::isa`], assigns labels for loops
//! and bound-check skip targets, and generates the `main` prologue and
//! epilogue, the `_start` stub, and the three helper routines on demand —
//! each helper is only appended to the function list if `main` actually
//! references it (the IR contains the corresponding node kind).

use crate::back::isa::{operand::*, Instr, REG32_ARG1, REG32_RETVAL, REG64_ARG1, REG64_ARG2, REG64_ARG3, REG64_ARG4, REG64_ARG5, REG64_ARG6, REG64_TEMP, REG8_RETVAL, REG8_TEMP, REG_M, REG_P, REG_P32};
use crate::back::symbols::{ExternSymbol, LocalSymbol};
use crate::common::Result;
use crate::ir::{contains_kind, Node};

/// A named function: a local symbol plus its owned instruction list.
pub struct Function {
    pub symbol: LocalSymbol,
    pub instrs: Vec<Instr>,
}

struct LabelAllocator {
    next: u32,
}

impl LabelAllocator {
    fn new() -> Self {
        LabelAllocator { next: 0 }
    }

    fn fresh(&mut self) -> u32 {
        let n = self.next;
        self.next += 1;
        n
    }
}

/// Does `instr` already set the flags correctly for a zero-test on `(REG_M, REG_P, offset)`?
/// True exactly when it is `add byte [rbx+r13+offset], imm8` at the same offset — the
/// peephole from §4.5's `Loop` lowering.
fn redundant_after(instr: Option<&Instr>, offset: i32) -> bool {
    matches!(
        instr,
        Some(Instr::Add {
            dst: crate::back::isa::Operand::Mem8Reg { base, index, disp },
            src: crate::back::isa::Operand::Imm8(_),
        }) if *base == REG_M && *index == REG_P && *disp == offset
    )
}

fn push_loop_test(out: &mut Vec<Instr>, offset: i32) -> Result<()> {
    if !redundant_after(out.last(), offset) {
        out.push(Instr::mov(reg8(crate::back::isa::Reg8::Al), mem8(REG_M, REG_P, offset))?);
        out.push(Instr::or(reg8(crate::back::isa::Reg8::Al), reg8(crate::back::isa::Reg8::Al))?);
    }
    Ok(())
}

fn lower_nodes(out: &mut Vec<Instr>, nodes: &[Node], labels: &mut LabelAllocator) -> Result<()> {
    let mut prev_add2_src: Option<i32> = None;

    for node in nodes {
        let this_add2_src = match node {
            Node::Add2 { src_offset, .. } => Some(*src_offset),
            _ => None,
        };

        match node {
            Node::Add { n, offset } => {
                out.push(Instr::add(mem8(REG_M, REG_P, *offset), imm8(*n))?);
            }
            Node::Set { value, offset } => {
                out.push(Instr::mov(mem8(REG_M, REG_P, *offset), imm8(*value))?);
            }
            Node::Add2 { dst_offset, src_offset } => {
                if prev_add2_src != Some(*src_offset) {
                    out.push(Instr::mov(reg8(REG8_TEMP), mem8(REG_M, REG_P, *src_offset))?);
                }
                out.push(Instr::add(mem8(REG_M, REG_P, *dst_offset), reg8(REG8_TEMP))?);
            }
            Node::Right { n } => {
                out.push(Instr::add(reg64(REG_P), imm32(*n))?);
            }
            Node::In { offset } => {
                out.push(Instr::mov(reg64(REG64_ARG1), mem64_extern(ExternSymbol::Stdin))?);
                out.push(Instr::call(ext(ExternSymbol::Fgetc))?);
                out.push(Instr::mov(mem8(REG_M, REG_P, *offset), reg8(REG8_RETVAL))?);
                out.push(Instr::mov(reg32(REG32_ARG1), reg32(REG32_RETVAL))?);
                out.push(Instr::call(local(LocalSymbol::CheckInput))?);
            }
            Node::Out { offset } => {
                out.push(Instr::movzx(reg32(REG32_ARG1), mem8(REG_M, REG_P, *offset))?);
                out.push(Instr::mov(reg64(REG64_ARG2), mem64_extern(ExternSymbol::Stdout))?);
                out.push(Instr::call(ext(ExternSymbol::Putc))?);
            }
            Node::Loop { body, offset } | Node::StaticLoop { body, offset } => {
                let start = labels.fresh();
                let end = labels.fresh();

                push_loop_test(out, *offset)?;
                out.push(Instr::jz(label(end))?);
                out.push(Instr::align(16));
                out.push(Instr::label(start));

                lower_nodes(out, body, labels)?;

                push_loop_test(out, *offset)?;
                out.push(Instr::jnz(label(start))?);
                out.push(Instr::label(end));
            }
            Node::CheckRight { offset } => {
                let skip = labels.fresh();
                out.push(Instr::mov(reg64(REG64_TEMP), reg64(REG_P))?);
                out.push(Instr::add(reg64(REG64_TEMP), imm32(*offset))?);
                out.push(Instr::cmp(reg64(REG64_TEMP), imm32(crate::common::TAPE_SIZE as i32))?);
                out.push(Instr::jl(label(skip))?);
                out.push(Instr::call(local(LocalSymbol::FailTooFarRight))?);
                out.push(Instr::label(skip));
            }
            Node::CheckLeft { offset } => {
                let skip = labels.fresh();
                out.push(Instr::mov(reg64(REG64_TEMP), reg64(REG_P))?);
                out.push(Instr::add(reg64(REG64_TEMP), imm32(*offset))?);
                out.push(Instr::jns(label(skip))?);
                out.push(Instr::call(local(LocalSymbol::FailTooFarLeft))?);
                out.push(Instr::label(skip));
            }
        }

        prev_add2_src = this_add2_src;
    }

    Ok(())
}

fn generate_main(program: &[Node]) -> Result<Vec<Instr>> {
    let mut out = Vec::new();
    out.push(Instr::push(reg64(crate::back::isa::Reg64::Rbp))?);
    out.push(Instr::push(reg64(REG_P))?);
    out.push(Instr::push(reg64(REG_M))?);

    out.push(Instr::mov(reg64(REG_M), mem64_local(LocalSymbol::M))?);
    out.push(Instr::mov(reg32(REG_P32), imm32(0))?);

    let mut labels = LabelAllocator::new();
    lower_nodes(&mut out, program, &mut labels)?;

    out.push(Instr::pop(reg64(REG_M))?);
    out.push(Instr::pop(reg64(REG_P))?);
    out.push(Instr::pop(reg64(crate::back::isa::Reg64::Rbp))?);

    out.push(Instr::mov(reg32(REG32_RETVAL), imm32(0))?);
    out.push(Instr::ret());

    Ok(out)
}

/// The `_start` entry point: the standard x86-64 `__libc_start_main`
/// handoff (aligns the stack, stashes `argc`/`argv`/`envp`, passes `main`'s
/// address, never returns).
fn generate_start() -> Result<Vec<Instr>> {
    const LABEL_RETURN: u32 = 1;

    let mut out = Vec::new();
    out.push(Instr::mov(reg32(crate::back::isa::Reg32::Ebp), imm32(0))?);
    out.push(Instr::mov(reg64(REG64_ARG6), reg64(REG64_ARG3))?);
    out.push(Instr::pop(reg64(REG64_ARG2))?);
    out.push(Instr::mov(reg64(REG64_ARG3), reg64(crate::back::isa::Reg64::Rsp))?);
    out.push(Instr::and(reg64(crate::back::isa::Reg64::Rsp), imm32(!0xf))?);
    out.push(Instr::push(reg64(crate::back::isa::Reg64::Rax))?);
    out.push(Instr::push(reg64(crate::back::isa::Reg64::Rsp))?);
    out.push(Instr::lea(reg64(REG64_ARG4), mem64_label(LABEL_RETURN))?);
    out.push(Instr::mov(reg64(REG64_ARG5), reg64(REG64_ARG4))?);
    out.push(Instr::lea(reg64(REG64_ARG1), mem64_local(LocalSymbol::Main))?);
    out.push(Instr::call(ext(ExternSymbol::LibcStartMain))?);

    // __libc_start_main should not return; crash if it somehow does.
    out.push(Instr::segfault());

    out.push(Instr::label(LABEL_RETURN));
    out.push(Instr::ret());

    Ok(out)
}

fn generate_fail_too_far(message: LocalSymbol) -> Result<Vec<Instr>> {
    let mut out = Vec::new();
    out.push(Instr::push(reg64(crate::back::isa::Reg64::Rbp))?);

    out.push(Instr::mov(reg64(REG64_ARG1), mem64_extern(ExternSymbol::Stderr))?);
    out.push(Instr::lea(reg64(REG64_ARG2), mem64_local(message))?);
    out.push(Instr::call(ext(ExternSymbol::Fprintf))?);

    out.push(Instr::mov(reg32(REG32_ARG1), imm32(1))?);
    out.push(Instr::call(ext(ExternSymbol::Exit))?);

    Ok(out)
}

fn generate_check_input() -> Result<Vec<Instr>> {
    const EOF: i32 = -1;
    const LABEL_EOI: u32 = 1;
    const LABEL_DIE: u32 = 2;
    const LABEL_DONE: u32 = 3;

    let mut out = Vec::new();
    out.push(Instr::push(reg64(crate::back::isa::Reg64::Rbp))?);

    out.push(Instr::cmp(reg32(REG32_ARG1), imm32(EOF))?);
    out.push(Instr::jnz(label(LABEL_DONE))?);

    out.push(Instr::mov(reg64(REG64_ARG1), mem64_extern(ExternSymbol::Stdin))?);
    out.push(Instr::call(ext(ExternSymbol::Ferror))?);

    out.push(Instr::or(reg32(REG32_RETVAL), reg32(REG32_RETVAL))?);
    out.push(Instr::jz(label(LABEL_EOI))?);

    out.push(Instr::lea(reg64(REG64_ARG1), mem64_local(LocalSymbol::MsgFerr))?);
    out.push(Instr::call(ext(ExternSymbol::Perror))?);

    out.push(Instr::jmp(label(LABEL_DIE))?);

    out.push(Instr::label(LABEL_EOI));
    out.push(Instr::mov(reg64(REG64_ARG1), mem64_extern(ExternSymbol::Stderr))?);
    out.push(Instr::lea(reg64(REG64_ARG2), mem64_local(LocalSymbol::MsgEoi))?);
    out.push(Instr::call(ext(ExternSymbol::Fprintf))?);

    out.push(Instr::label(LABEL_DIE));
    out.push(Instr::mov(reg32(REG32_ARG1), imm32(1))?);
    out.push(Instr::call(ext(ExternSymbol::Exit))?);

    out.push(Instr::label(LABEL_DONE));
    out.push(Instr::pop(reg64(crate::back::isa::Reg64::Rbp))?);
    out.push(Instr::ret());

    Ok(out)
}

/// Lower a whole optimized program into its function list: `_start` and
/// `main` unconditionally, plus whichever helpers `main`'s body actually
/// needs.
pub fn lower_program(program: &[Node]) -> Result<Vec<Function>> {
    let mut functions = vec![
        Function { symbol: LocalSymbol::Start, instrs: generate_start()? },
        Function { symbol: LocalSymbol::Main, instrs: generate_main(program)? },
    ];

    if contains_kind(program, |n| matches!(n, Node::CheckRight { .. })) {
        functions.push(Function {
            symbol: LocalSymbol::FailTooFarRight,
            instrs: generate_fail_too_far(LocalSymbol::MsgRight)?,
        });
    }
    if contains_kind(program, |n| matches!(n, Node::CheckLeft { .. })) {
        functions.push(Function {
            symbol: LocalSymbol::FailTooFarLeft,
            instrs: generate_fail_too_far(LocalSymbol::MsgLeft)?,
        });
    }
    if contains_kind(program, |n| matches!(n, Node::In { .. })) {
        functions.push(Function { symbol: LocalSymbol::CheckInput, instrs: generate_check_input()? });
    }

    Ok(functions)
}

/// Every extern symbol referenced, transitively, by a function list's
/// instructions — the "live set" the ELF/JIT back-ends need to emit PLT
/// stubs and relocations only for what is actually used.
pub fn live_externs(functions: &[Function]) -> Vec<ExternSymbol> {
    let mut live = Vec::new();
    for func in functions {
        for instr in &func.instrs {
            for operand in [instr.dst_operand(), instr.src_operand()].into_iter().flatten() {
                let symbol = match operand {
                    crate::back::isa::Operand::Extern(s) | crate::back::isa::Operand::Mem64Extern(s) => Some(*s),
                    _ => None,
                };
                if let Some(s) = symbol {
                    if !live.contains(&s) {
                        live.push(s);
                    }
                }
            }
        }
    }
    live.sort_by_key(|s| s.index());
    live
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowering_an_empty_program_still_emits_prologue_and_epilogue() {
        let funcs = lower_program(&[]).unwrap();
        assert_eq!(funcs.len(), 2);
        assert_eq!(funcs[0].symbol, LocalSymbol::Start);
        assert_eq!(funcs[1].symbol, LocalSymbol::Main);
    }

    #[test]
    fn check_right_node_pulls_in_its_helper_function() {
        let program = vec![Node::CheckRight { offset: 1 }, Node::Add { n: 1, offset: 0 }];
        let funcs = lower_program(&program).unwrap();
        assert!(funcs.iter().any(|f| f.symbol == LocalSymbol::FailTooFarRight));
        assert!(!funcs.iter().any(|f| f.symbol == LocalSymbol::FailTooFarLeft));
    }

    #[test]
    fn in_node_pulls_in_check_input() {
        let program = vec![Node::In { offset: 0 }];
        let funcs = lower_program(&program).unwrap();
        assert!(funcs.iter().any(|f| f.symbol == LocalSymbol::CheckInput));
    }

    #[test]
    fn live_externs_sees_through_both_helper_and_main() {
        let program = vec![Node::In { offset: 0 }, Node::Out { offset: 0 }];
        let funcs = lower_program(&program).unwrap();
        let live = live_externs(&funcs);
        assert!(live.contains(&ExternSymbol::Fgetc));
        assert!(live.contains(&ExternSymbol::Putc));
        assert!(live.contains(&ExternSymbol::Ferror));
    }

    #[test]
    fn add2_peephole_omits_the_reload_for_a_repeated_source() {
        let program = vec![
            Node::Add2 { dst_offset: 1, src_offset: 0 },
            Node::Add2 { dst_offset: 2, src_offset: 0 },
        ];
        let mut out = Vec::new();
        let mut labels = LabelAllocator::new();
        lower_nodes(&mut out, &program, &mut labels).unwrap();
        let loads = out.iter().filter(|i| matches!(i, Instr::Mov { dst: crate::back::isa::Operand::Reg8(_), .. })).count();
        assert_eq!(loads, 1);
    }
}
