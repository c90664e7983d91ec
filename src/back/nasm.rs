//! The NASM source back-end (`-backend nasm`): the pseudo-ISA's most
//! direct textual rendering, one token-for-token translation of each
//! [`Instr`]/[`Operand`] pair into NASM's x86-64 syntax.
//!
//! Grounded in `original_source/src/backend/nasm.c`: same five emitted
//! sections in the same order (`.text`, `.rodata`, `.data`, `.bss`),
//! same `extern` declaration block, same `global name:function (name.end
//! - name)` wrapper around `_start` and `main` so the assembled object
//! carries a correct symbol size.

use std::fmt::Write as _;

use crate::back::isa::{Instr, Operand};
use crate::back::lowering::{lower_program, Function};
use crate::back::symbols::{message_text, ALL_EXTERN_SYMBOLS, LocalSymbol};
use crate::common::{Result, TAPE_SIZE};
use crate::ir::{contains_kind, Node};

const INDENT: &str = "    ";

fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::Extern(s) => format!("{s}"),
        Operand::Imm8(n) | Operand::Imm32(n) => format!("{n}"),
        Operand::Label(n) => format!(".l{n:08}"),
        Operand::Local(s) => format!("{s}"),
        Operand::Mem8Reg { base, index, disp } => format!("byte [{base} + {index} + {disp}]"),
        Operand::Mem64Extern(s) => format!("qword [{s}]"),
        Operand::Mem64Local(s) => format!("qword [{s}]"),
        Operand::Mem64Label(n) => format!("qword [.l{n:08}]"),
        Operand::Mem64Rel(addr) => format!("qword [REL {addr}]"),
        Operand::Reg8(r) => format!("{r}"),
        Operand::Reg32(r) => format!("{r}"),
        Operand::Reg64(r) => format!("{r}"),
    }
}

fn emit_instr(out: &mut String, instr: &Instr) {
    match instr {
        Instr::Align { n } => {
            writeln!(out, "{INDENT}align {n}, nop").unwrap();
        }
        Instr::Add { dst, src } => writeln!(out, "{INDENT}add {}, {}", format_operand(dst), format_operand(src)).unwrap(),
        Instr::And { dst, src } => writeln!(out, "{INDENT}and {}, {}", format_operand(dst), format_operand(src)).unwrap(),
        Instr::Call { target } => {
            writeln!(out, "{INDENT}call {}", format_operand(target)).unwrap();
            out.push('\n');
        }
        Instr::Cmp { dst, src } => writeln!(out, "{INDENT}cmp {}, {}", format_operand(dst), format_operand(src)).unwrap(),
        Instr::Jl { target } => {
            writeln!(out, "{INDENT}jl {}", format_operand(target)).unwrap();
            out.push('\n');
        }
        Instr::Jmp { target } => {
            writeln!(out, "{INDENT}jmp {}", format_operand(target)).unwrap();
            out.push('\n');
        }
        Instr::Jns { target } => {
            writeln!(out, "{INDENT}jns {}", format_operand(target)).unwrap();
            out.push('\n');
        }
        Instr::Jnz { target } => {
            writeln!(out, "{INDENT}jnz {}", format_operand(target)).unwrap();
            out.push('\n');
        }
        Instr::Jz { target } => {
            writeln!(out, "{INDENT}jz {}", format_operand(target)).unwrap();
            out.push('\n');
        }
        Instr::Label { n } => {
            writeln!(out, ".l{n:08}:").unwrap();
        }
        Instr::Lea { dst, src } => writeln!(out, "{INDENT}lea {}, {}", format_operand(dst), format_operand(src)).unwrap(),
        Instr::Mov { dst, src } => writeln!(out, "{INDENT}mov {}, {}", format_operand(dst), format_operand(src)).unwrap(),
        Instr::Movzx { dst, src } => writeln!(out, "{INDENT}movzx {}, {}", format_operand(dst), format_operand(src)).unwrap(),
        Instr::Or { dst, src } => writeln!(out, "{INDENT}or {}, {}", format_operand(dst), format_operand(src)).unwrap(),
        Instr::Pop { dst } => writeln!(out, "{INDENT}pop {}", format_operand(dst)).unwrap(),
        Instr::Push { src } => writeln!(out, "{INDENT}push {}", format_operand(src)).unwrap(),
        Instr::Ret => {
            out.push_str(&format!("{INDENT}ret\n"));
            out.push('\n');
        }
        Instr::Segfault => {
            // hlt is a privileged instruction; it traps rather than returning.
            out.push_str(&format!("{INDENT}hlt\n"));
            out.push('\n');
        }
    }
}

fn emit_header(out: &mut String) {
    out.push_str("; generated by tapec\n\n");
    for symbol in ALL_EXTERN_SYMBOLS {
        writeln!(out, "{INDENT}extern {symbol}").unwrap();
    }
    out.push('\n');
}

fn emit_global_function_start(out: &mut String, symbol: LocalSymbol) {
    writeln!(out, "{INDENT}global {symbol}:function ({symbol}.end - {symbol})").unwrap();
    writeln!(out, "{symbol}:").unwrap();
}

fn emit_global_function_end(out: &mut String) {
    out.push_str(".end:\n\n");
}

fn emit_text(out: &mut String, functions: &[Function]) {
    out.push_str(&format!("{INDENT}section .text\n\n"));

    for func in functions {
        let is_global = func.symbol == LocalSymbol::Start || func.symbol == LocalSymbol::Main;

        if is_global {
            emit_global_function_start(out, func.symbol);
        } else {
            writeln!(out, "{}:", func.symbol).unwrap();
        }

        for instr in &func.instrs {
            emit_instr(out, instr);
        }

        if is_global {
            emit_global_function_end(out);
        }
    }
}

fn emit_rodata(out: &mut String, root: &[Node]) {
    out.push_str(&format!("{INDENT}section .rodata\n\n"));

    if contains_kind(root, |n| matches!(n, Node::CheckRight { .. })) {
        writeln!(out, "{}:", LocalSymbol::MsgRight).unwrap();
        writeln!(out, "{INDENT}db \"{}\", 0", escape(message_text(LocalSymbol::MsgRight))).unwrap();
    }
    if contains_kind(root, |n| matches!(n, Node::CheckLeft { .. })) {
        writeln!(out, "{}:", LocalSymbol::MsgLeft).unwrap();
        writeln!(out, "{INDENT}db \"{}\", 0", escape(message_text(LocalSymbol::MsgLeft))).unwrap();
    }
    if contains_kind(root, |n| matches!(n, Node::In { .. })) {
        // no trailing newline byte here: this string goes through perror(), not fprintf()
        writeln!(out, "{}:", LocalSymbol::MsgFerr).unwrap();
        writeln!(out, "{INDENT}db \"{}\", 0", message_text(LocalSymbol::MsgFerr)).unwrap();
        writeln!(out, "{}:", LocalSymbol::MsgEoi).unwrap();
        writeln!(out, "{INDENT}db \"{}\", 0", escape(message_text(LocalSymbol::MsgEoi))).unwrap();
    }
    out.push('\n');
}

/// NASM `db` strings can't embed a literal newline; the messages that end
/// in `\n` are rendered as the quoted prefix followed by a numeric `10`.
fn escape(text: &str) -> String {
    text.strip_suffix('\n').map(|s| format!("{s}\", 10")).unwrap_or_else(|| text.to_string())
}

fn emit_data(out: &mut String) {
    out.push_str(&format!("{INDENT}section .data\n\n"));
    writeln!(out, "{}:", LocalSymbol::M).unwrap();
    writeln!(out, "{INDENT}dq marray").unwrap();
    out.push('\n');
}

fn emit_bss(out: &mut String) {
    out.push_str(&format!("{INDENT}section .bss\n\n"));
    out.push_str("marray:\n");
    writeln!(out, "{INDENT}resb {TAPE_SIZE}").unwrap();
}

/// Render `program` (already lowered to the pseudo-ISA) as a NASM source
/// file, ready to be assembled and linked against libc.
pub fn generate(program: &[Node]) -> Result<String> {
    let functions = lower_program(program)?;

    let mut out = String::new();
    emit_header(&mut out);
    emit_text(&mut out, &functions);
    emit_rodata(&mut out, program);
    emit_data(&mut out);
    emit_bss(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_declares_every_extern_and_both_globals() {
        let out = generate(&[]).unwrap();
        assert!(out.contains("extern fgetc"));
        assert!(out.contains("global _start:function"));
        assert!(out.contains("global main:function"));
    }

    #[test]
    fn check_right_node_emits_its_message_in_rodata() {
        let out = generate(&[Node::CheckRight { offset: 1 }]).unwrap();
        assert!(out.contains("msg_right:"));
        assert!(out.contains("overflow - too far right"));
    }

    #[test]
    fn in_node_emits_both_input_messages() {
        let out = generate(&[Node::In { offset: 0 }]).unwrap();
        assert!(out.contains("msg_ferr:"));
        assert!(out.contains("msg_eoi:"));
    }

    #[test]
    fn bss_is_sized_to_the_tape() {
        let out = generate(&[]).unwrap();
        assert!(out.contains("resb 30000"));
    }
}
