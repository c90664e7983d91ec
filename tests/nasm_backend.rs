//! Scenario coverage for the NASM text back-end (`-backend nasm`): the
//! emitted lines are a direct token-for-token rendering of the pseudo-ISA
//! stream, so these tests check for the instructions §4.5's lowering is
//! documented to produce rather than assembling the output.

use tapec::ir::Node;
use tapec::middle::PipelineOptions;

fn optimize(source: &str, level: u8, no_check: bool) -> Vec<Node> {
    let tree = tapec::front::parse(source.as_bytes()).unwrap();
    tapec::middle::run(tree, PipelineOptions::new(level, no_check))
}

#[test]
fn fused_add_lowers_to_a_single_add_byte_instruction() {
    let source = format!("{}.", "+".repeat(33));
    let program = optimize(&source, 3, false);
    let out = tapec::back::nasm::generate(&program).unwrap();
    assert!(out.contains("add byte [rbx + r13 + 0], 33"));
}

#[test]
fn every_live_extern_gets_an_extern_declaration() {
    let program = optimize(",.", 3, false);
    let out = tapec::back::nasm::generate(&program).unwrap();
    assert!(out.contains("extern fgetc"));
    assert!(out.contains("extern putc"));
    assert!(out.contains("extern __libc_start_main"));
}

#[test]
fn main_and_start_are_emitted_as_sized_global_functions() {
    let program = optimize("+.", 3, false);
    let out = tapec::back::nasm::generate(&program).unwrap();
    assert!(out.contains("global main:function (main.end - main)"));
    assert!(out.contains("global _start:function (_start.end - _start)"));
}

#[test]
fn copy_cell_idiom_lowers_to_add2_and_set_with_no_conditional_branch() {
    let program = optimize("++[->+<]", 3, true);
    let out = tapec::back::nasm::generate(&program).unwrap();
    assert!(out.contains("mov al, byte [rbx + r13 + 0]"));
    assert!(out.contains("add byte [rbx + r13 + 1], al"));
    assert!(out.contains("mov byte [rbx + r13 + 0], 0"));
    assert!(!out.contains("jnz"));
}

#[test]
fn the_tape_is_reserved_in_bss_at_the_expected_size() {
    let program = optimize(".", 3, false);
    let out = tapec::back::nasm::generate(&program).unwrap();
    assert!(out.contains("resb 30000"));
}
