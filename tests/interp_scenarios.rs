//! End-to-end scenarios (§8) driven through the straight bytecode
//! interpreter and the tree-walking interpreter, used here as each
//! other's oracle: for a well-behaved program both must agree on
//! standard output for the same standard input.

use std::io::Cursor;

use tapec::common::{Error, RuntimeError};
use tapec::ir::{contains_kind, Node};
use tapec::middle::PipelineOptions;

fn optimize(source: &str, level: u8, no_check: bool) -> Vec<Node> {
    let tree = tapec::front::parse(source.as_bytes()).unwrap();
    tapec::middle::run(tree, PipelineOptions::new(level, no_check))
}

fn run_tree(program: &[Node], input: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    tapec::interp::tree::run(program, Cursor::new(input.as_bytes()), &mut out)?;
    Ok(out)
}

fn run_slow(source: &str, input: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    tapec::interp::slow::run(Cursor::new(source.as_bytes()), Cursor::new(input.as_bytes()), &mut out)?;
    Ok(out)
}

/// Scenario 1: `+` fused 33 times then `.` on empty stdin prints `!`.
#[test]
fn scenario_1_fused_adds_print_bang() {
    let source = format!("{}.", "+".repeat(33));
    let program = optimize(&source, 3, false);
    assert_eq!(run_tree(&program, "").unwrap(), vec![b'!']);
    assert_eq!(run_slow(&source, "").unwrap(), vec![b'!']);
}

/// Scenario 2: `,.` on stdin `A` echoes `A`.
#[test]
fn scenario_2_in_then_out_echoes_one_byte() {
    let source = ",.";
    let program = optimize(source, 3, false);
    assert_eq!(run_tree(&program, "A").unwrap(), vec![b'A']);
    assert_eq!(run_slow(source, "A").unwrap(), vec![b'A']);
}

/// Scenario 3: `,.` on empty stdin fails with the end-of-input message.
#[test]
fn scenario_3_end_of_input_on_empty_stdin_is_fatal() {
    let source = ",.";
    let program = optimize(source, 3, false);
    let err = run_tree(&program, "").unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::EndOfInput)));
    assert_eq!(err.to_string(), "Error: reached end of input");

    let err = run_slow(source, "").unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::EndOfInput)));
}

/// Scenario 4: `+[>+]` with checks enabled eventually walks off the right
/// end of the tape and fails with the overflow message, never looping
/// forever.
#[test]
fn scenario_4_unbounded_walk_hits_the_right_overflow_check() {
    let program = optimize("+[>+]", 3, false);
    let err = run_tree(&program, "").unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::TooFarRight)));
    assert_eq!(err.to_string(), "Error: memory position out of bounds (overflow - too far right)");
}

/// Scenario 5: `++[->+<]` (copy cell 0 into cell 1, zeroing cell 0) is
/// rewritten by loop-form recognition into a loop-free `Add2`/`Set`
/// sequence, and still produces the same observable output.
#[test]
fn scenario_5_copy_cell_idiom_becomes_add2_and_set() {
    let program = optimize("++[->+<]>.", 3, true);
    assert!(!contains_kind(&program, |n| n.is_loop()));
    assert!(contains_kind(&program, |n| matches!(n, Node::Add2 { .. })));
    assert!(contains_kind(&program, |n| matches!(n, Node::Set { .. })));
    assert_eq!(run_tree(&program, "").unwrap(), vec![2]);
}

/// Scenario 6: a loop opened while the tape is still all-zero is
/// eliminated as dead code; the rest of the program runs normally.
#[test]
fn scenario_6_loop_over_the_untouched_tape_is_dead_code() {
    let source = "[comment +-><.,] ++.";
    let program = optimize(source, 3, false);
    assert!(!contains_kind(&program, |n| n.is_loop()));
    assert_eq!(run_tree(&program, "").unwrap(), vec![2]);
    assert_eq!(run_slow(source, "").unwrap(), vec![2]);
}

/// Boundary: a source with no meaningful characters produces an empty
/// tree and no output.
#[test]
fn boundary_source_of_only_noise_produces_no_output() {
    let program = optimize("this file has no instructions in it", 3, false);
    assert!(program.is_empty());
    assert_eq!(run_tree(&program, "").unwrap(), Vec::<u8>::new());
}

/// Boundary: unmatched `[` is reported with the opening bracket's
/// position, for both the parser (line/column) and the `-slow`
/// interpreter (byte offset).
#[test]
fn boundary_unmatched_open_bracket() {
    let err = tapec::front::parse(b"ab\n[+").unwrap_err();
    assert_eq!(err.to_string(), "Error: found unmatched '[' on line 2 column 1");

    let err = run_slow("ab\n[+", "").unwrap_err();
    assert!(matches!(err, Error::Runtime(RuntimeError::UnmatchedOpen { position: 3 })));
}
