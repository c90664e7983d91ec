//! The C source back-end (`-backend c`): the least specialised target,
//! emitting a freestanding `main` that any C compiler can then take the
//! rest of the way.
//!
//! Grounded in `original_source/src/backend/c.c`: same fixed-width tape
//! and cursor globals, same three on-demand helper functions, same
//! indentation-by-loop-depth emission strategy. Unlike the x86 back-ends
//! this one never touches `back::isa` or `back::lowering` — node to C
//! statement is direct enough that there is no pseudo-ISA in between.

use std::fmt::Write as _;

use crate::common::TAPE_SIZE;
use crate::ir::{contains_kind, Node};

const INDENT: &str = "    ";

fn indent(out: &mut String, level: u32) {
    for _ in 0..level {
        out.push_str(INDENT);
    }
}

fn has_right_bound_check(nodes: &[Node]) -> bool {
    contains_kind(nodes, |n| matches!(n, Node::CheckRight { .. }))
}

fn has_left_bound_check(nodes: &[Node]) -> bool {
    contains_kind(nodes, |n| matches!(n, Node::CheckLeft { .. }))
}

fn has_in_node(nodes: &[Node]) -> bool {
    contains_kind(nodes, |n| matches!(n, Node::In { .. }))
}

fn emit_fail_too_far_right_decl(out: &mut String, root: &[Node]) {
    if !has_right_bound_check(root) {
        return;
    }
    out.push_str("static void fail_too_far_right(void) {\n");
    writeln!(out, "{INDENT}fprintf(stderr, \"Error: memory position out of bounds (overflow - too far right)\\n\");").unwrap();
    writeln!(out, "{INDENT}exit(EXIT_FAILURE);").unwrap();
    out.push_str("}\n\n");
}

fn emit_fail_too_far_left_decl(out: &mut String, root: &[Node]) {
    if !has_left_bound_check(root) {
        return;
    }
    out.push_str("static void fail_too_far_left(void) {\n");
    writeln!(out, "{INDENT}fprintf(stderr, \"Error: memory position out of bounds (underflow - too far left)\\n\");").unwrap();
    writeln!(out, "{INDENT}exit(EXIT_FAILURE);").unwrap();
    out.push_str("}\n\n");
}

fn emit_check_input_decl(out: &mut String, root: &[Node]) {
    if !has_in_node(root) {
        return;
    }
    out.push_str("static void check_input(int inp) {\n");
    writeln!(out, "{INDENT}if(inp == EOF) {{").unwrap();
    writeln!(out, "{INDENT}{INDENT}if(ferror(stdin)) {{").unwrap();
    writeln!(out, "{INDENT}{INDENT}{INDENT}fprintf(stderr, \"Error when reading input: %s\\n\", strerror(errno));").unwrap();
    writeln!(out, "{INDENT}{INDENT}}} else {{").unwrap();
    writeln!(out, "{INDENT}{INDENT}{INDENT}fprintf(stderr, \"Error: reached end of input\\n\");").unwrap();
    writeln!(out, "{INDENT}{INDENT}}}").unwrap();
    writeln!(out, "{INDENT}{INDENT}exit(EXIT_FAILURE);").unwrap();
    writeln!(out, "{INDENT}}}").unwrap();
    out.push_str("}\n\n");
}

fn generate_header(out: &mut String, root: &[Node]) {
    out.push_str("/* generated by tapec */\n");
    out.push_str("#include <errno.h>\n");
    out.push_str("#include <stdio.h>\n");
    out.push_str("#include <stdlib.h>\n");
    out.push_str("#include <string.h>\n\n");
    writeln!(out, "static char m[{TAPE_SIZE}];").unwrap();
    out.push_str("static int p = 0;\n\n");

    emit_fail_too_far_right_decl(out, root);
    emit_fail_too_far_left_decl(out, root);
    emit_check_input_decl(out, root);

    out.push_str("int main(int args, char *argv[]) {\n");
}

/// A scope (the top level, or a loop's body) declares its own `inp` only
/// if one of its *direct* children reads input; a nested loop's `In`
/// gets its own `inp` declared when that nested body is generated.
fn emit_input_decl(out: &mut String, nodes: &[Node], level: u32) {
    if nodes.iter().any(|n| matches!(n, Node::In { .. })) {
        indent(out, level + 1);
        out.push_str("/* input decl */\n");
        indent(out, level + 1);
        out.push_str("int inp;\n");
    }
}

fn emit_node(out: &mut String, node: &Node, level: u32) {
    match node {
        Node::Add { n, offset } => {
            indent(out, level + 1);
            writeln!(out, "m[p + {offset}] += {n};").unwrap();
        }
        Node::Add2 { dst_offset, src_offset } => {
            indent(out, level + 1);
            writeln!(out, "m[p + {dst_offset}] += m[p + {src_offset}];").unwrap();
        }
        Node::Set { value, offset } => {
            indent(out, level + 1);
            writeln!(out, "m[p + {offset}] = {value};").unwrap();
        }
        Node::Right { n } => {
            indent(out, level + 1);
            writeln!(out, "p += {n};").unwrap();
        }
        Node::In { offset } => {
            indent(out, level + 1);
            out.push_str("inp = fgetc(stdin);\n");
            indent(out, level + 1);
            out.push_str("check_input(inp);\n");
            indent(out, level + 1);
            writeln!(out, "m[p + {offset}] = inp;").unwrap();
        }
        Node::Out { offset } => {
            indent(out, level + 1);
            writeln!(out, "putc(m[p + {offset}], stdout);").unwrap();
        }
        Node::Loop { body, offset } => emit_loop(out, body, *offset, level),
        Node::StaticLoop { body, offset } => {
            indent(out, level + 1);
            out.push_str("/* static loop */\n");
            emit_loop(out, body, *offset, level);
        }
        Node::CheckRight { offset } => {
            indent(out, level + 1);
            writeln!(out, "/* check right bound for offset {offset} */").unwrap();
            indent(out, level + 1);
            writeln!(out, "if(p + {offset} > sizeof(m)) {{").unwrap();
            indent(out, level + 2);
            out.push_str("fail_too_far_right();\n");
            indent(out, level + 1);
            out.push_str("}\n");
        }
        Node::CheckLeft { offset } => {
            indent(out, level + 1);
            writeln!(out, "/* check left bound for offset {offset} */").unwrap();
            indent(out, level + 1);
            writeln!(out, "if(p + {offset} < 0) {{").unwrap();
            indent(out, level + 2);
            out.push_str("fail_too_far_left();\n");
            indent(out, level + 1);
            out.push_str("}\n");
        }
    }
}

fn emit_loop(out: &mut String, body: &[Node], offset: i32, level: u32) {
    indent(out, level + 1);
    writeln!(out, "while(m[p + {offset}]) {{").unwrap();
    generate_code(out, body, level + 1);
    indent(out, level + 1);
    out.push_str("}\n");
}

fn generate_code(out: &mut String, nodes: &[Node], level: u32) {
    emit_input_decl(out, nodes, level);
    for node in nodes {
        emit_node(out, node, level);
    }
}

fn generate_footer(out: &mut String) {
    writeln!(out, "{INDENT}exit(EXIT_SUCCESS);").unwrap();
    out.push_str("}\n");
}

/// Render `program` as a freestanding C99 translation unit.
pub fn generate(program: &[Node]) -> String {
    let mut out = String::new();
    generate_header(&mut out, program);
    generate_code(&mut out, program, 0);
    generate_footer(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_still_has_main_and_no_helpers() {
        let out = generate(&[]);
        assert!(out.contains("int main(int args, char *argv[]) {"));
        assert!(!out.contains("fail_too_far_right"));
        assert!(!out.contains("check_input"));
    }

    #[test]
    fn check_right_node_pulls_in_its_helper() {
        let out = generate(&[Node::CheckRight { offset: 1 }]);
        assert!(out.contains("static void fail_too_far_right(void)"));
        assert!(out.contains("fail_too_far_right();"));
    }

    #[test]
    fn in_node_declares_inp_and_calls_check_input() {
        let out = generate(&[Node::In { offset: 0 }]);
        assert!(out.contains("int inp;"));
        assert!(out.contains("check_input(inp);"));
    }

    #[test]
    fn loop_body_is_indented_one_level_deeper() {
        let out = generate(&[Node::Loop { offset: 0, body: vec![Node::Add { n: 1, offset: 0 }] }]);
        assert!(out.contains("        m[p + 0] += 1;\n"));
    }
}
