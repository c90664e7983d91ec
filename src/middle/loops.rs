//! Pass 4: loop-form recognition.
//!
//! Each `StaticLoop` whose body is only `Add` nodes is analysed for a
//! closed form. `loop_inc` is the sum of `Add.n` at the loop's own offset
//! ("how much does each iteration change the test cell?"). A single-offset
//! loop (no other cell touched) that changes its own cell by an odd amount
//! zeroes that cell — `Set(0, loop_offset)`. A multi-offset loop is only
//! recognised when `loop_inc == -1`: it becomes a straight-line sequence
//! of `Add2` transfers followed by zeroing the source, or, when some
//! other-offset node has a coefficient other than 1, a residual loop that
//! decrements the source and carries the leftover multiples.

use crate::ir::{Builder, Node};

pub fn optimize_loops(nodes: Vec<Node>) -> Vec<Node> {
    let mut builder = Builder::new();
    for node in nodes {
        match node {
            Node::Loop { body, offset } => {
                builder.push(Node::Loop { body: optimize_loops(body), offset });
            }
            Node::StaticLoop { body, offset } => {
                builder.extend(process_static_loop(body, offset));
            }
            other => builder.push(other),
        }
    }
    builder.finish()
}

fn fallback(body: Vec<Node>, offset: i32) -> Vec<Node> {
    vec![Node::StaticLoop { body: optimize_loops(body), offset }]
}

fn process_static_loop(body: Vec<Node>, offset: i32) -> Vec<Node> {
    let mut single_offset = true;
    let mut loop_increment = 0;

    for node in &body {
        match node {
            Node::Add { n, offset: node_offset } => {
                if *node_offset == offset {
                    loop_increment += n;
                } else {
                    single_offset = false;
                }
            }
            _ => return fallback(body, offset),
        }
    }

    if single_offset {
        generate_single_offset(body, offset, loop_increment)
    } else {
        generate_multi_offset(body, offset, loop_increment)
    }
}

fn generate_single_offset(body: Vec<Node>, offset: i32, loop_increment: i32) -> Vec<Node> {
    if loop_increment % 2 == 0 {
        // An even net increment can reach zero from more than one starting
        // value or never reach it at all; only an odd increment guarantees
        // the loop zeroes its cell in a way that is safe to replace.
        return fallback(body, offset);
    }
    vec![Node::Set { value: 0, offset }]
}

fn generate_multi_offset(body: Vec<Node>, offset: i32, loop_increment: i32) -> Vec<Node> {
    if loop_increment != -1 {
        return fallback(body, offset);
    }

    let mut builder = Builder::new();
    let mut needs_loop = false;

    for node in &body {
        if let Node::Add { n, offset: node_offset } = node {
            if *node_offset == offset {
                continue;
            }
            if *n != 1 {
                needs_loop = true;
                continue;
            }
            builder.push(Node::Add2 { dst_offset: *node_offset, src_offset: offset });
        }
    }

    if !needs_loop {
        builder.push(Node::Set { value: 0, offset });
    } else {
        let mut inner = Builder::new();
        inner.push(Node::Add { n: -1, offset });

        for node in &body {
            if let Node::Add { n, offset: node_offset } = node {
                if *node_offset == offset || *n == 1 {
                    continue;
                }
                inner.push(Node::Add { n: *n, offset: *node_offset });
            }
        }

        builder.push(Node::StaticLoop { body: inner.finish(), offset });
    }

    builder.finish()
}
