//! Pass 5: bounds-check insertion (skipped when the user passes
//! `-no-check`).
//!
//! Before any access at offset `d` from the current data pointer, either
//! `d == 0` or a `CheckRight`/`CheckLeft` has already been emitted for the
//! maximum/minimum `d` reached before the pointer next moves. Each sibling
//! list is split into segments at dynamic `Loop` boundaries (static loops
//! never move the pointer, so they do not split a segment); within a
//! segment the minimum and maximum accessed offsets are computed,
//! including a lookahead to the offset the next loop's test will read,
//! and at most one `CheckRight` and one `CheckLeft` are prepended.

use crate::ir::{Builder, Node};

struct Minmax {
    min: i32,
    max: i32,
}

impl Minmax {
    fn seeded_at(v: i32) -> Self {
        Minmax { min: v, max: v }
    }

    fn update(&mut self, v: i32) {
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }
}

/// The range of offsets a static loop's body touches, seeded with the
/// loop's own test offset (it is read every iteration too).
fn static_loop_body_offsets(body: &[Node], loop_offset: i32) -> Minmax {
    let mut mm = Minmax::seeded_at(loop_offset);
    for node in body {
        match node {
            Node::StaticLoop { body: inner, offset } => {
                let inner_mm = static_loop_body_offsets(inner, *offset);
                mm.update(inner_mm.min);
                mm.update(inner_mm.max);
            }
            Node::Add2 { dst_offset, src_offset } => {
                mm.update(*dst_offset);
                mm.update(*src_offset);
            }
            Node::Add { offset, .. } | Node::Set { offset, .. } | Node::In { offset } | Node::Out { offset } => {
                mm.update(*offset);
            }
            _ => {}
        }
    }
    mm
}

pub fn insert_bound_checks(nodes: Vec<Node>) -> Vec<Node> {
    insert_bound_checks_recursive(nodes, 0)
}

fn insert_bound_checks_recursive(nodes: Vec<Node>, loop_offset: i32) -> Vec<Node> {
    let mut builder = Builder::new();
    let mut base_offset = loop_offset;
    let mut iter = nodes.into_iter();

    loop {
        let mut segment: Vec<Node> = Vec::new();
        let mut boundary_loop: Option<(Vec<Node>, i32)> = None;

        for node in iter.by_ref() {
            if let Node::Loop { body, offset } = node {
                boundary_loop = Some((body, offset));
                break;
            }
            segment.push(node);
        }

        let mut shift_offset = 0;
        let mut mm = Minmax::seeded_at(base_offset);

        for node in &segment {
            match node {
                Node::Right { n } => shift_offset += n,
                Node::StaticLoop { body, offset } => {
                    let inner = static_loop_body_offsets(body, *offset);
                    mm.update(inner.min + shift_offset);
                    mm.update(inner.max + shift_offset);
                }
                Node::Add2 { dst_offset, src_offset } => {
                    mm.update(dst_offset + shift_offset);
                    mm.update(src_offset + shift_offset);
                }
                Node::Add { offset, .. } | Node::Set { offset, .. } | Node::In { offset } | Node::Out { offset } => {
                    mm.update(offset + shift_offset);
                }
                _ => {}
            }
        }

        // Lookahead: whatever reads next (the boundary loop's test, or the
        // enclosing loop's test again if the list is exhausted) must also
        // be within bounds before we get there.
        let end_offset = match &boundary_loop {
            Some((_, offset)) => offset + shift_offset,
            None => base_offset + shift_offset,
        };
        mm.update(end_offset);

        if mm.max > base_offset {
            builder.push(Node::CheckRight { offset: mm.max });
        }
        if mm.min < base_offset {
            builder.push(Node::CheckLeft { offset: mm.min });
        }

        builder.extend(segment);

        match boundary_loop {
            Some((body, offset)) => {
                let body = insert_bound_checks_recursive(body, offset);
                builder.push(Node::Loop { body, offset });
                base_offset = offset;
            }
            None => break,
        }
    }

    builder.finish()
}
