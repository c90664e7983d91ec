//! Pass 3: offset hoisting and static-loop detection.
//!
//! Rewrites each sibling list so the data pointer is moved only by a
//! single, leading `Right` (everything else carries an explicit `offset`
//! instead). Loops whose body touches neither `Right` nor a nested `Loop`
//! are retagged `StaticLoop` — codegen may then treat them as not moving
//! the data pointer at all.

use crate::ir::{Builder, Node};

/// Sum of every immediate sibling `Right.n` in `nodes` (loop bodies are
/// not descended into — each has its own scanning offset once recursed
/// into separately).
fn scanning_offset(nodes: &[Node]) -> i32 {
    nodes
        .iter()
        .map(|n| match n {
            Node::Right { n } => *n,
            _ => 0,
        })
        .sum()
}

fn body_is_static(body: &[Node]) -> bool {
    !body.iter().any(|n| matches!(n, Node::Right { .. } | Node::Loop { .. }))
}

/// `loop_offset` is the running offset at the point, in the enclosing
/// body, where this sibling list starts (0 for the top level). Every
/// emitted node's offset is `loop_offset` plus the net movement within
/// this list up to that node, minus the single leading `Right` this
/// pass collapses all of the list's movement into — so offsets are
/// expressed relative to the data pointer's position *after* that one
/// leading move, not relative to the list's logical entry point.
fn compute_offsets_in_body(nodes: Vec<Node>, loop_offset: i32, scanning_offset: i32) -> Vec<Node> {
    let mut builder = Builder::new();

    if scanning_offset != 0 {
        builder.push(Node::Right { n: scanning_offset });
    }

    let mut offset = loop_offset - scanning_offset;
    for node in nodes {
        match node {
            Node::Right { n } => offset += n,
            Node::Add { n, .. } => builder.push(Node::Add { n, offset }),
            Node::In { .. } => builder.push(Node::In { offset }),
            Node::Out { .. } => builder.push(Node::Out { offset }),
            Node::Loop { body, .. } => {
                let body_scanning_offset = scanning_offset(&body);
                let body = compute_offsets_in_body(body, offset, body_scanning_offset);
                if body_is_static(&body) {
                    builder.push(Node::StaticLoop { body, offset });
                } else {
                    builder.push(Node::Loop { body, offset });
                }
            }
            other => builder.push(other),
        }
    }

    builder.finish()
}

pub fn hoist_offsets(nodes: Vec<Node>) -> Vec<Node> {
    let lead = scanning_offset(&nodes);
    compute_offsets_in_body(nodes, 0, lead)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_interleaved_rights_into_a_leading_one() {
        let tree = vec![
            Node::Right { n: 1 },
            Node::Add { n: 1, offset: 0 },
            Node::Right { n: 1 },
            Node::Add { n: 1, offset: 0 },
        ];
        let result = hoist_offsets(tree);
        // The single leading Right already carries the pointer all the way
        // to its final position, so later nodes sit at *negative* offsets
        // from there — the first Add executed one cell short of that.
        assert_eq!(
            result,
            vec![
                Node::Right { n: 2 },
                Node::Add { n: 1, offset: -1 },
                Node::Add { n: 1, offset: 0 },
            ]
        );
    }

    #[test]
    fn tags_a_pointer_free_loop_as_static() {
        let tree = vec![Node::Loop {
            offset: 0,
            body: vec![Node::Add { n: -1, offset: 0 }],
        }];
        let result = hoist_offsets(tree);
        assert!(matches!(result[0], Node::StaticLoop { .. }));
    }

    #[test]
    fn leaves_a_pointer_moving_loop_dynamic() {
        let tree = vec![Node::Loop {
            offset: 0,
            body: vec![Node::Add { n: -1, offset: 0 }, Node::Right { n: 1 }],
        }];
        let result = hoist_offsets(tree);
        assert!(matches!(result[0], Node::Loop { .. }));
    }

    #[test]
    fn no_sibling_list_contains_two_consecutive_rights() {
        let tree = vec![
            Node::Right { n: 1 },
            Node::Right { n: 1 },
            Node::Add { n: 1, offset: 0 },
        ];
        let result = hoist_offsets(tree);
        for window in result.windows(2) {
            assert!(!matches!((&window[0], &window[1]), (Node::Right { .. }, Node::Right { .. })));
        }
    }
}
