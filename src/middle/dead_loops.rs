//! Pass 2: dead-loop elimination.
//!
//! A loop whose entry condition is known zero never runs and is removed —
//! likely a comment written with instruction characters. Two flags are
//! tracked while walking a sibling list: `cell_is_zero` (current cell
//! provably zero) and `all_zero` (entire tape provably zero, only
//! meaningful at the very start of the program).

use crate::ir::{Builder, Node};

pub fn remove_dead_loops(nodes: Vec<Node>) -> Vec<Node> {
    remove_dead_loops_recursive(nodes, 0)
}

fn remove_dead_loops_recursive(nodes: Vec<Node>, level: u32) -> Vec<Node> {
    let mut builder = Builder::new();
    let mut cell_is_zero = level == 0;
    let mut all_zero = level == 0;

    for node in nodes {
        match node {
            Node::Loop { body, offset } => {
                if !cell_is_zero {
                    let body = remove_dead_loops_recursive(body, level + 1);
                    if !body.is_empty() {
                        builder.push(Node::Loop { body, offset });
                    }
                }
                // The loop test is provably false (zero) right after exit.
                cell_is_zero = true;
            }
            Node::Out { .. } => builder.push(node),
            Node::Right { .. } => {
                builder.push(node);
                cell_is_zero = all_zero;
            }
            other => {
                builder.push(other);
                cell_is_zero = false;
                all_zero = false;
            }
        }
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_a_loop_at_the_very_start_of_the_program() {
        let tree = vec![Node::Loop {
            offset: 0,
            body: vec![Node::Add { n: 1, offset: 0 }],
        }];
        assert_eq!(remove_dead_loops(tree), Vec::<Node>::new());
    }

    #[test]
    fn keeps_a_loop_after_an_add() {
        let tree = vec![
            Node::Add { n: 1, offset: 0 },
            Node::Loop { offset: 0, body: vec![Node::Add { n: -1, offset: 0 }] },
        ];
        assert_eq!(remove_dead_loops(tree.clone()), tree);
    }

    #[test]
    fn out_does_not_disturb_known_zero_state() {
        let tree = vec![
            Node::Out { offset: 0 },
            Node::Loop { offset: 0, body: vec![Node::Add { n: 1, offset: 0 }] },
        ];
        assert_eq!(remove_dead_loops(tree), vec![Node::Out { offset: 0 }]);
    }

    #[test]
    fn right_preserves_zero_only_while_all_zero_holds() {
        let tree = vec![
            Node::Right { n: 1 },
            Node::Loop { offset: 0, body: vec![Node::Add { n: 1, offset: 0 }] },
        ];
        // all_zero still true at program start, so the loop after the move is still dead.
        assert_eq!(remove_dead_loops(tree), vec![Node::Right { n: 1 }]);
    }

    #[test]
    fn after_a_non_trivial_op_a_following_loop_is_kept() {
        let tree = vec![
            Node::In { offset: 0 },
            Node::Right { n: 1 },
            Node::Loop { offset: 0, body: vec![Node::Add { n: 1, offset: 0 }] },
        ];
        let result = remove_dead_loops(tree);
        assert!(result.iter().any(|n| n.is_loop()));
    }
}
