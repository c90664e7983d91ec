//! Pass 1: run-length fusion.
//!
//! Collapses adjacent `Add` (respectively `Right`) nodes into a single node
//! carrying the summed `n`, dropping runs that sum to zero. Recurses into
//! loop bodies; a loop whose body becomes empty is itself dropped. This
//! pass is idempotent: no two adjacent nodes of the same fusable kind
//! survive a single application, so a second application is a no-op.

use crate::ir::{Builder, Node};

pub fn optimize_run_length(nodes: Vec<Node>) -> Vec<Node> {
    let mut builder = Builder::new();
    let mut iter = nodes.into_iter().peekable();

    while let Some(node) = iter.next() {
        match node {
            Node::Add { n, offset } => {
                let mut sum = n;
                while matches!(iter.peek(), Some(Node::Add { offset: o, .. }) if *o == offset) {
                    if let Some(Node::Add { n: next, .. }) = iter.next() {
                        sum += next;
                    }
                }
                if sum != 0 {
                    builder.push(Node::Add { n: sum, offset });
                }
            }
            Node::Right { n } => {
                let mut sum = n;
                while matches!(iter.peek(), Some(Node::Right { .. })) {
                    if let Some(Node::Right { n: next }) = iter.next() {
                        sum += next;
                    }
                }
                if sum != 0 {
                    builder.push(Node::Right { n: sum });
                }
            }
            Node::Loop { body, offset } => {
                let body = optimize_run_length(body);
                if !body.is_empty() {
                    builder.push(Node::Loop { body, offset });
                }
            }
            Node::StaticLoop { body, offset } => {
                let body = optimize_run_length(body);
                if !body.is_empty() {
                    builder.push(Node::StaticLoop { body, offset });
                }
            }
            other => builder.push(other),
        }
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuses_adjacent_adds() {
        let tree = vec![
            Node::Add { n: 1, offset: 0 },
            Node::Add { n: 1, offset: 0 },
            Node::Add { n: 1, offset: 0 },
        ];
        assert_eq!(optimize_run_length(tree), vec![Node::Add { n: 3, offset: 0 }]);
    }

    #[test]
    fn drops_zero_sum_runs() {
        let tree = vec![Node::Right { n: 3 }, Node::Right { n: -3 }];
        assert_eq!(optimize_run_length(tree), Vec::<Node>::new());
    }

    #[test]
    fn drops_loops_whose_body_becomes_empty() {
        let tree = vec![Node::Loop {
            offset: 0,
            body: vec![Node::Add { n: 1, offset: 0 }, Node::Add { n: -1, offset: 0 }],
        }];
        assert_eq!(optimize_run_length(tree), Vec::<Node>::new());
    }

    #[test]
    fn is_idempotent() {
        let tree = vec![
            Node::Add { n: 1, offset: 0 },
            Node::Right { n: 2 },
            Node::Right { n: -1 },
            Node::Out { offset: 0 },
        ];
        let once = optimize_run_length(tree);
        let twice = optimize_run_length(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn does_not_fuse_adds_at_different_offsets() {
        let tree = vec![Node::Add { n: 1, offset: 0 }, Node::Add { n: 1, offset: 1 }];
        assert_eq!(optimize_run_length(tree.clone()), tree);
    }
}
