//! The orchestrator tying the five optimization passes together into one
//! fixed sequence, gated by optimization level and the `-no-check` flag.
//!
//! Mirrors `original_source/src/app/app.c`'s driver: parse once, run a
//! fixed pipeline, hand the result to exactly one back-end or interpreter.
//! Every pass below is a pure `Vec<Node> -> Vec<Node>` rewrite, so the
//! pipeline itself does nothing but sequence them and log node counts at
//! each boundary (§9.1).

use log::debug;

use crate::ir::{contains_kind, Node};
use crate::middle::{bound_checks, dead_loops, loops, offsets, run_length};

/// Knobs threaded down from the CLI into the pipeline.
#[derive(Clone, Copy, Debug)]
pub struct PipelineOptions {
    /// `-O0` through `-O3`. Level 0 runs no tree-shape rewrite, only
    /// (optionally) bound-check insertion; levels 1-3 currently select
    /// the same full rewrite subset.
    pub optimization_level: u8,
    /// `-no-check`: skip bound-check insertion entirely, producing code
    /// that trusts the program never runs off the tape.
    pub no_check: bool,
}

impl PipelineOptions {
    pub fn new(optimization_level: u8, no_check: bool) -> Self {
        PipelineOptions { optimization_level, no_check }
    }
}

fn count_nodes(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .map(|n| 1 + n.body().map(count_nodes).unwrap_or(0))
        .sum()
}

/// Run the fixed optimization pipeline over a freshly parsed tree.
pub fn run(tree: Vec<Node>, options: PipelineOptions) -> Vec<Node> {
    debug!("pipeline: {} nodes parsed", count_nodes(&tree));

    let tree = if options.optimization_level == 0 {
        tree
    } else {
        let tree = run_length::optimize_run_length(tree);
        debug!("pipeline: {} nodes after run-length fusion", count_nodes(&tree));

        let tree = dead_loops::remove_dead_loops(tree);
        debug!("pipeline: {} nodes after dead-loop elimination", count_nodes(&tree));

        let tree = offsets::hoist_offsets(tree);
        debug!("pipeline: {} nodes after offset hoisting", count_nodes(&tree));

        let tree = loops::optimize_loops(tree);
        debug!("pipeline: {} nodes after loop-form recognition", count_nodes(&tree));

        tree
    };

    if options.no_check {
        tree
    } else {
        let tree = bound_checks::insert_bound_checks(tree);
        debug!("pipeline: {} nodes after bound-check insertion", count_nodes(&tree));
        tree
    }
}

/// Whether `tree` still needs a `Right` node to be hoisted into offsets
/// before a back-end can assume every `Add`/`In`/`Out`/`Loop` carries a
/// final resting offset. `-O0` output never gets here (back-ends that
/// want offset-hoisted input should always run at `-O1` or higher).
pub fn is_offset_hoisted(tree: &[Node]) -> bool {
    !contains_kind(tree, |n| matches!(n, Node::Right { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(level: u8, no_check: bool) -> PipelineOptions {
        PipelineOptions::new(level, no_check)
    }

    #[test]
    fn level_zero_leaves_rights_untouched_but_still_checks_bounds() {
        let tree = vec![Node::Right { n: 1 }, Node::Add { n: 1, offset: 0 }];
        let out = run(tree, opts(0, false));
        assert!(!is_offset_hoisted(&out));
        assert!(contains_kind(&out, |n| matches!(n, Node::CheckRight { .. })));
    }

    #[test]
    fn level_one_hoists_offsets_and_checks_bounds() {
        let tree = vec![Node::Right { n: 1 }, Node::Add { n: 1, offset: 0 }];
        let out = run(tree, opts(1, false));
        assert!(is_offset_hoisted(&out));
        assert!(contains_kind(&out, |n| matches!(n, Node::CheckRight { .. })));
    }

    #[test]
    fn no_check_suppresses_bound_check_insertion() {
        let tree = vec![Node::Right { n: 1 }, Node::Add { n: 1, offset: 0 }];
        let out = run(tree, opts(1, true));
        assert!(!contains_kind(&out, |n| matches!(n, Node::CheckRight { .. }) || matches!(n, Node::CheckLeft { .. })));
    }

    #[test]
    fn copy_cell_idiom_becomes_add2_at_level_one() {
        // "++[->+<]": set cell 0 to 2, then fold it into an Add2/Set pair.
        let tree = vec![
            Node::Add { n: 2, offset: 0 },
            Node::Loop {
                offset: 0,
                body: vec![
                    Node::Add { n: -1, offset: 0 },
                    Node::Right { n: 1 },
                    Node::Add { n: 1, offset: 0 },
                    Node::Right { n: -1 },
                ],
            },
        ];
        let out = run(tree, opts(1, true));
        assert!(contains_kind(&out, |n| matches!(n, Node::Add2 { .. })));
    }
}
