//! Read-only tree queries shared by later passes.

use super::node::Node;

/// Does any node reachable from `nodes` (including inside loop bodies)
/// match `predicate`?
pub fn contains_kind(nodes: &[Node], predicate: impl Fn(&Node) -> bool + Copy) -> bool {
    nodes.iter().any(|node| {
        predicate(node) || node.body().map(|b| contains_kind(b, predicate)).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_node_nested_inside_a_loop_body() {
        let tree = vec![Node::Loop {
            offset: 0,
            body: vec![Node::In { offset: 0 }],
        }];
        assert!(contains_kind(&tree, |n| matches!(n, Node::In { .. })));
        assert!(!contains_kind(&tree, |n| matches!(n, Node::Out { .. })));
    }
}
