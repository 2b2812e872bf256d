use crate::model::{Node, NodeId, NodeLookup};

/// What a [`Visitor`] wants the walk to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitFlow {
    Continue,
    /// Do not descend into the current node (only meaningful from `enter`)
    SkipChildren,
    Stop,
}

/// Depth-first, pre-order visitor over a node tree
///
/// Every node produces one `enter` and, unless the walk stops, one matching
/// `leave`. Override only the hooks you need.
pub trait Visitor {
    fn enter(&mut self, _node: &Node, _depth: usize) -> VisitFlow {
        VisitFlow::Continue
    }

    fn leave(&mut self, _node: &Node, _depth: usize) -> VisitFlow {
        VisitFlow::Continue
    }

    /// A child id that the lookup cannot resolve
    fn missing(&mut self, _parent: &Node, _id: &NodeId) -> VisitFlow {
        VisitFlow::Continue
    }
}

/// Walk the tree under `root`. Returns `false` if the visitor stopped early or
/// the root does not resolve.
///
/// Iterative, so deep documents cannot overflow the stack. Callers walking
/// untrusted data must rule out cycles first.
pub fn walk<L, V>(lookup: &L, root: &NodeId, visitor: &mut V) -> bool
where
    L: NodeLookup + ?Sized,
    V: Visitor + ?Sized,
{
    let Some(root_node) = lookup.lookup(root) else {
        return false;
    };

    match visitor.enter(root_node, 0) {
        VisitFlow::Stop => return false,
        VisitFlow::SkipChildren => return visitor.leave(root_node, 0) != VisitFlow::Stop,
        VisitFlow::Continue => {}
    }

    // (node, index of next child to visit)
    let mut stack: Vec<(&Node, usize)> = vec![(root_node, 0)];

    while let Some(&(node, index)) = stack.last() {
        let children = node.children();

        if index >= children.len() {
            let depth = stack.len() - 1;
            stack.pop();
            if visitor.leave(node, depth) == VisitFlow::Stop {
                return false;
            }
            continue;
        }

        if let Some(top) = stack.last_mut() {
            top.1 += 1;
        }
        let child_id = &children[index];
        let depth = stack.len();

        let Some(child) = lookup.lookup(child_id) else {
            if visitor.missing(node, child_id) == VisitFlow::Stop {
                return false;
            }
            continue;
        };

        match visitor.enter(child, depth) {
            VisitFlow::Stop => return false,
            VisitFlow::SkipChildren => {
                if visitor.leave(child, depth) == VisitFlow::Stop {
                    return false;
                }
            }
            VisitFlow::Continue => stack.push((child, 0)),
        }
    }

    true
}

/// Collect `root` and all of its descendants in pre-order
pub fn collect_subtree<L>(lookup: &L, root: &NodeId) -> Vec<NodeId>
where
    L: NodeLookup + ?Sized,
{
    struct Collect(Vec<NodeId>);

    impl Visitor for Collect {
        fn enter(&mut self, node: &Node, _depth: usize) -> VisitFlow {
            self.0.push(node.id.clone());
            VisitFlow::Continue
        }
    }

    let mut collect = Collect(Vec::new());
    walk(lookup, root, &mut collect);
    collect.0
}
