//! Arena-backed n-ary tree.
//!
//! Nodes live in one vector and refer to each other by [`NodeId`]. Each
//! node knows its parent, first child, last child and next sibling, so
//! appending a child is constant time and the whole tree is released at
//! once when the arena is dropped.

/// Index of a node in its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Node<T> {
    pub data: T,
    pub line: u32,
    pub hll_offset: u32,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Tree<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Tree<T> {
    /// Creates a tree holding only its root.
    pub fn new(root: T) -> Self {
        Self {
            nodes: vec![Node {
                data: root,
                line: 0,
                hll_offset: 0,
                parent: None,
                first_child: None,
                last_child: None,
                next: None,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a new last child under `parent`.
    pub fn add_child(&mut self, parent: NodeId, data: T, line: u32, hll_offset: u32) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            data,
            line,
            hll_offset,
            parent: Some(parent),
            first_child: None,
            last_child: None,
            next: None,
        });
        match self.nodes[parent.index()].last_child {
            Some(last) => self.nodes[last.index()].next = Some(id),
            None => self.nodes[parent.index()].first_child = Some(id),
        }
        self.nodes[parent.index()].last_child = Some(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.index()]
    }

    pub fn data(&self, id: NodeId) -> &T {
        &self.nodes[id.index()].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].next
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.first_child(id).is_some()
    }

    pub fn children(&self, id: NodeId) -> Children<'_, T> {
        Children {
            tree: self,
            next: self.first_child(id),
        }
    }
}

/// Iterator over the direct children of a node.
pub struct Children<'a, T> {
    tree: &'a Tree<T>,
    next: Option<NodeId>,
}

impl<T> Iterator for Children<'_, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.next_sibling(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_keep_insertion_order() {
        let mut tree = Tree::new("root");
        let root = tree.root();
        let a = tree.add_child(root, "a", 1, 1);
        let b = tree.add_child(root, "b", 1, 1);
        let a1 = tree.add_child(a, "a1", 2, 2);

        assert_eq!(tree.children(root).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(tree.parent(a1), Some(a));
        assert_eq!(tree.next_sibling(a), Some(b));
        assert_eq!(tree.next_sibling(b), None);
        assert!(tree.has_children(a));
        assert!(!tree.has_children(b));
        assert_eq!(*tree.data(a1), "a1");
        assert_eq!(tree.node(a1).line, 2);
        assert_eq!(tree.len(), 4);
    }
}
