//! In-memory directory tree
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Parents are plain
//! handles, so walking up the tree never needs shared ownership. Removing a
//! node leaves a tombstone behind; ids handed out earlier stay valid and are
//! never reused.

use std::ops::Index;

use super::format::DirEntry;

/// Handle to a node of a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// The synthetic root directory
    pub const ROOT: NodeId = NodeId(0);
}

/// One file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    /// First cluster of the file chain, or the directory's own cluster
    pub cluster: u32,
    pub is_file: bool,
    /// File size in bytes; 0 for directories
    pub size: u32,
    pub parent: Option<NodeId>,
    /// Children in on-disk order
    pub children: Vec<NodeId>,
    removed: bool,
}

impl Node {
    fn new(name: String, cluster: u32, is_file: bool, size: u32, parent: Option<NodeId>) -> Self {
        Self {
            name,
            cluster,
            is_file,
            size,
            parent,
            children: Vec::new(),
            removed: false,
        }
    }

    /// The directory entry describing this node in its parent's cluster
    pub fn to_entry(&self) -> DirEntry {
        DirEntry {
            name: self.name.clone(),
            is_file: self.is_file,
            size: if self.is_file { self.size } else { 0 },
            start_cluster: self.cluster,
        }
    }
}

/// Arena of nodes rooted at [`NodeId::ROOT`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding only the root: empty name, cluster 0, directory
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(String::new(), 0, false, 0, None)],
        }
    }

    /// Returns the node, or `None` for unknown ids and removed nodes
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).filter(|node| !node.removed)
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|node| !node.removed).count()
    }

    /// Returns true if the tree only holds the root
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Appends a child to `parent`
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        cluster: u32,
        is_file: bool,
        size: u32,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(Node::new(name.into(), cluster, is_file, size, Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Unlinks a node from its parent and tombstones it
    ///
    /// Returns the former parent. The root cannot be detached.
    pub fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id.0].parent?;
        self.nodes[parent.0].children.retain(|&child| child != id);
        let node = &mut self.nodes[id.0];
        node.removed = true;
        node.parent = None;
        Some(parent)
    }

    /// Points a node at a new first cluster
    pub fn set_cluster(&mut self, id: NodeId, cluster: u32) {
        self.nodes[id.0].cluster = cluster;
    }

    /// Exact-name child lookup
    pub fn find_child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.children(dir)
            .iter()
            .copied()
            .find(|&child| self.nodes[child.0].name == name)
    }

    /// Resolves a `/`-separated path relative to `from`
    ///
    /// Children are scanned in order. An exact name match ends the lookup; a
    /// directory whose name followed by `/` prefixes the rest of the path is
    /// entered and the lookup continues there without coming back. The first
    /// match wins, files only ever match as the last component.
    pub fn find(&self, from: NodeId, path: &str) -> Option<NodeId> {
        let mut current = from;
        let mut rest = path;

        'descend: loop {
            if rest.is_empty() {
                return Some(current);
            }
            for &child in self.children(current) {
                let node = &self.nodes[child.0];
                if node.name == rest {
                    return Some(child);
                }
                if node.is_file {
                    continue;
                }
                let remainder = rest
                    .strip_prefix(node.name.as_str())
                    .and_then(|r| r.strip_prefix('/'));
                if let Some(remainder) = remainder {
                    current = child;
                    rest = remainder;
                    continue 'descend;
                }
            }
            return None;
        }
    }

    /// Absolute path of a node, `/` for the root
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            current = node.parent;
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Entries to store in a directory's cluster, in child order
    pub fn entries(&self, dir: NodeId) -> Vec<DirEntry> {
        self.children(dir)
            .iter()
            .map(|&child| self.nodes[child.0].to_entry())
            .collect()
    }

    /// Pre-order traversal from the root with the depth of each node
    pub fn walk(&self) -> Vec<(NodeId, usize)> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(NodeId::ROOT, 0)];
        while let Some((id, depth)) = stack.pop() {
            order.push((id, depth));
            for &child in self.children(id).iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        order
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}
