//! In-memory filesystem tree.
//!
//! Nodes live in an arena owned by [`Tree`] and refer to each other by
//! [`NodeId`].  A directory keeps its children twice: in declaration order
//! (the canonical list, used to allocate and write extents) and sorted by
//! name (derived once the directory is complete, used for directory records
//! and path tables).

use std::collections::VecDeque;
use std::ops::{Index, IndexMut};
use std::path::PathBuf;

use crate::error::Result;

/// Payload bytes per Form 1 sector.
pub const FORM1_BLOCK_SIZE: u32 = 2048;

/// Payload bytes per Form 2 sector (8-byte subheader + 2324 data + 4 EDC).
pub const FORM2_BLOCK_SIZE: u32 = 2336;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct FileNode {
    /// Size of the source file in bytes.
    pub size: u32,
    pub form2: bool,
}

impl FileNode {
    pub fn block_size(&self) -> u32 {
        if self.form2 {
            FORM2_BLOCK_SIZE
        } else {
            FORM1_BLOCK_SIZE
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirNode {
    /// Serialized directory extent, filled in by the layout builder.
    pub extent: Vec<u8>,
    /// 1-based path table record number.
    pub record_number: u16,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    File(FileNode),
    Dir(DirNode),
}

#[derive(Debug, Clone)]
pub struct Node {
    /// Identifier as recorded on disc (`NAME.EXT;1` for files).
    pub name: String,
    /// Location of the item in the host filesystem.
    pub path: PathBuf,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub sorted_children: Vec<NodeId>,
    pub first_sector: u32,
    pub num_sectors: u32,
    /// Placement request from the catalog, 0 = allocate contiguously.
    pub requested_start_sector: u32,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir(_))
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match &self.kind {
            NodeKind::File(f) => Some(f),
            NodeKind::Dir(_) => None,
        }
    }

    pub fn as_dir(&self) -> Option<&DirNode> {
        match &self.kind {
            NodeKind::Dir(d) => Some(d),
            NodeKind::File(_) => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirNode> {
        match &mut self.kind {
            NodeKind::Dir(d) => Some(d),
            NodeKind::File(_) => None,
        }
    }
}

/// Sector count for a file of `size` bytes; empty files still take one sector.
pub fn file_sectors(size: u32, block_size: u32) -> u32 {
    size.div_ceil(block_size).max(1)
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Create a tree holding only the (unnamed) root directory.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                path: root_path.into(),
                parent: None,
                children: Vec::new(),
                sorted_children: Vec::new(),
                first_sector: 0,
                num_sectors: 0,
                requested_start_sector: 0,
                kind: NodeKind::Dir(DirNode::default()),
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

    fn push(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self[parent].children.push(id);
        id
    }

    /// Append a file to `parent`.  `name` is the bare name; the `;1` version
    /// suffix is added here.
    pub fn add_file(
        &mut self,
        parent: NodeId,
        name: &str,
        path: impl Into<PathBuf>,
        size: u32,
        form2: bool,
        requested_start_sector: u32,
    ) -> NodeId {
        let file = FileNode { size, form2 };
        let num_sectors = file_sectors(size, file.block_size());
        self.push(
            parent,
            Node {
                name: format!("{name};1"),
                path: path.into(),
                parent: Some(parent),
                children: Vec::new(),
                sorted_children: Vec::new(),
                first_sector: 0,
                num_sectors,
                requested_start_sector,
                kind: NodeKind::File(file),
            },
        )
    }

    pub fn add_dir(
        &mut self,
        parent: NodeId,
        name: &str,
        path: impl Into<PathBuf>,
        requested_start_sector: u32,
    ) -> NodeId {
        self.push(
            parent,
            Node {
                name: name.to_string(),
                path: path.into(),
                parent: Some(parent),
                children: Vec::new(),
                sorted_children: Vec::new(),
                first_sector: 0,
                num_sectors: 0,
                requested_start_sector,
                kind: NodeKind::Dir(DirNode::default()),
            },
        )
    }

    /// Derive the name-sorted child list of `dir`.  Call once its children
    /// are complete.
    pub fn finish_dir(&mut self, dir: NodeId) {
        let mut sorted = self[dir].children.clone();
        sorted.sort_by(|a, b| self[*a].name.as_bytes().cmp(self[*b].name.as_bytes()));
        self[dir].sorted_children = sorted;
    }

    /// Host path components from the root down to `id`, e.g. `DATA/MOVIE.STR`.
    pub fn display_path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            let node = &self[n];
            if node.parent.is_some() {
                parts.push(node.name.strip_suffix(";1").unwrap_or(&node.name));
            }
            cur = node.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Visit every node in the order `traversal` dictates, dispatching on the
    /// node kind.
    pub fn traverse<V: Visitor + ?Sized>(
        &mut self,
        traversal: Traversal,
        visitor: &mut V,
    ) -> Result<()> {
        for id in traversal.order(self) {
            if self[id].is_dir() {
                visitor.visit_dir(self, id)?;
            } else {
                visitor.visit_file(self, id)?;
            }
        }
        Ok(())
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}

/// Per-kind callbacks for [`Tree::traverse`].
pub trait Visitor {
    fn visit_file(&mut self, _tree: &mut Tree, _id: NodeId) -> Result<()> {
        Ok(())
    }

    fn visit_dir(&mut self, _tree: &mut Tree, _id: NodeId) -> Result<()> {
        Ok(())
    }
}

/// Node visitation orders.  All of them cover the same node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Pre-order, children in declaration order.
    Declaration,
    /// Pre-order, children sorted by name.
    Sorted,
    /// Breadth-first, children sorted by name.
    BreadthFirstSorted,
}

/// The order in which extents are both allocated and written.  Allocation
/// and the image writer must agree on it, so both take it from here.
pub const EXTENT_ORDER: Traversal = Traversal::Declaration;

impl Traversal {
    pub fn order(self, tree: &Tree) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(tree.len());
        match self {
            Traversal::Declaration | Traversal::Sorted => {
                let mut stack = vec![tree.root()];
                while let Some(id) = stack.pop() {
                    out.push(id);
                    let node = &tree[id];
                    let children = if self == Traversal::Declaration {
                        &node.children
                    } else {
                        &node.sorted_children
                    };
                    stack.extend(children.iter().rev());
                }
            }
            Traversal::BreadthFirstSorted => {
                let mut queue = VecDeque::from([tree.root()]);
                while let Some(id) = queue.pop_front() {
                    out.push(id);
                    queue.extend(tree[id].sorted_children.iter());
                }
            }
        }
        out
    }
}
