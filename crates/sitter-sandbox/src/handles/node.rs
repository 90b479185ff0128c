//! Syntax nodes.
//!
//! The engine passes nodes around as 24-byte descriptors. A descriptor either
//! lives in a buffer the host allocated ([`OwnedNode`], from `root_node` and
//! `child`) or inside a query match's capture array ([`BorrowedNode`]). The
//! two look identical in guest memory; only the owned one may be freed, so
//! only [`OwnedNode`] has a `release` method.

use crate::error::{Result, SitterError};
use crate::record::{NodeDescriptor, NODE_DESCRIPTOR_SIZE};
use crate::registry::{CursorBinding, HandleKey, Resource};
use crate::runtime::Session;

/// A node descriptor resolved against its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLocation {
    address: u32,
    tree: HandleKey,
}

impl NodeLocation {
    /// Guest address of the descriptor.
    pub fn address(&self) -> u32 {
        self.address
    }

    pub(crate) fn tree(&self) -> HandleKey {
        self.tree
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Accessors shared by owned and borrowed nodes.
///
/// Children always come back as [`OwnedNode`]s tied to the same tree.
pub trait NodeHandle: sealed::Sealed {
    /// Resolve the descriptor, failing if the node or its tree is gone.
    fn locate(&self, session: &Session) -> Result<NodeLocation>;

    /// Node type name, e.g. `"identifier"`.
    fn kind(&self, session: &mut Session) -> Result<String> {
        let node = self.locate(session)?.address;
        let name = session.call("ts_node_type", |e| &e.node_type, node)?;
        session.read_c_string(name)
    }

    /// S-expression form of the subtree.
    fn to_sexp(&self, session: &mut Session) -> Result<String> {
        let node = self.locate(session)?.address;
        let text = session.call("ts_node_string", |e| &e.node_string, node)?;
        // ts_node_string mallocs its result
        let read = session.read_c_string(text);
        session.free_address(text)?;
        read
    }

    /// Child at `index`. Out-of-range indices yield whatever the engine
    /// writes, normally a null node.
    fn child(&self, session: &mut Session, index: u32) -> Result<OwnedNode> {
        let location = self.locate(session)?;
        session.fill_node(location.tree, |session, out| {
            session.call("ts_node_child", |e| &e.node_child, (out, location.address, index))
        })
    }

    /// Number of children, named and anonymous.
    fn child_count(&self, session: &mut Session) -> Result<u32> {
        let node = self.locate(session)?.address;
        session.call("ts_node_child_count", |e| &e.node_child_count, node)
    }

    /// Named child at `index`.
    fn named_child(&self, session: &mut Session, index: u32) -> Result<OwnedNode> {
        let location = self.locate(session)?;
        session.fill_node(location.tree, |session, out| {
            session.call(
                "ts_node_named_child",
                |e| &e.node_named_child,
                (out, location.address, index),
            )
        })
    }

    /// Number of named children.
    fn named_child_count(&self, session: &mut Session) -> Result<u32> {
        let node = self.locate(session)?.address;
        session.call("ts_node_named_child_count", |e| &e.node_named_child_count, node)
    }

    /// Byte offset where the node starts.
    fn start_byte(&self, session: &mut Session) -> Result<u32> {
        let node = self.locate(session)?.address;
        session.call("ts_node_start_byte", |e| &e.node_start_byte, node)
    }

    /// Byte offset where the node ends.
    fn end_byte(&self, session: &mut Session) -> Result<u32> {
        let node = self.locate(session)?.address;
        session.call("ts_node_end_byte", |e| &e.node_end_byte, node)
    }

    /// Whether the node is named in the grammar.
    fn is_named(&self, session: &mut Session) -> Result<bool> {
        let node = self.locate(session)?.address;
        let named = session.call_optional("ts_node_is_named", |e| e.node_is_named.as_ref(), node)?;
        Ok(named != 0)
    }

    /// Whether the descriptor is the engine's null node.
    fn is_null(&self, session: &mut Session) -> Result<bool> {
        let node = self.locate(session)?.address;
        let null = session.call_optional("ts_node_is_null", |e| e.node_is_null.as_ref(), node)?;
        Ok(null != 0)
    }
}

/// A node in a host-allocated descriptor. Must be released (or left to
/// session teardown).
#[derive(Debug, PartialEq, Eq)]
pub struct OwnedNode {
    key: HandleKey,
}

impl OwnedNode {
    /// Free the descriptor. The tree itself is unaffected.
    pub fn release(self, session: &mut Session) -> Result<()> {
        session.release_handle(self.key, "node")
    }
}

impl sealed::Sealed for OwnedNode {}

impl NodeHandle for OwnedNode {
    fn locate(&self, session: &Session) -> Result<NodeLocation> {
        let (address, tree) = match session.registry.get(self.key, "node")? {
            Resource::Node { address, tree } => (*address, *tree),
            _ => return Err(SitterError::UseAfterFree { resource: "node" }),
        };
        if !session.registry.contains(tree) {
            return Err(SitterError::UseAfterFree { resource: "tree" });
        }
        Ok(NodeLocation { address, tree })
    }
}

/// A node viewed in place inside a query match's capture array.
///
/// Valid until its cursor runs `exec` or `next_match` again, or is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowedNode {
    cursor: HandleKey,
    epoch: u64,
    address: u32,
}

impl BorrowedNode {
    pub(crate) fn new(cursor: HandleKey, epoch: u64, address: u32) -> Self {
        Self {
            cursor,
            epoch,
            address,
        }
    }
}

impl sealed::Sealed for BorrowedNode {}

impl NodeHandle for BorrowedNode {
    fn locate(&self, session: &Session) -> Result<NodeLocation> {
        let binding = match session.registry.get(self.cursor, "query cursor")? {
            Resource::Cursor {
                binding: Some(binding),
                epoch,
                ..
            } if *epoch == self.epoch => *binding,
            _ => return Err(SitterError::UseAfterFree { resource: "node" }),
        };
        let CursorBinding { tree, .. } = binding;
        if !session.registry.contains(tree) {
            return Err(SitterError::UseAfterFree { resource: "tree" });
        }
        NodeDescriptor::locate(session.guest_memory(), self.address)?;
        Ok(NodeLocation {
            address: self.address,
            tree,
        })
    }
}

/// Either flavour of node.
#[derive(Debug, PartialEq, Eq)]
pub enum Node {
    /// Host-allocated descriptor
    Owned(OwnedNode),
    /// View into a capture array
    Borrowed(BorrowedNode),
}

impl Node {
    /// Whether this node owns its descriptor.
    pub fn is_owned(&self) -> bool {
        matches!(self, Node::Owned(_))
    }

    /// Release an owned descriptor. Borrowed nodes are left alone.
    pub fn discard(self, session: &mut Session) -> Result<()> {
        match self {
            Node::Owned(node) => node.release(session),
            Node::Borrowed(_) => Ok(()),
        }
    }
}

impl From<OwnedNode> for Node {
    fn from(node: OwnedNode) -> Self {
        Node::Owned(node)
    }
}

impl From<BorrowedNode> for Node {
    fn from(node: BorrowedNode) -> Self {
        Node::Borrowed(node)
    }
}

impl sealed::Sealed for Node {}

impl NodeHandle for Node {
    fn locate(&self, session: &Session) -> Result<NodeLocation> {
        match self {
            Node::Owned(node) => node.locate(session),
            Node::Borrowed(node) => node.locate(session),
        }
    }
}

impl Session {
    /// Allocate a descriptor, let the guest fill it, and register it as owned.
    pub(crate) fn fill_node(
        &mut self,
        tree: HandleKey,
        fill: impl FnOnce(&mut Session, u32) -> Result<()>,
    ) -> Result<OwnedNode> {
        let buffer = self.allocate(NODE_DESCRIPTOR_SIZE)?;
        if let Err(e) = fill(self, buffer.address()) {
            return self.release_after_error(buffer, e);
        }
        let key = self.registry.insert(Resource::Node {
            address: buffer.into_address(),
            tree,
        });
        Ok(OwnedNode { key })
    }
}
