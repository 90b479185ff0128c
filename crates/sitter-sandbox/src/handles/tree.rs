use super::OwnedNode;
use crate::error::Result;
use crate::registry::{HandleKey, Resource};
use crate::runtime::Session;

/// The result of one parse. Immutable; owned by the guest until released.
#[derive(Debug, PartialEq, Eq)]
pub struct Tree {
    key: HandleKey,
}

impl Tree {
    pub(crate) fn register(session: &mut Session, address: u32) -> Self {
        Self {
            key: session.registry.insert(Resource::Tree { address }),
        }
    }

    /// The root node, in a freshly allocated descriptor.
    pub fn root_node(&self, session: &mut Session) -> Result<OwnedNode> {
        let tree = session.resolve(self.key, "tree")?;
        session.fill_node(self.key, |session, out| {
            session.call("ts_tree_root_node", |e| &e.tree_root_node, (out, tree))
        })
    }

    /// Delete the guest tree. Nodes taken from it stop resolving.
    ///
    /// Engines without `ts_tree_delete` keep the tree until the session ends;
    /// the handle is invalidated either way.
    pub fn release(self, session: &mut Session) -> Result<()> {
        session.release_handle(self.key, "tree")
    }
}
