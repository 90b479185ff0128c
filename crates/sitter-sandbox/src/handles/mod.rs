//! Typed wrappers over guest resources.
//!
//! Each wrapper holds a registry key, never a raw guest address. Every
//! operation takes the owning [`Session`] explicitly, resolves the key to the
//! current address and then calls into the engine. Keys outlive their
//! resources safely: a released or foreign key resolves to
//! [`SitterError::UseAfterFree`](crate::SitterError::UseAfterFree).
//!
//! ```rust,ignore
//! let language = session.language("rust")?;
//! let parser = session.new_parser()?;
//! parser.set_language(&mut session, &language)?;
//!
//! let tree = parser.parse(&mut session, "fn main() {}")?;
//! let root = tree.root_node(&mut session)?;
//! println!("{}", root.to_sexp(&mut session)?);
//!
//! root.release(&mut session)?;
//! tree.release(&mut session)?;
//! parser.release(&mut session)?;
//! ```

mod cursor;
mod language;
mod node;
mod parser;
mod query;
mod tree;

pub use cursor::{QueryCapture, QueryCursor, QueryMatch};
pub use language::Language;
pub use node::{BorrowedNode, Node, NodeHandle, NodeLocation, OwnedNode};
pub use parser::Parser;
pub use query::Query;
pub use tree::Tree;

use crate::error::Result;
use crate::registry::{HandleKey, Resource};
use crate::runtime::Session;

impl Session {
    /// Current guest address behind a key.
    pub(crate) fn resolve(&self, key: HandleKey, kind: &'static str) -> Result<u32> {
        self.registry.get(key, kind).map(Resource::address)
    }

    /// Drop a key from the registry and free the guest resource behind it.
    pub(crate) fn release_handle(&mut self, key: HandleKey, kind: &'static str) -> Result<()> {
        self.ensure_usable(kind)?;
        let resource = self.registry.remove(key, kind)?;
        tracing::debug!(
            session = self.id(),
            resource = kind,
            address = resource.address(),
            "releasing guest resource"
        );
        self.release_resource(&resource)
    }
}
