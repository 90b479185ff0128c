//! # Sitter Sandbox
//!
//! Host-side binding for a tree-sitter engine compiled to WebAssembly.
//!
//! The parsing engine runs inside a wasmtime sandbox with its own linear
//! memory. This crate moves strings and fixed-layout records across that
//! boundary and wraps the engine's raw addresses in typed handles that cannot
//! dangle: every handle is checked against its [`Session`] before use, and a
//! released handle fails with [`SitterError::UseAfterFree`].
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`runtime`] | wasmtime engine, module loading, sessions, guest memory transfer |
//! | [`handles`] | Language, Parser, Tree, Node, Query and QueryCursor wrappers |
//! | [`record`] | Decoders for node, match and capture records |
//! | [`traversal`] | BFS/DFS walks over nodes |
//! | [`diagnostics`] | Line/column messages for query compilation errors |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sitter_sandbox::{NodeHandle, Session, SessionConfig};
//!
//! let wasm = std::fs::read("tree-sitter.wasm")?;
//! let mut session = Session::from_bytes(SessionConfig::default(), wasm)?;
//!
//! let language = session.language("rust")?;
//! let parser = session.new_parser()?;
//! parser.set_language(&mut session, &language)?;
//! let tree = parser.parse(&mut session, "fn main() {}")?;
//!
//! let query = session.query(&language, "(function_item name: (identifier) @name)")?;
//! let cursor = session.new_query_cursor()?;
//! let root = tree.root_node(&mut session)?;
//! cursor.exec(&mut session, &query, &root)?;
//! while let Some(m) = cursor.next_match(&mut session)? {
//!     for capture in &m.captures {
//!         println!("{}", capture.node.kind(&mut session)?);
//!     }
//! }
//!
//! session.close()?;
//! ```
//!
//! ## Features
//!
//! - `wasi` (default) - link WASI preview1 for engine builds that import it

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod diagnostics;
pub mod error;
pub mod handles;
pub mod record;
mod registry;
pub mod runtime;
pub mod traversal;

// Re-export main types
pub use diagnostics::{describe_query_error, QueryErrorKind};
pub use error::{Result, SitterError};
pub use handles::{
    BorrowedNode, Language, Node, NodeHandle, NodeLocation, OwnedNode, Parser, Query, QueryCapture,
    QueryCursor, QueryMatch, Tree,
};
pub use runtime::{
    GuestBuffer, GuestModule, Session, SessionConfig, SitterRuntime, WasiCapabilities,
};
pub use traversal::{Traversal, TraversalOrder, TreeNavigator, Walk};
