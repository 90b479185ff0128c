//! Breadth-first and depth-first tree walks.
//!
//! The walker only needs two capabilities, child count and child lookup,
//! captured by [`TreeNavigator`]. Parse trees are acyclic, so no visited set
//! is kept.
//!
//! ```rust,ignore
//! let root = Node::from(tree.root_node(&mut session)?);
//! let mut walk = Traversal::named(root, TraversalOrder::DepthFirst);
//! while let Some(node) = walk.next(&mut session)? {
//!     println!("{}", node.kind(&mut session)?);
//!     node.discard(&mut session)?;
//! }
//! ```

use std::collections::VecDeque;

use crate::error::{Result, SitterError};
use crate::handles::{Node, NodeHandle};
use crate::runtime::Session;

/// Visit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    /// Pre-order: a node, then each child subtree in turn
    #[default]
    DepthFirst,
    /// Level by level
    BreadthFirst,
}

/// Child access used by [`Traversal`].
pub trait TreeNavigator {
    /// Node type being walked
    type Node;

    /// Number of children, or of named children when `named` is set.
    fn child_count(&mut self, node: &Self::Node, named: bool) -> Result<u32>;

    /// Child at `index`, counting only named children when `named` is set.
    fn child(&mut self, node: &Self::Node, index: u32, named: bool) -> Result<Self::Node>;
}

impl TreeNavigator for Session {
    type Node = Node;

    fn child_count(&mut self, node: &Node, named: bool) -> Result<u32> {
        if named {
            node.named_child_count(self)
        } else {
            node.child_count(self)
        }
    }

    fn child(&mut self, node: &Node, index: u32, named: bool) -> Result<Node> {
        let child = if named {
            node.named_child(self, index)?
        } else {
            node.child(self, index)?
        };
        Ok(Node::Owned(child))
    }
}

/// A single-pass walk over a tree.
#[derive(Debug)]
pub struct Traversal<N> {
    pending: VecDeque<N>,
    order: TraversalOrder,
    named: bool,
    failed: bool,
}

impl<N> Traversal<N> {
    /// Walk every node, anonymous ones included.
    pub fn new(start: N, order: TraversalOrder) -> Self {
        Self::with_filter(start, order, false)
    }

    /// Walk named nodes only.
    pub fn named(start: N, order: TraversalOrder) -> Self {
        Self::with_filter(start, order, true)
    }

    fn with_filter(start: N, order: TraversalOrder, named: bool) -> Self {
        Self {
            pending: VecDeque::from([start]),
            order,
            named,
            failed: false,
        }
    }

    /// Yield the next node, queueing its children first.
    ///
    /// After an error the walk is over and further calls return `Ok(None)`.
    /// The node whose children could not be read stays queued, along with any
    /// of its children produced before the failure.
    pub fn next<T>(&mut self, navigator: &mut T) -> Result<Option<N>>
    where
        T: TreeNavigator<Node = N>,
    {
        if self.failed {
            return Ok(None);
        }
        let Some(node) = self.pending.pop_front() else {
            return Ok(None);
        };

        let (children, error) = self.children(navigator, &node);
        if let Some(e) = error {
            self.failed = true;
            for child in children.into_iter().rev() {
                self.pending.push_front(child);
            }
            self.pending.push_front(node);
            return Err(e);
        }

        match self.order {
            TraversalOrder::DepthFirst => {
                for child in children.into_iter().rev() {
                    self.pending.push_front(child);
                }
            }
            TraversalOrder::BreadthFirst => self.pending.extend(children),
        }
        Ok(Some(node))
    }

    /// Borrow the walk as a std iterator over `Result` items.
    pub fn walk<'a, T>(&'a mut self, navigator: &'a mut T) -> Walk<'a, N, T>
    where
        T: TreeNavigator<Node = N>,
    {
        Walk {
            traversal: self,
            navigator,
        }
    }

    /// Whether nothing is left to yield.
    pub fn is_finished(&self) -> bool {
        self.failed || self.pending.is_empty()
    }

    /// Nodes queued but not yet yielded.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Children of `node`, plus the error that cut the list short, if any.
    fn children<T>(&self, navigator: &mut T, node: &N) -> (Vec<N>, Option<SitterError>)
    where
        T: TreeNavigator<Node = N>,
    {
        let count = match navigator.child_count(node, self.named) {
            Ok(count) => count,
            Err(e) => return (Vec::new(), Some(e)),
        };
        let mut children = Vec::with_capacity(count as usize);
        for index in 0..count {
            match navigator.child(node, index, self.named) {
                Ok(child) => children.push(child),
                Err(e) => return (children, Some(e)),
            }
        }
        (children, None)
    }
}

impl Traversal<Node> {
    /// Release the owned nodes still queued when a walk is abandoned.
    pub fn release_pending(self, session: &mut Session) -> Result<()> {
        let mut first_error = None;
        for node in self.pending {
            if let Err(e) = node.discard(session) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Iterator adapter returned by [`Traversal::walk`].
pub struct Walk<'a, N, T> {
    traversal: &'a mut Traversal<N>,
    navigator: &'a mut T,
}

impl<N, T> Iterator for Walk<'_, N, T>
where
    T: TreeNavigator<Node = N>,
{
    type Item = Result<N>;

    fn next(&mut self) -> Option<Self::Item> {
        self.traversal.next(&mut *self.navigator).transpose()
    }
}

impl<N, T> std::iter::FusedIterator for Walk<'_, N, T> where T: TreeNavigator<Node = N> {}
