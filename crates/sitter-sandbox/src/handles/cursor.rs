use super::{BorrowedNode, NodeHandle, Query};
use crate::error::{Result, SitterError};
use crate::record::{MatchRecord, MATCH_RECORD_SIZE};
use crate::registry::{CursorBinding, HandleKey, Resource};
use crate::runtime::Session;

/// One capture within a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCapture {
    /// Capture id; see [`Query::capture_name`]
    pub index: u32,
    /// The captured node, viewed inside the match record
    pub node: BorrowedNode,
}

/// One match produced by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMatch {
    /// Match id
    pub id: u32,
    /// Index of the pattern that matched
    pub pattern_index: u16,
    /// Captures in pattern order
    pub captures: Vec<QueryCapture>,
}

/// Iterates the matches of one query over one node.
///
/// Each [`exec`](QueryCursor::exec) starts a fresh run; there is no rewind.
#[derive(Debug, PartialEq, Eq)]
pub struct QueryCursor {
    key: HandleKey,
}

impl QueryCursor {
    /// Start matching `query` against the subtree at `node`.
    pub fn exec(&self, session: &mut Session, query: &Query, node: &impl NodeHandle) -> Result<()> {
        let cursor = session.resolve(self.key, "query cursor")?;
        let query_address = session.resolve(query.key(), "query")?;
        let location = node.locate(session)?;

        // Captures from the previous run die before the guest rewrites them.
        self.advance_epoch(
            session,
            Some(CursorBinding {
                query: query.key(),
                tree: location.tree(),
            }),
        )?;

        session.call(
            "ts_query_cursor_exec",
            |e| &e.query_cursor_exec,
            (cursor, query_address, location.address()),
        )
    }

    /// Fetch the next match, or `None` when the run is exhausted.
    ///
    /// Borrowed nodes from the previous match stop resolving.
    pub fn next_match(&self, session: &mut Session) -> Result<Option<QueryMatch>> {
        let cursor = session.resolve(self.key, "query cursor")?;
        let binding = match session.registry.get(self.key, "query cursor")? {
            Resource::Cursor {
                binding: Some(binding),
                ..
            } => *binding,
            _ => return Err(SitterError::UseAfterFree { resource: "query cursor" }),
        };
        if !session.registry.contains(binding.query) {
            return Err(SitterError::UseAfterFree { resource: "query" });
        }
        if !session.registry.contains(binding.tree) {
            return Err(SitterError::UseAfterFree { resource: "tree" });
        }
        let epoch = self.advance_epoch(session, Some(binding))?;

        let record = session.allocate(MATCH_RECORD_SIZE)?;
        let key = self.key;
        session.with_scratch(record, |session, record| {
            let found = session.call(
                "ts_query_cursor_next_match",
                |e| &e.query_cursor_next_match,
                (cursor, record),
            )?;
            if found == 0 {
                return Ok(None);
            }

            let memory = session.guest_memory();
            let decoded = MatchRecord::decode(memory, record)?;
            let captures = decoded
                .captures(memory)?
                .into_iter()
                .map(|capture| QueryCapture {
                    index: capture.index,
                    node: BorrowedNode::new(key, epoch, capture.node.address),
                })
                .collect();

            Ok(Some(QueryMatch {
                id: decoded.id,
                pattern_index: decoded.pattern_index,
                captures,
            }))
        })
    }

    /// Delete the cursor. Captures it produced stop resolving.
    ///
    /// Without `ts_query_cursor_delete` only the handle is invalidated.
    pub fn release(self, session: &mut Session) -> Result<()> {
        session.release_handle(self.key, "query cursor")
    }

    fn advance_epoch(&self, session: &mut Session, next: Option<CursorBinding>) -> Result<u64> {
        match session.registry.get_mut(self.key, "query cursor")? {
            Resource::Cursor { binding, epoch, .. } => {
                *binding = next;
                *epoch += 1;
                Ok(*epoch)
            }
            _ => Err(SitterError::UseAfterFree { resource: "query cursor" }),
        }
    }
}

impl Session {
    /// Create an unbound query cursor.
    pub fn new_query_cursor(&mut self) -> Result<QueryCursor> {
        let address = self.call("ts_query_cursor_new", |e| &e.query_cursor_new, ())?;
        if address == 0 {
            return Err(SitterError::AllocationFailure { requested: 0 });
        }
        Ok(QueryCursor {
            key: self.registry.insert(Resource::Cursor {
                address,
                binding: None,
                epoch: 0,
            }),
        })
    }
}
