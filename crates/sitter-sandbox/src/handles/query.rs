use super::Language;
use crate::diagnostics::{describe_query_error, QueryErrorKind};
use crate::error::{Result, SitterError};
use crate::registry::{HandleKey, Resource};
use crate::runtime::Session;

/// A compiled query. Reusable across any number of cursor executions.
#[derive(Debug, PartialEq, Eq)]
pub struct Query {
    key: HandleKey,
}

impl Query {
    pub(crate) fn key(&self) -> HandleKey {
        self.key
    }

    /// Name of the capture with the given id, without the leading `@`.
    pub fn capture_name(&self, session: &mut Session, id: u32) -> Result<String> {
        let query = session.resolve(self.key, "query")?;
        let len_slot = session.allocate(4)?;
        session.with_scratch(len_slot, |session, len_slot| {
            let name = session.call(
                "ts_query_capture_name_for_id",
                |e| &e.query_capture_name_for_id,
                (query, id, len_slot),
            )?;
            let len = session.read_u32_le(len_slot)?;
            session.read_string(name, len)
        })
    }

    /// Number of patterns in the query.
    pub fn pattern_count(&self, session: &mut Session) -> Result<u32> {
        let query = session.resolve(self.key, "query")?;
        session.call_optional(
            "ts_query_pattern_count",
            |e| e.query_pattern_count.as_ref(),
            query,
        )
    }

    /// Number of distinct capture names.
    pub fn capture_count(&self, session: &mut Session) -> Result<u32> {
        let query = session.resolve(self.key, "query")?;
        session.call_optional(
            "ts_query_capture_count",
            |e| e.query_capture_count.as_ref(),
            query,
        )
    }

    /// Delete the compiled query, or just invalidate the handle when the
    /// engine has no `ts_query_delete`.
    pub fn release(self, session: &mut Session) -> Result<()> {
        session.release_handle(self.key, "query")
    }
}

impl Session {
    /// Compile `pattern` for `language`.
    ///
    /// On failure the guest's error offset and kind are turned into a
    /// line/column message while the pattern is still in guest memory; both
    /// scratch buffers are freed on every path.
    pub fn query(&mut self, language: &Language, pattern: &str) -> Result<Query> {
        let language = language.resolve(self)?;

        // error offset at +0, error type at +4
        let slots = self.allocate(8)?;
        let query = self.with_scratch(slots, |session, slots| {
            let source = session.write_buffer(pattern.as_bytes())?;
            let len = source.len();
            session.with_scratch(source, |session, source| {
                let query = session.call(
                    "ts_query_new",
                    |e| &e.query_new,
                    (language, source, len, slots, slots + 4),
                )?;
                let code = session.read_u32_le(slots + 4)?;
                if query != 0 && code == 0 {
                    return Ok(query);
                }

                let offset = session.read_u32_le(slots)?;
                let kind = match QueryErrorKind::from_code(code) {
                    // null query with no reported kind: treat as a syntax error
                    QueryErrorKind::None => QueryErrorKind::Syntax,
                    kind => kind,
                };
                if query != 0 {
                    session.call_delete("ts_query_delete", |e| e.query_delete.as_ref(), query)?;
                }
                let message = describe_query_error(pattern, offset, kind);
                tracing::debug!(session = session.id(), offset, %kind, "query compilation failed");
                Err(SitterError::QueryCompile {
                    offset,
                    kind,
                    message,
                })
            })
        })?;

        tracing::debug!(session = self.id(), query, "query compiled");
        Ok(Query {
            key: self.registry.insert(Resource::Query { address: query }),
        })
    }
}
