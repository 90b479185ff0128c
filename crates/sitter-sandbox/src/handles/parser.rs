use super::{Language, Tree};
use crate::error::{Result, SitterError};
use crate::registry::{HandleKey, Resource};
use crate::runtime::Session;

/// A guest parser. Holds one language at a time; the last
/// [`set_language`](Parser::set_language) wins.
#[derive(Debug, PartialEq, Eq)]
pub struct Parser {
    key: HandleKey,
}

impl Parser {
    /// Bind a language. A refusal is reported with the grammar's version.
    pub fn set_language(&self, session: &mut Session, language: &Language) -> Result<()> {
        let parser = session.resolve(self.key, "parser")?;
        let language_address = language.resolve(session)?;

        let accepted = session.call(
            "ts_parser_set_language",
            |e| &e.parser_set_language,
            (parser, language_address),
        )?;
        if accepted == 0 {
            let version = language.version(session)?;
            return Err(SitterError::IncompatibleLanguageVersion(version));
        }
        Ok(())
    }

    /// Abort parses that run longer than `micros`. Zero disables the limit.
    pub fn set_timeout(&self, session: &mut Session, micros: u64) -> Result<()> {
        let parser = session.resolve(self.key, "parser")?;
        session.call_optional(
            "ts_parser_set_timeout_micros",
            |e| e.parser_set_timeout_micros.as_ref(),
            (parser, micros),
        )?;
        if let Resource::Parser { timeout_micros, .. } =
            session.registry.get_mut(self.key, "parser")?
        {
            *timeout_micros = micros;
        }
        Ok(())
    }

    /// Timeout currently set on this parser, in microseconds.
    pub fn timeout(&self, session: &Session) -> Result<u64> {
        match session.registry.get(self.key, "parser")? {
            Resource::Parser { timeout_micros, .. } => Ok(*timeout_micros),
            _ => Err(SitterError::UseAfterFree { resource: "parser" }),
        }
    }

    /// Parse UTF-8 source text into a new tree.
    pub fn parse(&self, session: &mut Session, source: &str) -> Result<Tree> {
        let parser = session.resolve(self.key, "parser")?;
        let timeout_micros = self.timeout(session)?;

        let text = session.write_buffer(source.as_bytes())?;
        let len = text.len();
        let tree = session.with_scratch(text, |session, text| {
            session.call(
                "ts_parser_parse_string",
                |e| &e.parser_parse_string,
                (parser, 0, text, len),
            )
        })?;

        if tree == 0 {
            return Err(if timeout_micros > 0 {
                SitterError::ParseTimeout { timeout_micros }
            } else {
                SitterError::ParseFailed
            });
        }

        tracing::debug!(session = session.id(), bytes = len, tree, "parsed source");
        Ok(Tree::register(session, tree))
    }

    /// Free the guest parser.
    pub fn release(self, session: &mut Session) -> Result<()> {
        session.release_handle(self.key, "parser")
    }
}

impl Session {
    /// Create a parser. The configured default timeout, if any, is applied.
    pub fn new_parser(&mut self) -> Result<Parser> {
        let address = self.call("ts_parser_new", |e| &e.parser_new, ())?;
        if address == 0 {
            return Err(SitterError::AllocationFailure { requested: 0 });
        }
        let parser = Parser {
            key: self.registry.insert(Resource::Parser {
                address,
                timeout_micros: 0,
            }),
        };

        if let Some(micros) = self.parse_timeout_micros {
            if self.has_export(|e| e.parser_set_timeout_micros.as_ref()) {
                parser.set_timeout(self, micros)?;
            } else {
                tracing::warn!(
                    session = self.id(),
                    "guest has no ts_parser_set_timeout_micros, default parse timeout ignored"
                );
            }
        }
        Ok(parser)
    }
}
