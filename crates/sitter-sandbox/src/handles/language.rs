use crate::error::{Result, SitterError};
use crate::runtime::Session;

/// A compiled grammar inside the guest.
///
/// The guest owns grammar memory for the life of the instance, so there is
/// nothing to release and the handle can be copied freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    session: u64,
    address: u32,
}

impl Language {
    /// Guest address of the grammar.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// ABI version the grammar was generated with.
    pub fn version(&self, session: &mut Session) -> Result<u32> {
        let address = self.resolve(session)?;
        session.call("ts_language_version", |e| &e.language_version, address)
    }

    /// Grammar name as reported by the guest.
    pub fn name(&self, session: &mut Session) -> Result<String> {
        let address = self.resolve(session)?;
        let name =
            session.call_optional("ts_language_name", |e| e.language_name.as_ref(), address)?;
        session.read_c_string(name)
    }

    pub(crate) fn resolve(&self, session: &Session) -> Result<u32> {
        if self.session != session.id() {
            return Err(SitterError::UseAfterFree { resource: "language" });
        }
        Ok(self.address)
    }
}

impl Session {
    /// Load a grammar through its `tree_sitter_<name>` entry point.
    pub fn language(&mut self, name: &str) -> Result<Language> {
        let export = format!("tree_sitter_{}", name);
        let address = self.call_entry_point(&export)?;
        if address == 0 {
            return Err(SitterError::WasmError(format!(
                "grammar entry point '{}' returned null",
                export
            )));
        }
        tracing::debug!(session = self.id(), grammar = name, address, "language loaded");
        Ok(Language {
            session: self.id(),
            address,
        })
    }
}
