//! Model symbol registry
//!
//! Interns the names of signals and client types once while the model is
//! built. The finished registry is shared read-only (`Arc<Registry>`) by all
//! replications; nothing in the crate keeps a global symbol table.

use ahash::AHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub u32);

impl SignalId {
    pub const NONE: SignalId = SignalId(u32::MAX);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ClientTypeId(pub u32);

impl ClientTypeId {
    pub const DEFAULT: ClientTypeId = ClientTypeId(0);
}

#[derive(Debug, Default)]
struct SymbolTable {
    names: Vec<String>,
    index: AHashMap<String, u32>,
}

impl SymbolTable {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    fn lookup(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }
}

#[derive(Debug)]
pub struct Registry {
    signals: SymbolTable,
    client_types: SymbolTable,
}

impl Registry {
    /// Empty registry with the default client type (`"client"`) at id 0.
    pub fn new() -> Self {
        let mut client_types = SymbolTable::default();
        client_types.intern("client");
        Registry {
            signals: SymbolTable::default(),
            client_types,
        }
    }

    pub fn signal(&mut self, name: &str) -> SignalId {
        SignalId(self.signals.intern(name))
    }

    pub fn signal_id(&self, name: &str) -> Option<SignalId> {
        self.signals.lookup(name).map(SignalId)
    }

    pub fn signal_name(&self, id: SignalId) -> Option<&str> {
        self.signals.name(id.0)
    }

    pub fn client_type(&mut self, name: &str) -> ClientTypeId {
        ClientTypeId(self.client_types.intern(name))
    }

    pub fn client_type_id(&self, name: &str) -> Option<ClientTypeId> {
        self.client_types.lookup(name).map(ClientTypeId)
    }

    pub fn client_type_name(&self, id: ClientTypeId) -> Option<&str> {
        self.client_types.name(id.0)
    }

    pub fn signal_count(&self) -> usize {
        self.signals.names.len()
    }

    pub fn client_type_count(&self) -> usize {
        self.client_types.names.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
