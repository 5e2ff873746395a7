use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute bag of a persisted record.
pub type Attrs = Map<String, Value>;

/// One persisted record, independent of the backend it came from.
///
/// `id` is the backend-native key: a DN for the directory backend, a row key
/// for the tabular backends, a document id for the query backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub attrs: Attrs,
}

impl Entry {
    pub fn new(id: impl Into<String>, attrs: Attrs) -> Self {
        Self { id: id.into(), attrs }
    }

    pub fn get(&self, name: &str) -> Option<&Value> { self.attrs.get(name) }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|v| v.as_str())
    }
}

/// Options accepted by every backend operation. Each variant reads the fields
/// it understands and ignores the rest.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub filter: Option<String>,
    pub attrs: Option<Vec<String>>,
    pub table_name: Option<String>,
    pub bucket: Option<String>,
    pub delete_attr: bool,
}

impl EntryOptions {
    pub fn table(name: impl Into<String>) -> Self {
        Self { table_name: Some(name.into()), ..Default::default() }
    }

    pub fn bucket(name: impl Into<String>) -> Self {
        Self { bucket: Some(name.into()), ..Default::default() }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_attrs(mut self, attrs: &[&str]) -> Self {
        self.attrs = Some(attrs.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn deleting(mut self) -> Self {
        self.delete_attr = true;
        self
    }
}

/// Result of a write. Backends that cannot report a message leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyOutcome {
    pub success: bool,
    pub message: String,
}

impl ModifyOutcome {
    pub fn ok(message: impl Into<String>) -> Self { Self { success: true, message: message.into() } }
    pub fn failed(message: impl Into<String>) -> Self { Self { success: false, message: message.into() } }
}
