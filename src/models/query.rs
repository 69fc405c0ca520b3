//! Topic queries issued to search strategies.

use serde::{Deserialize, Serialize};

/// A topic query identified by a code and a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub code: String,
    pub name: String,
}

impl Query {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }

    /// Term sent to the search backend: the name, or the code when the name is blank.
    pub fn search_term(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() {
            self.code.trim()
        } else {
            name
        }
    }
}
