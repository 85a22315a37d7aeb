//! Object references and change logs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one object in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    pub container: String,
    pub key: String,
}

impl ObjectReference {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Storage path of the object in a vault: `container/key`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.container, self.key)
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// A diff of objects since the last backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeLog {
    pub created: Vec<ObjectReference>,
    pub modified: Vec<ObjectReference>,
    pub destroyed: Vec<ObjectReference>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_created(mut self, container: &str, key: &str) -> Self {
        self.created.push(ObjectReference::new(container, key));
        self
    }

    pub fn with_modified(mut self, container: &str, key: &str) -> Self {
        self.modified.push(ObjectReference::new(container, key));
        self
    }

    pub fn with_destroyed(mut self, container: &str, key: &str) -> Self {
        self.destroyed.push(ObjectReference::new(container, key));
        self
    }

    /// Total number of references across all three lists.
    pub fn len(&self) -> usize {
        self.created.len() + self.modified.len() + self.destroyed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
