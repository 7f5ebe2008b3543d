//! State file envelope persisted by the backends

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A versioned snapshot of infrastructure state
///
/// Only the envelope (`version`, `serial`, `lineage`) is interpreted here.
/// Every other top-level field is carried in `body` and written back as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    #[serde(default)]
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    #[serde(default)]
    pub lineage: String,
    /// Remaining document content, owned by whoever produced the state
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 4;

    /// Create a new state file with a fresh lineage
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new state file with a specific lineage
    pub fn with_lineage(lineage: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: lineage.into(),
            body: Map::new(),
        }
    }

    /// The state a backend reports when nothing has been stored yet.
    ///
    /// The lineage is left empty so that repeated reads of an absent document
    /// compare equal; it is assigned when the state is first persisted.
    pub fn empty() -> Self {
        Self::with_lineage(String::new())
    }

    /// Whether this state has never been assigned a lineage
    pub fn is_initial(&self) -> bool {
        self.lineage.is_empty()
    }

    /// Assign a fresh lineage if none is set. Returns true if one was assigned.
    pub fn ensure_lineage(&mut self) -> bool {
        if self.lineage.is_empty() {
            self.lineage = uuid::Uuid::new_v4().to_string();
            true
        } else {
            false
        }
    }

    /// Increment serial for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
    }

    /// Set a body field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    /// Get a body field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::empty()
    }
}
