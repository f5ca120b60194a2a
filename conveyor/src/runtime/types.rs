use std::fmt;

use ulid::Ulid;

/// Unique identifier of an engine instance, used to tell engines apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(Ulid);

impl EngineId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
