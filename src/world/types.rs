//! Small value types shared by every part of the world core.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Logical clock reading. Signed so that a terminal stage delay of `-1`
/// can be added to it without conversions.
pub type Tick = i64;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a live entity. Registries compare entities by
/// this value, never by persisted id (unsaved entities all have id 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    pub fn next() -> Self {
        EntityId(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connected player as supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: u64,
    pub name: String,
}

impl Player {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// An event fanned out to every perceiver in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stimulus {
    /// Short machine-friendly tag, e.g. `"taste"` or `"speech"`.
    pub kind: String,
    pub text: String,
    pub source: Option<EntityId>,
}

impl Stimulus {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
            source: None,
        }
    }

    pub fn from_entity(mut self, source: EntityId) -> Self {
        self.source = Some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_are_unique() {
        let a = EntityId::next();
        let b = EntityId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn stimulus_source_is_optional() {
        let id = EntityId::next();
        let s = Stimulus::new("speech", "hello").from_entity(id);
        assert_eq!(s.source, Some(id));
        assert_eq!(Stimulus::new("speech", "hi").source, None);
    }
}
