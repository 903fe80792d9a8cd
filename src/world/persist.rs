//! Persistence contract between live entities and the structure store.
//!
//! Every persistable kind declares its field list up front. Entities build a
//! [`FieldMap`] view of themselves, hand it to a [`StructureStore`], and keep
//! the id the store assigns on first save in a [`PersistedId`]. Loading goes
//! the other way: the store returns the declared fields for a `"<kind>:<id>"`
//! key and a loader registered for that kind rebuilds the live entity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::world::capability::Capabilities;
use crate::world::errors::WorldError;
use crate::world::state::World;

pub const ID_FIELD: &str = "id";

pub const ROOM_KIND: &str = "room";
pub const ROOM_FIELDS: &[&str] = &["id", "text", "persisters"];

pub const CONNECTION_KIND: &str = "connection";
pub const CONNECTION_FIELDS: &[&str] = &["id", "aExitName", "bExitName", "roomAId", "roomBId"];

/// The world clock reading lives in a single record, `clock:1`.
pub const CLOCK_KIND: &str = "clock";
pub const CLOCK_FIELDS: &[&str] = &["id", "now"];
pub const CLOCK_RECORD_ID: u64 = 1;

/// One persisted field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Id(u64),
    Int(i64),
    Text(String),
    Bool(bool),
    Refs(Vec<PersistedRef>),
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// Reference to a persisted entity; `kind` is the type tag used to pick a loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersistedRef {
    pub kind: String,
    pub id: u64,
}

impl PersistedRef {
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    pub fn key(&self) -> String {
        record_key(&self.kind, self.id)
    }
}

pub fn record_key(kind: &str, id: u64) -> String {
    format!("{}:{}", kind, id)
}

/// Operations the world requires from its durable backend.
pub trait StructureStore: Send + Sync {
    /// Upsert `fields` under `kind`. When `fields` carries a non-zero `id` that
    /// id is reused, otherwise a fresh one is allocated. Returns the id.
    fn save_structure(&self, kind: &str, fields: &FieldMap) -> Result<u64, WorldError>;

    /// Fetch the declared fields stored under `key`. `Ok(None)` when absent;
    /// [`WorldError::MalformedRecord`] when a declared field is missing.
    fn load_structure(&self, fields: &[&str], key: &str) -> Result<Option<FieldMap>, WorldError>;

    fn add_to_global_set(&self, set: &str, id: u64) -> Result<(), WorldError>;

    /// Enumerate a global set in ascending id order.
    fn global_set(&self, set: &str) -> Result<Vec<u64>, WorldError>;
}

/// Persisted id of one entity: zero until the first save, then fixed. Every
/// save also (re)asserts the id's membership in the kind's global set.
///
/// The cell stays locked for the whole save so two concurrent first saves
/// cannot allocate two ids for the same entity.
#[derive(Debug, Default)]
pub struct PersistedId(Mutex<u64>);

impl PersistedId {
    pub fn unsaved() -> Self {
        Self::default()
    }

    pub fn new(id: u64) -> Self {
        PersistedId(Mutex::new(id))
    }

    pub fn get(&self) -> u64 {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn save(
        &self,
        store: &dyn StructureStore,
        kind: &str,
        mut values: FieldMap,
    ) -> Result<u64, WorldError> {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != 0 {
            values.insert(ID_FIELD.to_string(), FieldValue::Id(*current));
        } else {
            values.remove(ID_FIELD);
        }
        let id = store.save_structure(kind, &values)?;
        if *current == 0 {
            *current = id;
            debug!("assigned id {} to new {} record", id, kind);
        }
        // Repeated on every save, so a failed add is retried by the next one.
        store.add_to_global_set(kind, id)?;
        Ok(id)
    }
}

/// Typed accessors over a loaded field map; each failure names the key and
/// field so a bad record can be located.
pub struct Fields<'a> {
    key: &'a str,
    map: &'a FieldMap,
}

impl<'a> Fields<'a> {
    pub fn new(key: &'a str, map: &'a FieldMap) -> Self {
        Self { key, map }
    }

    fn get(&self, field: &str) -> Result<&'a FieldValue, WorldError> {
        self.map
            .get(field)
            .ok_or_else(|| WorldError::malformed(self.key, field))
    }

    pub fn id(&self, field: &str) -> Result<u64, WorldError> {
        match self.get(field)? {
            FieldValue::Id(v) => Ok(*v),
            _ => Err(WorldError::malformed(self.key, field)),
        }
    }

    pub fn int(&self, field: &str) -> Result<i64, WorldError> {
        match self.get(field)? {
            FieldValue::Int(v) => Ok(*v),
            _ => Err(WorldError::malformed(self.key, field)),
        }
    }

    pub fn text(&self, field: &str) -> Result<String, WorldError> {
        match self.get(field)? {
            FieldValue::Text(v) => Ok(v.clone()),
            _ => Err(WorldError::malformed(self.key, field)),
        }
    }

    pub fn flag(&self, field: &str) -> Result<bool, WorldError> {
        match self.get(field)? {
            FieldValue::Bool(v) => Ok(*v),
            _ => Err(WorldError::malformed(self.key, field)),
        }
    }

    pub fn refs(&self, field: &str) -> Result<Vec<PersistedRef>, WorldError> {
        match self.get(field)? {
            FieldValue::Refs(v) => Ok(v.clone()),
            _ => Err(WorldError::malformed(self.key, field)),
        }
    }
}

/// Rebuilds a live entity of one kind from the store.
pub type LoadFn = fn(&Arc<World>, u64) -> Result<Option<Capabilities>, WorldError>;

/// Kind tag to reconstruction function, populated when the world is built.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: RwLock<HashMap<String, LoadFn>>,
}

impl LoaderRegistry {
    pub fn register(&self, kind: &str, loader: LoadFn) {
        self.loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.to_string(), loader);
    }

    /// Polymorphic load: dispatch on the reference's kind tag.
    pub fn load_arbitrary(
        &self,
        world: &Arc<World>,
        target: &PersistedRef,
    ) -> Result<Option<Capabilities>, WorldError> {
        let loader = self
            .loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target.kind)
            .copied()
            .ok_or_else(|| WorldError::UnknownKind(target.kind.clone()))?;
        loader(world, target.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn fields_report_missing_and_mistyped_values() {
        let mut map = FieldMap::new();
        map.insert("text".into(), FieldValue::Text("hall".into()));
        map.insert("id".into(), FieldValue::Text("oops".into()));
        let fields = Fields::new("room:7", &map);

        assert_eq!(fields.text("text").expect("text"), "hall");
        match fields.id("id") {
            Err(WorldError::MalformedRecord { key, field }) => {
                assert_eq!(key, "room:7");
                assert_eq!(field, "id");
            }
            other => panic!("expected malformed record, got {:?}", other),
        }
        assert!(fields.refs("persisters").is_err());
    }

    /// Allocates ids from a counter and fails the first `failures` set adds.
    #[derive(Default)]
    struct FlakySetStore {
        next_id: Mutex<u64>,
        failures: Mutex<usize>,
        sets: Mutex<BTreeSet<(String, u64)>>,
    }

    impl StructureStore for FlakySetStore {
        fn save_structure(&self, _kind: &str, fields: &FieldMap) -> Result<u64, WorldError> {
            if let Some(FieldValue::Id(id)) = fields.get(ID_FIELD) {
                return Ok(*id);
            }
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            Ok(*next)
        }

        fn load_structure(&self, _fields: &[&str], _key: &str) -> Result<Option<FieldMap>, WorldError> {
            Ok(None)
        }

        fn add_to_global_set(&self, set: &str, id: u64) -> Result<(), WorldError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(WorldError::Io(std::io::Error::other("set unavailable")));
            }
            self.sets.lock().unwrap().insert((set.to_string(), id));
            Ok(())
        }

        fn global_set(&self, set: &str) -> Result<Vec<u64>, WorldError> {
            Ok(self
                .sets
                .lock()
                .unwrap()
                .iter()
                .filter(|(s, _)| s == set)
                .map(|(_, id)| *id)
                .collect())
        }
    }

    #[test]
    fn failed_set_add_is_retried_by_the_next_save() {
        let store = FlakySetStore {
            failures: Mutex::new(1),
            ..FlakySetStore::default()
        };
        let record = PersistedId::unsaved();

        assert!(record.save(&store, ROOM_KIND, FieldMap::new()).is_err());
        let id = record.get();
        assert_ne!(id, 0);
        assert!(store.global_set(ROOM_KIND).expect("set").is_empty());

        assert_eq!(record.save(&store, ROOM_KIND, FieldMap::new()).expect("retry"), id);
        assert_eq!(store.global_set(ROOM_KIND).expect("set"), vec![id]);

        assert_eq!(record.save(&store, ROOM_KIND, FieldMap::new()).expect("again"), id);
        assert_eq!(store.global_set(ROOM_KIND).expect("set"), vec![id]);
    }

    #[test]
    fn record_keys_join_kind_and_id() {
        assert_eq!(record_key(ROOM_KIND, 12), "room:12");
        assert_eq!(PersistedRef::new("fruit", 3).key(), "fruit:3");
    }
}
