use std::path::{Path, PathBuf};

use log::debug;
use sled::IVec;

use crate::world::errors::WorldError;
use crate::world::persist::{record_key, FieldMap, FieldValue, StructureStore, ID_FIELD};

const TREE_STRUCTURES: &str = "structures";
const TREE_SETS: &str = "global_sets";

/// Helper builder so tests can easily create throwaway stores.
pub struct SledStructureStoreBuilder {
    path: Option<PathBuf>,
    flush_every_write: bool,
}

impl SledStructureStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            flush_every_write: true,
        }
    }

    /// A store that lives only as long as the process (sled temporary mode).
    pub fn temporary() -> Self {
        Self {
            path: None,
            flush_every_write: false,
        }
    }

    pub fn open(self) -> Result<SledStructureStore, WorldError> {
        let db = match &self.path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                sled::open(path)?
            }
            None => sled::Config::new().temporary(true).open()?,
        };
        SledStructureStore::from_db(db, self.flush_every_write)
    }
}

/// Sled-backed structure store: one tree of `"<kind>:<id>"` records encoded
/// with bincode, and one tree of `"<set>:<id>"` membership keys.
pub struct SledStructureStore {
    db: sled::Db,
    structures: sled::Tree,
    sets: sled::Tree,
    flush_every_write: bool,
}

impl SledStructureStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorldError> {
        SledStructureStoreBuilder::new(path.as_ref()).open()
    }

    pub fn temporary() -> Result<Self, WorldError> {
        SledStructureStoreBuilder::temporary().open()
    }

    fn from_db(db: sled::Db, flush_every_write: bool) -> Result<Self, WorldError> {
        let structures = db.open_tree(TREE_STRUCTURES)?;
        let sets = db.open_tree(TREE_SETS)?;
        Ok(Self {
            db,
            structures,
            sets,
            flush_every_write,
        })
    }

    // Zero-padded so a prefix scan yields ids in ascending order.
    fn set_key(set: &str, id: u64) -> Vec<u8> {
        format!("{}:{:020}", set, id).into_bytes()
    }

    fn serialize(value: &FieldMap) -> Result<Vec<u8>, WorldError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize(bytes: IVec) -> Result<FieldMap, WorldError> {
        Ok(bincode::deserialize::<FieldMap>(&bytes)?)
    }

    fn flush(&self, tree: &sled::Tree) -> Result<(), WorldError> {
        if self.flush_every_write {
            tree.flush()?;
        }
        Ok(())
    }

    /// Number of records of `kind` currently stored.
    pub fn count_kind(&self, kind: &str) -> usize {
        self.structures
            .scan_prefix(format!("{}:", kind).as_bytes())
            .count()
    }
}

impl StructureStore for SledStructureStore {
    fn save_structure(&self, kind: &str, fields: &FieldMap) -> Result<u64, WorldError> {
        let id = match fields.get(ID_FIELD) {
            Some(FieldValue::Id(id)) if *id > 0 => *id,
            // sled ids start at zero, which is reserved for "unsaved".
            _ => self.db.generate_id()? + 1,
        };
        let mut record = fields.clone();
        record.insert(ID_FIELD.to_string(), FieldValue::Id(id));
        let key = record_key(kind, id);
        self.structures
            .insert(key.as_bytes(), Self::serialize(&record)?)?;
        self.flush(&self.structures)?;
        debug!("saved structure {} ({} fields)", key, record.len());
        Ok(id)
    }

    fn load_structure(&self, fields: &[&str], key: &str) -> Result<Option<FieldMap>, WorldError> {
        let Some(bytes) = self.structures.get(key.as_bytes())? else {
            return Ok(None);
        };
        let mut stored = Self::deserialize(bytes)?;
        let mut out = FieldMap::new();
        for field in fields {
            let value = stored
                .remove(*field)
                .ok_or_else(|| WorldError::malformed(key, *field))?;
            out.insert((*field).to_string(), value);
        }
        Ok(Some(out))
    }

    fn add_to_global_set(&self, set: &str, id: u64) -> Result<(), WorldError> {
        self.sets.insert(Self::set_key(set, id), Vec::<u8>::new())?;
        self.flush(&self.sets)?;
        Ok(())
    }

    fn global_set(&self, set: &str) -> Result<Vec<u64>, WorldError> {
        let prefix = format!("{}:", set);
        let mut ids = Vec::new();
        for entry in self.sets.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key);
            if let Some(id) = text
                .strip_prefix(prefix.as_str())
                .and_then(|raw| raw.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn room_fields(text: &str) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("text".into(), FieldValue::Text(text.into()));
        map.insert("persisters".into(), FieldValue::Refs(Vec::new()));
        map
    }

    #[test]
    fn save_allocates_then_upserts_same_id() {
        let store = SledStructureStore::temporary().expect("store");
        let first = store.save_structure("room", &room_fields("T")).expect("save");
        assert!(first > 0);

        let mut again = room_fields("T2");
        again.insert(ID_FIELD.into(), FieldValue::Id(first));
        let second = store.save_structure("room", &again).expect("resave");
        assert_eq!(first, second);
        assert_eq!(store.count_kind("room"), 1);

        let loaded = store
            .load_structure(&["id", "text"], &record_key("room", first))
            .expect("load")
            .expect("present");
        assert_eq!(loaded.get("text"), Some(&FieldValue::Text("T2".into())));
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn missing_declared_field_is_malformed() {
        let store = SledStructureStore::temporary().expect("store");
        let id = store.save_structure("room", &room_fields("T")).expect("save");
        let err = store
            .load_structure(&["id", "text", "colour"], &record_key("room", id))
            .expect_err("colour is not stored");
        assert!(matches!(err, WorldError::MalformedRecord { ref field, .. } if field == "colour"));
    }

    #[test]
    fn absent_key_loads_as_none() {
        let store = SledStructureStore::temporary().expect("store");
        let loaded = store.load_structure(&["id"], "room:999").expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn global_sets_survive_reopen_in_order() {
        let dir = TempDir::new().expect("tempdir");
        {
            let store = SledStructureStore::open(dir.path()).expect("store");
            store.add_to_global_set("room", 12).expect("add");
            store.add_to_global_set("room", 3).expect("add");
            store.add_to_global_set("connection", 4).expect("add");
        }
        let store = SledStructureStore::open(dir.path()).expect("reopen");
        assert_eq!(store.global_set("room").expect("set"), vec![3, 12]);
        assert_eq!(store.global_set("connection").expect("set"), vec![4]);
        assert!(store.global_set("fruit").expect("set").is_empty());
    }
}
