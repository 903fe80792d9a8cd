//! Fruit and plants: the world's growing things.
//!
//! A fruit ripens, rots and leaves a pit; when the pit is spent the fruit
//! disappears from its room and, if it was fertile, a plant of the same name
//! sprouts there. A plant grows into a tree and then bears one new fruit.
//! Fruit borne by a tree is not fertile, so each seed ends as one standing
//! tree. Both ride the world clock through [`TimeAware`] and persist their
//! lifecycle position.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use log::{debug, info, warn};

use crate::logutil::escape_log;
use crate::world::capability::{Capabilities, Persister, Physical};
use crate::world::errors::WorldError;
use crate::world::lifecycle::{spawn_time_aware, Lifecycle, StageTable, TimeAware};
use crate::world::persist::{record_key, FieldMap, FieldValue, Fields, PersistedId};
use crate::world::room::Room;
use crate::world::state::World;
use crate::world::types::{EntityId, Tick};

pub const FRUIT_KIND: &str = "fruit";
pub const PLANT_KIND: &str = "plant";
pub const FLORA_FIELDS: &[&str] = &[
    "id",
    "name",
    "stage",
    "lastChange",
    "visible",
    "done",
    "fertile",
];

const FRUIT_STAGES: &[(&str, i64)] = &[
    ("underripe", 10_000),
    ("ripe", 40_000),
    ("rotten", 10_000),
    ("pit", 10_000),
    ("defunct", -1),
];

const PLANT_STAGES: &[(&str, i64)] = &[("sprout", 20_000), ("sapling", 40_000), ("tree", -1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloraKind {
    Fruit,
    Plant,
}

impl FloraKind {
    pub fn tag(self) -> &'static str {
        match self {
            FloraKind::Fruit => FRUIT_KIND,
            FloraKind::Plant => PLANT_KIND,
        }
    }

    pub fn stages(self) -> Result<Arc<StageTable>, WorldError> {
        let table = match self {
            FloraKind::Fruit => FRUIT_STAGES,
            FloraKind::Plant => PLANT_STAGES,
        };
        Ok(Arc::new(StageTable::sequence(table)?))
    }

    /// What this kind leaves behind when its lifecycle completes.
    pub fn successor(self) -> FloraKind {
        match self {
            FloraKind::Fruit => FloraKind::Plant,
            FloraKind::Plant => FloraKind::Fruit,
        }
    }
}

pub struct Flora {
    id: EntityId,
    me: Weak<Flora>,
    record: PersistedId,
    kind: FloraKind,
    name: String,
    room: Mutex<Weak<Room>>,
    lifecycle: Mutex<Lifecycle>,
    visible: AtomicBool,
    fertile: bool,
}

impl Flora {
    /// Create a new (fertile) flora at the first stage of its lifecycle and
    /// start feeding it clock ticks.
    pub fn spawn(
        world: &Arc<World>,
        kind: FloraKind,
        name: &str,
    ) -> Result<Arc<Flora>, WorldError> {
        Self::spawn_with(world, kind, name, true)
    }

    fn spawn_with(
        world: &Arc<World>,
        kind: FloraKind,
        name: &str,
        fertile: bool,
    ) -> Result<Arc<Flora>, WorldError> {
        let lifecycle = Lifecycle::new(kind.stages()?, world.now());
        Ok(Self::start(
            world,
            kind,
            PersistedId::unsaved(),
            name.to_string(),
            lifecycle,
            true,
            fertile,
        ))
    }

    /// Spawn and register in `room` in one step.
    pub fn spawn_into(
        room: &Arc<Room>,
        kind: FloraKind,
        name: &str,
    ) -> Result<Arc<Flora>, WorldError> {
        Self::spawn_into_with(room, kind, name, true)
    }

    fn spawn_into_with(
        room: &Arc<Room>,
        kind: FloraKind,
        name: &str,
        fertile: bool,
    ) -> Result<Arc<Flora>, WorldError> {
        let world = room.world().ok_or(WorldError::ShutDown)?;
        let flora = Self::spawn_with(&world, kind, name, fertile)?;
        room.add_child(&flora.capabilities());
        Ok(flora)
    }

    fn start(
        world: &Arc<World>,
        kind: FloraKind,
        record: PersistedId,
        name: String,
        lifecycle: Lifecycle,
        visible: bool,
        fertile: bool,
    ) -> Arc<Flora> {
        let flora = Arc::new_cyclic(|me| Flora {
            id: EntityId::next(),
            me: me.clone(),
            record,
            kind,
            name,
            room: Mutex::new(Weak::new()),
            lifecycle: Mutex::new(lifecycle),
            visible: AtomicBool::new(visible),
            fertile,
        });
        spawn_time_aware(world, flora.clone());
        flora
    }

    pub fn load(
        world: &Arc<World>,
        kind: FloraKind,
        id: u64,
    ) -> Result<Option<Arc<Flora>>, WorldError> {
        let key = record_key(kind.tag(), id);
        let Some(map) = world.store().load_structure(FLORA_FIELDS, &key)? else {
            return Ok(None);
        };
        let fields = Fields::new(&key, &map);
        let name = fields.text("name")?;
        let stage = u32::try_from(fields.int("stage")?)
            .map_err(|_| WorldError::malformed(&key, "stage"))?;
        let last_change = fields.int("lastChange")?;
        let visible = fields.flag("visible")?;
        let done = fields.flag("done")?;
        let fertile = fields.flag("fertile")?;

        let lifecycle = Lifecycle::restore(kind.stages()?, stage, last_change, done)?;
        // A record saved without the clock must still not sit in the future.
        world.advance_clock_to(last_change);
        Ok(Some(Self::start(
            world,
            kind,
            PersistedId::new(id),
            name,
            lifecycle,
            visible,
            fertile,
        )))
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities::new(self.id)
            .with_physical(self.clone())
            .with_persister(self.clone())
    }

    pub fn kind(&self) -> FloraKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_name(&self) -> String {
        self.lifecycle_guard().stage().name.clone()
    }

    pub fn is_done(&self) -> bool {
        self.lifecycle_guard().one_shot_done()
    }

    /// Whether a spent fruit sprouts a plant.
    pub fn is_fertile(&self) -> bool {
        self.fertile
    }

    fn lifecycle_guard(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn load_fruit(world: &Arc<World>, id: u64) -> Result<Option<Capabilities>, WorldError> {
    Ok(Flora::load(world, FloraKind::Fruit, id)?.map(|f| f.capabilities()))
}

pub(crate) fn load_plant(world: &Arc<World>, id: u64) -> Result<Option<Capabilities>, WorldError> {
    Ok(Flora::load(world, FloraKind::Plant, id)?.map(|f| f.capabilities()))
}

impl Physical for Flora {
    fn visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    fn carryable(&self) -> bool {
        self.kind == FloraKind::Fruit
    }

    fn text_handles(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn description(&self) -> String {
        match self.kind {
            FloraKind::Fruit => format!("A(n) {} {}", self.stage_name(), self.name),
            FloraKind::Plant => format!("A(n) {} {} plant", self.stage_name(), self.name),
        }
    }

    fn set_room(&self, room: Weak<Room>) {
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = room;
    }

    fn room(&self) -> Option<Arc<Room>> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }
}

impl Persister for Flora {
    fn kind(&self) -> &'static str {
        self.kind.tag()
    }

    fn record_id(&self) -> &PersistedId {
        &self.record
    }

    fn persistent_values(&self) -> FieldMap {
        let lifecycle = self.lifecycle_guard();
        let mut values = FieldMap::new();
        values.insert("name".into(), FieldValue::Text(self.name.clone()));
        values.insert(
            "stage".into(),
            FieldValue::Int(i64::from(lifecycle.stage().ordinal)),
        );
        values.insert("lastChange".into(), FieldValue::Int(lifecycle.last_change()));
        values.insert("visible".into(), FieldValue::Bool(self.visible()));
        values.insert("done".into(), FieldValue::Bool(lifecycle.one_shot_done()));
        values.insert("fertile".into(), FieldValue::Bool(self.fertile));
        values
    }
}

impl TimeAware for Flora {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn lifecycle(&self) -> &Mutex<Lifecycle> {
        &self.lifecycle
    }

    fn on_complete(&self, now: Tick) {
        let Some(room) = self.room() else {
            if self.kind == FloraKind::Fruit {
                self.visible.store(false, Ordering::Release);
            }
            warn!(
                "{} '{}' completed at tick {} outside any room",
                self.kind.tag(),
                escape_log(&self.name),
                now
            );
            return;
        };
        let spawned = match self.kind {
            FloraKind::Fruit => {
                self.visible.store(false, Ordering::Release);
                if let Some(me) = self.me.upgrade() {
                    room.remove_child(&me.capabilities());
                }
                if !self.fertile {
                    debug!(
                        "fruit '{}' rotted away in room {}",
                        escape_log(&self.name),
                        room.entity_id()
                    );
                    return;
                }
                Flora::spawn_into_with(&room, FloraKind::Plant, &self.name, true)
            }
            FloraKind::Plant => Flora::spawn_into_with(&room, FloraKind::Fruit, &self.name, false),
        };
        let successor = self.kind.successor();
        match spawned {
            Ok(_) => info!(
                "{} '{}' left a new {} in room {}",
                self.kind.tag(),
                escape_log(&self.name),
                successor.tag(),
                room.entity_id()
            ),
            Err(e) => warn!(
                "{} '{}' could not produce a {}: {}",
                self.kind.tag(),
                escape_log(&self.name),
                successor.tag(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tables_are_valid() {
        let fruit = FloraKind::Fruit.stages().expect("fruit stages");
        assert_eq!(fruit.len(), 5);
        assert_eq!(fruit.get(1).map(|s| s.name.as_str()), Some("ripe"));
        assert!(fruit.get(4).is_some_and(|s| s.is_terminal()));

        let plant = FloraKind::Plant.stages().expect("plant stages");
        assert_eq!(plant.len(), 3);
        assert!(plant.get(2).is_some_and(|s| s.is_terminal()));
    }

    #[test]
    fn kinds_alternate() {
        assert_eq!(FloraKind::Fruit.successor(), FloraKind::Plant);
        assert_eq!(FloraKind::Plant.successor(), FloraKind::Fruit);
        assert_eq!(FloraKind::Plant.tag(), "plant");
    }
}
