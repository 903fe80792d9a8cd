//! Bidirectional named connections between rooms.
//!
//! A [`Connection`] joins room A and room B and names the exit on each side
//! ("east" from A, "west" from B). [`connect`] is the only way exit records
//! come into being: it creates the connection and appends one [`ExitRecord`]
//! to each endpoint room.

use std::sync::{Arc, Weak};

use log::{debug, warn};

use crate::world::capability::{Capabilities, Persister};
use crate::world::errors::WorldError;
use crate::world::persist::{
    record_key, FieldMap, FieldValue, Fields, PersistedId, PersistedRef, StructureStore,
    CONNECTION_FIELDS, CONNECTION_KIND,
};
use crate::world::room::Room;
use crate::world::state::World;
use crate::world::types::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

/// Exit-name generator: the name seen from room A and the name seen from room B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPair {
    pub a: &'static str,
    pub b: &'static str,
}

pub const EAST_WEST: ExitPair = ExitPair {
    a: "east",
    b: "west",
};
pub const NORTH_SOUTH: ExitPair = ExitPair {
    a: "north",
    b: "south",
};
pub const UP_DOWN: ExitPair = ExitPair { a: "up", b: "down" };

pub struct Connection {
    id: EntityId,
    record: PersistedId,
    room_a: Weak<Room>,
    room_b: Weak<Room>,
    a_exit_name: String,
    b_exit_name: String,
}

impl Connection {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn room_a(&self) -> Option<Arc<Room>> {
        self.room_a.upgrade()
    }

    pub fn room_b(&self) -> Option<Arc<Room>> {
        self.room_b.upgrade()
    }

    pub fn a_exit_name(&self) -> &str {
        &self.a_exit_name
    }

    pub fn b_exit_name(&self) -> &str {
        &self.b_exit_name
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities::new(self.id).with_persister(self.clone())
    }

    fn endpoint(&self, side: Side) -> Result<Arc<Room>, WorldError> {
        let room = match side {
            Side::A => self.room_a(),
            Side::B => self.room_b(),
        };
        room.ok_or_else(|| WorldError::NotFound(format!("connection {} endpoint {:?}", self.id, side)))
    }

    /// Rebuild a persisted connection. Both endpoint rooms must already be in
    /// the world's room table; otherwise nothing is produced.
    pub fn load(world: &Arc<World>, id: u64) -> Result<Option<Arc<Connection>>, WorldError> {
        if let Some(existing) = world
            .connections()
            .into_iter()
            .find(|c| c.persisted_id() == id)
        {
            return Ok(Some(existing));
        }
        let key = record_key(CONNECTION_KIND, id);
        let Some(map) = world.store().load_structure(CONNECTION_FIELDS, &key)? else {
            return Ok(None);
        };
        let fields = Fields::new(&key, &map);
        let a_name = fields.text("aExitName")?;
        let b_name = fields.text("bExitName")?;
        let room_a_id = fields.id("roomAId")?;
        let room_b_id = fields.id("roomBId")?;

        let (Some(a), Some(b)) = (world.room_by_id(room_a_id), world.room_by_id(room_b_id)) else {
            warn!(
                "connection {} skipped: rooms {} / {} are not loaded",
                key, room_a_id, room_b_id
            );
            return Ok(None);
        };
        Ok(Some(link(PersistedId::new(id), &a_name, &b_name, &a, &b)))
    }

    pub(crate) fn load_capabilities(
        world: &Arc<World>,
        id: u64,
    ) -> Result<Option<Capabilities>, WorldError> {
        Ok(Self::load(world, id)?.map(|conn| conn.capabilities()))
    }
}

impl Persister for Connection {
    fn kind(&self) -> &'static str {
        CONNECTION_KIND
    }

    fn record_id(&self) -> &PersistedId {
        &self.record
    }

    fn persistent_values(&self) -> FieldMap {
        let mut values = FieldMap::new();
        values.insert("aExitName".into(), FieldValue::Text(self.a_exit_name.clone()));
        values.insert("bExitName".into(), FieldValue::Text(self.b_exit_name.clone()));
        let room_id = |room: Option<Arc<Room>>| room.map(|r| r.persisted_id()).unwrap_or(0);
        values.insert("roomAId".into(), FieldValue::Id(room_id(self.room_a())));
        values.insert("roomBId".into(), FieldValue::Id(room_id(self.room_b())));
        values
    }

    fn save(&self, store: &dyn StructureStore) -> Result<PersistedRef, WorldError> {
        // Endpoint ids must exist before the connection can refer to them.
        for side in [Side::A, Side::B] {
            let room = self.endpoint(side)?;
            if room.persisted_id() == 0 {
                room.save(store)?;
            }
        }
        let id = self
            .record
            .save(store, CONNECTION_KIND, self.persistent_values())?;
        Ok(PersistedRef::new(CONNECTION_KIND, id))
    }
}

/// One side of a connection as seen from the room that holds it.
#[derive(Clone)]
pub struct ExitRecord {
    connection: Arc<Connection>,
    side: Side,
}

impl ExitRecord {
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn name(&self) -> &str {
        match self.side {
            Side::A => self.connection.a_exit_name(),
            Side::B => self.connection.b_exit_name(),
        }
    }

    pub fn other_side(&self) -> Option<Arc<Room>> {
        match self.side {
            Side::A => self.connection.room_b(),
            Side::B => self.connection.room_a(),
        }
    }
}

/// Join `a` and `b` with the names from `pair`.
pub fn connect(pair: ExitPair, a: &Arc<Room>, b: &Arc<Room>) -> Arc<Connection> {
    connect_named(pair.a, pair.b, a, b)
}

pub fn connect_east_west(a: &Arc<Room>, b: &Arc<Room>) -> Arc<Connection> {
    connect(EAST_WEST, a, b)
}

pub fn connect_north_south(a: &Arc<Room>, b: &Arc<Room>) -> Arc<Connection> {
    connect(NORTH_SOUTH, a, b)
}

pub fn connect_up_down(a: &Arc<Room>, b: &Arc<Room>) -> Arc<Connection> {
    connect(UP_DOWN, a, b)
}

pub fn connect_named(a_name: &str, b_name: &str, a: &Arc<Room>, b: &Arc<Room>) -> Arc<Connection> {
    link(PersistedId::unsaved(), a_name, b_name, a, b)
}

fn link(
    record: PersistedId,
    a_name: &str,
    b_name: &str,
    a: &Arc<Room>,
    b: &Arc<Room>,
) -> Arc<Connection> {
    let connection = Arc::new(Connection {
        id: EntityId::next(),
        record,
        room_a: Arc::downgrade(a),
        room_b: Arc::downgrade(b),
        a_exit_name: a_name.to_string(),
        b_exit_name: b_name.to_string(),
    });
    a.push_exit(ExitRecord {
        connection: connection.clone(),
        side: Side::A,
    });
    b.push_exit(ExitRecord {
        connection: connection.clone(),
        side: Side::B,
    });
    if let Some(world) = a.world() {
        world.register_connection(connection.clone());
    }
    debug!(
        "connected room {} ({}) <-> room {} ({})",
        a.entity_id(),
        a_name,
        b.entity_id(),
        b_name
    );
    connection
}
