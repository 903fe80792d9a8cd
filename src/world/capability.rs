//! Behavioral capabilities a world entity may implement.
//!
//! An entity does not get inspected at runtime to find out what it can do.
//! Instead it hands out a [`Capabilities`] descriptor, built once at
//! construction, holding an optional handle per capability. Rooms register
//! the entity under every capability present in that descriptor.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;

use crate::world::errors::WorldError;
use crate::world::persist::{FieldMap, PersistedId, PersistedRef, StructureStore};
use crate::world::room::Room;
use crate::world::types::{EntityId, Stimulus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Physical,
    Persistent,
    Perceiver,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Physical => "physical",
            Capability::Persistent => "persistent",
            Capability::Perceiver => "perceiver",
        };
        f.write_str(name)
    }
}

/// Physical presence in a room.
pub trait Physical: Send + Sync {
    fn visible(&self) -> bool;
    fn carryable(&self) -> bool;
    /// Words a player may use to refer to this object.
    fn text_handles(&self) -> Vec<String>;
    fn description(&self) -> String;
    fn set_room(&self, room: Weak<Room>);
    fn room(&self) -> Option<Arc<Room>>;
}

/// Something that can write itself to the structure store and be found again.
pub trait Persister: Send + Sync {
    /// Kind tag; also the name of the kind's global id set.
    fn kind(&self) -> &'static str;

    fn record_id(&self) -> &PersistedId;

    /// Key-value view of the persisted fields, excluding `id`.
    fn persistent_values(&self) -> FieldMap;

    fn persisted_id(&self) -> u64 {
        self.record_id().get()
    }

    fn persisted_ref(&self) -> PersistedRef {
        PersistedRef::new(self.kind(), self.persisted_id())
    }

    /// Save and return the reference under which the record can be loaded.
    /// Only the first save allocates an id.
    fn save(&self, store: &dyn StructureStore) -> Result<PersistedRef, WorldError> {
        let id = self
            .record_id()
            .save(store, self.kind(), self.persistent_values())?;
        Ok(PersistedRef::new(self.kind(), id))
    }
}

/// Receives stimuli broadcast in the room it is registered with.
pub trait Perceiver: Send + Sync {
    fn stimuli(&self) -> mpsc::Sender<Stimulus>;
}

/// Tagged capability descriptor: identity plus one optional handle per capability.
#[derive(Clone)]
pub struct Capabilities {
    id: EntityId,
    physical: Option<Arc<dyn Physical>>,
    persister: Option<Arc<dyn Persister>>,
    perceiver: Option<Arc<dyn Perceiver>>,
}

impl Capabilities {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            physical: None,
            persister: None,
            perceiver: None,
        }
    }

    pub fn with_physical(mut self, physical: Arc<dyn Physical>) -> Self {
        self.physical = Some(physical);
        self
    }

    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn with_perceiver(mut self, perceiver: Arc<dyn Perceiver>) -> Self {
        self.perceiver = Some(perceiver);
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn physical(&self) -> Option<&Arc<dyn Physical>> {
        self.physical.as_ref()
    }

    pub fn persister(&self) -> Option<&Arc<dyn Persister>> {
        self.persister.as_ref()
    }

    pub fn perceiver(&self) -> Option<&Arc<dyn Perceiver>> {
        self.perceiver.as_ref()
    }

    pub fn kinds(&self) -> Vec<Capability> {
        let mut kinds = Vec::with_capacity(3);
        if self.physical.is_some() {
            kinds.push(Capability::Physical);
        }
        if self.persister.is_some() {
            kinds.push(Capability::Persistent);
        }
        if self.perceiver.is_some() {
            kinds.push(Capability::Perceiver);
        }
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("id", &self.id)
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Perceiver backed by a bounded channel; the receiving half goes to whoever
/// consumes the stimuli (a player session, a test).
pub struct ChannelPerceiver {
    id: EntityId,
    tx: mpsc::Sender<Stimulus>,
}

impl ChannelPerceiver {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Stimulus>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Arc::new(Self {
                id: EntityId::next(),
                tx,
            }),
            rx,
        )
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities::new(self.id).with_perceiver(self.clone())
    }
}

impl Perceiver for ChannelPerceiver {
    fn stimuli(&self) -> mpsc::Sender<Stimulus> {
        self.tx.clone()
    }
}
