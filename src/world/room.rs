//! Room actor.
//!
//! Each room owns three registries (physical objects, perceivers,
//! persistent children), its exit records, the set of connected players,
//! and two independent loops:
//!
//! * the **action loop** drains the bounded action queue one
//!   [`InterObjectAction`] at a time, so actions within a room run strictly
//!   in enqueue order;
//! * the **broadcast loop** drains the bounded stimulus channel and forwards
//!   each stimulus to every perceiver registered at the moment of delivery,
//!   in registration order, with a blocking send per perceiver.
//!
//! Registry mutation may come from any task (a time-aware entity spawning a
//! successor, a session handler), so the registries sit behind a per-room
//! mutex. The lock is never held across an `.await`: enumeration copies a
//! snapshot out first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::logutil::escape_log;
use crate::metrics;
use crate::world::capability::{Capabilities, Capability, Perceiver, Persister, Physical};
use crate::world::errors::WorldError;
use crate::world::exits::ExitRecord;
use crate::world::persist::{
    record_key, FieldMap, FieldValue, Fields, PersistedId, PersistedRef, StructureStore,
    ROOM_FIELDS, ROOM_KIND,
};
use crate::world::state::{wait_for_shutdown, World};
use crate::world::types::{EntityId, Player, Stimulus};

pub const DIVIDER: &str = "\n--------\n";

/// A unit of work executed inside a room's action loop. A returned stimulus
/// is pushed onto the room's broadcast channel.
pub trait InterObjectAction: Send {
    fn exec(self: Box<Self>, room: &Arc<Room>) -> Option<Stimulus>;
}

impl<F> InterObjectAction for F
where
    F: FnOnce(&Arc<Room>) -> Option<Stimulus> + Send,
{
    fn exec(self: Box<Self>, room: &Arc<Room>) -> Option<Stimulus> {
        (*self)(room)
    }
}

pub type BoxedAction = Box<dyn InterObjectAction>;

#[derive(Default)]
struct Registries {
    physical: Vec<(EntityId, Arc<dyn Physical>)>,
    perceivers: Vec<(EntityId, Arc<dyn Perceiver>)>,
    persistents: Vec<(EntityId, Arc<dyn Persister>)>,
}

// First match only; the relative order of the rest is kept.
fn remove_first<T>(list: &mut Vec<(EntityId, T)>, id: EntityId) -> bool {
    match list.iter().position(|(entry, _)| *entry == id) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Room {
    id: EntityId,
    record: PersistedId,
    text: String,
    players: Mutex<HashMap<u64, Player>>,
    registries: Mutex<Registries>,
    exits: Mutex<Vec<ExitRecord>>,
    stimuli_tx: mpsc::Sender<Stimulus>,
    actions_tx: mpsc::Sender<BoxedAction>,
    world: Weak<World>,
}

impl Room {
    /// Create a room, register it with the world and start both loops.
    pub fn new(world: &Arc<World>, text: impl Into<String>) -> Arc<Room> {
        Self::build(world, PersistedId::unsaved(), text.into())
    }

    fn build(world: &Arc<World>, record: PersistedId, text: String) -> Arc<Room> {
        let config = world.config();
        let (stimuli_tx, stimuli_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let (actions_tx, actions_rx) = mpsc::channel(config.action_queue_capacity.max(1));
        let room = Arc::new(Room {
            id: EntityId::next(),
            record,
            text,
            players: Mutex::new(HashMap::new()),
            registries: Mutex::new(Registries::default()),
            exits: Mutex::new(Vec::new()),
            stimuli_tx,
            actions_tx,
            world: Arc::downgrade(world),
        });
        world.register_room(room.clone());

        let actions = tokio::spawn(run_actions(
            room.clone(),
            actions_rx,
            world.shutdown_signal(),
        ));
        let broadcasts = tokio::spawn(run_broadcasts(
            room.clone(),
            stimuli_rx,
            world.shutdown_signal(),
        ));
        world.track_task(actions);
        world.track_task(broadcasts);
        debug!(
            "room {} (id {}) created: {}",
            room.id,
            room.persisted_id(),
            escape_log(&room.text)
        );
        room
    }

    pub fn entity_id(&self) -> EntityId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn world(&self) -> Option<Arc<World>> {
        self.world.upgrade()
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities::new(self.id).with_persister(self.clone())
    }

    /// Register `entity` under every capability it carries. Physical
    /// entities get their room back-reference pointed here.
    pub fn add_child(self: &Arc<Self>, entity: &Capabilities) -> Vec<Capability> {
        let id = entity.id();
        let added = entity.kinds();
        {
            let mut registries = lock(&self.registries);
            if let Some(physical) = entity.physical() {
                registries.physical.push((id, physical.clone()));
            }
            if let Some(persister) = entity.persister() {
                registries.persistents.push((id, persister.clone()));
            }
            if let Some(perceiver) = entity.perceiver() {
                registries.perceivers.push((id, perceiver.clone()));
            }
        }
        if let Some(physical) = entity.physical() {
            physical.set_room(Arc::downgrade(self));
        }
        if !added.is_empty() {
            debug!("room {}: added {} as {:?}", self.id, id, added);
        }
        added
    }

    /// Remove the first registration of `entity` from each registry it is in.
    /// Returns the registries it was removed from; empty when it was absent.
    pub fn remove_child(&self, entity: &Capabilities) -> Vec<Capability> {
        let id = entity.id();
        let mut removed = Vec::new();
        {
            let mut registries = lock(&self.registries);
            if entity.physical().is_some() && remove_first(&mut registries.physical, id) {
                removed.push(Capability::Physical);
            }
            if entity.persister().is_some() && remove_first(&mut registries.persistents, id) {
                removed.push(Capability::Persistent);
            }
            if entity.perceiver().is_some() && remove_first(&mut registries.perceivers, id) {
                removed.push(Capability::Perceiver);
            }
        }
        if !removed.is_empty() {
            debug!("room {}: removed {} from {:?}", self.id, id, removed);
        }
        removed
    }

    /// Registries that currently hold `id`.
    pub fn registered_as(&self, id: EntityId) -> Vec<Capability> {
        let registries = lock(&self.registries);
        let mut kinds = Vec::new();
        if registries.physical.iter().any(|(e, _)| *e == id) {
            kinds.push(Capability::Physical);
        }
        if registries.persistents.iter().any(|(e, _)| *e == id) {
            kinds.push(Capability::Persistent);
        }
        if registries.perceivers.iter().any(|(e, _)| *e == id) {
            kinds.push(Capability::Perceiver);
        }
        kinds
    }

    pub fn physical_objects(&self) -> Vec<Arc<dyn Physical>> {
        lock(&self.registries)
            .physical
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn persistents(&self) -> Vec<Arc<dyn Persister>> {
        lock(&self.registries)
            .persistents
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn perceiver_count(&self) -> usize {
        lock(&self.registries).perceivers.len()
    }

    /// First physical object answering to `handle` (case-insensitive).
    pub fn find_object(&self, handle: &str) -> Option<Arc<dyn Physical>> {
        self.physical_objects().into_iter().find(|obj| {
            obj.text_handles()
                .iter()
                .any(|h| h.eq_ignore_ascii_case(handle))
        })
    }

    pub fn enter(&self, player: Player) {
        debug!("room {}: player {} entered", self.id, player.id);
        lock(&self.players).insert(player.id, player);
    }

    pub fn leave(&self, player_id: u64) -> Option<Player> {
        lock(&self.players).remove(&player_id)
    }

    pub fn players(&self) -> Vec<Player> {
        let mut players: Vec<Player> = lock(&self.players).values().cloned().collect();
        players.sort_by_key(|p| p.id);
        players
    }

    /// Queue a stimulus for fan-out. Waits while the broadcast channel is full.
    pub async fn broadcast(&self, stimulus: Stimulus) -> Result<(), WorldError> {
        self.stimuli_tx
            .send(stimulus)
            .await
            .map_err(|_| WorldError::RoomClosed(self.id.get()))
    }

    /// Submission side of the room's action queue.
    pub fn actions(&self) -> mpsc::Sender<BoxedAction> {
        self.actions_tx.clone()
    }

    pub async fn enqueue(&self, action: BoxedAction) -> Result<(), WorldError> {
        self.actions_tx
            .send(action)
            .await
            .map_err(|_| WorldError::RoomClosed(self.id.get()))
    }

    /// Queue a closure as an action.
    pub async fn submit<F>(&self, action: F) -> Result<(), WorldError>
    where
        F: FnOnce(&Arc<Room>) -> Option<Stimulus> + Send + 'static,
    {
        self.enqueue(Box::new(action)).await
    }

    pub fn describe(&self, for_player: &Player) -> String {
        let mut out = String::with_capacity(self.text.len() + 128);
        out.push_str(&self.text);
        out.push_str(DIVIDER);
        out.push_str(&self.describe_objects(for_player));
        out.push_str(DIVIDER);
        out.push_str(&self.describe_players(for_player));
        out.push_str(DIVIDER);
        out.push_str(&self.describe_exits());
        out
    }

    pub fn describe_objects(&self, _for_player: &Player) -> String {
        let mut out = String::from("Sitting here is/are:\n");
        for obj in self.physical_objects() {
            if obj.visible() {
                out.push_str(&obj.description());
                out.push('\n');
            }
        }
        out
    }

    pub fn describe_players(&self, for_player: &Player) -> String {
        let mut out = String::from("Other people present:\n");
        for player in self.players() {
            if player.id != for_player.id {
                out.push_str(&player.name);
                out.push('\n');
            }
        }
        out
    }

    pub fn describe_exits(&self) -> String {
        let names = self.exit_names();
        if names.is_empty() {
            "Exits: none\n".to_string()
        } else {
            format!("Exits: {}\n", names.join(", "))
        }
    }

    pub(crate) fn push_exit(&self, exit: ExitRecord) {
        lock(&self.exits).push(exit);
    }

    pub fn exits(&self) -> Vec<ExitRecord> {
        lock(&self.exits).clone()
    }

    pub fn exit_names(&self) -> Vec<String> {
        lock(&self.exits)
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Look up an exit by name and call exactly one of the two callbacks.
    pub fn with_exit<R>(
        &self,
        name: &str,
        found: impl FnOnce(&ExitRecord) -> R,
        not_found: impl FnOnce() -> R,
    ) -> R {
        let exit = lock(&self.exits).iter().find(|e| e.name() == name).cloned();
        match exit {
            Some(exit) => found(&exit),
            None => not_found(),
        }
    }

    async fn execute(self: &Arc<Self>, action: BoxedAction) {
        let stimulus = action.exec(self);
        metrics::inc_actions_executed();
        if let Some(stimulus) = stimulus {
            if self.stimuli_tx.send(stimulus).await.is_err() {
                metrics::inc_stimuli_dropped();
                warn!("room {}: action result dropped, broadcast closed", self.id);
            }
        }
    }

    fn perceiver_channels(&self) -> Vec<mpsc::Sender<Stimulus>> {
        lock(&self.registries)
            .perceivers
            .iter()
            .map(|(_, p)| p.stimuli())
            .collect()
    }

    async fn fan_out(&self, stimulus: &Stimulus) {
        for tx in self.perceiver_channels() {
            if tx.send(stimulus.clone()).await.is_ok() {
                metrics::inc_stimuli_delivered();
            } else {
                debug!("room {}: perceiver channel closed", self.id);
            }
        }
    }

    fn fan_out_now(&self, stimulus: &Stimulus) {
        for tx in self.perceiver_channels() {
            if tx.try_send(stimulus.clone()).is_ok() {
                metrics::inc_stimuli_delivered();
            } else {
                metrics::inc_stimuli_dropped();
                warn!(
                    "room {}: dropped '{}' during shutdown, perceiver busy",
                    self.id,
                    escape_log(&stimulus.text)
                );
            }
        }
    }

    /// Rebuild a persisted room and reattach its persisted children.
    /// Returns the live room when one with this id is already loaded.
    pub fn load(world: &Arc<World>, id: u64) -> Result<Option<Arc<Room>>, WorldError> {
        if let Some(room) = world.room_by_id(id) {
            return Ok(Some(room));
        }
        let key = record_key(ROOM_KIND, id);
        let Some(map) = world.store().load_structure(ROOM_FIELDS, &key)? else {
            return Ok(None);
        };
        let fields = Fields::new(&key, &map);
        let text = fields.text("text")?;
        let children = fields.refs("persisters")?;

        let room = Self::build(world, PersistedId::new(id), text);
        for child in &children {
            match world.load_arbitrary(child) {
                Ok(Some(entity)) => {
                    room.add_child(&entity);
                }
                Ok(None) => warn!("{}: persisted child {} not found", key, child.key()),
                Err(e) => warn!("{}: skipping child {}: {}", key, child.key(), e),
            }
        }
        info!("loaded {} with {} persisted children", key, children.len());
        Ok(Some(room))
    }

    fn values_with(&self, children: Vec<PersistedRef>) -> FieldMap {
        let mut values = FieldMap::new();
        values.insert("text".into(), FieldValue::Text(self.text.clone()));
        values.insert("persisters".into(), FieldValue::Refs(children));
        values
    }

    pub(crate) fn load_capabilities(
        world: &Arc<World>,
        id: u64,
    ) -> Result<Option<Capabilities>, WorldError> {
        Ok(Self::load(world, id)?.map(|room| room.capabilities()))
    }
}

impl Persister for Room {
    fn kind(&self) -> &'static str {
        ROOM_KIND
    }

    fn record_id(&self) -> &PersistedId {
        &self.record
    }

    fn persistent_values(&self) -> FieldMap {
        let refs = self.persistents().iter().map(|p| p.persisted_ref()).collect();
        self.values_with(refs)
    }

    /// Children are saved first so the room record can refer to their ids.
    fn save(&self, store: &dyn StructureStore) -> Result<PersistedRef, WorldError> {
        let mut refs = Vec::new();
        for child in self.persistents() {
            refs.push(child.save(store)?);
        }
        let id = self.record.save(store, ROOM_KIND, self.values_with(refs))?;
        Ok(PersistedRef::new(ROOM_KIND, id))
    }
}

async fn run_actions(
    room: Arc<Room>,
    mut rx: mpsc::Receiver<BoxedAction>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            action = rx.recv() => match action {
                Some(action) => room.execute(action).await,
                None => return,
            },
        }
    }
    rx.close();
    let mut drained = 0usize;
    while let Some(action) = rx.recv().await {
        room.execute(action).await;
        drained += 1;
    }
    debug!("room {}: action loop stopped ({} drained)", room.id, drained);
}

async fn run_broadcasts(
    room: Arc<Room>,
    mut rx: mpsc::Receiver<Stimulus>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            stimulus = rx.recv() => match stimulus {
                Some(stimulus) => {
                    tokio::select! {
                        biased;
                        _ = wait_for_shutdown(&mut shutdown) => {
                            warn!("room {}: shutdown interrupted delivery of '{}'", room.id, escape_log(&stimulus.text));
                            break;
                        }
                        _ = room.fan_out(&stimulus) => {}
                    }
                }
                None => return,
            },
        }
    }
    rx.close();
    while let Some(stimulus) = rx.recv().await {
        room.fan_out_now(&stimulus);
    }
    debug!("room {}: broadcast loop stopped", room.id);
}
