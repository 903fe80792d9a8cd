//! The world context.
//!
//! [`World`] is created once and handed (as `Arc<World>`) to every component
//! that needs it. It owns the room table, the persistents and connections
//! lists, the time-listener registry, the loader registry, the clock reading
//! and the shutdown signal shared by every spawned loop.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::WorldConfig;
use crate::world::capability::{Capabilities, Persister};
use crate::world::clock::{spawn_clock, TickReport, TimeListeners};
use crate::world::errors::WorldError;
use crate::world::exits::Connection;
use crate::world::flora;
use crate::world::persist::{
    record_key, FieldMap, FieldValue, Fields, LoadFn, LoaderRegistry, PersistedRef,
    StructureStore, CLOCK_FIELDS, CLOCK_KIND, CLOCK_RECORD_ID, CONNECTION_KIND, ID_FIELD,
    ROOM_KIND,
};
use crate::world::room::Room;
use crate::world::types::Tick;

/// Resolves once the shutdown flag is set (or the world is gone).
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub rooms: usize,
    pub connections: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub rooms: usize,
    pub connections: usize,
    pub missing: usize,
    pub failed: usize,
}

pub struct World {
    config: WorldConfig,
    store: Arc<dyn StructureStore>,
    rooms: RwLock<Vec<Arc<Room>>>,
    persistents: Mutex<Vec<Arc<dyn Persister>>>,
    connections: Mutex<Vec<Arc<Connection>>>,
    listeners: TimeListeners,
    loaders: LoaderRegistry,
    clock: AtomicI64,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl World {
    /// Build a world over `store` with the standard loaders registered.
    pub fn new(config: WorldConfig, store: Arc<dyn StructureStore>) -> Arc<World> {
        let (shutdown_tx, _) = watch::channel(false);
        let world = Arc::new(World {
            config,
            store,
            rooms: RwLock::new(Vec::new()),
            persistents: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            listeners: TimeListeners::default(),
            loaders: LoaderRegistry::default(),
            clock: AtomicI64::new(0),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });
        world.register_loader(ROOM_KIND, Room::load_capabilities);
        world.register_loader(CONNECTION_KIND, Connection::load_capabilities);
        world.register_loader(flora::FRUIT_KIND, flora::load_fruit);
        world.register_loader(flora::PLANT_KIND, flora::load_plant);
        world
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn StructureStore {
        self.store.as_ref()
    }

    pub(crate) fn register_room(&self, room: Arc<Room>) {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(room.clone());
        lock(&self.persistents).push(room);
    }

    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Loaded room with persisted id `id`. Id 0 never matches.
    pub fn room_by_id(&self, id: u64) -> Option<Arc<Room>> {
        if id == 0 {
            return None;
        }
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|room| room.persisted_id() == id)
            .cloned()
    }

    pub fn persistents(&self) -> Vec<Arc<dyn Persister>> {
        lock(&self.persistents).clone()
    }

    pub(crate) fn register_connection(&self, connection: Arc<Connection>) {
        lock(&self.connections).push(connection);
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        lock(&self.connections).clone()
    }

    pub fn time_listeners(&self) -> &TimeListeners {
        &self.listeners
    }

    pub fn register_loader(&self, kind: &str, loader: LoadFn) {
        self.loaders.register(kind, loader);
    }

    pub fn load_arbitrary(
        self: &Arc<Self>,
        target: &PersistedRef,
    ) -> Result<Option<Capabilities>, WorldError> {
        self.loaders.load_arbitrary(self, target)
    }

    /// Save the clock reading, every world-level persistent (rooms, and
    /// through them their children), then every connection.
    pub fn save_all(&self) -> Result<SaveSummary, WorldError> {
        self.save_clock()?;
        let mut summary = SaveSummary::default();
        for persistent in self.persistents() {
            persistent.save(self.store())?;
            summary.rooms += 1;
        }
        for connection in self.connections() {
            connection.save(self.store())?;
            summary.connections += 1;
        }
        info!(
            "saved {} room(s) and {} connection(s)",
            summary.rooms, summary.connections
        );
        Ok(summary)
    }

    /// Resume the saved clock, then load every room in the room set, then
    /// every connection. A record that is absent or malformed is skipped; the
    /// rest still load.
    pub fn restore(self: &Arc<Self>) -> Result<RestoreSummary, WorldError> {
        self.restore_clock()?;
        let mut summary = RestoreSummary::default();
        for id in self.store.global_set(ROOM_KIND)? {
            match Room::load(self, id) {
                Ok(Some(_)) => summary.rooms += 1,
                Ok(None) => summary.missing += 1,
                Err(e) => {
                    warn!("room {} could not be restored: {}", id, e);
                    summary.failed += 1;
                }
            }
        }
        for id in self.store.global_set(CONNECTION_KIND)? {
            match Connection::load(self, id) {
                Ok(Some(_)) => summary.connections += 1,
                Ok(None) => summary.missing += 1,
                Err(e) => {
                    warn!("connection {} could not be restored: {}", id, e);
                    summary.failed += 1;
                }
            }
        }
        info!(
            "restored {} room(s), {} connection(s) ({} missing, {} failed)",
            summary.rooms, summary.connections, summary.missing, summary.failed
        );
        Ok(summary)
    }

    fn save_clock(&self) -> Result<(), WorldError> {
        let mut values = FieldMap::new();
        values.insert(ID_FIELD.to_string(), FieldValue::Id(CLOCK_RECORD_ID));
        values.insert("now".to_string(), FieldValue::Int(self.now()));
        self.store.save_structure(CLOCK_KIND, &values)?;
        Ok(())
    }

    fn restore_clock(&self) -> Result<(), WorldError> {
        let key = record_key(CLOCK_KIND, CLOCK_RECORD_ID);
        let Some(map) = self.store.load_structure(CLOCK_FIELDS, &key)? else {
            debug!("no saved clock, starting at tick {}", self.now());
            return Ok(());
        };
        let saved = Fields::new(&key, &map).int("now")?;
        self.advance_clock_to(saved);
        info!("world clock resumed at tick {}", self.now());
        Ok(())
    }

    /// Last tick delivered by the clock.
    pub fn now(&self) -> Tick {
        self.clock.load(Ordering::Acquire)
    }

    /// Move the clock forward to `at` without delivering a tick. Never moves
    /// it back.
    pub(crate) fn advance_clock_to(&self, at: Tick) {
        self.clock.fetch_max(at, Ordering::AcqRel);
    }

    /// Deliver one tick to every registered time-aware entity. Ticks are
    /// refused once the world is shutting down.
    pub async fn deliver_tick(&self, now: Tick) -> TickReport {
        if self.is_shut_down() {
            return TickReport {
                now,
                ..TickReport::default()
            };
        }
        self.advance_clock_to(now);
        self.listeners.deliver(now, self.config.tick_delivery).await
    }

    pub fn start_clock(self: &Arc<Self>) {
        let handle = spawn_clock(
            self.clone(),
            self.config.clock_interval(),
            self.config.ticks_per_interval,
        );
        self.track_task(handle);
        info!(
            "world clock started: {} tick(s) every {:?} ({:?} delivery)",
            self.config.ticks_per_interval,
            self.config.clock_interval(),
            self.config.tick_delivery
        );
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub(crate) fn track_task(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Stop every loop: no new actions or ticks are accepted, queued actions
    /// and stimuli are drained, then all tasks are awaited.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles = std::mem::take(&mut *lock(&self.tasks));
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("world task ended abnormally: {}", e);
            }
        }
        debug!("world shut down ({} task(s) joined)", count);
    }
}
