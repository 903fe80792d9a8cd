//! Live world core: rooms, exits, the world clock and persistence.

pub mod capability;
pub mod clock;
pub mod errors;
pub mod exits;
pub mod flora;
pub mod lifecycle;
pub mod persist;
pub mod room;
pub mod seed;
pub mod state;
pub mod storage;
pub mod types;

pub use capability::{Capabilities, Capability, ChannelPerceiver, Perceiver, Persister, Physical};
pub use clock::{TickDelivery, TickReport, TimeListeners};
pub use errors::WorldError;
pub use exits::{
    connect, connect_east_west, connect_named, connect_north_south, connect_up_down, Connection,
    ExitPair, ExitRecord, Side,
};
pub use flora::{Flora, FloraKind};
pub use lifecycle::{spawn_time_aware, LifeStage, Lifecycle, StageTable, TimeAware, Transition};
pub use persist::{FieldMap, FieldValue, PersistedId, PersistedRef, StructureStore};
pub use room::{BoxedAction, InterObjectAction, Room};
pub use seed::{seed_demo_world, DemoWorld};
pub use state::{RestoreSummary, SaveSummary, World};
pub use storage::{SledStructureStore, SledStructureStoreBuilder};
pub use types::{EntityId, Player, Stimulus, Tick};
