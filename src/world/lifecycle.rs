//! Forward-only aging state machine for time-aware entities.
//!
//! A time-aware entity owns a [`Lifecycle`]: an ordered [`StageTable`], the
//! current stage, the tick of the last change and a one-shot completion flag.
//! On each tick `now` the entity ages when `now > last_change + delay`.
//! Aging from a non-terminal stage moves to the next ordinal; aging in the
//! terminal stage runs the entity's completion side effect, once.

use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::mpsc;

use crate::metrics;
use crate::world::errors::WorldError;
use crate::world::state::{wait_for_shutdown, World};
use crate::world::types::{EntityId, Tick};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifeStage {
    pub ordinal: u32,
    pub name: String,
    /// Ticks to wait before advancing; `<= 0` marks the terminal stage.
    pub advance_delay_ticks: i64,
}

impl LifeStage {
    pub fn new(ordinal: u32, name: impl Into<String>, advance_delay_ticks: i64) -> Self {
        Self {
            ordinal,
            name: name.into(),
            advance_delay_ticks,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.advance_delay_ticks <= 0
    }
}

/// Validated stage sequence: ordinals `0, 1, 2, ...` and exactly one
/// terminal stage, the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTable {
    stages: Vec<LifeStage>,
}

impl StageTable {
    pub fn new(stages: Vec<LifeStage>) -> Result<Self, WorldError> {
        if stages.is_empty() {
            return Err(WorldError::InvalidStages("no stages".into()));
        }
        let last = stages.len() - 1;
        for (position, stage) in stages.iter().enumerate() {
            if stage.ordinal as usize != position {
                return Err(WorldError::InvalidStages(format!(
                    "stage '{}' has ordinal {}, expected {}",
                    stage.name, stage.ordinal, position
                )));
            }
            if stage.is_terminal() != (position == last) {
                return Err(WorldError::InvalidStages(format!(
                    "stage '{}' at {} {} terminal",
                    stage.name,
                    position,
                    if stage.is_terminal() { "is" } else { "is not" }
                )));
            }
        }
        Ok(Self { stages })
    }

    /// Build from `(name, delay)` pairs, numbering ordinals in order.
    pub fn sequence(stages: &[(&str, i64)]) -> Result<Self, WorldError> {
        Self::new(
            stages
                .iter()
                .zip(0u32..)
                .map(|((name, delay), ordinal)| LifeStage::new(ordinal, *name, *delay))
                .collect(),
        )
    }

    pub fn get(&self, ordinal: u32) -> Option<&LifeStage> {
        self.stages.get(ordinal as usize)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Idle,
    Advanced { from: u32, to: u32 },
    Completed,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    stages: Arc<StageTable>,
    current: u32,
    last_change: Tick,
    one_shot_done: bool,
}

impl Lifecycle {
    pub fn new(stages: Arc<StageTable>, born_at: Tick) -> Self {
        Self {
            stages,
            current: 0,
            last_change: born_at,
            one_shot_done: false,
        }
    }

    pub fn restore(
        stages: Arc<StageTable>,
        current: u32,
        last_change: Tick,
        one_shot_done: bool,
    ) -> Result<Self, WorldError> {
        if stages.get(current).is_none() {
            return Err(WorldError::InvalidStages(format!(
                "stage ordinal {} out of range (0..{})",
                current,
                stages.len()
            )));
        }
        Ok(Self {
            stages,
            current,
            last_change,
            one_shot_done,
        })
    }

    pub fn stage(&self) -> &LifeStage {
        // `current` is checked against the table on construction and only
        // ever advanced to an ordinal that exists.
        &self.stages.stages[self.current as usize]
    }

    pub fn last_change(&self) -> Tick {
        self.last_change
    }

    pub fn one_shot_done(&self) -> bool {
        self.one_shot_done
    }

    pub fn is_due(&self, now: Tick) -> bool {
        now > self
            .last_change
            .saturating_add(self.stage().advance_delay_ticks)
    }

    /// Consume one tick: age if due, otherwise nothing.
    pub fn observe(&mut self, now: Tick) -> Transition {
        if self.is_due(now) {
            self.age(now)
        } else {
            Transition::Idle
        }
    }

    pub fn age(&mut self, now: Tick) -> Transition {
        if !self.stage().is_terminal() {
            let from = self.current;
            if self.stages.get(from + 1).is_none() {
                return Transition::Idle;
            }
            self.current = from + 1;
            self.last_change = now;
            Transition::Advanced {
                from,
                to: self.current,
            }
        } else if !self.one_shot_done {
            self.one_shot_done = true;
            Transition::Completed
        } else {
            Transition::Idle
        }
    }
}

/// An entity driven by world clock ticks.
pub trait TimeAware: Send + Sync + 'static {
    fn entity_id(&self) -> EntityId;

    fn lifecycle(&self) -> &Mutex<Lifecycle>;

    fn on_stage_advanced(&self, _stage: &LifeStage, _now: Tick) {}

    /// Terminal side effect. Runs at most once per entity.
    fn on_complete(&self, now: Tick);
}

/// Apply one tick to `entity`, running its hooks outside the lifecycle lock.
pub fn observe_tick<E: TimeAware + ?Sized>(entity: &E, now: Tick) -> Transition {
    let (transition, stage) = {
        let mut lifecycle = entity
            .lifecycle()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let transition = lifecycle.observe(now);
        (transition, lifecycle.stage().clone())
    };
    match &transition {
        Transition::Advanced { .. } => {
            metrics::inc_stage_advances();
            debug!(
                "entity {} aged to stage {} '{}' at tick {}",
                entity.entity_id(),
                stage.ordinal,
                stage.name,
                now
            );
            entity.on_stage_advanced(&stage, now);
        }
        Transition::Completed => {
            metrics::inc_completions();
            debug!("entity {} completed at tick {}", entity.entity_id(), now);
            entity.on_complete(now);
        }
        Transition::Idle => {}
    }
    transition
}

/// Register `entity` with the world clock and start its tick consumption loop.
///
/// The loop ends, and the entity leaves the clock, once its one-shot has
/// fired. An entity restored with its one-shot already done is not
/// registered at all.
pub fn spawn_time_aware<E: TimeAware>(world: &Arc<World>, entity: Arc<E>) {
    let id = entity.entity_id();
    let spent = entity
        .lifecycle()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .one_shot_done();
    if spent {
        debug!("entity {} already completed, not subscribing to ticks", id);
        return;
    }
    let (tx, mut rx) = mpsc::channel::<Tick>(world.config().tick_channel_capacity.max(1));
    world.time_listeners().register(id, tx);
    let weak_world = Arc::downgrade(world);
    let mut shutdown = world.shutdown_signal();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                tick = rx.recv() => match tick {
                    Some(now) => {
                        if observe_tick(entity.as_ref(), now) == Transition::Completed {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        rx.close();
        if let Some(world) = weak_world.upgrade() {
            world.time_listeners().unregister(id);
        }
        debug!("tick loop for entity {} stopped", id);
    });
    world.track_task(handle);
}
