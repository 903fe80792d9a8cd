//! # mudcore - Live-World Simulation Core for a Text MUD
//!
//! mudcore runs the part of a multi-user dungeon that keeps living while
//! nobody types: rooms that execute actions and broadcast what happens in
//! them, named exits between rooms, a world clock that ages fruit and plants,
//! and a structure store that saves and reloads the whole graph.
//!
//! ## Features
//!
//! - **Room Actors**: Each room drains its own bounded action queue in order and fans stimuli out to its perceivers.
//! - **Capabilities**: Entities declare whether they are physical, persistent or perceivers; rooms register them accordingly.
//! - **Exits**: Bidirectional connections with paired names (east/west, north/south, up/down).
//! - **World Clock**: Periodic logical ticks delivered to every time-aware entity, blocking or skipping stalled ones.
//! - **Persistence**: Sled-backed structure store with typed loaders per kind tag.
//! - **Graceful Shutdown**: Queued actions and stimuli are drained before the world stops.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mudcore::config::Config;
//! use mudcore::world::{seed_demo_world, SledStructureStore, World};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = SledStructureStore::open(&config.storage.data_dir)?;
//!     let world = World::new(config.world.clone(), Arc::new(store));
//!
//!     if world.restore()?.rooms == 0 {
//!         seed_demo_world(&world)?;
//!     }
//!     world.start_clock();
//!     tokio::signal::ctrl_c().await?;
//!     world.shutdown().await;
//!     world.save_all()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`world`] - Rooms, exits, clock, lifecycles, flora and persistence
//! - [`config`] - Configuration management and validation
//! - [`metrics`] - Process-wide counters
//! - [`logutil`] - Single-line log sanitizing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   World Clock   │ ← ticks every clock_interval_ms
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Time-aware     │ ← fruit, plants
//! │  entities       │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Room actors    │ ← action queue + broadcast loop
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Structure store │ ← sled
//! └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod world;
