//! Test utilities & fixtures.
//! Worlds backed by throwaway sled stores, plus small polling helpers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mudcore::config::WorldConfig;
use mudcore::world::{SledStructureStore, World};

/// A world over a temporary in-memory store with default settings.
#[allow(dead_code)]
pub fn temp_world() -> Arc<World> {
    temp_world_with(WorldConfig::default())
}

#[allow(dead_code)]
pub fn temp_world_with(config: WorldConfig) -> Arc<World> {
    World::new(config, temp_store())
}

#[allow(dead_code)]
pub fn temp_store() -> Arc<SledStructureStore> {
    Arc::new(SledStructureStore::temporary().expect("temporary store"))
}

/// Poll `check` until it holds, panicking after two seconds.
#[allow(dead_code)]
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

/// Await `fut` with a two second ceiling.
#[allow(dead_code)]
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}
