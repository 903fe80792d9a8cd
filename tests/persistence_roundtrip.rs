/// Integration tests for saving and reloading rooms, connections and their
/// persisted children through the sled structure store.
mod common;

use std::sync::Arc;

use mudcore::config::WorldConfig;
use mudcore::world::persist::{FieldMap, FieldValue, PersistedRef, StructureStore};
use mudcore::world::{
    connect_east_west, Flora, FloraKind, Persister, Physical, Room, World, WorldError,
};

fn world_over(store: &Arc<mudcore::world::SledStructureStore>) -> Arc<World> {
    World::new(WorldConfig::default(), store.clone())
}

fn room_by_text(world: &World, text: &str) -> Arc<Room> {
    world
        .rooms()
        .into_iter()
        .find(|room| room.text() == text)
        .unwrap_or_else(|| panic!("room '{}' not loaded", text))
}

#[tokio::test]
async fn room_round_trips_through_the_store() {
    let store = common::temp_store();
    let first = world_over(&store);
    let room = Room::new(&first, "T");
    assert_eq!(room.persisted_id(), 0);

    let saved = room.save(store.as_ref()).unwrap();
    assert_eq!(saved.kind, "room");
    assert_ne!(saved.id, 0);
    first.shutdown().await;

    let second = world_over(&store);
    let loaded = Room::load(&second, saved.id).unwrap().expect("room exists");
    assert_eq!(loaded.text(), "T");
    assert_eq!(loaded.persisted_id(), saved.id);
    assert!(loaded.persistents().is_empty());

    let again = Room::load(&second, saved.id).unwrap().unwrap();
    assert!(Arc::ptr_eq(&loaded, &again));
    assert_eq!(second.rooms().len(), 1);
}

#[tokio::test]
async fn saving_twice_keeps_one_id() {
    let store = common::temp_store();
    let world = world_over(&store);
    let room = Room::new(&world, "Twice");

    let first = room.save(store.as_ref()).unwrap();
    let second = room.save(store.as_ref()).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.global_set("room").unwrap(), vec![first.id]);
    assert_eq!(store.count_kind("room"), 1);
}

#[tokio::test]
async fn absent_room_loads_as_none() {
    let world = common::temp_world();
    assert!(Room::load(&world, 4242).unwrap().is_none());
    assert!(world.rooms().is_empty());
}

#[tokio::test]
async fn connections_regenerate_exit_records() {
    let store = common::temp_store();
    let first = world_over(&store);
    let a = Room::new(&first, "A");
    let b = Room::new(&first, "B");
    connect_east_west(&a, &b);
    let saved = first.save_all().unwrap();
    assert_eq!((saved.rooms, saved.connections), (2, 1));
    first.shutdown().await;

    let second = world_over(&store);
    let restored = second.restore().unwrap();
    assert_eq!((restored.rooms, restored.connections), (2, 1));
    assert_eq!((restored.missing, restored.failed), (0, 0));

    let a = room_by_text(&second, "A");
    let b = room_by_text(&second, "B");
    assert_eq!(a.exit_names(), vec!["east"]);
    assert_eq!(b.exit_names(), vec!["west"]);
    let across = a.with_exit("east", |exit| exit.other_side(), || None).unwrap();
    assert!(Arc::ptr_eq(&across, &b));

    // Saving the reloaded world reuses every id.
    second.save_all().unwrap();
    assert_eq!(store.count_kind("room"), 2);
    assert_eq!(store.count_kind("connection"), 1);
}

#[tokio::test]
async fn persisted_children_come_back() {
    let store = common::temp_store();
    let first = world_over(&store);
    let orchard = Room::new(&first, "Orchard");
    let apple = Flora::spawn_into(&orchard, FloraKind::Fruit, "apple").unwrap();
    first.deliver_tick(10_001).await;
    common::eventually("apple to ripen", || apple.stage_name() == "ripe").await;
    first.save_all().unwrap();
    first.shutdown().await;

    let second = world_over(&store);
    second.restore().unwrap();
    let orchard = room_by_text(&second, "Orchard");
    let objects = orchard.physical_objects();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].description(), "A(n) ripe apple");
    assert!(Arc::ptr_eq(&objects[0].room().unwrap(), &orchard));
    assert_eq!(orchard.persistents().len(), 1);
    assert_eq!(second.time_listeners().len(), 1);
}

#[tokio::test]
async fn malformed_room_fails_only_its_own_load() {
    let store = common::temp_store();
    let world = world_over(&store);
    Room::new(&world, "Good").save(store.as_ref()).unwrap();

    let mut broken = FieldMap::new();
    broken.insert("persisters".into(), FieldValue::Refs(Vec::new()));
    let broken_id = store.save_structure("room", &broken).unwrap();
    store.add_to_global_set("room", broken_id).unwrap();
    world.shutdown().await;

    let fresh = world_over(&store);
    match Room::load(&fresh, broken_id) {
        Err(WorldError::MalformedRecord { key, field }) => {
            assert_eq!(key, format!("room:{}", broken_id));
            assert_eq!(field, "text");
        }
        other => panic!("expected malformed record, got {:?}", other.map(|r| r.is_some())),
    }

    let restored = fresh.restore().unwrap();
    assert_eq!(restored.rooms, 1);
    assert_eq!(restored.failed, 1);
    assert_eq!(fresh.rooms().len(), 1);
}

#[tokio::test]
async fn unknown_and_missing_children_are_skipped() {
    let store = common::temp_store();
    let mut values = FieldMap::new();
    values.insert("text".into(), FieldValue::Text("Haunted".into()));
    values.insert(
        "persisters".into(),
        FieldValue::Refs(vec![
            PersistedRef::new("ghost", 5),
            PersistedRef::new("fruit", 999),
        ]),
    );
    let id = store.save_structure("room", &values).unwrap();

    let world = world_over(&store);
    let room = Room::load(&world, id).unwrap().expect("room still loads");
    assert_eq!(room.text(), "Haunted");
    assert!(room.persistents().is_empty());
    assert!(room.physical_objects().is_empty());
}

#[tokio::test]
async fn clock_resumes_after_restart() {
    let store = common::temp_store();
    let first = world_over(&store);
    first.deliver_tick(1_000_000).await;
    let orchard = Room::new(&first, "Orchard");
    Flora::spawn_into(&orchard, FloraKind::Fruit, "apple").unwrap();
    first.save_all().unwrap();
    first.shutdown().await;

    let second = world_over(&store);
    assert_eq!(second.now(), 0);
    second.restore().unwrap();
    assert_eq!(second.now(), 1_000_000);

    // One underripe stage (10000 ticks) later on the resumed timeline.
    second.deliver_tick(second.now() + 10_001).await;
    let orchard = room_by_text(&second, "Orchard");
    common::eventually("restored apple to ripen", || {
        orchard
            .physical_objects()
            .first()
            .is_some_and(|apple| apple.description() == "A(n) ripe apple")
    })
    .await;
}

#[tokio::test]
async fn restored_flora_never_sit_ahead_of_the_clock() {
    let store = common::temp_store();
    let first = world_over(&store);
    first.deliver_tick(500_000).await;
    let orchard = Room::new(&first, "Orchard");
    Flora::spawn_into(&orchard, FloraKind::Fruit, "apple").unwrap();
    // Saving the room alone writes no clock record.
    orchard.save(store.as_ref()).unwrap();
    first.shutdown().await;

    let second = world_over(&store);
    second.restore().unwrap();
    assert_eq!(second.now(), 500_000);
}

#[tokio::test]
async fn a_grown_tree_reloads_without_a_tick_loop() {
    let store = common::temp_store();
    let first = world_over(&store);
    let orchard = Room::new(&first, "Orchard");
    let plant = Flora::spawn_into(&orchard, FloraKind::Plant, "pear").unwrap();
    // sprout 20000, sapling 40000, then the tree bears its fruit
    for now in [20_001, 60_002, 60_003] {
        first.deliver_tick(now).await;
    }
    common::eventually("tree to bear fruit", || plant.is_done()).await;
    common::eventually("fruit to appear", || orchard.physical_objects().len() == 2).await;
    first.save_all().unwrap();
    first.shutdown().await;

    let second = world_over(&store);
    second.restore().unwrap();
    let orchard = room_by_text(&second, "Orchard");
    let mut seen: Vec<String> = orchard
        .physical_objects()
        .iter()
        .map(|obj| obj.description())
        .collect();
    seen.sort();
    assert_eq!(seen, vec!["A(n) tree pear plant", "A(n) underripe pear"]);
    // Only the fruit still ages.
    assert_eq!(second.time_listeners().len(), 1);
}
