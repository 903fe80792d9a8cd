/// Integration tests for connections and the exit records they create.
mod common;

use std::sync::Arc;

use mudcore::world::{
    connect, connect_east_west, connect_named, connect_north_south, connect_up_down, ExitPair,
    Room, Side,
};

#[tokio::test]
async fn connect_gives_each_room_its_side() {
    let world = common::temp_world();
    let orchard = Room::new(&world, "Orchard");
    let cottage = Room::new(&world, "Cottage");

    let path = connect_east_west(&orchard, &cottage);

    assert_eq!(orchard.exit_names(), vec!["east"]);
    assert_eq!(cottage.exit_names(), vec!["west"]);
    assert_eq!(path.a_exit_name(), "east");
    assert_eq!(path.b_exit_name(), "west");
    assert_eq!(world.connections().len(), 1);

    let from_orchard = &orchard.exits()[0];
    assert_eq!(from_orchard.side(), Side::A);
    assert!(Arc::ptr_eq(&from_orchard.other_side().unwrap(), &cottage));
    let from_cottage = &cottage.exits()[0];
    assert_eq!(from_cottage.side(), Side::B);
    assert!(Arc::ptr_eq(&from_cottage.other_side().unwrap(), &orchard));
    assert!(Arc::ptr_eq(from_orchard.connection(), from_cottage.connection()));
}

#[tokio::test]
async fn exits_keep_creation_order() {
    let world = common::temp_world();
    let orchard = Room::new(&world, "Orchard");
    let cottage = Room::new(&world, "Cottage");
    let loft = Room::new(&world, "Loft");
    let well = Room::new(&world, "Well");

    connect_east_west(&orchard, &cottage);
    connect_up_down(&cottage, &loft);
    connect_north_south(&well, &cottage);

    assert_eq!(cottage.exit_names(), vec!["west", "up", "south"]);
    assert_eq!(cottage.describe_exits(), "Exits: west, up, south\n");
    assert_eq!(loft.exit_names(), vec!["down"]);
    assert_eq!(world.connections().len(), 3);
}

#[tokio::test]
async fn custom_exit_names() {
    let world = common::temp_world();
    let tower = Room::new(&world, "Tower");
    let void = Room::new(&world, "Void");

    connect_named("portal", "rift", &tower, &void);
    connect(
        ExitPair {
            a: "ladder",
            b: "hatch",
        },
        &tower,
        &void,
    );

    assert_eq!(tower.exit_names(), vec!["portal", "ladder"]);
    assert_eq!(void.exit_names(), vec!["rift", "hatch"]);
    let landing = void.with_exit(
        "hatch",
        |exit| exit.other_side().map(|r| r.text().to_string()),
        || None,
    );
    assert_eq!(landing.as_deref(), Some("Tower"));
}
