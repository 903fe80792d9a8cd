//! A small starter world: an orchard, a cottage and its loft.

use std::sync::Arc;

use log::info;

use crate::world::errors::WorldError;
use crate::world::exits::{connect_east_west, connect_up_down, Connection};
use crate::world::flora::{Flora, FloraKind};
use crate::world::room::Room;
use crate::world::state::World;

pub const ORCHARD_TEXT: &str = "An overgrown orchard. Gnarled trees lean over soft, fruit-strewn grass.";
pub const COTTAGE_TEXT: &str = "A low stone cottage, warm and smelling of woodsmoke.";
pub const LOFT_TEXT: &str = "A cramped loft under the thatch, stacked with drying apples.";

pub struct DemoWorld {
    pub orchard: Arc<Room>,
    pub cottage: Arc<Room>,
    pub loft: Arc<Room>,
    pub paths: Vec<Arc<Connection>>,
    pub apple: Arc<Flora>,
}

/// Orchard -east/west- Cottage -up/down- Loft, with an apple in the orchard.
pub fn seed_demo_world(world: &Arc<World>) -> Result<DemoWorld, WorldError> {
    let orchard = Room::new(world, ORCHARD_TEXT);
    let cottage = Room::new(world, COTTAGE_TEXT);
    let loft = Room::new(world, LOFT_TEXT);
    let paths = vec![
        connect_east_west(&orchard, &cottage),
        connect_up_down(&cottage, &loft),
    ];
    let apple = Flora::spawn_into(&orchard, FloraKind::Fruit, "apple")?;
    info!(
        "seeded demo world: {} rooms, {} connections",
        world.rooms().len(),
        world.connections().len()
    );
    Ok(DemoWorld {
        orchard,
        cottage,
        loft,
        paths,
        apple,
    })
}
