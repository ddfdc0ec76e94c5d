//! Game simulation modules

pub mod combat;
pub mod map;
pub mod physics;
pub mod scheduler;
pub mod snapshot;
pub mod vehicle;
pub mod world;

pub use map::{Grid, MapGenerator, MapParams};
pub use world::{World, WorldError, WorldRules};
