//! Per-vehicle localization: path buffers, lane changes, and the stage that
//! drives them.

pub mod arbiter;
pub mod buffer;
pub mod directory;
pub mod frames;
pub mod neighborhood;
pub mod platform;
pub mod registry;
pub mod stage;

/// Identity of a vehicle actor on the simulation platform.
pub type ActorId = u32;
