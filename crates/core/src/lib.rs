#![warn(missing_docs)]
//! Core primitives shared across the workspace: the simulation clock, entity
//! identity minting, and the domain scalars the wire codec carries.

pub mod clock;
pub mod identity;
pub mod types;

// Re-export commonly used types
pub use clock::{
    duration_to_ticks, seconds_to_ticks, ticks_to_duration, GameClock, ServerTimestamp, SimTick,
    TICKS_PER_SECOND, TICK_INTERVAL, TICK_INTERVAL_MS,
};
pub use identity::{
    EntityId, IdentityError, IdentityGenerator, SystemTimeSource, TimeSource, EPOCH_MS,
    MAX_SHARD_ID,
};
pub use types::{Direction, InvalidDirection, Position2, Position3, Rgba};
