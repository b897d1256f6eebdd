//! Storage layer for escalation policies, directory data and run state.

mod file;
mod memory;
mod traits;

pub use file::{FileStateStore, DEFAULT_RETENTION};
pub use memory::{Catalog, MemoryStore};
pub use traits::{
    AlertStore, EventStore, PolicyStore, ScheduleResolver, StoreResult, TeamStore, UserDirectory,
};

#[cfg(test)]
pub use traits::{MockScheduleResolver, MockTeamStore, MockUserDirectory};
