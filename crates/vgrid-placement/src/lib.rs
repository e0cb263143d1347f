//! vgrid replica placement.
//!
//! Pure planning logic: the master gathers servers, load, and liveness from
//! the metadata store and the data plane, then asks this crate where each
//! replica goes. Nothing here performs I/O.
//!
//! # Components
//!
//! - **`convert`**: eligible-server filtering, replica load, anti-affinity keys
//! - **`planner`**: load-ordered greedy selection per partition and per batch
//! - **`replica`**: change-set planning for bulk replica-count changes
//! - **`slots`**: uniform slot layout over the 32-bit key space

pub mod convert;
pub mod error;
pub mod planner;
pub mod replica;
pub mod slots;

pub use convert::{eligible_servers, replica_load, to_candidates, zone_key};
pub use error::{PlacementError, PlacementResult};
pub use planner::{Assignment, Candidate, Planner};
pub use replica::{ServerLoad, plan_replica_change};
pub use slots::{assign_slots, slot_width, uniform_slots};
