//! vgrid-health: cluster health aggregation.
//!
//! # Architecture
//!
//! ```text
//! HealthAggregator
//!   ├── describe_cluster → DbInfo per database      (max of spaces)
//!   ├── describe_db      → SpaceInfo per space      (max of partitions)
//!   └── describe_space
//!       ├── partition count vs. declared count
//!       ├── partition record + leader server lookup
//!       ├── PartitionInfo RPC to the leader
//!       └── evaluate_status() → green / yellow / red
//! ```

pub mod aggregator;
pub mod evaluate;
pub mod status;

pub use aggregator::{HealthAggregator, HealthError, HealthResult};
pub use evaluate::{Verdict, check_partition_count, evaluate_status};
pub use status::{ClusterInfo, DbInfo, HealthLevel, PartitionInfo, SpaceInfo};
