//! vgrid-node: the data-node side of cluster membership.
//!
//! # Architecture
//!
//! ```text
//! HeartbeatAgent
//!   ├── purge_orphans   local partitions vs. partition records
//!   ├── register        grant lease → put server → keep_alive
//!   └── run loop
//!       ├── every refresh interval: PeerResolver::refresh, republish on change
//!       └── keep-alive closed: wait reconnect delay, register again
//! ```
//!
//! [`LocalPartitions`] abstracts the node's partition storage;
//! [`DataDirPartitions`] reads partition directories under a data root.

pub mod agent;
pub mod error;
pub mod local;
pub mod resolver;

pub use agent::{AgentSettings, HeartbeatAgent, server_descriptor};
pub use error::{AgentError, AgentResult};
pub use local::{DataDirPartitions, LocalPartitions};
pub use resolver::PeerResolver;
