//! vgrid-master: the vgrid control plane.
//!
//! [`MasterService`] owns every admin operation. Each one takes the named
//! lock of the resource it changes, reads and validates metadata, asks the
//! planner for replica sets, drives data nodes over RPC, waits for the
//! nodes to confirm through the metadata store, and writes the final state.
//!
//! # Architecture
//!
//! ```text
//!                        MasterService
//!   ┌──────────┬──────────┬───────────┬──────────┬───────────┐
//!   │ db       │ space    │ scale     │ member   │ cluster   │
//!   │ create   │ create   │ scale-out │ change   │ stats     │
//!   │ delete   │ update   │ ranges    │ replica  │ engine cfg│
//!   │ servers  │ delete   │           │ recover  │ describe  │
//!   └────┬─────┴────┬─────┴─────┬─────┴────┬─────┴─────┬─────┘
//!        │          │  Planner  │          │           │
//!        │          └─────┬─────┘          │           │
//!        ▼                ▼                ▼           ▼
//!   MetaClient      fan-out + poll   PartitionServerClient
//!   (locks, txn)    (JoinSet, mpsc)  (create/change/delete)
//! ```
//!
//! [`FailServerWatcher`] runs beside the service and keeps the fail-server
//! worklist current.

pub mod cluster;
pub mod db;
pub mod error;
pub mod fail_server;
pub mod fanout;
pub mod member;
pub mod principal;
pub mod scale;
pub mod service;
pub mod space;

pub use error::{ErrorCode, MasterError, MasterResult};
pub use fail_server::FailServerWatcher;
pub use principal::{PrivilegeChange, RoleCache, password_digest};
pub use scale::RuleChange;
pub use service::MasterService;
pub use space::SpaceUpdate;
