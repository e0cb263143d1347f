//! vgrid-meta: cluster metadata for vgrid.
//!
//! Holds the entity model (databases, spaces, partitions, servers, and the
//! catalog records), the key layout under which they are stored, and the
//! [`MetadataStore`] trait every control-plane component is written against.
//!
//! # Architecture
//!
//! ```text
//!   MetaClient (typed records)      DistributedLock (named TTL locks)
//!            │                                │
//!            └──────────────┬─────────────────┘
//!                           ▼
//!                 Arc<dyn MetadataStore>
//!                           │
//!                           ▼
//!                    RedbMetaStore
//!        kv · locks · sequences · leased · members
//! ```
//!
//! `RedbMetaStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod client;
pub mod error;
pub mod keys;
pub mod lock;
pub mod redb_store;
pub mod store;
pub mod tables;
pub mod types;

pub use client::{MetaClient, to_json};
pub use error::{MetaError, MetaResult};
pub use lock::{DistributedLock, LockGuard};
pub use redb_store::RedbMetaStore;
pub use store::{Compare, LeaseId, MetadataStore, Txn, TxnOp};
pub use types::*;
