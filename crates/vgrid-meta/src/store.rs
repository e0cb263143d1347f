//! The `MetadataStore` abstraction.
//!
//! Every control-plane component talks to cluster metadata through this
//! trait: plain KV access, compare-and-set transactions, advisory locks with
//! a TTL, id sequences, leases with keep-alive, and quorum membership.
//! [`crate::RedbMetaStore`] is the embedded implementation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MetaResult;
use crate::types::StoreMember;

/// Identifier of a granted lease.
pub type LeaseId = i64;

/// A guard evaluated before a transaction's operations are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// The key must not exist.
    Absent(String),
    /// The key must exist.
    Present(String),
    /// The key must exist and hold exactly this value.
    Value(String, Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// All-or-nothing transaction: if every compare holds, every op is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub compares: Vec<Compare>,
    pub ops: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compare: Compare) -> Self {
        self.compares.push(compare);
        self
    }

    pub fn put(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.ops.push(TxnOp::Put(key.into(), value));
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(TxnOp::Delete(key.into()));
        self
    }
}

/// Transactional KV store holding all cluster metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> MetaResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8]) -> MetaResult<()>;

    /// Delete a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> MetaResult<bool>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn prefix_scan(&self, prefix: &str) -> MetaResult<Vec<(String, Vec<u8>)>>;

    /// Insert a key that must not exist yet.
    async fn create(&self, key: &str, value: &[u8]) -> MetaResult<()>;

    /// Overwrite a key that must already exist.
    async fn update(&self, key: &str, value: &[u8]) -> MetaResult<()>;

    /// Apply `txn` atomically. Returns false (and applies nothing) if a compare fails.
    async fn txn(&self, txn: Txn) -> MetaResult<bool>;

    /// Take the advisory lock `key` for `owner`. Returns false if another
    /// owner holds an unexpired lock.
    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> MetaResult<bool>;

    /// Release `key` if `owner` holds it.
    async fn unlock(&self, key: &str, owner: &str) -> MetaResult<()>;

    /// Next value of the named id sequence. Ids start at 1.
    async fn new_id(&self, seq: &str, timeout: Duration) -> MetaResult<u64>;

    async fn grant_lease(&self, ttl: Duration) -> MetaResult<LeaseId>;

    /// Write a key bound to a lease; it disappears when the lease expires.
    async fn put_with_lease(&self, key: &str, value: &[u8], lease: LeaseId) -> MetaResult<()>;

    /// Keep a lease alive. The receiver yields on every renewal and closes
    /// once the lease is gone.
    async fn keep_alive(&self, lease: LeaseId) -> MetaResult<mpsc::Receiver<LeaseId>>;

    /// Revoke a lease and delete every key bound to it.
    async fn revoke_lease(&self, lease: LeaseId) -> MetaResult<()>;

    async fn member_list(&self) -> MetaResult<Vec<StoreMember>>;

    async fn member_add(&self, name: &str, peer_urls: Vec<String>) -> MetaResult<StoreMember>;

    /// Remove a member. Returns false if it was not a member.
    async fn member_remove(&self, id: u64) -> MetaResult<bool>;
}
