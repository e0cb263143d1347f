//! RedbMetaStore: embedded `MetadataStore` backed by redb.
//!
//! Values are opaque bytes in the `kv` table. Locks, sequences, and quorum
//! members live in their own tables. Leases are held in memory: an expired
//! lease is reaped lazily on the next store access, deleting its keys.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{MetaError, MetaResult};
use crate::store::{Compare, LeaseId, MetadataStore, Txn, TxnOp};
use crate::tables::*;
use crate::types::StoreMember;

/// Convert any `Display` error into a `MetaError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| MetaError::$variant(e.to_string())
    };
}

fn poison_err<T>(_: PoisonError<T>) -> MetaError {
    MetaError::Poisoned
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    owner: String,
    expires_at_ms: u64,
}

struct LeaseEntry {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
}

#[derive(Default)]
struct Leases {
    next: LeaseId,
    entries: HashMap<LeaseId, LeaseEntry>,
}

/// Thread-safe metadata store backed by redb.
#[derive(Clone)]
pub struct RedbMetaStore {
    db: Arc<Database>,
    leases: Arc<Mutex<Leases>>,
}

impl RedbMetaStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> MetaResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "metadata store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and standalone mode).
    pub fn open_in_memory() -> MetaResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory metadata store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> MetaResult<Self> {
        let store = Self {
            db: Arc::new(db),
            leases: Arc::new(Mutex::new(Leases {
                next: 1,
                entries: HashMap::new(),
            })),
        };
        store.ensure_tables()?;
        store.purge_stale_leased_keys()?;
        store.seed_members()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> MetaResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.open_table(LOCKS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.open_table(LEASED).map_err(map_err!(Table))?;
        txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Keys written under a lease by a previous process have no live lease.
    fn purge_stale_leased_keys(&self) -> MetaResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let purged;
        {
            let mut leased = txn.open_table(LEASED).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in leased.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                keys.push(key.value().to_string());
            }
            let mut kv = txn.open_table(KV).map_err(map_err!(Table))?;
            for key in &keys {
                kv.remove(key.as_str()).map_err(map_err!(Write))?;
                leased.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            purged = keys.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if purged > 0 {
            debug!(purged, "stale leased keys removed");
        }
        Ok(())
    }

    fn seed_members(&self) -> MetaResult<()> {
        if !self.read_members()?.is_empty() {
            return Ok(());
        }
        let member = StoreMember {
            id: 1,
            name: "meta-1".to_string(),
            peer_urls: Vec::new(),
        };
        self.write_member(&member)
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Drop expired leases and delete the keys bound to them.
    fn reap_expired(&self) -> MetaResult<()> {
        let now = Instant::now();
        let keys: Vec<String> = {
            let mut leases = self.leases.lock().map_err(poison_err)?;
            let expired: Vec<LeaseId> = leases
                .entries
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            let mut keys = Vec::new();
            for id in expired {
                if let Some(entry) = leases.entries.remove(&id) {
                    debug!(lease = id, keys = entry.keys.len(), "lease expired");
                    keys.extend(entry.keys);
                }
            }
            keys
        };
        if keys.is_empty() {
            return Ok(());
        }
        self.delete_leased_keys(&keys)
    }

    fn delete_leased_keys(&self, keys: &[String]) -> MetaResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut kv = txn.open_table(KV).map_err(map_err!(Table))?;
            let mut leased = txn.open_table(LEASED).map_err(map_err!(Table))?;
            for key in keys {
                kv.remove(key.as_str()).map_err(map_err!(Write))?;
                leased.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Push a lease deadline forward. Returns false if the lease is gone.
    fn renew(&self, lease: LeaseId) -> MetaResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock().map_err(poison_err)?;
        match leases.entries.get_mut(&lease) {
            Some(entry) if entry.deadline > now => {
                entry.deadline = now + entry.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ── Sequences ──────────────────────────────────────────────────

    fn next_seq(&self, seq: &str) -> MetaResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let current = match table.get(seq).map_err(map_err!(Read))? {
                Some(guard) => {
                    let bytes: [u8; 8] = guard
                        .value()
                        .try_into()
                        .map_err(|_| MetaError::Deserialize(format!("sequence {seq}")))?;
                    u64::from_be_bytes(bytes)
                }
                None => 0,
            };
            next = current + 1;
            table
                .insert(seq, next.to_be_bytes().as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    // ── Members ────────────────────────────────────────────────────

    fn read_members(&self) -> MetaResult<Vec<StoreMember>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        let mut members = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let member: StoreMember =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            members.push(member);
        }
        members.sort_by_key(|m| m.id);
        Ok(members)
    }

    fn write_member(&self, member: &StoreMember) -> MetaResult<()> {
        let key = member.id.to_string();
        let value = serde_json::to_vec(member).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read_value(&self, key: &str) -> MetaResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }
}

#[async_trait]
impl MetadataStore for RedbMetaStore {
    async fn get(&self, key: &str) -> MetaResult<Option<Vec<u8>>> {
        self.reap_expired()?;
        self.read_value(key)
    }

    async fn put(&self, key: &str, value: &[u8]) -> MetaResult<()> {
        self.reap_expired()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> MetaResult<bool> {
        self.reap_expired()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "key deleted");
        Ok(existed)
    }

    async fn prefix_scan(&self, prefix: &str) -> MetaResult<Vec<(String, Vec<u8>)>> {
        self.reap_expired()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            results.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(results)
    }

    async fn create(&self, key: &str, value: &[u8]) -> MetaResult<()> {
        let applied = self
            .txn(
                Txn::new()
                    .when(Compare::Absent(key.to_string()))
                    .put(key, value.to_vec()),
            )
            .await?;
        if !applied {
            return Err(MetaError::AlreadyExists(key.to_string()));
        }
        Ok(())
    }

    async fn update(&self, key: &str, value: &[u8]) -> MetaResult<()> {
        let applied = self
            .txn(
                Txn::new()
                    .when(Compare::Present(key.to_string()))
                    .put(key, value.to_vec()),
            )
            .await?;
        if !applied {
            return Err(MetaError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn txn(&self, txn: Txn) -> MetaResult<bool> {
        self.reap_expired()?;
        let wtxn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = wtxn.open_table(KV).map_err(map_err!(Table))?;
            for compare in &txn.compares {
                let holds = match compare {
                    Compare::Absent(key) => table.get(key.as_str()).map_err(map_err!(Read))?.is_none(),
                    Compare::Present(key) => table.get(key.as_str()).map_err(map_err!(Read))?.is_some(),
                    Compare::Value(key, expected) => table
                        .get(key.as_str())
                        .map_err(map_err!(Read))?
                        .is_some_and(|guard| guard.value() == expected.as_slice()),
                };
                if !holds {
                    debug!(?compare, "txn compare failed");
                    return Ok(false);
                }
            }
            for op in &txn.ops {
                match op {
                    TxnOp::Put(key, value) => {
                        table
                            .insert(key.as_str(), value.as_slice())
                            .map_err(map_err!(Write))?;
                    }
                    TxnOp::Delete(key) => {
                        table.remove(key.as_str()).map_err(map_err!(Write))?;
                    }
                }
            }
        }
        wtxn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> MetaResult<bool> {
        let now = epoch_ms();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let current: Option<LockRecord> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            if let Some(record) = current {
                if record.owner != owner && record.expires_at_ms > now {
                    return Ok(false);
                }
            }
            let record = LockRecord {
                owner: owner.to_string(),
                expires_at_ms: now + ttl.as_millis() as u64,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %owner, "lock acquired");
        Ok(true)
    }

    async fn unlock(&self, key: &str, owner: &str) -> MetaResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let held_by_owner = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: LockRecord =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    record.owner == owner
                }
                None => false,
            };
            if !held_by_owner {
                warn!(%key, %owner, "unlock by non-owner ignored");
                return Ok(());
            }
            table.remove(key).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %owner, "lock released");
        Ok(())
    }

    async fn new_id(&self, seq: &str, timeout: Duration) -> MetaResult<u64> {
        let store = self.clone();
        let name = seq.to_string();
        let task = tokio::task::spawn_blocking(move || store.next_seq(&name));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(MetaError::Transaction(e.to_string())),
            Err(_) => Err(MetaError::Timeout(format!("allocating {seq} id"))),
        }
    }

    async fn grant_lease(&self, ttl: Duration) -> MetaResult<LeaseId> {
        let mut leases = self.leases.lock().map_err(poison_err)?;
        let id = leases.next;
        leases.next += 1;
        leases.entries.insert(
            id,
            LeaseEntry {
                ttl,
                deadline: Instant::now() + ttl,
                keys: HashSet::new(),
            },
        );
        debug!(lease = id, ?ttl, "lease granted");
        Ok(id)
    }

    async fn put_with_lease(&self, key: &str, value: &[u8], lease: LeaseId) -> MetaResult<()> {
        self.reap_expired()?;
        {
            let mut leases = self.leases.lock().map_err(poison_err)?;
            let entry = leases
                .entries
                .get_mut(&lease)
                .ok_or(MetaError::LeaseNotFound(lease))?;
            entry.keys.insert(key.to_string());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut kv = txn.open_table(KV).map_err(map_err!(Table))?;
            kv.insert(key, value).map_err(map_err!(Write))?;
            let mut leased = txn.open_table(LEASED).map_err(map_err!(Table))?;
            leased
                .insert(key, lease.to_be_bytes().as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    async fn keep_alive(&self, lease: LeaseId) -> MetaResult<mpsc::Receiver<LeaseId>> {
        let ttl = {
            let leases = self.leases.lock().map_err(poison_err)?;
            leases
                .entries
                .get(&lease)
                .map(|e| e.ttl)
                .ok_or(MetaError::LeaseNotFound(lease))?
        };
        let interval = (ttl / 3).max(Duration::from_millis(10));
        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match store.renew(lease) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(lease, "keep-alive stopped, lease gone");
                        break;
                    }
                    Err(e) => {
                        warn!(lease, error = %e, "keep-alive renewal failed");
                        break;
                    }
                }
                match tx.try_send(lease) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
                tokio::time::sleep(interval).await;
            }
        });
        Ok(rx)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> MetaResult<()> {
        let keys: Vec<String> = {
            let mut leases = self.leases.lock().map_err(poison_err)?;
            match leases.entries.remove(&lease) {
                Some(entry) => entry.keys.into_iter().collect(),
                None => return Err(MetaError::LeaseNotFound(lease)),
            }
        };
        debug!(lease, keys = keys.len(), "lease revoked");
        self.delete_leased_keys(&keys)
    }

    async fn member_list(&self) -> MetaResult<Vec<StoreMember>> {
        self.read_members()
    }

    async fn member_add(&self, name: &str, peer_urls: Vec<String>) -> MetaResult<StoreMember> {
        let members = self.read_members()?;
        if members.iter().any(|m| m.name == name) {
            return Err(MetaError::AlreadyExists(format!("member {name}")));
        }
        let member = StoreMember {
            id: members.iter().map(|m| m.id).max().unwrap_or(0) + 1,
            name: name.to_string(),
            peer_urls,
        };
        self.write_member(&member)?;
        Ok(member)
    }

    async fn member_remove(&self, id: u64) -> MetaResult<bool> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}
