//! MetaClient: typed access to cluster records.
//!
//! Wraps an `Arc<dyn MetadataStore>` and (de)serializes the entity types
//! from [`crate::types`] under the keys from [`crate::keys`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{MetaError, MetaResult};
use crate::keys;
use crate::lock::DistributedLock;
use crate::store::{LeaseId, MetadataStore};
use crate::types::*;

#[derive(Clone)]
pub struct MetaClient {
    store: Arc<dyn MetadataStore>,
}

impl MetaClient {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn locks(&self) -> DistributedLock {
        DistributedLock::new(Arc::clone(&self.store))
    }

    pub async fn new_id(&self, seq: &str, timeout: Duration) -> MetaResult<u64> {
        self.store.new_id(seq, timeout).await
    }

    // ── Generic JSON access ────────────────────────────────────────

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> MetaResult<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| MetaError::Deserialize(format!("{key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> MetaResult<()> {
        let bytes = to_json(value)?;
        self.store.put(key, &bytes).await
    }

    pub async fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> MetaResult<Vec<T>> {
        let entries = self.store.prefix_scan(prefix).await?;
        let mut values = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| MetaError::Deserialize(format!("{key}: {e}")))?;
            values.push(value);
        }
        Ok(values)
    }

    // ── DBs ────────────────────────────────────────────────────────

    pub async fn query_db(&self, id: DbId) -> MetaResult<Option<Db>> {
        self.get_json(&keys::db_body(id)).await
    }

    pub async fn query_db_id(&self, name: &str) -> MetaResult<Option<DbId>> {
        match self.store.get(&keys::db_name(name)).await? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let id = text
                    .trim()
                    .parse()
                    .map_err(|_| MetaError::Deserialize(format!("db id for {name}: {text}")))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    pub async fn query_db_by_name(&self, name: &str) -> MetaResult<Option<Db>> {
        match self.query_db_id(name).await? {
            Some(id) => self.query_db(id).await,
            None => Ok(None),
        }
    }

    pub async fn query_dbs(&self) -> MetaResult<Vec<Db>> {
        self.scan_json(keys::PREFIX_DB_BODY).await
    }

    // ── Spaces ─────────────────────────────────────────────────────

    pub async fn query_space(&self, db_id: DbId, space_id: SpaceId) -> MetaResult<Option<Space>> {
        self.get_json(&keys::space(db_id, space_id)).await
    }

    pub async fn query_space_by_name(&self, db_id: DbId, name: &str) -> MetaResult<Option<Space>> {
        let spaces = self.query_spaces(db_id).await?;
        Ok(spaces.into_iter().find(|s| s.name == name))
    }

    pub async fn query_spaces(&self, db_id: DbId) -> MetaResult<Vec<Space>> {
        self.scan_json(&keys::spaces_of_db(db_id)).await
    }

    pub async fn query_all_spaces(&self) -> MetaResult<Vec<Space>> {
        self.scan_json(keys::PREFIX_SPACE).await
    }

    pub async fn put_space(&self, space: &Space) -> MetaResult<()> {
        self.put_json(&keys::space(space.db_id, space.id), space).await
    }

    // ── Partitions ─────────────────────────────────────────────────

    pub async fn query_partition(&self, id: PartitionId) -> MetaResult<Option<Partition>> {
        self.get_json(&keys::partition(id)).await
    }

    pub async fn query_partitions(&self) -> MetaResult<Vec<Partition>> {
        self.scan_json(keys::PREFIX_PARTITION).await
    }

    pub async fn put_partition(&self, partition: &Partition) -> MetaResult<()> {
        self.put_json(&keys::partition(partition.id), partition).await
    }

    pub async fn delete_partition(&self, id: PartitionId) -> MetaResult<bool> {
        self.store.delete(&keys::partition(id)).await
    }

    // ── Servers ────────────────────────────────────────────────────

    pub async fn query_server(&self, id: NodeId) -> MetaResult<Option<Server>> {
        self.get_json(&keys::server(id)).await
    }

    pub async fn query_servers(&self) -> MetaResult<Vec<Server>> {
        self.scan_json(keys::PREFIX_SERVER).await
    }

    /// Find a server by `ip` or `ip:port`.
    pub async fn query_server_by_addr(&self, addr: &str) -> MetaResult<Option<Server>> {
        let servers = self.query_servers().await?;
        Ok(servers
            .into_iter()
            .find(|s| s.ip == addr || s.rpc_addr() == addr))
    }

    pub async fn put_server_with_lease(&self, server: &Server, lease: LeaseId) -> MetaResult<()> {
        let bytes = to_json(server)?;
        self.store
            .put_with_lease(&keys::server(server.id), &bytes, lease)
            .await
    }

    // ── Fail servers ───────────────────────────────────────────────

    pub async fn query_fail_servers(&self) -> MetaResult<Vec<FailServer>> {
        self.scan_json(keys::PREFIX_FAIL_SERVER).await
    }

    pub async fn put_fail_server(&self, fs: &FailServer) -> MetaResult<()> {
        self.put_json(&keys::fail_server(fs.id), fs).await
    }

    pub async fn delete_fail_server(&self, id: NodeId) -> MetaResult<bool> {
        self.store.delete(&keys::fail_server(id)).await
    }

    // ── Catalog ────────────────────────────────────────────────────

    pub async fn query_alias(&self, name: &str) -> MetaResult<Option<Alias>> {
        self.get_json(&keys::alias(name)).await
    }

    pub async fn query_aliases(&self) -> MetaResult<Vec<Alias>> {
        self.scan_json(keys::PREFIX_ALIAS).await
    }

    pub async fn query_user(&self, name: &str) -> MetaResult<Option<User>> {
        self.get_json(&keys::user(name)).await
    }

    pub async fn query_users(&self) -> MetaResult<Vec<User>> {
        self.scan_json(keys::PREFIX_USER).await
    }

    pub async fn query_role(&self, name: &str) -> MetaResult<Option<Role>> {
        self.get_json(&keys::role(name)).await
    }

    pub async fn query_roles(&self) -> MetaResult<Vec<Role>> {
        self.scan_json(keys::PREFIX_ROLE).await
    }

    // ── Engine config ──────────────────────────────────────────────

    pub async fn query_space_config(
        &self,
        db_id: DbId,
        space_id: SpaceId,
    ) -> MetaResult<Option<serde_json::Value>> {
        self.get_json(&keys::space_config(db_id, space_id)).await
    }

    pub async fn put_space_config(
        &self,
        db_id: DbId,
        space_id: SpaceId,
        cfg: &serde_json::Value,
    ) -> MetaResult<()> {
        self.put_json(&keys::space_config(db_id, space_id), cfg).await
    }
}

/// Serialize a record for storage.
pub fn to_json<T: Serialize>(value: &T) -> MetaResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| MetaError::Serialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RedbMetaStore;

    fn client() -> MetaClient {
        MetaClient::new(Arc::new(RedbMetaStore::open_in_memory().unwrap()))
    }

    fn server(id: NodeId, ip: &str) -> Server {
        Server {
            id,
            ip: ip.to_string(),
            host_ip: ip.to_string(),
            host_rack: String::new(),
            host_zone: String::new(),
            private: false,
            resource_name: "default".to_string(),
            rpc_port: 8081,
            raft_heartbeat_port: 8898,
            raft_replicate_port: 8899,
            partition_ids: vec![],
            version: None,
        }
    }

    #[tokio::test]
    async fn db_lookup_by_name() {
        let client = client();
        let db = Db { id: 3, name: "docs".to_string(), ps: vec![] };
        client.store().put(&keys::db_name("docs"), b"3").await.unwrap();
        client.put_json(&keys::db_body(3), &db).await.unwrap();

        assert_eq!(client.query_db_id("docs").await.unwrap(), Some(3));
        assert_eq!(client.query_db_by_name("docs").await.unwrap(), Some(db));
        assert!(client.query_db_by_name("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn servers_by_addr() {
        let client = client();
        let lease = client
            .store()
            .grant_lease(Duration::from_secs(30))
            .await
            .unwrap();
        client
            .put_server_with_lease(&server(1, "10.0.0.1"), lease)
            .await
            .unwrap();
        client
            .put_server_with_lease(&server(2, "10.0.0.2"), lease)
            .await
            .unwrap();

        assert_eq!(client.query_servers().await.unwrap().len(), 2);
        let by_ip = client.query_server_by_addr("10.0.0.2").await.unwrap().unwrap();
        assert_eq!(by_ip.id, 2);
        let by_addr = client
            .query_server_by_addr("10.0.0.1:8081")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_addr.id, 1);
    }

    #[tokio::test]
    async fn corrupt_record_is_a_deserialize_error() {
        let client = client();
        client.store().put(&keys::partition(1), b"not json").await.unwrap();
        assert!(matches!(
            client.query_partition(1).await,
            Err(MetaError::Deserialize(_))
        ));
    }
}
