//! Database operations.

use tracing::info;
use vgrid_meta::{Compare, Db, MemberOp, Server, Txn, keys, to_json};

use crate::error::{MasterError, MasterResult};
use crate::service::MasterService;

impl MasterService {
    /// Create a database. `db.id` is assigned here.
    pub async fn create_db(&self, mut db: Db) -> MasterResult<Db> {
        db.validate().map_err(MasterError::Validation)?;
        self.validate_ps(&db.ps).await?;

        if self.config.limited_db_num && !self.meta.query_dbs().await?.is_empty() {
            return Err(MasterError::Validation(
                "this cluster is limited to a single database".to_string(),
            ));
        }
        if self.meta.query_db_id(&db.name).await?.is_some() {
            return Err(MasterError::AlreadyExists(format!("db {}", db.name)));
        }

        db.id = self.meta.new_id(keys::SEQ_DB, self.config.id_timeout()).await?;
        let guard = self.lock(&keys::lock_db(&db.name), self.config.lock_ttl()).await?;
        let result = self.insert_db(&db).await;
        self.unlock(guard).await;
        result?;

        info!(db = %db.name, db_id = db.id, "db created");
        Ok(db)
    }

    async fn insert_db(&self, db: &Db) -> MasterResult<()> {
        let txn = Txn::new()
            .when(Compare::Absent(keys::db_name(&db.name)))
            .when(Compare::Absent(keys::db_id(db.id)))
            .put(keys::db_id(db.id), db.name.clone().into_bytes())
            .put(keys::db_name(&db.name), db.id.to_string().into_bytes())
            .put(keys::db_body(db.id), to_json(db)?);
        if !self.meta.store().txn(txn).await? {
            return Err(MasterError::AlreadyExists(format!("db {}", db.name)));
        }
        Ok(())
    }

    /// Every allow-listed IP must belong to a registered, live server.
    async fn validate_ps(&self, ps: &[String]) -> MasterResult<()> {
        if ps.is_empty() {
            return Ok(());
        }
        let servers = self.meta.query_servers().await?;
        for ip in ps {
            let Some(server) = servers.iter().find(|s| &s.ip == ip) else {
                return Err(MasterError::Validation(format!("server {ip} is not registered")));
            };
            if !self.client.is_live(&server.rpc_addr()).await {
                return Err(MasterError::UpstreamUnavailable(format!("server {ip} is not live")));
            }
        }
        Ok(())
    }

    /// Delete a database that owns no spaces.
    pub async fn delete_db(&self, name_or_id: &str) -> MasterResult<()> {
        let db = self.query_db(name_or_id).await?;
        let guard = self.lock(&keys::lock_db(&db.name), self.config.lock_ttl()).await?;
        let result = self.delete_db_locked(&db).await;
        self.unlock(guard).await;
        result
    }

    async fn delete_db_locked(&self, db: &Db) -> MasterResult<()> {
        let spaces = self.meta.query_spaces(db.id).await?;
        if !spaces.is_empty() {
            return Err(MasterError::NotEmpty(format!(
                "db {} ({} spaces)",
                db.name,
                spaces.len()
            )));
        }
        let txn = Txn::new()
            .delete(keys::db_id(db.id))
            .delete(keys::db_name(&db.name))
            .delete(keys::db_body(db.id));
        self.meta.store().txn(txn).await?;
        info!(db = %db.name, db_id = db.id, "db deleted");
        Ok(())
    }

    /// Add an IP to, or remove it from, a database's server allow-list.
    pub async fn update_db_servers(&self, db_name: &str, ip: &str, op: MemberOp) -> MasterResult<Db> {
        let db = self.query_db(db_name).await?;
        let guard = self.lock(&keys::lock_db(&db.name), self.config.lock_ttl()).await?;
        let result = self.update_db_servers_locked(db, ip, op).await;
        self.unlock(guard).await;
        result
    }

    async fn update_db_servers_locked(&self, mut db: Db, ip: &str, op: MemberOp) -> MasterResult<Db> {
        match op {
            MemberOp::Add => {
                self.validate_ps(&[ip.to_string()]).await?;
                if !db.ps.iter().any(|p| p == ip) {
                    db.ps.push(ip.to_string());
                }
            }
            MemberOp::Remove => db.ps.retain(|p| p != ip),
        }
        self.meta.put_json(&keys::db_body(db.id), &db).await?;
        info!(db = %db.name, %ip, ?op, servers = db.ps.len(), "db servers updated");
        Ok(db)
    }

    pub async fn list_dbs(&self) -> MasterResult<Vec<Db>> {
        Ok(self.meta.query_dbs().await?)
    }

    /// Servers a database may place on: its allow-list, or every server.
    pub async fn db_servers(&self, db_name: &str) -> MasterResult<Vec<Server>> {
        let db = self.query_db(db_name).await?;
        let servers = self.meta.query_servers().await?;
        if db.ps.is_empty() {
            return Ok(servers);
        }
        Ok(servers
            .into_iter()
            .filter(|s| db.ps.contains(&s.ip))
            .collect())
    }
}
