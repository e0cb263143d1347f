//! Aliases, users, and roles.
//!
//! Each write takes the named lock, then creates with an absent-key
//! transaction so a duplicate create fails without touching the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use vgrid_meta::{Alias, Compare, MetaClient, Privilege, Role, Txn, User, keys, to_json};

use crate::error::{MasterError, MasterResult};
use crate::service::MasterService;

/// SHA-256 hex digest stored in place of a password.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeChange {
    Grant,
    Revoke,
}

// ── Role cache ────────────────────────────────────────────────────

/// Read-through cache of role records.
///
/// A miss loads the role from the store. Entries are dropped whenever the
/// role is changed or deleted through [`MasterService`].
#[derive(Default)]
pub struct RoleCache {
    roles: Mutex<HashMap<String, Role>>,
}

impl RoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MasterResult<MutexGuard<'_, HashMap<String, Role>>> {
        self.roles
            .lock()
            .map_err(|e| MasterError::Internal(format!("role cache poisoned: {e}")))
    }

    pub async fn get(&self, meta: &MetaClient, name: &str) -> MasterResult<Option<Role>> {
        if let Some(role) = self.entries()?.get(name) {
            return Ok(Some(role.clone()));
        }
        let Some(role) = meta.query_role(name).await? else {
            return Ok(None);
        };
        debug!(role = name, "role cached");
        self.entries()?.insert(name.to_string(), role.clone());
        Ok(Some(role))
    }

    pub fn invalidate(&self, name: &str) -> MasterResult<()> {
        self.entries()?.remove(name);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries().is_ok_and(|e| e.contains_key(name))
    }
}

impl MasterService {
    async fn create_record<T: Serialize>(&self, lock_key: &str, key: &str, kind: &str, name: &str, value: &T) -> MasterResult<()> {
        let guard = self.lock(lock_key, self.config.lock_ttl()).await?;
        let txn = Txn::new()
            .when(Compare::Absent(key.to_string()))
            .put(key, to_json(value)?);
        let created = self.meta.store().txn(txn).await;
        self.unlock(guard).await;
        if !created? {
            return Err(MasterError::AlreadyExists(format!("{kind} {name}")));
        }
        info!(kind, name, "created");
        Ok(())
    }

    async fn delete_record(&self, lock_key: &str, key: &str, kind: &str, name: &str) -> MasterResult<()> {
        let guard = self.lock(lock_key, self.config.lock_ttl()).await?;
        let deleted = self.meta.store().delete(key).await;
        self.unlock(guard).await;
        if !deleted? {
            return Err(MasterError::NotFound(format!("{kind} {name}")));
        }
        info!(kind, name, "deleted");
        Ok(())
    }

    // ── Aliases ────────────────────────────────────────────────────

    pub async fn create_alias(&self, alias: Alias) -> MasterResult<Alias> {
        if alias.name.is_empty() {
            return Err(MasterError::Validation("alias name must not be empty".to_string()));
        }
        self.query_space(&alias.db_name, &alias.space_name).await?;
        self.create_record(
            &keys::lock_alias(&alias.name),
            &keys::alias(&alias.name),
            "alias",
            &alias.name,
            &alias,
        )
        .await?;
        Ok(alias)
    }

    /// Point an existing alias at another space.
    pub async fn update_alias(&self, alias: Alias) -> MasterResult<Alias> {
        self.query_space(&alias.db_name, &alias.space_name).await?;
        let guard = self
            .lock(&keys::lock_alias(&alias.name), self.config.lock_ttl())
            .await?;
        let txn = Txn::new()
            .when(Compare::Present(keys::alias(&alias.name)))
            .put(keys::alias(&alias.name), to_json(&alias)?);
        let updated = self.meta.store().txn(txn).await;
        self.unlock(guard).await;
        if !updated? {
            return Err(MasterError::NotFound(format!("alias {}", alias.name)));
        }
        info!(alias = %alias.name, db = %alias.db_name, space = %alias.space_name, "alias updated");
        Ok(alias)
    }

    pub async fn delete_alias(&self, name: &str) -> MasterResult<()> {
        self.delete_record(&keys::lock_alias(name), &keys::alias(name), "alias", name)
            .await
    }

    pub async fn query_alias(&self, name: &str) -> MasterResult<Alias> {
        self.meta
            .query_alias(name)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("alias {name}")))
    }

    pub async fn list_aliases(&self) -> MasterResult<Vec<Alias>> {
        Ok(self.meta.query_aliases().await?)
    }

    // ── Users ──────────────────────────────────────────────────────

    pub async fn create_user(&self, name: &str, password: &str, role_name: &str) -> MasterResult<User> {
        if name.is_empty() || password.is_empty() {
            return Err(MasterError::Validation("user name and password are required".to_string()));
        }
        self.query_role(role_name).await?;
        let user = User {
            name: name.to_string(),
            password_digest: password_digest(password),
            role_name: role_name.to_string(),
        };
        self.create_record(&keys::lock_user(name), &keys::user(name), "user", name, &user)
            .await?;
        Ok(user)
    }

    /// Change a user's password and/or role.
    pub async fn update_user(
        &self,
        name: &str,
        password: Option<&str>,
        role_name: Option<&str>,
    ) -> MasterResult<User> {
        if let Some(role) = role_name {
            self.query_role(role).await?;
        }
        let guard = self.lock(&keys::lock_user(name), self.config.lock_ttl()).await?;
        let result: MasterResult<User> = async {
            let mut user = self.query_user(name).await?;
            if let Some(password) = password {
                if password.is_empty() {
                    return Err(MasterError::Validation("password must not be empty".to_string()));
                }
                user.password_digest = password_digest(password);
            }
            if let Some(role) = role_name {
                user.role_name = role.to_string();
            }
            self.meta.put_json(&keys::user(name), &user).await?;
            Ok(user)
        }
        .await;
        self.unlock(guard).await;
        result
    }

    pub async fn delete_user(&self, name: &str) -> MasterResult<()> {
        self.delete_record(&keys::lock_user(name), &keys::user(name), "user", name)
            .await
    }

    pub async fn query_user(&self, name: &str) -> MasterResult<User> {
        self.meta
            .query_user(name)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("user {name}")))
    }

    pub async fn list_users(&self) -> MasterResult<Vec<User>> {
        Ok(self.meta.query_users().await?)
    }

    /// Check a password and return the user together with its role.
    pub async fn authenticate(&self, name: &str, password: &str) -> MasterResult<(User, Role)> {
        let user = self.query_user(name).await?;
        if user.password_digest != password_digest(password) {
            return Err(MasterError::Validation(format!("wrong password for user {name}")));
        }
        let role = self.query_role(&user.role_name).await?;
        Ok((user, role))
    }

    // ── Roles ──────────────────────────────────────────────────────

    pub async fn create_role(&self, role: Role) -> MasterResult<Role> {
        if role.name.is_empty() {
            return Err(MasterError::Validation("role name must not be empty".to_string()));
        }
        self.create_record(&keys::lock_role(&role.name), &keys::role(&role.name), "role", &role.name, &role)
            .await?;
        self.roles.invalidate(&role.name)?;
        Ok(role)
    }

    pub async fn delete_role(&self, name: &str) -> MasterResult<()> {
        let users = self.meta.query_users().await?;
        if let Some(user) = users.iter().find(|u| u.role_name == name) {
            return Err(MasterError::Conflict(format!(
                "role {name} is still assigned to user {}",
                user.name
            )));
        }
        let result = self
            .delete_record(&keys::lock_role(name), &keys::role(name), "role", name)
            .await;
        self.roles.invalidate(name)?;
        result
    }

    /// Grant or revoke privileges on named resources.
    pub async fn change_role_privileges(
        &self,
        name: &str,
        privileges: BTreeMap<String, Privilege>,
        change: PrivilegeChange,
    ) -> MasterResult<Role> {
        let guard = self.lock(&keys::lock_role(name), self.config.lock_ttl()).await?;
        let result: MasterResult<Role> = async {
            let mut role = self
                .meta
                .query_role(name)
                .await?
                .ok_or_else(|| MasterError::NotFound(format!("role {name}")))?;
            for (resource, privilege) in privileges {
                match change {
                    PrivilegeChange::Grant => {
                        role.privileges.insert(resource, privilege);
                    }
                    PrivilegeChange::Revoke => {
                        role.privileges.remove(&resource);
                    }
                }
            }
            self.meta.put_json(&keys::role(name), &role).await?;
            Ok(role)
        }
        .await;
        self.unlock(guard).await;
        self.roles.invalidate(name)?;
        if result.is_ok() {
            info!(role = name, ?change, "role privileges changed");
        }
        result
    }

    pub async fn query_role(&self, name: &str) -> MasterResult<Role> {
        self.roles
            .get(&self.meta, name)
            .await?
            .ok_or_else(|| MasterError::NotFound(format!("role {name}")))
    }

    pub async fn list_roles(&self) -> MasterResult<Vec<Role>> {
        Ok(self.meta.query_roles().await?)
    }

    pub fn role_cache(&self) -> &RoleCache {
        &self.roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            password_digest("secret"),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
        assert_ne!(password_digest("secret"), password_digest("Secret"));
    }
}
