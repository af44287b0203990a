//! In-memory store for tests, demos and snapshot-driven deployments

use super::resource_binding_matches;
use crate::error::StoreError;
use crate::permission::{PermissionRecord, PermissionScope, PermissionStore};
use crate::policy::{Policy, PolicyStore, Statement};
use crate::principal::UserDirectory;
use crate::types::{Realm, Role, UserRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// `user_roles` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: String,
    pub role_id: String,
}

/// `role_policies` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub role_id: String,
    pub policy_id: String,
}

/// `user_policies` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPolicy {
    pub user_id: String,
    pub policy_id: String,
}

/// `resource_policies` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    pub resource_type: String,
    pub resource_id: String,
    pub policy_id: String,
}

/// Serializable copy of every table the engine reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub realms: Vec<Realm>,
    pub users: Vec<UserRecord>,
    pub roles: Vec<Role>,
    pub user_roles: Vec<UserRole>,
    pub policies: Vec<Policy>,
    pub statements: Vec<Statement>,
    pub role_policies: Vec<RolePolicy>,
    pub user_policies: Vec<UserPolicy>,
    pub resource_policies: Vec<ResourcePolicy>,
    pub user_permissions: Vec<PermissionRecord>,
    pub role_permissions: Vec<PermissionRecord>,
}

/// Policy, permission and user store over in-process tables
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<Snapshot>,
    /// Bumped under the write lock by every mutator
    generation: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        info!(
            "InMemoryStore loaded with policies={}, statements={}, user_permissions={}, role_permissions={}",
            snapshot.policies.len(),
            snapshot.statements.len(),
            snapshot.user_permissions.len(),
            snapshot.role_permissions.len()
        );
        Self {
            data: RwLock::new(snapshot),
            generation: AtomicU64::new(0),
        }
    }

    /// Load a JSON snapshot from disk
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let snapshot: Snapshot = serde_json::from_str(&text)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Copy of the current tables
    pub fn snapshot(&self) -> Snapshot {
        self.data.read().clone()
    }

    /// Apply a write and move the generation while still holding the lock
    fn mutate<R>(&self, write: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut data = self.data.write();
        let out = write(&mut data);
        self.generation.fetch_add(1, Ordering::SeqCst);
        out
    }

    pub fn insert_realm(&self, realm: Realm) {
        self.mutate(|data| data.realms.push(realm));
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.mutate(|data| data.users.push(user));
    }

    pub fn insert_role(&self, role: Role) {
        self.mutate(|data| data.roles.push(role));
    }

    pub fn assign_role(&self, user_id: &str, role_id: &str) {
        let binding = UserRole {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        };
        self.mutate(|data| data.user_roles.push(binding));
    }

    pub fn insert_policy(&self, policy: Policy) {
        self.mutate(|data| data.policies.push(policy));
    }

    pub fn insert_statement(&self, statement: Statement) {
        self.mutate(|data| data.statements.push(statement));
    }

    pub fn bind_role_policy(&self, role_id: &str, policy_id: &str) {
        let binding = RolePolicy {
            role_id: role_id.to_string(),
            policy_id: policy_id.to_string(),
        };
        self.mutate(|data| data.role_policies.push(binding));
    }

    pub fn bind_user_policy(&self, user_id: &str, policy_id: &str) {
        let binding = UserPolicy {
            user_id: user_id.to_string(),
            policy_id: policy_id.to_string(),
        };
        self.mutate(|data| data.user_policies.push(binding));
    }

    pub fn bind_resource_policy(&self, resource_type: &str, resource_id: &str, policy_id: &str) {
        let binding = ResourcePolicy {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            policy_id: policy_id.to_string(),
        };
        self.mutate(|data| data.resource_policies.push(binding));
    }

    /// Insert a permission record into the table matching its scope
    pub fn insert_permission(&self, record: PermissionRecord) {
        self.mutate(|data| match record.scope {
            PermissionScope::User(_) => data.user_permissions.push(record),
            PermissionScope::Role(_) => data.role_permissions.push(record),
        });
    }

    /// Remove a permission record by id
    pub fn remove_permission(&self, record_id: &str) {
        self.mutate(|data| {
            data.user_permissions.retain(|r| r.id != record_id);
            data.role_permissions.retain(|r| r.id != record_id);
        });
    }
}

impl Snapshot {
    /// Role ids the user holds in the realm
    fn roles_of(&self, user_id: &str, realm_id: &str) -> HashSet<&str> {
        self.user_roles
            .iter()
            .filter(|ur| ur.user_id == user_id)
            .filter(|ur| {
                self.roles
                    .iter()
                    .any(|role| role.id == ur.role_id && role.realm_id == realm_id)
            })
            .map(|ur| ur.role_id.as_str())
            .collect()
    }
}

fn on_resource(record: &PermissionRecord, realm_id: &str, resource: Option<&str>) -> bool {
    record.active
        && record.realm_id == realm_id
        && resource.map_or(true, |resource| record.resource == resource)
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn policies_for(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<Policy>, StoreError> {
        let data = self.data.read();
        let roles = data.roles_of(user_id, realm_id);

        let direct = data
            .user_policies
            .iter()
            .filter(|up| up.user_id == user_id)
            .map(|up| up.policy_id.as_str());
        let via_roles = data
            .role_policies
            .iter()
            .filter(|rp| roles.contains(rp.role_id.as_str()))
            .map(|rp| rp.policy_id.as_str());
        let via_resource = data
            .resource_policies
            .iter()
            .filter(|rp| {
                resource.map_or(false, |resource| {
                    resource_binding_matches(&rp.resource_type, &rp.resource_id, resource)
                })
            })
            .map(|rp| rp.policy_id.as_str());

        let mut seen = HashSet::new();
        let mut policies = Vec::new();
        for policy_id in direct.chain(via_roles).chain(via_resource) {
            if !seen.insert(policy_id) {
                continue;
            }
            if let Some(policy) = data
                .policies
                .iter()
                .find(|p| p.id == policy_id && p.realm_id == realm_id)
            {
                policies.push(policy.clone());
            }
        }

        Ok(policies)
    }

    async fn statements_of(&self, policy_id: &str) -> Result<Vec<Statement>, StoreError> {
        let data = self.data.read();
        Ok(data
            .statements
            .iter()
            .filter(|s| s.policy_id == policy_id)
            .cloned()
            .collect())
    }

    fn generation(&self) -> Option<u64> {
        Some(self.generation.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn user_permissions(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>, StoreError> {
        let data = self.data.read();
        Ok(data
            .user_permissions
            .iter()
            .filter(|r| matches!(&r.scope, PermissionScope::User(id) if id == user_id))
            .filter(|r| on_resource(r, realm_id, resource))
            .cloned()
            .collect())
    }

    async fn role_permissions(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>, StoreError> {
        let data = self.data.read();
        let roles = data.roles_of(user_id, realm_id);
        Ok(data
            .role_permissions
            .iter()
            .filter(|r| matches!(&r.scope, PermissionScope::Role(id) if roles.contains(id.as_str())))
            .filter(|r| on_resource(r, realm_id, resource))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user(&self, user_id: &str, realm_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let data = self.data.read();
        Ok(data
            .users
            .iter()
            .find(|u| u.id == user_id && u.realm_id == realm_id)
            .cloned())
    }
}
