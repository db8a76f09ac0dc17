// src/role/mod.rs
// Role Context (C5): resolves (userId, roleId, groupId?) on every
// authenticated request and enforces ownership.

use anyhow::Result;

use crate::error::{AppError, AppResult};
use crate::store::models::Role;
use crate::store::Store;

const CURRENT_ROLE_SETTING_KEY: &str = "current_role_id";

#[derive(Debug, Clone)]
pub struct RoleContext {
    pub user_id: String,
    pub role_id: String,
    pub group_id: Option<String>,
    pub role: Role,
}

pub struct RoleResolver {
    store: Store,
}

impl RoleResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Checks that `role_id` belongs to `user_id`, directly or through a
    /// group the user is a member of, and produces an immutable context.
    pub async fn resolve(&self, user_id: &str, role_id: &str) -> AppResult<RoleContext> {
        let role = self
            .store
            .get_role(role_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or(AppError::RoleNotFound)?;

        let owns_directly = role.user_id == user_id;
        let owns_via_group = match &role.group_id {
            Some(group_id) => self
                .store
                .is_group_member(group_id, user_id)
                .await
                .map_err(AppError::Internal)?,
            None => false,
        };

        if !owns_directly && !owns_via_group {
            return Err(AppError::RoleForbidden);
        }

        Ok(RoleContext {
            user_id: user_id.to_string(),
            role_id: role.id.clone(),
            group_id: role.group_id.clone(),
            role,
        })
    }

    pub async fn list_roles(&self, user_id: &str) -> Result<Vec<Role>> {
        self.store.list_roles_for_user(user_id).await
    }

    pub async fn create_role(
        &self,
        user_id: &str,
        name: &str,
        group_id: Option<&str>,
    ) -> Result<Role> {
        self.store
            .create_role(&uuid::Uuid::new_v4().to_string(), user_id, group_id, name)
            .await
    }

    /// Persists the selection in a per-user setting — the server-side
    /// source of truth for the client's bootstrap.
    pub async fn switch_role(&self, user_id: &str, role_id: &str) -> AppResult<()> {
        // Validates ownership as a side effect of resolving.
        self.resolve(user_id, role_id).await?;
        self.store
            .set_setting(user_id, CURRENT_ROLE_SETTING_KEY, role_id)
            .await
            .map_err(AppError::Internal)?;
        Ok(())
    }

    pub async fn current_role_id(&self, user_id: &str) -> Result<Option<String>> {
        self.store.get_setting(user_id, CURRENT_ROLE_SETTING_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forbids_role_owned_by_another_user() {
        let store = Store::in_memory().await.unwrap();
        let resolver = RoleResolver::new(store.clone());

        let owner = store
            .create_user(&uuid::Uuid::new_v4().to_string(), "owner@x.com", None, "individual")
            .await
            .unwrap();
        let role = resolver.create_role(&owner.id, "r1", None).await.unwrap();

        let err = resolver.resolve("someone-else", &role.id).await.unwrap_err();
        assert!(matches!(err, AppError::RoleForbidden));
    }

    #[tokio::test]
    async fn unknown_role_is_not_found() {
        let store = Store::in_memory().await.unwrap();
        let resolver = RoleResolver::new(store);
        let err = resolver.resolve("u1", "missing-role").await.unwrap_err();
        assert!(matches!(err, AppError::RoleNotFound));
    }
}
