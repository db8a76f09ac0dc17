// src/auth/service.rs
// Identity & Session (C2): email-keyed user creation, cookie-session
// issuance/validation, group/invitation lifecycle.

use anyhow::{anyhow, Result};
use uuid::Uuid;

use crate::store::models::{Session, User};
use crate::store::Store;

const OWNER_ROLE: &str = "owner";

pub struct AuthService {
    store: Store,
    session_ttl_days: i64,
}

impl AuthService {
    pub fn new(store: Store, session_ttl_days: i64) -> Self {
        Self {
            store,
            session_ttl_days,
        }
    }

    pub async fn check_email(&self, email: &str) -> Result<bool> {
        Ok(self.store.get_user_by_email(email).await?.is_some())
    }

    /// `login(email) → (user, session)`. The spec's contract is
    /// email-only; unknown emails fail rather than silently signing up,
    /// so the client's onboarding flow (check-email → signup | login)
    /// stays authoritative server-side too.
    pub async fn login(&self, email: &str) -> Result<(User, Session)> {
        let user = self
            .store
            .get_user_by_email(email)
            .await?
            .ok_or_else(|| anyhow!("no account for this email"))?;

        let session = self
            .store
            .create_session(&Uuid::new_v4().to_string(), &user.id, self.session_ttl_days)
            .await?;

        Ok((user, session))
    }

    pub async fn signup_individual(&self, email: &str, name: Option<&str>) -> Result<(User, Session)> {
        if self.store.get_user_by_email(email).await?.is_some() {
            return Err(anyhow!("account already exists"));
        }

        let user = self
            .store
            .create_user(&Uuid::new_v4().to_string(), email, name, "individual")
            .await?;
        let session = self
            .store
            .create_session(&Uuid::new_v4().to_string(), &user.id, self.session_ttl_days)
            .await?;

        Ok((user, session))
    }

    /// Creates user + group + owner membership + one invitation as a
    /// single logical unit. SQLite's single-writer model makes this
    /// effectively atomic without an explicit transaction wrapper.
    pub async fn signup_group(
        &self,
        email: &str,
        name: Option<&str>,
        group_name: &str,
        group_url: Option<&str>,
    ) -> Result<(User, Session, String)> {
        if self.store.get_user_by_email(email).await?.is_some() {
            return Err(anyhow!("account already exists"));
        }

        let user = self
            .store
            .create_user(&Uuid::new_v4().to_string(), email, name, "group")
            .await?;
        let group = self
            .store
            .create_group(&Uuid::new_v4().to_string(), group_name, group_url)
            .await?;
        self.store.add_membership(&group.id, &user.id, OWNER_ROLE).await?;
        self.store
            .create_invitation(
                &Uuid::new_v4().to_string(),
                &Uuid::new_v4().simple().to_string(),
                &group.id,
                &user.id,
                None,
                "member",
                None,
            )
            .await?;

        let session = self
            .store
            .create_session(&Uuid::new_v4().to_string(), &user.id, self.session_ttl_days)
            .await?;

        Ok((user, session, group.id))
    }

    /// Guarded by `usedAt IS NULL AND expiresAt > now`; a second
    /// acceptance of the same code is rejected rather than silently
    /// repeated.
    pub async fn accept_invitation(&self, code: &str, user_id: &str) -> Result<()> {
        let invitation = self
            .store
            .get_invitation_by_code(code)
            .await?
            .ok_or_else(|| anyhow!("invitation not found"))?;

        if invitation.used_at.is_some() {
            return Err(anyhow!("invitation already used"));
        }
        if let Some(expires_at) = invitation.expires_at {
            if expires_at <= crate::utils::timestamp::get_timestamp() {
                return Err(anyhow!("invitation expired"));
            }
        }

        self.store
            .add_membership(&invitation.group_id, user_id, &invitation.role)
            .await?;
        self.store.mark_invitation_used(&invitation.id).await?;
        self.store.set_account_type(user_id, "group").await?;

        Ok(())
    }

    pub async fn logout(&self, session_id: &str) -> Result<()> {
        self.store.delete_session(session_id).await
    }

    /// Validates a session cookie value, deleting it server-side if
    /// expired (per C1's `getSession` contract).
    pub async fn authenticate(&self, session_id: &str) -> Result<Option<(User, Session)>> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(None);
        };
        let Some(user) = self.store.get_user(&session.user_id).await? else {
            return Ok(None);
        };
        Ok(Some((user, session)))
    }

    pub async fn update_me(
        &self,
        user_id: &str,
        discord_user_id: Option<&str>,
        locale: Option<&str>,
        timezone: Option<&str>,
    ) -> Result<User> {
        self.store
            .update_user_profile(user_id, discord_user_id, locale, timezone)
            .await?;
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| anyhow!("user vanished"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        AuthService::new(Store::in_memory().await.unwrap(), 30)
    }

    #[tokio::test]
    async fn signup_then_login_round_trip() {
        let svc = service().await;
        let (user, _) = svc.signup_individual("u@x.com", Some("U")).await.unwrap();
        let (again, session) = svc.login("u@x.com").await.unwrap();
        assert_eq!(user.id, again.id);
        assert!(session.expires_at > crate::utils::timestamp::get_timestamp());
    }

    #[tokio::test]
    async fn invitation_acceptance_promotes_account_and_is_not_repeatable() {
        let svc = service().await;
        let (owner, _, group_id) = svc
            .signup_group("owner@x.com", None, "Acme", None)
            .await
            .unwrap();
        let (individual, _) = svc.signup_individual("i@x.com", None).await.unwrap();

        let invitation = svc
            .store
            .create_invitation(
                &Uuid::new_v4().to_string(),
                "invite-code",
                &group_id,
                &owner.id,
                Some("i@x.com"),
                "member",
                None,
            )
            .await
            .unwrap();

        svc.accept_invitation(&invitation.code, &individual.id)
            .await
            .unwrap();

        let promoted = svc.store.get_user(&individual.id).await.unwrap().unwrap();
        assert_eq!(promoted.account_type, "group");

        let second_attempt = svc.accept_invitation(&invitation.code, &individual.id).await;
        assert!(second_attempt.is_err());
    }
}
