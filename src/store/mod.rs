// src/store/mod.rs
// SQLite-backed repository (C1). Every mutation is a single statement;
// message insertion is "insert or ignore on id" so retried saves are
// no-ops. Reads that drive a turn are fetched DESC for the limit/before
// window then reversed to ascending-by-createdAt before returning, per
// §4.1.

pub mod models;
pub mod schema;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::utils::timestamp::get_timestamp;
use models::*;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Retry a single write once on `SQLITE_BUSY`, per the recovery policy in
/// the error handling design.
async fn retry_on_busy<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match op().await {
        Ok(v) => Ok(v),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("database is locked") => {
            op().await.context("retry after SQLITE_BUSY failed")
        }
        Err(e) => Err(e.into()),
    }
}

impl Store {
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("failed to open sqlite pool")?;

        schema::migrate(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- Users -----------------------------------------------------

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_lowercase();
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn create_user(
        &self,
        id: &str,
        email: &str,
        name: Option<&str>,
        account_type: &str,
    ) -> Result<User> {
        let now = get_timestamp();
        let email = email.to_lowercase();
        retry_on_busy(|| async {
            sqlx::query(
                "INSERT INTO users (id, email, name, account_type, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&email)
            .bind(name)
            .bind(account_type)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
        })
        .await?;

        self.get_user(id)
            .await?
            .context("user vanished immediately after insert")
    }

    pub async fn set_account_type(&self, user_id: &str, account_type: &str) -> Result<()> {
        sqlx::query("UPDATE users SET account_type = ?, updated_at = ? WHERE id = ?")
            .bind(account_type)
            .bind(get_timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_user_profile(
        &self,
        user_id: &str,
        discord_user_id: Option<&str>,
        locale: Option<&str>,
        timezone: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET
                discord_user_id = COALESCE(?, discord_user_id),
                locale = COALESCE(?, locale),
                timezone = COALESCE(?, timezone),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(discord_user_id)
        .bind(locale)
        .bind(timezone)
        .bind(get_timestamp())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Sessions ----------------------------------------------------

    pub async fn create_session(&self, id: &str, user_id: &str, ttl_days: i64) -> Result<Session> {
        let now = get_timestamp();
        let expires_at = now + ttl_days * 86_400;
        sqlx::query(
            "INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Session {
            id: id.to_string(),
            user_id: user_id.to_string(),
            expires_at,
            created_at: now,
        })
    }

    /// Returns `None` and deletes the row if the session has expired.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match session {
            Some(s) if s.expires_at < get_timestamp() => {
                self.delete_session(session_id).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- Groups / memberships / invitations ---------------------------

    pub async fn create_group(&self, id: &str, name: &str, url: Option<&str>) -> Result<Group> {
        let now = get_timestamp();
        sqlx::query("INSERT INTO groups (id, name, url, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(url)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(Group {
            id: id.to_string(),
            name: name.to_string(),
            url: url.map(|s| s.to_string()),
            created_at: now,
        })
    }

    pub async fn add_membership(&self, group_id: &str, user_id: &str, role: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO memberships (group_id, user_id, role) VALUES (?, ?, ?)
             ON CONFLICT(group_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM memberships WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn create_invitation(
        &self,
        id: &str,
        code: &str,
        group_id: &str,
        created_by: &str,
        email: Option<&str>,
        role: &str,
        expires_at: Option<i64>,
    ) -> Result<Invitation> {
        let now = get_timestamp();
        sqlx::query(
            "INSERT INTO invitations (id, code, group_id, created_by, email, role, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(code)
        .bind(group_id)
        .bind(created_by)
        .bind(email)
        .bind(role)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Invitation {
            id: id.to_string(),
            code: code.to_string(),
            group_id: group_id.to_string(),
            created_by: created_by.to_string(),
            email: email.map(|s| s.to_string()),
            role: role.to_string(),
            expires_at,
            used_at: None,
            created_at: now,
        })
    }

    pub async fn get_invitation_by_code(&self, code: &str) -> Result<Option<Invitation>> {
        let inv = sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(inv)
    }

    /// Marks the invitation used. Guarded by `used_at IS NULL` at the
    /// caller (see `auth::service::accept_invitation`) so a second
    /// acceptance of the same code is rejected before this runs.
    pub async fn mark_invitation_used(&self, invitation_id: &str) -> Result<()> {
        sqlx::query("UPDATE invitations SET used_at = ? WHERE id = ? AND used_at IS NULL")
            .bind(get_timestamp())
            .bind(invitation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- Roles ---------------------------------------------------------

    pub async fn create_role(
        &self,
        id: &str,
        user_id: &str,
        group_id: Option<&str>,
        name: &str,
    ) -> Result<Role> {
        let now = get_timestamp();
        sqlx::query(
            "INSERT INTO roles (id, user_id, group_id, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(group_id)
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_role(id).await?.context("role vanished after insert")
    }

    pub async fn get_role(&self, role_id: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = ?")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    pub async fn list_roles_for_user(&self, user_id: &str) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT DISTINCT r.* FROM roles r
             LEFT JOIN memberships m ON m.group_id = r.group_id AND m.user_id = ?
             WHERE r.user_id = ? OR m.user_id IS NOT NULL
             ORDER BY r.created_at ASC",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    // ---- Messages --------------------------------------------------------

    /// Idempotent on `id`: a retried insert with the same id is a no-op.
    pub async fn save_message(&self, msg: &Message) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO messages (id, user_id, role_id, group_id, role, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.user_id)
        .bind(&msg.role_id)
        .bind(&msg.group_id)
        .bind(&msg.role)
        .bind(&msg.content)
        .bind(msg.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns ascending-by-createdAt. `before` pages backward from a
    /// message id (exclusive); `limit=0` returns an empty page, not an
    /// error.
    pub async fn list_messages(
        &self,
        role_id: &str,
        limit: i64,
        before: Option<&str>,
    ) -> Result<Vec<Message>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut rows = if let Some(before_id) = before {
            let Some(anchor) = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
                .bind(before_id)
                .fetch_optional(&self.pool)
                .await?
            else {
                return Ok(Vec::new());
            };

            sqlx::query_as::<_, Message>(
                "SELECT * FROM messages WHERE role_id = ? AND created_at < ?
                 ORDER BY created_at DESC LIMIT ?",
            )
            .bind(role_id)
            .bind(anchor.created_at)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Message>(
                "SELECT * FROM messages WHERE role_id = ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(role_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.reverse();
        Ok(rows)
    }

    pub async fn search_messages(
        &self,
        role_id: &str,
        keyword: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let pattern = format!("%{keyword}%");
        let mut rows = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE role_id = ? AND content LIKE ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(role_id)
        .bind(pattern)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn clear_messages(&self, role_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE role_id = ?")
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- OAuth tokens ----------------------------------------------------

    /// Upserts `(provider, userId, accountEmail)`. If a stale row exists
    /// for the same provider/user with an empty `accountEmail`, it is
    /// deleted first so a later-resolved address doesn't leave a
    /// duplicate artifact behind.
    pub async fn upsert_oauth_token(
        &self,
        provider: &str,
        user_id: &str,
        account_email: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expiry_date: Option<i64>,
    ) -> Result<()> {
        if !account_email.is_empty() {
            sqlx::query(
                "DELETE FROM oauth_tokens WHERE provider = ? AND user_id = ? AND account_email = ''",
            )
            .bind(provider)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        }

        let now = get_timestamp();
        sqlx::query(
            "INSERT INTO oauth_tokens
                (provider, user_id, account_email, access_token, refresh_token, expiry_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(provider, user_id, account_email) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, oauth_tokens.refresh_token),
                expiry_date = excluded.expiry_date,
                updated_at = excluded.updated_at",
        )
        .bind(provider)
        .bind(user_id)
        .bind(account_email)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expiry_date)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_oauth_token(
        &self,
        provider: &str,
        user_id: &str,
        account_email: &str,
    ) -> Result<Option<OAuthToken>> {
        let token = sqlx::query_as::<_, OAuthToken>(
            "SELECT * FROM oauth_tokens WHERE provider = ? AND user_id = ? AND account_email = ?",
        )
        .bind(provider)
        .bind(user_id)
        .bind(account_email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    /// Any account for this provider/user, used when the caller doesn't
    /// know which connected address to use yet.
    pub async fn get_any_oauth_token(
        &self,
        provider: &str,
        user_id: &str,
    ) -> Result<Option<OAuthToken>> {
        let token = sqlx::query_as::<_, OAuthToken>(
            "SELECT * FROM oauth_tokens WHERE provider = ? AND user_id = ? ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(provider)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    pub async fn list_oauth_connections(&self, user_id: &str) -> Result<Vec<OAuthToken>> {
        let tokens = sqlx::query_as::<_, OAuthToken>(
            "SELECT * FROM oauth_tokens WHERE user_id = ? ORDER BY provider, account_email",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    // ---- MCP server configs ------------------------------------------

    pub async fn upsert_mcp_server(&self, id: &str, config_json: &str) -> Result<()> {
        let now = get_timestamp();
        sqlx::query(
            "INSERT INTO mcp_servers (id, config, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(config_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_mcp_server(&self, id: &str) -> Result<Option<McpServerConfig>> {
        let row = sqlx::query_as::<_, McpServerConfig>("SELECT * FROM mcp_servers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_mcp_servers(&self) -> Result<Vec<McpServerConfig>> {
        let rows = sqlx::query_as::<_, McpServerConfig>("SELECT * FROM mcp_servers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn delete_mcp_server(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM mcp_servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- Scheduled jobs --------------------------------------------------

    pub async fn create_scheduled_job(
        &self,
        id: &str,
        user_id: &str,
        role_id: &str,
        description: &str,
        schedule_type: &str,
        run_at: Option<i64>,
    ) -> Result<ScheduledJob> {
        let now = get_timestamp();
        sqlx::query(
            "INSERT INTO scheduled_jobs
                (id, user_id, role_id, description, schedule_type, run_at, status, run_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(role_id)
        .bind(description)
        .bind(schedule_type)
        .bind(run_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_scheduled_job(id)
            .await?
            .context("scheduled job vanished after insert")
    }

    pub async fn get_scheduled_job(&self, id: &str) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_scheduled_jobs_for_user(&self, user_id: &str) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, ScheduledJob>(
            "SELECT * FROM scheduled_jobs WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_due_once_jobs(&self, now: i64) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, ScheduledJob>(
            "SELECT * FROM scheduled_jobs
             WHERE schedule_type = 'once' AND status = 'pending' AND run_at <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_pending_recurring_jobs(&self, now: i64) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, ScheduledJob>(
            "SELECT * FROM scheduled_jobs
             WHERE schedule_type = 'recurring' AND status = 'pending'
               AND (hold_until IS NULL OR hold_until <= ?)",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Conditional transition guarded by the previous status, so two
    /// ticker iterations racing on the same job id cannot both pick it
    /// up. Returns whether this call performed the transition.
    pub async fn try_transition_job_status(
        &self,
        id: &str,
        from_status: &str,
        to_status: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to_status)
        .bind(get_timestamp())
        .bind(id)
        .bind(from_status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn complete_once_job(&self, id: &str) -> Result<()> {
        let now = get_timestamp();
        sqlx::query(
            "UPDATE scheduled_jobs SET status = 'completed', last_run_at = ?, run_count = run_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reschedule_recurring_job(&self, id: &str, hold_until: i64) -> Result<()> {
        let now = get_timestamp();
        sqlx::query(
            "UPDATE scheduled_jobs SET status = 'pending', last_run_at = ?, hold_until = ?, run_count = run_count + 1, last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(hold_until)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_job(&self, id: &str, error: &str, terminal: bool, hold_until: Option<i64>) -> Result<()> {
        let now = get_timestamp();
        let status = if terminal { "failed" } else { "pending" };
        sqlx::query(
            "UPDATE scheduled_jobs SET status = ?, last_error = ?, hold_until = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(error)
        .bind(hold_until)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `pending` or `failed` → `cancelled`. A job currently `running`
    /// finishes its execution; it only sees `cancelled` once this
    /// transition lands before the next tick picks it up again.
    pub async fn cancel_scheduled_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET status = 'cancelled', updated_at = ? WHERE id = ? AND status IN ('pending', 'failed')",
        )
        .bind(get_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ---- Settings --------------------------------------------------------

    pub async fn set_setting(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (user_id, key, value) VALUES (?, ?, ?)
             ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_setting(&self, user_id: &str, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE user_id = ? AND key = ?")
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    // ---- Insights (C6 memory store) --------------------------------------

    pub async fn insert_insight_if_new(
        &self,
        id: &str,
        role_id: &str,
        content: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO insights (id, role_id, content, content_hash, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(role_id)
        .bind(content)
        .bind(content_hash)
        .bind(get_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_insights(&self, role_id: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT id, content FROM insights WHERE role_id = ? ORDER BY created_at")
            .bind(role_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("id"), r.get::<String, _>("content")))
            .collect())
    }

    pub async fn delete_insight(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM insights WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_insight(&self, id: &str, content: &str, content_hash: &str) -> Result<()> {
        sqlx::query("UPDATE insights SET content = ?, content_hash = ? WHERE id = ?")
            .bind(content)
            .bind(content_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn seeded_store() -> Store {
        let store = Store::in_memory().await.unwrap();
        store
            .create_user(&Uuid::new_v4().to_string(), "u@x.com", None, "individual")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn message_ordering_and_idempotent_save() {
        let store = seeded_store().await;
        let user = store.get_user_by_email("u@x.com").await.unwrap().unwrap();
        let role = store
            .create_role(&Uuid::new_v4().to_string(), &user.id, None, "default")
            .await
            .unwrap();

        let m1 = Message {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            role_id: role.id.clone(),
            group_id: None,
            role: "user".into(),
            content: "hi".into(),
            created_at: 100,
        };
        let m2 = Message {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            role_id: role.id.clone(),
            group_id: None,
            role: "assistant".into(),
            content: "hello".into(),
            created_at: 200,
        };

        store.save_message(&m1).await.unwrap();
        store.save_message(&m2).await.unwrap();
        store.save_message(&m1).await.unwrap(); // retried save, no-op

        let messages = store.list_messages(&role.id, 50, None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, m1.id);
        assert_eq!(messages[1].id, m2.id);
    }

    #[tokio::test]
    async fn role_isolation() {
        let store = seeded_store().await;
        let user = store.get_user_by_email("u@x.com").await.unwrap().unwrap();
        let r1 = store
            .create_role(&Uuid::new_v4().to_string(), &user.id, None, "r1")
            .await
            .unwrap();
        let r2 = store
            .create_role(&Uuid::new_v4().to_string(), &user.id, None, "r2")
            .await
            .unwrap();

        store
            .save_message(&Message {
                id: Uuid::new_v4().to_string(),
                user_id: user.id.clone(),
                role_id: r1.id.clone(),
                group_id: None,
                role: "user".into(),
                content: "only in r1".into(),
                created_at: 1,
            })
            .await
            .unwrap();

        assert_eq!(store.list_messages(&r1.id, 50, None).await.unwrap().len(), 1);
        assert_eq!(store.list_messages(&r2.id, 50, None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn limit_zero_is_empty_not_error() {
        let store = seeded_store().await;
        let user = store.get_user_by_email("u@x.com").await.unwrap().unwrap();
        let role = store
            .create_role(&Uuid::new_v4().to_string(), &user.id, None, "r")
            .await
            .unwrap();
        let page = store.list_messages(&role.id, 0, None).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn oauth_token_upsert_is_unique_per_account() {
        let store = seeded_store().await;
        let user = store.get_user_by_email("u@x.com").await.unwrap().unwrap();

        store
            .upsert_oauth_token("google", &user.id, "", "tok-a", None, None)
            .await
            .unwrap();
        store
            .upsert_oauth_token("google", &user.id, "u@x.com", "tok-b", Some("refresh"), Some(9999999999))
            .await
            .unwrap();

        let connections = store.list_oauth_connections(&user.id).await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].account_email, "u@x.com");
        assert_eq!(connections[0].access_token, "tok-b");
    }

    #[tokio::test]
    async fn scheduler_transition_is_at_most_once() {
        let store = seeded_store().await;
        let user = store.get_user_by_email("u@x.com").await.unwrap().unwrap();
        let role = store
            .create_role(&Uuid::new_v4().to_string(), &user.id, None, "r")
            .await
            .unwrap();
        let job = store
            .create_scheduled_job(&Uuid::new_v4().to_string(), &user.id, &role.id, "ping", "once", Some(0))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            store.try_transition_job_status(&job.id, "pending", "running"),
            store.try_transition_job_status(&job.id, "pending", "running"),
        );
        let wins = [a.unwrap(), b.unwrap()].into_iter().filter(|w| *w).count();
        assert_eq!(wins, 1);
    }
}
