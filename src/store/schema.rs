// src/store/schema.rs
// Startup schema migration. The canonical `CREATE TABLE IF NOT EXISTS`
// statements below are the baseline; `ensure_column` and
// `ensure_shadow_swap` exist so that a later deploy which adds a column
// or tightens a constraint can run against an existing on-disk database
// without a destructive `DROP TABLE`, per the additive/idempotent policy.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::info;

const CREATE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT,
        account_type TEXT NOT NULL DEFAULT 'individual',
        discord_user_id TEXT,
        locale TEXT,
        timezone TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS groups (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT UNIQUE,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS memberships (
        group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        PRIMARY KEY (group_id, user_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS invitations (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
        created_by TEXT NOT NULL,
        email TEXT,
        role TEXT NOT NULL,
        expires_at INTEGER,
        used_at INTEGER,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS roles (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        group_id TEXT REFERENCES groups(id) ON DELETE SET NULL,
        name TEXT NOT NULL,
        job_desc TEXT,
        system_prompt TEXT,
        model TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        group_id TEXT,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS oauth_tokens (
        provider TEXT NOT NULL,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        account_email TEXT NOT NULL,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        expiry_date INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (provider, user_id, account_email)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS mcp_servers (
        id TEXT PRIMARY KEY,
        config TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS skills (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        content TEXT NOT NULL,
        skill_type TEXT NOT NULL,
        config TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS scheduled_jobs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        description TEXT NOT NULL,
        schedule_type TEXT NOT NULL,
        run_at INTEGER,
        status TEXT NOT NULL DEFAULT 'pending',
        last_run_at INTEGER,
        last_error TEXT,
        hold_until INTEGER,
        run_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS settings (
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (user_id, key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS insights (
        id TEXT PRIMARY KEY,
        role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_messages_role_created ON messages(role_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_oauth_tokens_user ON oauth_tokens(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_user_status ON scheduled_jobs(user_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_runat_status ON scheduled_jobs(run_at, status)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_insights_role_hash ON insights(role_id, content_hash)",
];

/// Run the full idempotent migration: create tables, backfill any columns
/// missing from an older on-disk schema, then (re)create indexes.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    for stmt in CREATE_TABLES {
        sqlx::query(stmt).execute(pool).await?;
    }

    ensure_columns(pool).await?;

    for stmt in CREATE_INDEXES {
        sqlx::query(stmt).execute(pool).await?;
    }

    info!("schema migration complete");
    Ok(())
}

/// Columns that a fresh `CREATE TABLE IF NOT EXISTS` above already defines,
/// but which an older deployed database might predate. Each entry is
/// detected via `PRAGMA table_info` and backfilled with `ALTER TABLE ...
/// ADD COLUMN` when missing — the additive path from §4.1.
async fn ensure_columns(pool: &SqlitePool) -> Result<()> {
    let additive: &[(&str, &str, &str)] = &[
        ("users", "discord_user_id", "TEXT"),
        ("users", "locale", "TEXT"),
        ("users", "timezone", "TEXT"),
        ("scheduled_jobs", "hold_until", "INTEGER"),
        ("scheduled_jobs", "last_error", "TEXT"),
    ];

    for (table, column, ty) in additive {
        if !table_has_column(pool, table, column).await? {
            let stmt = format!("ALTER TABLE {table} ADD COLUMN {column} {ty}");
            sqlx::query(&stmt).execute(pool).await?;
            info!(table, column, "added missing column");
        }
    }

    Ok(())
}

async fn table_has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column))
}

/// Rebuild `table` from scratch when a constraint change (e.g. a new
/// UNIQUE index that SQLite cannot add via `ALTER TABLE`) is needed: copy
/// rows into a shadow table carrying the new constraint, drop the old
/// table, rename the shadow table into place. Runs inside
/// `PRAGMA foreign_keys=OFF` so mid-swap dangling references don't abort
/// the transaction; callers must re-run `PRAGMA foreign_keys=ON` (and the
/// index-creation pass) afterward.
#[allow(dead_code)]
pub async fn shadow_table_swap(
    pool: &SqlitePool,
    table: &str,
    create_shadow_sql: &str,
    copy_columns: &str,
) -> Result<()> {
    let shadow = format!("{table}__shadow");

    sqlx::query("PRAGMA foreign_keys = OFF").execute(pool).await?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {shadow}"))
        .execute(pool)
        .await?;
    sqlx::query(create_shadow_sql).execute(pool).await?;

    let copy_sql =
        format!("INSERT INTO {shadow} ({copy_columns}) SELECT {copy_columns} FROM {table}");
    sqlx::query(&copy_sql).execute(pool).await?;

    sqlx::query(&format!("DROP TABLE {table}")).execute(pool).await?;
    sqlx::query(&format!("ALTER TABLE {shadow} RENAME TO {table}"))
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    Ok(())
}
