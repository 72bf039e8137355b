//! SQLite-backed store gateway
//!
//! Rows keep UUIDs and timestamps as TEXT; JSON blob columns are stored
//! verbatim and never inspected by the hub. Bootstrap is idempotent: tables
//! are created if absent and any missing column is added.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::gateway::{StoreError, StoreGateway, UserPatch};
use crate::types::{
    MatchId, MatchRecord, RankingEntry, ReportSlot, ReportValue, UserId, UserProfile, INITIAL_RATE,
};
use crate::utils::current_timestamp;

/// SQLite store implementation
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the store and run the idempotent schema bootstrap.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(|e| StoreError::Transient(format!("store connect failed: {e}")))?;

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Create tables if absent and add any missing column.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                verifier TEXT NOT NULL,
                rate INTEGER NOT NULL DEFAULT 1500,
                match_history TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                player1 TEXT NOT NULL,
                player2 TEXT NOT NULL,
                report1 TEXT,
                report2 TEXT,
                resolved_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // Columns added after the initial schema shipped.
        self.ensure_column("users", "memos", "TEXT").await?;
        self.ensure_column("users", "battle_records", "TEXT").await?;
        self.ensure_column("users", "registered_decks", "TEXT").await?;
        self.ensure_column("users", "current_match_id", "TEXT").await?;
        self.ensure_column("users", "last_login_at", "TEXT").await?;

        info!("Store schema bootstrap complete");
        Ok(())
    }

    async fn ensure_column(
        &self,
        table: &str,
        column: &str,
        definition: &str,
    ) -> Result<(), StoreError> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let present = rows.iter().any(|row| {
            row.try_get::<String, _>("name")
                .map(|name| name == column)
                .unwrap_or(false)
        });

        if !present {
            debug!("Adding missing column {}.{}", table, column);
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"))
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        }

        Ok(())
    }
}

#[async_trait]
impl StoreGateway for SqliteStore {
    async fn fetch_user(&self, id: UserId) -> Result<UserProfile, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;

        user_from_row(&row)
    }

    async fn fetch_user_by_name(&self, name: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(
        &self,
        id: UserId,
        name: &str,
        verifier: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, verifier, rate, match_history, created_at) \
             VALUES (?, ?, ?, ?, '[]', ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(verifier)
        .bind(INITIAL_RATE)
        .bind(current_timestamp().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn patch_user(&self, id: UserId, patch: UserPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            // A no-op patch still requires the row to exist.
            self.fetch_user(id).await?;
            return Ok(());
        }

        let mut qb = sqlx::QueryBuilder::new("UPDATE users SET ");
        let mut set = qb.separated(", ");

        if let Some(rate) = patch.rate {
            set.push("rate = ").push_bind_unseparated(rate);
        }
        if let Some(history) = &patch.match_history {
            let encoded = serde_json::to_string(history)
                .map_err(|e| StoreError::Transient(format!("history encode failed: {e}")))?;
            set.push("match_history = ").push_bind_unseparated(encoded);
        }
        if let Some(memos) = &patch.memos {
            set.push("memos = ").push_bind_unseparated(memos.to_string());
        }
        if let Some(records) = &patch.battle_records {
            set.push("battle_records = ")
                .push_bind_unseparated(records.to_string());
        }
        if let Some(decks) = &patch.registered_decks {
            set.push("registered_decks = ")
                .push_bind_unseparated(decks.to_string());
        }
        if let Some(current) = &patch.current_match_id {
            set.push("current_match_id = ")
                .push_bind_unseparated(current.map(|m| m.to_string()));
        }
        if let Some(username) = &patch.username {
            set.push("name = ").push_bind_unseparated(username.clone());
        }
        if let Some(at) = &patch.last_login_at {
            set.push("last_login_at = ")
                .push_bind_unseparated(at.to_rfc3339());
        }

        qb.push(" WHERE id = ");
        qb.push_bind(id.to_string());

        let result = qb.build().execute(&self.pool).await.map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }

        Ok(())
    }

    async fn insert_match(&self, id: MatchId, p1: UserId, p2: UserId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO matches (id, player1, player2) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(p1.to_string())
            .bind(p2.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn fetch_match(&self, id: MatchId) -> Result<MatchRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM matches WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| StoreError::NotFound(format!("match {id}")))?;

        match_from_row(&row)
    }

    async fn patch_match_report(
        &self,
        id: MatchId,
        slot: ReportSlot,
        value: ReportValue,
    ) -> Result<bool, StoreError> {
        let sql = match slot {
            ReportSlot::Player1 => {
                "UPDATE matches SET report1 = ? WHERE id = ? AND report1 IS NULL"
            }
            ReportSlot::Player2 => {
                "UPDATE matches SET report2 = ? WHERE id = ? AND report2 IS NULL"
            }
        };

        let result = sqlx::query(sql)
            .bind(value.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_match_resolved(
        &self,
        id: MatchId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE matches SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL")
                .bind(at.to_rfc3339())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn top_by_rating(&self, limit: u32) -> Result<Vec<RankingEntry>, StoreError> {
        let rows =
            sqlx::query("SELECT name, rate FROM users ORDER BY rate DESC, name ASC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        rows.iter()
            .map(|row| {
                Ok(RankingEntry {
                    username: row.try_get("name").map_err(map_sqlx_err)?,
                    rate: row.try_get("rate").map_err(map_sqlx_err)?,
                })
            })
            .collect()
    }
}

fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::UniqueViolation(db.message().to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        _ => StoreError::Transient(err.to_string()),
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Transient(format!("corrupt uuid column: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Transient(format!("corrupt timestamp column: {e}")))
}

fn parse_json(raw: Option<String>) -> Result<Option<serde_json::Value>, StoreError> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| StoreError::Transient(format!("corrupt json column: {e}")))
    })
    .transpose()
}

fn user_from_row(row: &SqliteRow) -> Result<UserProfile, StoreError> {
    let id: String = row.try_get("id").map_err(map_sqlx_err)?;
    let history_raw: String = row.try_get("match_history").map_err(map_sqlx_err)?;
    let match_history: Vec<String> = serde_json::from_str(&history_raw)
        .map_err(|e| StoreError::Transient(format!("corrupt history column: {e}")))?;
    let current_match_id: Option<String> =
        row.try_get("current_match_id").map_err(map_sqlx_err)?;
    let created_at: String = row.try_get("created_at").map_err(map_sqlx_err)?;
    let last_login_at: Option<String> = row.try_get("last_login_at").map_err(map_sqlx_err)?;

    Ok(UserProfile {
        id: parse_uuid(&id)?,
        name: row.try_get("name").map_err(map_sqlx_err)?,
        verifier: row.try_get("verifier").map_err(map_sqlx_err)?,
        rate: row.try_get("rate").map_err(map_sqlx_err)?,
        match_history,
        memos: parse_json(row.try_get("memos").map_err(map_sqlx_err)?)?,
        battle_records: parse_json(row.try_get("battle_records").map_err(map_sqlx_err)?)?,
        registered_decks: parse_json(row.try_get("registered_decks").map_err(map_sqlx_err)?)?,
        current_match_id: current_match_id.as_deref().map(parse_uuid).transpose()?,
        created_at: parse_timestamp(&created_at)?,
        last_login_at: last_login_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn match_from_row(row: &SqliteRow) -> Result<MatchRecord, StoreError> {
    let id: String = row.try_get("id").map_err(map_sqlx_err)?;
    let player1: String = row.try_get("player1").map_err(map_sqlx_err)?;
    let player2: String = row.try_get("player2").map_err(map_sqlx_err)?;
    let report1: Option<String> = row.try_get("report1").map_err(map_sqlx_err)?;
    let report2: Option<String> = row.try_get("report2").map_err(map_sqlx_err)?;
    let resolved_at: Option<String> = row.try_get("resolved_at").map_err(map_sqlx_err)?;

    let parse_report = |raw: Option<String>| -> Result<Option<ReportValue>, StoreError> {
        raw.map(|s| {
            ReportValue::parse(&s)
                .ok_or_else(|| StoreError::Transient(format!("corrupt report column: {s}")))
        })
        .transpose()
    };

    Ok(MatchRecord {
        id: parse_uuid(&id)?,
        player1: parse_uuid(&player1)?,
        player2: parse_uuid(&player2)?,
        report1: parse_report(report1)?,
        report2: parse_report(report2)?,
        resolved_at: resolved_at.as_deref().map(parse_timestamp).transpose()?,
    })
}
