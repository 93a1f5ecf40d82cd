//! Database operations for sessync.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{
    AgentKind, FileFingerprint, Message, MessageRole, Relationship, Session, StoreCounts, ToolCall,
};
use crate::schema::{SCHEMA, SCHEMA_VERSION};
use crate::store::SessionStore;

/// Database handle for sessync.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Filters for [`Database::list_sessions`].
#[derive(Debug, Clone, Default)]
pub struct ListSessionsOptions {
    pub agent: Option<AgentKind>,
    pub project: Option<String>,
    pub limit: Option<i64>,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema.
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
        )
        .bind(SCHEMA_VERSION)
        .bind("initial")
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Upsert a session by ID.
    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_session_on(&mut conn, session).await
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(session_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// List sessions, newest first.
    pub async fn list_sessions(&self, opts: ListSessionsOptions) -> Result<Vec<Session>> {
        let mut sql = String::from("SELECT * FROM sessions WHERE 1=1");

        if opts.agent.is_some() {
            sql.push_str(" AND agent = ?");
        }
        if opts.project.is_some() {
            sql.push_str(" AND project = ?");
        }

        sql.push_str(" ORDER BY COALESCE(started_at, created_at) DESC, id");

        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        if let Some(agent) = opts.agent {
            query = query.bind(agent.as_str());
        }
        if let Some(ref project) = opts.project {
            query = query.bind(project);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(session_from_row).collect()
    }

    /// Size and mtime recorded for a file by its most recent write.
    pub async fn file_fingerprint(&self, file_path: &str) -> Result<Option<FileFingerprint>> {
        let row = sqlx::query(
            "SELECT file_size, file_mtime FROM sessions WHERE file_path = ? ORDER BY file_mtime DESC LIMIT 1",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FileFingerprint {
            size: row.get("file_size"),
            mtime: row.get("file_mtime"),
        }))
    }

    /// Row counts across sessions, messages and tool calls.
    pub async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sessions) AS sessions,
                (SELECT COUNT(*) FROM messages) AS messages,
                (SELECT COUNT(*) FROM tool_calls) AS tool_calls
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreCounts {
            sessions: row.get("sessions"),
            messages: row.get("messages"),
            tool_calls: row.get("tool_calls"),
        })
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Replace every message of a session in one transaction.
    pub async fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        replace_messages_on(&mut tx, session_id, messages).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Upsert a session and replace its messages atomically.
    pub async fn write_session(&self, session: &Session, messages: &[Message]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_session_on(&mut tx, session).await?;
        replace_messages_on(&mut tx, &session.id, messages).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Write all sessions parsed from one file in one transaction.
    pub async fn write_file_sessions(&self, sessions: &[(Session, Vec<Message>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (session, messages) in sessions {
            upsert_session_on(&mut tx, session).await?;
            replace_messages_on(&mut tx, &session.id, messages).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Get messages for a session in ordinal order, with their tool calls.
    pub async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY ordinal")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        let call_rows =
            sqlx::query("SELECT * FROM tool_calls WHERE session_id = ? ORDER BY message_id, position")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;

        let mut calls_by_message: HashMap<i64, Vec<ToolCall>> = HashMap::new();
        for row in &call_rows {
            calls_by_message
                .entry(row.get("message_id"))
                .or_default()
                .push(tool_call_from_row(row));
        }

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut message = message_from_row(row)?;
            let id: i64 = row.get("id");
            message.tool_calls = calls_by_message.remove(&id).unwrap_or_default();
            messages.push(message);
        }
        Ok(messages)
    }

    // =========================================================================
    // Skipped files
    // =========================================================================

    /// Load the skip cache.
    pub async fn load_skipped_files(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT file_path, file_mtime FROM skipped_files")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("file_path"), row.get("file_mtime")))
            .collect())
    }

    /// Replace the skip cache with the given entries.
    pub async fn replace_skipped_files(&self, entries: &HashMap<String, i64>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM skipped_files")
            .execute(&mut *tx)
            .await?;
        for (path, mtime) in entries {
            sqlx::query("INSERT INTO skipped_files (file_path, file_mtime) VALUES (?, ?)")
                .bind(path)
                .bind(mtime)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn upsert_session(&self, session: &Session) -> Result<()> {
        Database::upsert_session(self, session).await
    }

    async fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        Database::replace_messages(self, session_id, messages).await
    }

    async fn write_session(&self, session: &Session, messages: &[Message]) -> Result<()> {
        Database::write_session(self, session, messages).await
    }

    async fn write_file_sessions(&self, sessions: &[(Session, Vec<Message>)]) -> Result<()> {
        Database::write_file_sessions(self, sessions).await
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>> {
        self.get_session(id).await
    }

    async fn last_known_fingerprint(&self, file_path: &str) -> Result<Option<FileFingerprint>> {
        self.file_fingerprint(file_path).await
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn load_skipped_files(&self) -> Result<HashMap<String, i64>> {
        Database::load_skipped_files(self).await
    }

    async fn replace_skipped_files(&self, entries: &HashMap<String, i64>) -> Result<()> {
        Database::replace_skipped_files(self, entries).await
    }
}

async fn upsert_session_on(conn: &mut SqliteConnection, session: &Session) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, project, machine, agent, first_message, started_at, ended_at,
            message_count, user_message_count, parent_session_id, relationship_type,
            file_path, file_size, file_mtime, file_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            project = excluded.project,
            machine = excluded.machine,
            agent = excluded.agent,
            first_message = excluded.first_message,
            started_at = excluded.started_at,
            ended_at = excluded.ended_at,
            message_count = excluded.message_count,
            user_message_count = excluded.user_message_count,
            parent_session_id = excluded.parent_session_id,
            relationship_type = excluded.relationship_type,
            file_path = excluded.file_path,
            file_size = excluded.file_size,
            file_mtime = excluded.file_mtime,
            file_hash = excluded.file_hash
        "#,
    )
    .bind(&session.id)
    .bind(&session.project)
    .bind(&session.machine)
    .bind(session.agent.as_str())
    .bind(&session.first_message)
    .bind(session.started_at.map(|dt| dt.timestamp_millis()))
    .bind(session.ended_at.map(|dt| dt.timestamp_millis()))
    .bind(session.message_count)
    .bind(session.user_message_count)
    .bind(&session.parent_session_id)
    .bind(session.relationship.map(Relationship::as_str))
    .bind(&session.file_path)
    .bind(session.file_size)
    .bind(session.file_mtime)
    .bind(&session.file_hash)
    .bind(
        session
            .created_at
            .unwrap_or_else(Utc::now)
            .timestamp_millis(),
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn replace_messages_on(
    conn: &mut SqliteConnection,
    session_id: &str,
    messages: &[Message],
) -> Result<()> {
    sqlx::query("DELETE FROM tool_calls WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM messages WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;

    for msg in messages {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (session_id, ordinal, role, content, timestamp,
                has_thinking, has_tool_use, content_length)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(msg.ordinal)
        .bind(msg.role.to_string())
        .bind(&msg.content)
        .bind(msg.timestamp.map(|dt| dt.timestamp_millis()))
        .bind(msg.has_thinking)
        .bind(msg.has_tool_use)
        .bind(msg.content_length)
        .execute(&mut *conn)
        .await?;
        let message_id = result.last_insert_rowid();

        for (position, call) in msg.tool_calls.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO tool_calls (message_id, session_id, position, tool_name, category,
                    tool_use_id, input_json, skill_name, result_content_length, subagent_session_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(message_id)
            .bind(session_id)
            .bind(i64::try_from(position).unwrap_or(i64::MAX))
            .bind(&call.tool_name)
            .bind(&call.category)
            .bind(&call.tool_use_id)
            .bind(&call.input_json)
            .bind(&call.skill_name)
            .bind(call.result_content_length)
            .bind(&call.subagent_session_id)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

fn millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let agent: String = row.get("agent");
    let agent = agent.parse::<AgentKind>().map_err(Error::Other)?;

    Ok(Session {
        id: row.get("id"),
        project: row.get("project"),
        machine: row.get("machine"),
        agent,
        first_message: row.get("first_message"),
        started_at: millis_to_datetime(row.get("started_at")),
        ended_at: millis_to_datetime(row.get("ended_at")),
        message_count: row.get("message_count"),
        user_message_count: row.get("user_message_count"),
        parent_session_id: row.get("parent_session_id"),
        relationship: row
            .get::<Option<String>, _>("relationship_type")
            .as_deref()
            .and_then(Relationship::parse),
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        file_mtime: row.get("file_mtime"),
        file_hash: row.get("file_hash"),
        created_at: millis_to_datetime(row.get("created_at")),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    let role = MessageRole::parse(&role)
        .ok_or_else(|| Error::Other(format!("unknown message role '{role}'")))?;

    Ok(Message {
        session_id: row.get("session_id"),
        ordinal: row.get("ordinal"),
        role,
        content: row.get("content"),
        timestamp: millis_to_datetime(row.get("timestamp")),
        has_thinking: row.get("has_thinking"),
        has_tool_use: row.get("has_tool_use"),
        content_length: row.get("content_length"),
        tool_calls: Vec::new(),
    })
}

fn tool_call_from_row(row: &SqliteRow) -> ToolCall {
    ToolCall {
        tool_name: row.get("tool_name"),
        category: row.get("category"),
        tool_use_id: row.get("tool_use_id"),
        input_json: row.get("input_json"),
        skill_name: row.get("skill_name"),
        result_content_length: row.get("result_content_length"),
        subagent_session_id: row.get("subagent_session_id"),
    }
}
