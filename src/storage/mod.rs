use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// Queries slower than this are logged at WARN level.
const SLOW_QUERY_THRESHOLD: std::time::Duration = std::time::Duration::from_millis(100);

/// Current UTC timestamp in the canonical column format.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SessionRow {
    pub id: String,
    pub requester_id: String,
    /// NULL until assignment; an ended session retains its last counselor.
    pub counselor_id: Option<String>,
    pub status: String,
    /// Requester's wellness level captured at creation time.
    pub initial_wellness: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct MessageRow {
    /// Persisted creation order; realtime fan-out follows this.
    pub seq: i64,
    pub id: String,
    pub session_id: String,
    pub sender_role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CheckinRow {
    pub id: String,
    pub requester_id: String,
    pub mood: i64,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SafetyFlagRow {
    pub id: String,
    pub requester_id: String,
    /// `"rule"` (deterministic threshold) | `"classifier"`.
    pub flag_type: String,
    /// Originating signal: `"mood"` | `"note"` | `"combined"`.
    pub source: String,
    pub context: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct NotificationRow {
    pub id: String,
    pub sender_id: String,
    pub sender_role: String,
    /// NULL + recipient_role 'counselor' = broadcast to any counselor.
    pub recipient_id: Option<String>,
    pub recipient_role: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CounselorRow {
    pub id: String,
    pub display_name: String,
    pub available: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct RequesterRow {
    pub id: String,
    pub display_name: String,
    pub wellness_level: i64,
}

/// Least-loaded selection result.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CounselorLoad {
    pub id: String,
    pub active_count: i64,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self, sqlx::Error> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(sqlx::Error::Io)?;
        let db_path = data_dir.join("havend.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true)
                .log_slow_statements(log::LevelFilter::Warn, SLOW_QUERY_THRESHOLD);

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("src/storage/migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Roster: requesters ──────────────────────────────────────────────────

    /// Ensure a roster row exists for a verified requester principal.
    /// First-seen rows start at the neutral wellness level.
    pub async fn ensure_requester(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO requesters (id) VALUES (?) ON CONFLICT(id) DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_requester(&self, id: &str) -> Result<Option<RequesterRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM requesters WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn set_wellness_level(&self, id: &str, level: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE requesters SET wellness_level = ? WHERE id = ?")
            .bind(level)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Roster: counselors ──────────────────────────────────────────────────

    /// Register a counselor or update their availability.
    pub async fn upsert_counselor(
        &self,
        id: &str,
        available: bool,
    ) -> Result<CounselorRow, sqlx::Error> {
        sqlx::query(
            "INSERT INTO counselors (id, available) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET available = excluded.available",
        )
        .bind(id)
        .bind(available)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM counselors WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    /// The available counselor carrying the fewest active sessions.
    ///
    /// Ties break on lowest counselor id so the choice is reproducible.
    /// The count is re-derived on every call — callers must not cache it
    /// across the assignment write.
    pub async fn least_loaded_counselor(&self) -> Result<Option<CounselorLoad>, sqlx::Error> {
        sqlx::query_as(
            "SELECT c.id, COUNT(s.id) AS active_count
             FROM counselors c
             LEFT JOIN sessions s ON s.counselor_id = c.id AND s.status = 'active'
             WHERE c.available = 1
             GROUP BY c.id
             ORDER BY active_count ASC, c.id ASC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn count_active_for_counselor(&self, id: &str) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE counselor_id = ? AND status = 'active'")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // ─── Sessions ────────────────────────────────────────────────────────────

    /// Insert a waiting session.
    ///
    /// The partial unique index on open sessions makes this the enforcement
    /// point for "one open session per requester" — a second open session
    /// surfaces as a unique violation, never a silent duplicate.
    pub async fn create_session(
        &self,
        requester_id: &str,
        initial_wellness: i64,
    ) -> Result<SessionRow, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO sessions (id, requester_id, status, initial_wellness, created_at)
             VALUES (?, ?, 'waiting', ?, ?)",
        )
        .bind(&id)
        .bind(requester_id)
        .bind(initial_wellness)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_sessions_all(&self) -> Result<Vec<SessionRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sessions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn list_sessions_for_requester(
        &self,
        requester_id: &str,
    ) -> Result<Vec<SessionRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sessions WHERE requester_id = ? ORDER BY created_at DESC")
            .bind(requester_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn list_sessions_for_counselor(
        &self,
        counselor_id: &str,
    ) -> Result<Vec<SessionRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sessions WHERE counselor_id = ? ORDER BY created_at DESC")
            .bind(counselor_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Atomically claim a waiting session for a counselor.
    ///
    /// The UPDATE only succeeds while the session is still `waiting`, closing
    /// the window between the least-loaded read and the assignment write.
    /// Returns `false` when another caller won the race (or the session moved
    /// on) — a normal condition, not a crash.
    pub async fn claim_session_for_assignment(
        &self,
        id: &str,
        counselor_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "UPDATE sessions SET counselor_id = ?, status = 'active', started_at = ?
             WHERE id = ? AND status = 'waiting'",
        )
        .bind(counselor_id)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Explicit activation of a waiting session (counselor self-claim).
    /// `started_at` is set only if unset.
    pub async fn activate_session(&self, id: &str) -> Result<bool, sqlx::Error> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "UPDATE sessions SET status = 'active', started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status = 'waiting'",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal transition. Only succeeds from `active`.
    pub async fn end_session(&self, id: &str) -> Result<bool, sqlx::Error> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "UPDATE sessions SET status = 'ended', ended_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hard remove; messages cascade.
    pub async fn delete_session(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    pub async fn create_message(
        &self,
        session_id: &str,
        sender_role: &str,
        content: &str,
    ) -> Result<MessageRow, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO messages (id, session_id, sender_role, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(sender_role)
        .bind(content)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM messages WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<MessageRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Messages in persisted creation order (oldest first).
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM messages WHERE session_id = ? ORDER BY seq ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Check-ins ───────────────────────────────────────────────────────────

    pub async fn create_checkin(
        &self,
        requester_id: &str,
        mood: i64,
        note: Option<&str>,
    ) -> Result<CheckinRow, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO checkins (id, requester_id, mood, note, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(requester_id)
        .bind(mood)
        .bind(note)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM checkins WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_checkins(&self, requester_id: &str) -> Result<Vec<CheckinRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM checkins WHERE requester_id = ? ORDER BY created_at DESC")
            .bind(requester_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Mood values inside the trailing window, newest first.
    ///
    /// The cutoff is computed by the caller and bound as a parameter — window
    /// arithmetic never reaches the query text.
    pub async fn moods_since(
        &self,
        requester_id: &str,
        cutoff: &str,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT mood FROM checkins WHERE requester_id = ? AND created_at >= ?
             ORDER BY created_at DESC",
        )
        .bind(requester_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    // ─── Safety flags ────────────────────────────────────────────────────────

    pub async fn create_safety_flag(
        &self,
        requester_id: &str,
        flag_type: &str,
        source: &str,
        context: &str,
    ) -> Result<SafetyFlagRow, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO safety_flags (id, requester_id, flag_type, source, context, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(requester_id)
        .bind(flag_type)
        .bind(source)
        .bind(context)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM safety_flags WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn list_safety_flags_all(&self) -> Result<Vec<SafetyFlagRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM safety_flags ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn list_safety_flags_for(
        &self,
        requester_id: &str,
    ) -> Result<Vec<SafetyFlagRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM safety_flags WHERE requester_id = ? ORDER BY created_at DESC",
        )
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await
    }

    // ─── Notifications ───────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_notification(
        &self,
        sender_id: &str,
        sender_role: &str,
        recipient_id: Option<&str>,
        recipient_role: &str,
        kind: &str,
        title: &str,
        body: &str,
    ) -> Result<NotificationRow, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO notifications
             (id, sender_id, sender_role, recipient_id, recipient_role, kind, title, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(sender_id)
        .bind(sender_role)
        .bind(recipient_id)
        .bind(recipient_role)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn get_notification(
        &self,
        id: &str,
    ) -> Result<Option<NotificationRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_notifications_all(&self) -> Result<Vec<NotificationRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM notifications ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
    }

    /// Records addressed to this counselor directly or via the broadcast address.
    pub async fn list_notifications_for_counselor(
        &self,
        counselor_id: &str,
    ) -> Result<Vec<NotificationRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM notifications
             WHERE recipient_id = ?
                OR (recipient_id IS NULL AND recipient_role = 'counselor')
             ORDER BY created_at DESC",
        )
        .bind(counselor_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Records where the requester is sender or recipient.
    pub async fn list_notifications_for_requester(
        &self,
        requester_id: &str,
    ) -> Result<Vec<NotificationRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM notifications
             WHERE sender_id = ? OR recipient_id = ?
             ORDER BY created_at DESC",
        )
        .bind(requester_id)
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
