//! SQLite store for finished meeting records.
//!
//! One row per session, written at shutdown. The transcript column
//! holds the final window text; analysis holds the closing summary.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

/// A finished meeting as recorded in the database
#[derive(Debug, Clone, Serialize)]
pub struct MeetingRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub status: String,
    pub transcript: String,
    pub analysis: Option<String>,
    pub finding_count: i64,
}

/// Meeting database handle
pub struct MeetingStore {
    conn: Connection,
}

impl MeetingStore {
    /// Open (creating schema if needed)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open meetings database: {}", path.display()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS meetings (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                status TEXT NOT NULL,
                transcript TEXT NOT NULL,
                analysis TEXT,
                finding_count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .context("Failed to create meetings table")?;

        Ok(Self { conn })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS meetings (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                status TEXT NOT NULL,
                transcript TEXT NOT NULL,
                analysis TEXT,
                finding_count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    pub fn insert(&self, record: &MeetingRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO meetings
                 (id, title, created_at, duration_secs, status, transcript, analysis, finding_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.title,
                    record.created_at.to_rfc3339(),
                    record.duration_secs,
                    record.status,
                    record.transcript,
                    record.analysis,
                    record.finding_count,
                ],
            )
            .context("Failed to insert meeting record")?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<MeetingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, created_at, duration_secs, status, transcript, analysis, finding_count
             FROM meetings WHERE id = ?1",
        )?;

        let mut rows = stmt.query_map(params![id], row_to_record)?;
        match rows.next() {
            Some(record) => Ok(Some(record?)),
            None => Ok(None),
        }
    }

    /// All meetings, newest first
    pub fn list(&self) -> Result<Vec<MeetingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, created_at, duration_secs, status, transcript, analysis, finding_count
             FROM meetings ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    /// Substring search over title and transcript
    pub fn search(&self, query: &str) -> Result<Vec<MeetingRecord>> {
        let pattern = format!("%{}%", query);
        let mut stmt = self.conn.prepare(
            "SELECT id, title, created_at, duration_secs, status, transcript, analysis, finding_count
             FROM meetings
             WHERE title LIKE ?1 OR transcript LIKE ?1
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map(params![pattern], row_to_record)?;
        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MeetingRecord> {
    let created_at: String = row.get(2)?;
    Ok(MeetingRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        duration_secs: row.get(3)?,
        status: row.get(4)?,
        transcript: row.get(5)?,
        analysis: row.get(6)?,
        finding_count: row.get(7)?,
    })
}
