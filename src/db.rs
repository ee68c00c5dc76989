use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

use crate::allocation::AllocationService;
use crate::error::{AllocationError, StoreError};
use crate::record::{sort_document, Payload, Record, Scope};
use crate::status::Status;
use crate::store::{RecordStore, TrackerStore};
use crate::tracker::{Tracker, TrackerEntry, TrackerState};

/// Event for audit trail: every document and tracker write is recorded
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Documents Table (row present = document exists, even with no records)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            owner TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            record_count INTEGER NOT NULL,
            written_at TEXT NOT NULL,
            PRIMARY KEY (owner, year, month)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            owner TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            id TEXT NOT NULL,
            date TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT,
            body TEXT NOT NULL,
            PRIMARY KEY (owner, year, month, id)
        )",
        [],
    )?;

    // ==========================================================================
    // Trackers
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS trackers (
            owner TEXT NOT NULL,
            year INTEGER NOT NULL,
            consumed INTEGER NOT NULL,
            pushed_consumed INTEGER NOT NULL DEFAULT 0,
            stale_months TEXT NOT NULL,
            synced_at TEXT,
            PRIMARY KEY (owner, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracker_entries (
            owner TEXT NOT NULL,
            year INTEGER NOT NULL,
            date TEXT NOT NULL,
            kind TEXT NOT NULL,
            state TEXT NOT NULL,
            note TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY (owner, year, date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS allocations (
            owner TEXT PRIMARY KEY,
            balance INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_date ON records(owner, date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> std::result::Result<(), StoreError> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> std::result::Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
                Ok(Event {
                    event_id,
                    timestamp: parse_timestamp(&timestamp)?,
                    event_type,
                    entity_type,
                    entity_id,
                    data: serde_json::from_str(&data)?,
                    actor,
                })
            },
        )
        .collect()
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("bad date {:?}: {}", raw, e)))
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// One side of the documents backed by a SQLite file
pub struct SqliteStore {
    conn: Mutex<Connection>,

    /// Recorded as the event actor ("local", "remote", ...)
    actor: String,
}

impl SqliteStore {
    pub fn open(path: &Path, actor: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        setup_database(&conn).context("Failed to set up database schema")?;
        Ok(Self::from_connection(conn, actor))
    }

    pub fn open_in_memory(actor: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        setup_database(&conn).context("Failed to set up database schema")?;
        Ok(Self::from_connection(conn, actor))
    }

    fn from_connection(conn: Connection, actor: &str) -> Self {
        SqliteStore {
            conn: Mutex::new(conn),
            actor: actor.to_string(),
        }
    }

    /// Audit events for one scope, newest first
    pub fn events_for(&self, scope: &Scope) -> std::result::Result<Vec<Event>, StoreError> {
        let conn = self.conn.lock();
        get_events_for_entity(&conn, "document", &scope.to_string())
    }

    pub fn verify_count(&self) -> std::result::Result<i64, StoreError> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl RecordStore for SqliteStore {
    fn read(&self, scope: &Scope) -> std::result::Result<Option<Vec<Record>>, StoreError> {
        let conn = self.conn.lock();
        let key = params![scope.owner, scope.period.year, scope.period.month];

        let exists = conn
            .query_row(
                "SELECT record_count FROM documents WHERE owner = ?1 AND year = ?2 AND month = ?3",
                key,
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT body FROM records
             WHERE owner = ?1 AND year = ?2 AND month = ?3
             ORDER BY date, id",
        )?;

        let bodies = stmt
            .query_map(key, |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = bodies
            .iter()
            .map(|body| serde_json::from_str::<Record>(body))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        sort_document(&mut records);
        Ok(Some(records))
    }

    fn write(&self, scope: &Scope, records: &[Record]) -> std::result::Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let key = params![scope.owner, scope.period.year, scope.period.month];

        tx.execute(
            "DELETE FROM records WHERE owner = ?1 AND year = ?2 AND month = ?3",
            key,
        )?;

        for record in records {
            let body = serde_json::to_string(record)?;
            tx.execute(
                "INSERT INTO records (owner, year, month, id, date, kind, status, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    scope.owner,
                    scope.period.year,
                    scope.period.month,
                    record.id,
                    record.date().format("%Y-%m-%d").to_string(),
                    record.kind(),
                    record.status.map(|s| s.as_str()),
                    body,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO documents (owner, year, month, record_count, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(owner, year, month)
             DO UPDATE SET record_count = excluded.record_count, written_at = excluded.written_at",
            params![
                scope.owner,
                scope.period.year,
                scope.period.month,
                records.len() as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let event = Event::new(
            "document_written",
            "document",
            &scope.to_string(),
            serde_json::json!({
                "records": records.len(),
                "conflicts": records.iter().filter(|r| r.status == Some(Status::AdminCheck)).count(),
            }),
            &self.actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;

        debug!(scope = %scope, side = %self.actor, records = records.len(), "document written");
        Ok(())
    }
}

impl TrackerStore for SqliteStore {
    fn read_tracker(&self, owner: &str, year: i32) -> std::result::Result<Option<Tracker>, StoreError> {
        let conn = self.conn.lock();

        let header = conn
            .query_row(
                "SELECT consumed, pushed_consumed, stale_months, synced_at FROM trackers
                 WHERE owner = ?1 AND year = ?2",
                params![owner, year],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((consumed, pushed_consumed, stale_json, synced_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT date, kind, state, note, updated_at FROM tracker_entries
             WHERE owner = ?1 AND year = ?2
             ORDER BY date",
        )?;

        let rows = stmt
            .query_map(params![owner, year], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = BTreeMap::new();
        for (date, kind, state, note, updated_at) in rows {
            let date = parse_date(&date)?;
            let state = TrackerState::parse(&state)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown tracker state {:?}", state)))?;
            entries.insert(
                date,
                TrackerEntry {
                    date,
                    kind,
                    state,
                    note,
                    updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
                },
            );
        }

        let stale_months: BTreeSet<u32> = serde_json::from_str(&stale_json)?;

        Ok(Some(Tracker {
            owner: owner.to_string(),
            year,
            entries,
            consumed,
            pushed_consumed,
            stale_months,
            synced_at: synced_at.as_deref().map(parse_timestamp).transpose()?,
        }))
    }

    fn write_tracker(&self, tracker: &Tracker) -> std::result::Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM tracker_entries WHERE owner = ?1 AND year = ?2",
            params![tracker.owner, tracker.year],
        )?;

        for entry in tracker.entries.values() {
            tx.execute(
                "INSERT INTO tracker_entries (owner, year, date, kind, state, note, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tracker.owner,
                    tracker.year,
                    entry.date.format("%Y-%m-%d").to_string(),
                    entry.kind,
                    entry.state.as_str(),
                    entry.note,
                    entry.updated_at.map(|dt| dt.to_rfc3339()),
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO trackers (owner, year, consumed, pushed_consumed, stale_months, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(owner, year)
             DO UPDATE SET consumed = excluded.consumed,
                           pushed_consumed = excluded.pushed_consumed,
                           stale_months = excluded.stale_months,
                           synced_at = excluded.synced_at",
            params![
                tracker.owner,
                tracker.year,
                tracker.consumed,
                tracker.pushed_consumed,
                serde_json::to_string(&tracker.stale_months)?,
                tracker.synced_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;

        let event = Event::new(
            "tracker_written",
            "tracker",
            &format!("{}/{}", tracker.owner, tracker.year),
            serde_json::json!({
                "entries": tracker.entries.len(),
                "consumed": tracker.consumed,
                "pushed_consumed": tracker.pushed_consumed,
                "stale_months": tracker.stale_months,
            }),
            &self.actor,
        );
        insert_event(&tx, &event)?;

        tx.commit()?;
        Ok(())
    }
}

impl AllocationService for SqliteStore {
    fn get_balance(&self, owner: &str) -> std::result::Result<i64, AllocationError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT balance FROM allocations WHERE owner = ?1",
            params![owner],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| AllocationError::Unavailable(e.to_string()))?
        .ok_or_else(|| AllocationError::UnknownOwner(owner.to_string()))
    }

    fn set_balance(&self, owner: &str, balance: i64) -> std::result::Result<(), AllocationError> {
        let conn = self.conn.lock();
        let unavailable = |e: rusqlite::Error| AllocationError::Unavailable(e.to_string());

        conn.execute(
            "INSERT INTO allocations (owner, balance, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at",
            params![owner, balance, Utc::now().to_rfc3339()],
        )
        .map_err(unavailable)?;

        let event = Event::new(
            "balance_set",
            "allocation",
            owner,
            serde_json::json!({ "balance": balance }),
            &self.actor,
        );
        insert_event(&conn, &event).map_err(|e| AllocationError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// Load a document from CSV.
///
/// Columns `date` (YYYY-MM-DD) and `kind` are required; `id` and `status` are
/// optional (an empty id gets a generated uuid, an empty status stays
/// untagged). Any other non-empty column becomes a payload field.
pub fn load_csv(csv_path: &Path, owner: &str) -> Result<Vec<Record>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut records = Vec::new();

    for (line, result) in rdr.deserialize::<HashMap<String, String>>().enumerate() {
        let mut row = result.with_context(|| format!("Failed to read CSV row {}", line + 1))?;

        let date = row
            .remove("date")
            .with_context(|| format!("Row {} has no date column", line + 1))?;
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .with_context(|| format!("Row {} has a malformed date {:?}", line + 1, date))?;
        let kind = row
            .remove("kind")
            .with_context(|| format!("Row {} has no kind column", line + 1))?;

        let status = match row.remove("status").filter(|s| !s.trim().is_empty()) {
            Some(tag) => Some(
                tag.trim()
                    .parse::<Status>()
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("Row {} has an unknown status", line + 1))?,
            ),
            None => None,
        };

        let id = row.remove("id").filter(|s| !s.trim().is_empty());

        let mut payload = Payload::new(date, kind.trim());
        let mut extra: Vec<(String, String)> = row.into_iter().filter(|(_, v)| !v.is_empty()).collect();
        extra.sort();
        for (key, value) in extra {
            payload = payload.with_field(key, serde_json::Value::String(value));
        }

        let mut record = match id {
            Some(id) => Record::new(id.trim(), owner, payload),
            None => Record::generate(owner, payload),
        };
        record.status = status;
        record.created_at = Some(Utc::now());

        records.push(record);
    }

    sort_document(&mut records);
    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================
