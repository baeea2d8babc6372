//! The append-only SQLite event log.
//!
//! Events are written once per tick in one transactional batch; the
//! `id` primary key makes duplicate appends harmless (`INSERT OR
//! IGNORE`), so id uniqueness holds across the whole log. Read paths
//! serve the UI: recent events, per-participant history, and
//! pair-history, paginated stamp-descending with a keyset cursor. The
//! only delete is the bulk cleanup the UI uses to prune noise.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use xiuxian_types::{AvatarId, Event, EventId, MonthStamp};

use crate::DbError;

/// Table and index definitions, applied idempotently on open.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    stamp INTEGER NOT NULL,
    content TEXT NOT NULL,
    participants TEXT NOT NULL,
    is_major INTEGER NOT NULL,
    is_story INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_stamp ON events(stamp);
";

/// A page cursor: the (stamp, rowid) key of the last row served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    stamp: i64,
    rowid: i64,
}

impl Cursor {
    /// Parse the opaque `stamp:rowid` form used on the wire.
    pub fn parse(s: &str) -> Option<Self> {
        let (stamp, rowid) = s.split_once(':')?;
        Some(Self {
            stamp: stamp.parse().ok()?,
            rowid: rowid.parse().ok()?,
        })
    }

    /// Render the opaque wire form.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.stamp, self.rowid)
    }
}

/// One page of events plus the cursor for the next page.
#[derive(Debug, Default)]
pub struct EventPage {
    /// Events, newest first.
    pub events: Vec<Event>,
    /// Cursor for the next page; `None` when this page was the last.
    pub next_cursor: Option<String>,
}

/// Filter on the major flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorFilter {
    /// All events.
    All,
    /// Only events flagged major.
    MajorOnly,
    /// Only events not flagged major.
    MinorOnly,
}

impl MajorFilter {
    /// SQL predicate fragment for this filter.
    const fn predicate(self) -> &'static str {
        match self {
            Self::All => "1 = 1",
            Self::MajorOnly => "is_major = 1",
            Self::MinorOnly => "is_major = 0",
        }
    }
}

/// Parameters for the bulk cleanup operation.
#[derive(Debug, Clone, Copy)]
pub struct Cleanup {
    /// When true, events flagged major survive the purge.
    pub keep_major: bool,
    /// Only purge events strictly before this stamp (all, when absent).
    pub before_stamp: Option<MonthStamp>,
}

/// The append-only event store, backed by one SQLite file per save.
///
/// Cloning is cheap: clones share the same connection pool, which is
/// how the API server queries the log the engine writes.
#[derive(Debug, Clone)]
pub struct EventLog {
    pool: SqlitePool,
}

impl EventLog {
    /// Open (creating if needed) the event database at `path`.
    pub async fn open(path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an in-memory log (tests and throwaway worlds).
    pub async fn open_in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Append a batch of events in one transaction.
    ///
    /// Duplicate ids are ignored, which keeps id uniqueness a property
    /// of the whole log. Returns the number of rows actually inserted.
    pub async fn append_batch(&self, events: &[Event]) -> Result<u64, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;
        for event in events {
            let participants = serde_json::to_string(&event.participants)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO events (id, stamp, content, participants, is_major, is_story)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(event.id.to_string())
            .bind(i64::try_from(event.stamp.0).unwrap_or(i64::MAX))
            .bind(&event.content)
            .bind(participants)
            .bind(i64::from(event.is_major))
            .bind(i64::from(event.is_story))
            .execute(&mut *tx)
            .await?;
            inserted = inserted.saturating_add(result.rows_affected());
        }
        tx.commit().await?;
        debug!(count = inserted, "events appended");
        Ok(inserted)
    }

    /// The most recent `limit` events, newest first (append order).
    pub async fn recent(&self, limit: u32) -> Result<Vec<Event>, DbError> {
        let rows = sqlx::query(
            "SELECT rowid, id, stamp, content, participants, is_major, is_story
             FROM events ORDER BY rowid DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_event).collect()
    }

    /// Events involving one participant, stamp-descending, paginated.
    pub async fn by_participant(
        &self,
        participant: AvatarId,
        filter: MajorFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<EventPage, DbError> {
        let pattern = participant_pattern(participant);
        self.page(
            format!(
                "participants LIKE ?1 AND {}",
                filter.predicate()
            ),
            vec![pattern],
            cursor,
            limit,
        )
        .await
    }

    /// Events involving both of two participants, stamp-descending,
    /// paginated.
    pub async fn between(
        &self,
        a: AvatarId,
        b: AvatarId,
        filter: MajorFilter,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<EventPage, DbError> {
        self.page(
            format!(
                "participants LIKE ?1 AND participants LIKE ?2 AND {}",
                filter.predicate()
            ),
            vec![participant_pattern(a), participant_pattern(b)],
            cursor,
            limit,
        )
        .await
    }

    /// Bulk cleanup. Returns the number of deleted rows.
    pub async fn cleanup(&self, params: Cleanup) -> Result<u64, DbError> {
        let before = params
            .before_stamp
            .map_or(i64::MAX, |stamp| i64::try_from(stamp.0).unwrap_or(i64::MAX));
        let result = sqlx::query(
            "DELETE FROM events WHERE stamp < ?1 AND (?2 = 0 OR is_major = 0)",
        )
        .bind(before)
        .bind(i64::from(params.keep_major))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Total number of stored events.
    pub async fn count(&self) -> Result<u64, DbError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM events")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Shared keyset-paginated query core.
    async fn page(
        &self,
        predicate: String,
        patterns: Vec<String>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<EventPage, DbError> {
        let cursor = cursor.and_then(Cursor::parse);
        let (cursor_stamp, cursor_rowid) = cursor.map_or((i64::MAX, i64::MAX), |c| (c.stamp, c.rowid));

        // Keyset pagination over (stamp DESC, rowid DESC). Parameter
        // slots ?1/?2 hold the participant patterns (single-participant
        // queries bind an always-true pattern in ?2's place via the
        // predicate itself).
        let sql = format!(
            "SELECT rowid, id, stamp, content, participants, is_major, is_story
             FROM events
             WHERE ({predicate})
               AND (stamp < ?8 OR (stamp = ?8 AND rowid < ?9))
             ORDER BY stamp DESC, rowid DESC
             LIMIT ?7"
        );

        let mut query = sqlx::query(&sql);
        for pattern in &patterns {
            query = query.bind(pattern);
        }
        // Pad unused pattern slots so the numbered binds line up.
        for _ in patterns.len()..6 {
            query = query.bind("");
        }
        let rows = query
            .bind(i64::from(limit))
            .bind(cursor_stamp)
            .bind(cursor_rowid)
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        let mut last_key: Option<Cursor> = None;
        for row in &rows {
            events.push(row_to_event(row)?);
            last_key = Some(Cursor {
                stamp: row.try_get("stamp")?,
                rowid: row.try_get("rowid")?,
            });
        }
        let next_cursor = if rows.len() == limit as usize {
            last_key.map(|c| c.encode())
        } else {
            None
        };
        Ok(EventPage {
            events,
            next_cursor,
        })
    }
}

/// LIKE pattern matching one participant id inside the JSON array text.
fn participant_pattern(id: AvatarId) -> String {
    format!("%\"{id}\"%")
}

/// Decode one database row into an [`Event`].
fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event, DbError> {
    let id_text: String = row.try_get("id")?;
    let id = EventId::parse(&id_text)
        .map_err(|_| DbError::Corrupt(format!("bad event id: {id_text}")))?;
    let stamp: i64 = row.try_get("stamp")?;
    let participants_text: String = row.try_get("participants")?;
    let participants: Vec<AvatarId> = serde_json::from_str(&participants_text)?;
    let is_major: i64 = row.try_get("is_major")?;
    let is_story: i64 = row.try_get("is_story")?;
    Ok(Event {
        id,
        stamp: MonthStamp(u64::try_from(stamp).unwrap_or(0)),
        content: row.try_get("content")?,
        participants,
        is_major: is_major != 0,
        is_story: is_story != 0,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(stamp: u64, content: &str, participants: Vec<AvatarId>) -> Event {
        Event::new(MonthStamp(stamp), content, participants)
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let log = EventLog::open_in_memory().await.unwrap();
        let a = AvatarId::new();
        let events = vec![
            event(1, "first", vec![a]),
            event(2, "second", vec![]),
        ];
        assert_eq!(log.append_batch(&events).await.unwrap(), 2);

        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent.first().unwrap().content, "second");
    }

    #[tokio::test]
    async fn duplicate_ids_are_ignored() {
        let log = EventLog::open_in_memory().await.unwrap();
        let e = event(1, "once", vec![]);
        assert_eq!(log.append_batch(&[e.clone()]).await.unwrap(), 1);
        assert_eq!(log.append_batch(&[e]).await.unwrap(), 0);
        assert_eq!(log.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn participant_query_pages_stamp_descending() {
        let log = EventLog::open_in_memory().await.unwrap();
        let a = AvatarId::new();
        let b = AvatarId::new();
        let mut batch = Vec::new();
        for stamp in 1..=5_u64 {
            batch.push(event(stamp, &format!("a {stamp}"), vec![a]));
            batch.push(event(stamp, &format!("b {stamp}"), vec![b]));
        }
        log.append_batch(&batch).await.unwrap();

        let page1 = log.by_participant(a, MajorFilter::All, None, 3).await.unwrap();
        assert_eq!(page1.events.len(), 3);
        assert!(page1.events.iter().all(|e| e.participants.contains(&a)));
        assert_eq!(page1.events.first().unwrap().stamp, MonthStamp(5));
        let cursor = page1.next_cursor.expect("more pages remain");

        let page2 = log
            .by_participant(a, MajorFilter::All, Some(&cursor), 3)
            .await
            .unwrap();
        assert_eq!(page2.events.len(), 2);
        assert_eq!(page2.events.last().unwrap().stamp, MonthStamp(1));
        assert!(page2.next_cursor.is_none());
    }

    #[tokio::test]
    async fn pair_query_requires_both_participants() {
        let log = EventLog::open_in_memory().await.unwrap();
        let a = AvatarId::new();
        let b = AvatarId::new();
        log.append_batch(&[
            event(1, "a alone", vec![a]),
            event(2, "both", vec![a, b]),
            event(3, "b alone", vec![b]),
        ])
        .await
        .unwrap();

        let page = log.between(a, b, MajorFilter::All, None, 10).await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events.first().unwrap().content, "both");
    }

    #[tokio::test]
    async fn major_filter_variants() {
        let log = EventLog::open_in_memory().await.unwrap();
        let a = AvatarId::new();
        let mut major = event(1, "major", vec![a]);
        major.is_major = true;
        log.append_batch(&[major, event(2, "minor", vec![a])]).await.unwrap();

        let majors = log.by_participant(a, MajorFilter::MajorOnly, None, 10).await.unwrap();
        assert_eq!(majors.events.len(), 1);
        assert!(majors.events.first().unwrap().is_major);

        let minors = log.by_participant(a, MajorFilter::MinorOnly, None, 10).await.unwrap();
        assert_eq!(minors.events.len(), 1);
        assert!(!minors.events.first().unwrap().is_major);
    }

    #[tokio::test]
    async fn cleanup_can_spare_major_events() {
        let log = EventLog::open_in_memory().await.unwrap();
        let mut major = event(1, "keep me", vec![]);
        major.is_major = true;
        log.append_batch(&[major, event(2, "noise", vec![]), event(9, "recent noise", vec![])])
            .await
            .unwrap();

        let deleted = log
            .cleanup(Cleanup {
                keep_major: true,
                before_stamp: Some(MonthStamp(5)),
            })
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = log.recent(10).await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn cursor_roundtrip() {
        let cursor = Cursor { stamp: 42, rowid: 7 };
        assert_eq!(Cursor::parse(&cursor.encode()), Some(cursor));
        assert_eq!(Cursor::parse("garbage"), None);
    }
}
