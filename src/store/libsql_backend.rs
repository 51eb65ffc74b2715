//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Multi-statement writes are
//! serialized through `write_lock` so a poll cycle and a reconciliation
//! never interleave inside one logical write.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::tracker::model::{ChannelId, MergeEvent, NotificationId, PrState, PullRequest};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp text. Fixed millisecond precision keeps lexical
/// order equal to chronological order.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    Err(DatabaseError::Serialization(format!(
        "unparseable timestamp '{s}'"
    )))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.as_deref().map(parse_datetime).transpose()
}

fn parse_channel_id(s: &str) -> Result<ChannelId, DatabaseError> {
    s.parse()
        .map_err(|e| DatabaseError::Serialization(format!("channel_id '{s}': {e}")))
}

fn parse_notification_id(s: &str) -> Result<NotificationId, DatabaseError> {
    s.parse()
        .map_err(|e| DatabaseError::Serialization(format!("notification_id '{s}': {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Column order matches `PR_COLUMNS`:
/// 0:message_id, 1:subsystem, 2:subject, 3:sender, 4:submitted_at, 5:state,
/// 6:merge_commit_hash, 7:merge_url, 8:merged_at, 9:thread_refs
fn row_to_pull_request(row: &libsql::Row) -> Result<PullRequest, DatabaseError> {
    let get_text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("pull_requests column {idx}: {e}")))
    };

    let state_str = get_text(5)?;
    let refs_str = get_text(9)?;
    let thread_refs: BTreeSet<String> = serde_json::from_str(&refs_str)
        .map_err(|e| DatabaseError::Serialization(format!("thread_refs: {e}")))?;

    Ok(PullRequest {
        message_id: get_text(0)?,
        subsystem: get_text(1)?,
        subject: get_text(2)?,
        sender: get_text(3)?,
        submitted_at: parse_datetime(&get_text(4)?)?,
        state: state_str
            .parse::<PrState>()
            .map_err(DatabaseError::Serialization)?,
        merge_commit_hash: row.get::<String>(6).ok(),
        merge_url: row.get::<String>(7).ok(),
        merged_at: parse_optional_datetime(row.get::<String>(8).ok())?,
        thread_refs,
    })
}

/// Column order matches `UNLINKED_COLUMNS`.
fn row_to_merge(row: &libsql::Row) -> Result<MergeEvent, DatabaseError> {
    let get_text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("unlinked_merges column {idx}: {e}")))
    };
    let refs: Vec<String> = serde_json::from_str(&get_text(1)?)
        .map_err(|e| DatabaseError::Serialization(format!("refs: {e}")))?;

    Ok(MergeEvent {
        confirmation_id: get_text(0)?,
        refs,
        merge_commit_hash: get_text(2)?,
        merge_url: get_text(3)?,
        merged_at: parse_datetime(&get_text(4)?)?,
    })
}

async fn collect_pull_requests(mut rows: libsql::Rows) -> Result<Vec<PullRequest>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("read pull_requests"))? {
        out.push(row_to_pull_request(&row)?);
    }
    Ok(out)
}

// ── Trait implementation ────────────────────────────────────────────

const PR_COLUMNS: &str = "p.message_id, p.subsystem, p.subject, p.sender, p.submitted_at, p.state, p.merge_commit_hash, p.merge_url, p.merged_at, p.thread_refs";

const UNLINKED_COLUMNS: &str = "u.confirmation_id, u.refs, u.merge_commit_hash, u.merge_url, u.merged_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Pull requests ───────────────────────────────────────────────

    async fn insert_pull_request(&self, pr: &PullRequest) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let refs_json = serde_json::to_string(&pr.thread_refs)
            .map_err(|e| DatabaseError::Serialization(format!("thread_refs: {e}")))?;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("insert_pull_request begin"))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO pull_requests (message_id, subsystem, subject, sender,
                    submitted_at, state, merge_commit_hash, merge_url, merged_at, thread_refs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    pr.message_id.as_str(),
                    pr.subsystem.as_str(),
                    pr.subject.as_str(),
                    pr.sender.as_str(),
                    format_timestamp(&pr.submitted_at),
                    pr.state.as_str(),
                    opt_text(pr.merge_commit_hash.as_deref()),
                    opt_text(pr.merge_url.as_deref()),
                    opt_text(pr.merged_at.as_ref().map(format_timestamp).as_deref()),
                    refs_json,
                ],
            )
            .await
            .map_err(query_err("insert_pull_request"))?;

        if inserted == 0 {
            return Ok(false);
        }

        for ref_id in &pr.thread_refs {
            tx.execute(
                "INSERT OR IGNORE INTO pull_request_refs (ref_id, message_id) VALUES (?1, ?2)",
                params![ref_id.as_str(), pr.message_id.as_str()],
            )
            .await
            .map_err(query_err("insert_pull_request refs"))?;
        }

        tx.commit()
            .await
            .map_err(query_err("insert_pull_request commit"))?;

        debug!(message_id = %pr.message_id, refs = pr.thread_refs.len(), "Pull request inserted into DB");
        Ok(true)
    }

    async fn get_pull_request(
        &self,
        message_id: &str,
    ) -> Result<Option<PullRequest>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {PR_COLUMNS} FROM pull_requests p WHERE p.message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(query_err("get_pull_request"))?;

        Ok(collect_pull_requests(rows).await?.into_iter().next())
    }

    async fn find_pull_request_by_thread_ref(
        &self,
        ref_id: &str,
    ) -> Result<Option<PullRequest>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PR_COLUMNS} FROM pull_requests p
                     JOIN pull_request_refs r ON r.message_id = p.message_id
                     WHERE r.ref_id = ?1
                     ORDER BY p.submitted_at ASC, p.message_id ASC LIMIT 1"
                ),
                params![ref_id],
            )
            .await
            .map_err(query_err("find_pull_request_by_thread_ref"))?;

        Ok(collect_pull_requests(rows).await?.into_iter().next())
    }

    async fn mark_merged(
        &self,
        message_id: &str,
        merge: &MergeEvent,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let updated = self
            .conn()
            .execute(
                "UPDATE pull_requests
                 SET state = 'merged', merge_commit_hash = ?1, merge_url = ?2, merged_at = ?3
                 WHERE message_id = ?4 AND state = 'pending'",
                params![
                    merge.merge_commit_hash.as_str(),
                    merge.merge_url.as_str(),
                    format_timestamp(&merge.merged_at),
                    message_id,
                ],
            )
            .await
            .map_err(query_err("mark_merged"))?;

        debug!(message_id, applied = updated > 0, "Merge state written");
        Ok(updated > 0)
    }

    async fn list_pending_pull_requests(&self) -> Result<Vec<PullRequest>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PR_COLUMNS} FROM pull_requests p WHERE p.state = 'pending'
                     ORDER BY p.submitted_at ASC, p.message_id ASC"
                ),
                (),
            )
            .await
            .map_err(query_err("list_pending_pull_requests"))?;

        collect_pull_requests(rows).await
    }

    async fn count_pull_requests(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM pull_requests", ())
            .await
            .map_err(query_err("count_pull_requests"))?;

        match rows.next().await.map_err(query_err("count_pull_requests"))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(query_err("count_pull_requests"))?;
                Ok(count as usize)
            }
            None => Ok(0),
        }
    }

    async fn evict_oldest_pull_requests(&self, keep: usize) -> Result<usize, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(query_err("evict begin"))?;

        let deleted = tx
            .execute(
                "DELETE FROM pull_requests WHERE message_id NOT IN (
                    SELECT message_id FROM pull_requests
                    ORDER BY submitted_at DESC, message_id DESC LIMIT ?1
                 )",
                params![keep as i64],
            )
            .await
            .map_err(query_err("evict pull_requests"))?;

        if deleted > 0 {
            tx.execute(
                "DELETE FROM pull_request_refs
                 WHERE message_id NOT IN (SELECT message_id FROM pull_requests)",
                (),
            )
            .await
            .map_err(query_err("evict pull_request_refs"))?;
            tx.execute(
                "DELETE FROM message_map
                 WHERE message_id NOT IN (SELECT message_id FROM pull_requests)",
                (),
            )
            .await
            .map_err(query_err("evict message_map"))?;
        }

        tx.commit().await.map_err(query_err("evict commit"))?;

        if deleted > 0 {
            info!(count = deleted, keep, "Evicted oldest pull requests");
        }
        Ok(deleted as usize)
    }

    // ── Unlinked merge confirmations ────────────────────────────────

    async fn insert_unlinked_merge(&self, merge: &MergeEvent) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let refs_json = serde_json::to_string(&merge.refs)
            .map_err(|e| DatabaseError::Serialization(format!("refs: {e}")))?;

        self.conn()
            .execute(
                "INSERT OR IGNORE INTO unlinked_merges
                    (confirmation_id, refs, merge_commit_hash, merge_url, merged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    merge.confirmation_id.as_str(),
                    refs_json,
                    merge.merge_commit_hash.as_str(),
                    merge.merge_url.as_str(),
                    format_timestamp(&merge.merged_at),
                ],
            )
            .await
            .map_err(query_err("insert_unlinked_merge"))?;
        Ok(())
    }

    async fn find_unlinked_merge(
        &self,
        ids: &[String],
    ) -> Result<Option<MergeEvent>, DatabaseError> {
        if ids.is_empty() {
            return Ok(None);
        }
        let ids_json = serde_json::to_string(ids)
            .map_err(|e| DatabaseError::Serialization(format!("ids: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {UNLINKED_COLUMNS} FROM unlinked_merges u
                     WHERE EXISTS (
                        SELECT 1 FROM json_each(u.refs) j
                        WHERE j.value IN (SELECT value FROM json_each(?1))
                     )
                     ORDER BY u.merged_at ASC, u.confirmation_id ASC LIMIT 1"
                ),
                params![ids_json],
            )
            .await
            .map_err(query_err("find_unlinked_merge"))?;

        match rows.next().await.map_err(query_err("find_unlinked_merge"))? {
            Some(row) => Ok(Some(row_to_merge(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_unlinked_merge(&self, confirmation_id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM unlinked_merges WHERE confirmation_id = ?1",
                params![confirmation_id],
            )
            .await
            .map_err(query_err("delete_unlinked_merge"))?;
        Ok(deleted > 0)
    }

    async fn list_unlinked_merges(&self) -> Result<Vec<MergeEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {UNLINKED_COLUMNS} FROM unlinked_merges u ORDER BY u.merged_at DESC"
                ),
                (),
            )
            .await
            .map_err(query_err("list_unlinked_merges"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_unlinked_merges"))? {
            out.push(row_to_merge(&row)?);
        }
        Ok(out)
    }

    async fn prune_unlinked_merges(&self, keep: usize) -> Result<usize, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM unlinked_merges WHERE confirmation_id NOT IN (
                    SELECT confirmation_id FROM unlinked_merges
                    ORDER BY merged_at DESC, confirmation_id DESC LIMIT ?1
                 )",
                params![keep as i64],
            )
            .await
            .map_err(query_err("prune_unlinked_merges"))?;
        Ok(deleted as usize)
    }

    // ── Notification mappings ───────────────────────────────────────

    async fn upsert_mapping(
        &self,
        message_id: &str,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let now = format_timestamp(&Utc::now());
        self.conn()
            .execute(
                "INSERT INTO message_map (message_id, channel_id, notification_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (message_id, channel_id)
                 DO UPDATE SET notification_id = excluded.notification_id,
                               updated_at = excluded.updated_at",
                params![
                    message_id,
                    channel.to_string(),
                    notification.to_string(),
                    now
                ],
            )
            .await
            .map_err(query_err("upsert_mapping"))?;

        debug!(message_id, %channel, %notification, "Mapping stored");
        Ok(())
    }

    async fn get_mappings(
        &self,
        message_id: &str,
    ) -> Result<BTreeMap<ChannelId, NotificationId>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT channel_id, notification_id FROM message_map WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(query_err("get_mappings"))?;

        let mut out = BTreeMap::new();
        while let Some(row) = rows.next().await.map_err(query_err("get_mappings"))? {
            let channel: String = row.get(0).map_err(query_err("get_mappings channel"))?;
            let notification: String =
                row.get(1).map_err(query_err("get_mappings notification"))?;
            out.insert(
                parse_channel_id(&channel)?,
                parse_notification_id(&notification)?,
            );
        }
        Ok(out)
    }

    async fn find_message_by_notification(
        &self,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id FROM message_map WHERE channel_id = ?1 AND notification_id = ?2",
                params![channel.to_string(), notification.to_string()],
            )
            .await
            .map_err(query_err("find_message_by_notification"))?;

        match rows
            .next()
            .await
            .map_err(query_err("find_message_by_notification"))?
        {
            Some(row) => Ok(Some(
                row.get::<String>(0)
                    .map_err(query_err("find_message_by_notification"))?,
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    fn make_pr(id: &str, day: u32) -> PullRequest {
        PullRequest {
            message_id: id.into(),
            subsystem: "linux-cxl".into(),
            subject: format!("[GIT PULL] {id}"),
            sender: "Maintainer <maint@kernel.org>".into(),
            submitted_at: ts(day),
            state: PrState::Pending,
            merge_commit_hash: None,
            merge_url: None,
            merged_at: None,
            thread_refs: BTreeSet::new(),
        }
    }

    fn make_merge(confirmation: &str, refs: &[&str]) -> MergeEvent {
        MergeEvent {
            confirmation_id: confirmation.into(),
            refs: refs.iter().map(|s| s.to_string()).collect(),
            merge_commit_hash: "0123456789abcdef0123456789abcdef01234567".into(),
            merge_url: "https://git.kernel.org/torvalds/c/0123456789abcdef0123456789abcdef01234567"
                .into(),
            merged_at: ts(20),
        }
    }

    // ── Pull request tests ──────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_pull_request() {
        let db = test_db().await;
        let mut pr = make_pr("m1@x", 1);
        pr.thread_refs.insert("cover@x".into());

        assert!(db.insert_pull_request(&pr).await.unwrap());
        let fetched = db.get_pull_request("m1@x").await.unwrap().unwrap();
        assert_eq!(fetched, pr);
    }

    #[tokio::test]
    async fn insert_twice_is_noop() {
        let db = test_db().await;
        let pr = make_pr("m1@x", 1);
        assert!(db.insert_pull_request(&pr).await.unwrap());

        let mut changed = pr.clone();
        changed.subject = "something else".into();
        assert!(!db.insert_pull_request(&changed).await.unwrap());

        let fetched = db.get_pull_request("m1@x").await.unwrap().unwrap();
        assert_eq!(fetched.subject, pr.subject);
        assert_eq!(db.count_pull_requests().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_pull_request_not_found() {
        let db = test_db().await;
        assert!(db.get_pull_request("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_thread_ref_uses_index() {
        let db = test_db().await;
        let mut pr = make_pr("m1@x", 1);
        pr.thread_refs.insert("cover@x".into());
        db.insert_pull_request(&pr).await.unwrap();

        let found = db
            .find_pull_request_by_thread_ref("cover@x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.message_id, "m1@x");
        assert!(
            db.find_pull_request_by_thread_ref("other@x")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn mark_merged_only_once() {
        let db = test_db().await;
        db.insert_pull_request(&make_pr("m1@x", 1)).await.unwrap();
        let merge = make_merge("bot@x", &["m1@x"]);

        assert!(db.mark_merged("m1@x", &merge).await.unwrap());
        assert!(!db.mark_merged("m1@x", &merge).await.unwrap());

        let fetched = db.get_pull_request("m1@x").await.unwrap().unwrap();
        assert_eq!(fetched.state, PrState::Merged);
        assert_eq!(fetched.merged_at, Some(ts(20)));
        assert_eq!(
            fetched.merge_commit_hash.as_deref(),
            Some(merge.merge_commit_hash.as_str())
        );
    }

    #[tokio::test]
    async fn mark_merged_missing_row() {
        let db = test_db().await;
        let merge = make_merge("bot@x", &["ghost@x"]);
        assert!(!db.mark_merged("ghost@x", &merge).await.unwrap());
    }

    #[tokio::test]
    async fn list_pending_is_oldest_first_and_skips_merged() {
        let db = test_db().await;
        db.insert_pull_request(&make_pr("late@x", 9)).await.unwrap();
        db.insert_pull_request(&make_pr("early@x", 2)).await.unwrap();
        db.insert_pull_request(&make_pr("merged@x", 1)).await.unwrap();
        db.mark_merged("merged@x", &make_merge("bot@x", &["merged@x"]))
            .await
            .unwrap();

        let pending = db.list_pending_pull_requests().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|p| p.message_id.as_str()).collect();
        assert_eq!(ids, vec!["early@x", "late@x"]);
    }

    #[tokio::test]
    async fn evict_keeps_most_recent() {
        let db = test_db().await;
        for day in 1..=5 {
            let mut pr = make_pr(&format!("m{day}@x"), day);
            pr.thread_refs.insert(format!("cover{day}@x"));
            db.insert_pull_request(&pr).await.unwrap();
        }

        assert_eq!(db.evict_oldest_pull_requests(3).await.unwrap(), 2);
        assert_eq!(db.count_pull_requests().await.unwrap(), 3);
        assert!(db.get_pull_request("m1@x").await.unwrap().is_none());
        assert!(db.get_pull_request("m2@x").await.unwrap().is_none());
        assert!(db.get_pull_request("m3@x").await.unwrap().is_some());
        // Index rows of evicted entries go with them.
        assert!(
            db.find_pull_request_by_thread_ref("cover1@x")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(db.evict_oldest_pull_requests(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn evict_drops_mappings_of_evicted_rows() {
        let db = test_db().await;
        for day in 1..=5 {
            let id = format!("m{day}@x");
            db.insert_pull_request(&make_pr(&id, day)).await.unwrap();
            db.upsert_mapping(&id, ChannelId(10), NotificationId(u64::from(day)))
                .await
                .unwrap();
        }

        assert_eq!(db.evict_oldest_pull_requests(2).await.unwrap(), 3);
        assert!(db.get_mappings("m1@x").await.unwrap().is_empty());
        assert!(
            db.find_message_by_notification(ChannelId(10), NotificationId(3))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(db.get_mappings("m5@x").await.unwrap().len(), 1);

        let mut rows = db
            .conn()
            .query("SELECT COUNT(*) FROM message_map", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 2);
    }

    // ── Unlinked merge tests ────────────────────────────────────────

    #[tokio::test]
    async fn unlinked_merge_found_by_any_ref() {
        let db = test_db().await;
        let merge = make_merge("bot@x", &["cover@x", "m9@x"]);
        db.insert_unlinked_merge(&merge).await.unwrap();
        db.insert_unlinked_merge(&merge).await.unwrap();
        assert_eq!(db.list_unlinked_merges().await.unwrap().len(), 1);

        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(db.find_unlinked_merge(&ids(&["other@x"])).await.unwrap().is_none());
        assert!(db.find_unlinked_merge(&[]).await.unwrap().is_none());
        // Any overlap links: the submission's own id or one of its ancestors.
        let found = db
            .find_unlinked_merge(&ids(&["other@x", "cover@x"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, merge);
        // Finding does not consume.
        assert!(db.find_unlinked_merge(&ids(&["m9@x"])).await.unwrap().is_some());

        assert!(db.delete_unlinked_merge("bot@x").await.unwrap());
        assert!(!db.delete_unlinked_merge("bot@x").await.unwrap());
        assert!(db.find_unlinked_merge(&ids(&["m9@x"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unlinked_merge_earliest_wins() {
        let db = test_db().await;
        let mut late = make_merge("late@x", &["cover@x"]);
        late.merged_at = ts(5);
        let mut early = make_merge("early@x", &["m1@x"]);
        early.merged_at = ts(2);
        db.insert_unlinked_merge(&late).await.unwrap();
        db.insert_unlinked_merge(&early).await.unwrap();

        let found = db
            .find_unlinked_merge(&["m1@x".to_string(), "cover@x".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.confirmation_id, "early@x");
    }

    #[tokio::test]
    async fn prune_unlinked_merges_keeps_newest() {
        let db = test_db().await;
        for day in 1..=4u32 {
            let mut merge = make_merge(&format!("bot{day}@x"), &["a@x"]);
            merge.merged_at = ts(day);
            db.insert_unlinked_merge(&merge).await.unwrap();
        }
        assert_eq!(db.prune_unlinked_merges(2).await.unwrap(), 2);
        let left: Vec<_> = db
            .list_unlinked_merges()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.confirmation_id)
            .collect();
        assert_eq!(left, vec!["bot4@x", "bot3@x"]);
    }

    // ── Mapping tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_mapping_overwrites() {
        let db = test_db().await;
        let channel = ChannelId(1_100_000_000_000_000_001);
        db.upsert_mapping("m1@x", channel, NotificationId(1))
            .await
            .unwrap();
        db.upsert_mapping("m1@x", channel, NotificationId(2))
            .await
            .unwrap();

        let map = db.get_mappings("m1@x").await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&channel), Some(&NotificationId(2)));
    }

    #[tokio::test]
    async fn reverse_lookup() {
        let db = test_db().await;
        db.upsert_mapping("m1@x", ChannelId(10), NotificationId(100))
            .await
            .unwrap();
        db.upsert_mapping("m2@x", ChannelId(11), NotificationId(100))
            .await
            .unwrap();

        assert_eq!(
            db.find_message_by_notification(ChannelId(11), NotificationId(100))
                .await
                .unwrap()
                .as_deref(),
            Some("m2@x")
        );
        assert!(
            db.find_message_by_notification(ChannelId(12), NotificationId(100))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn corrupt_channel_id_is_an_error() {
        let db = test_db().await;
        db.conn()
            .execute(
                "INSERT INTO message_map (message_id, channel_id, notification_id) VALUES ('m1@x', 'general', '5')",
                (),
            )
            .await
            .unwrap();

        let err = db.get_mappings("m1@x").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(_)));
    }

    #[tokio::test]
    async fn reopen_preserves_state() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("folklore.db");
        let channel = ChannelId(987_654_321_098_765_432);

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_pull_request(&make_pr("m1@x", 1)).await.unwrap();
            db.upsert_mapping("m1@x", channel, NotificationId(u64::MAX - 1))
                .await
                .unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_pull_request("m1@x").await.unwrap().is_some());
        let map = db.get_mappings("m1@x").await.unwrap();
        assert_eq!(map.get(&channel), Some(&NotificationId(u64::MAX - 1)));
        assert_eq!(
            db.find_message_by_notification(channel, NotificationId(u64::MAX - 1))
                .await
                .unwrap()
                .as_deref(),
            Some("m1@x")
        );
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = format_timestamp(&Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap());
        let b = format_timestamp(
            &(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
                + chrono::Duration::milliseconds(1)),
        );
        assert!(a < b);
        assert_eq!(parse_datetime(&a).unwrap().timestamp(), 1_735_722_000);
    }
}
