use super::*;
use include_dir::{include_dir, Dir};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

static MIGRATIONS: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

const COLUMNS: &str = "id, type, subtype, group_name, value, search, count, width, height, favorite, note, create_time";

pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.busy_timeout(std::time::Duration::from_millis(5000));
        run_migrations(&conn)?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await?
    }
}

fn select_one(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> anyhow::Result<Option<HistoryRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let row = stmt.query_row(params, row_to_record).optional()?;
    Ok(row)
}

fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let mut files: Vec<_> = MIGRATIONS
        .files()
        .filter(|f| f.path().extension().map(|e| e == "sql").unwrap_or(false))
        .collect();
    files.sort_by_key(|f| f.path().to_path_buf());
    for file in files {
        let name = file
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ver = parse_version_prefix(&name).unwrap_or(0) as i64;
        if ver <= current {
            continue;
        }
        let sql = file
            .contents_utf8()
            .ok_or_else(|| anyhow::anyhow!("invalid utf-8 in migration {}", name))?;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", ver))?;
        tx.commit()?;
        tracing::debug!(migration = %name, version = ver, "applied migration");
    }
    Ok(())
}

pub(crate) fn parse_version_prefix(name: &str) -> Option<u32> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse::<u32>().ok()
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let kind_str: String = row.get(1)?;
    let kind = RecordKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown record type {kind_str}").into(),
        )
    })?;
    let subtype: Option<String> = row.get(2)?;
    let raw_value: String = row.get(4)?;
    let created_ms: i64 = row.get(11)?;
    Ok(HistoryRecord {
        id: row.get(0)?,
        kind,
        subtype: subtype.as_deref().and_then(Subtype::parse),
        group: kind.group(),
        value: ClipValue::decode(kind, raw_value),
        search: row.get(5)?,
        count: row.get::<_, i64>(6)?.max(0) as u64,
        width: row.get::<_, Option<i64>>(7)?.map(|w| w as u32),
        height: row.get::<_, Option<i64>>(8)?.map(|h| h as u32),
        favorite: row.get::<_, i64>(9)? != 0,
        note: row.get(10)?,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
    })
}

fn group_clause(filter: GroupFilter) -> Option<&'static str> {
    match filter {
        GroupFilter::All => None,
        GroupFilter::Text => Some("text"),
        GroupFilter::Files => Some("files"),
        GroupFilter::Image => Some("image"),
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn find_duplicate(&self, key: &DedupKey) -> anyhow::Result<Option<HistoryRecord>> {
        let key = key.clone();
        self.with_conn(move |conn| match key.image {
            Some((w, h, count)) => select_one(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM history WHERE type = ?1 \
                     AND (value = ?2 OR (width = ?3 AND height = ?4 AND count = ?5)) \
                     ORDER BY create_time DESC LIMIT 1"
                ),
                params![key.kind.as_str(), key.value, w as i64, h as i64, count as i64],
            ),
            None => select_one(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM history WHERE type = ?1 AND value = ?2 \
                     ORDER BY create_time DESC LIMIT 1"
                ),
                params![key.kind.as_str(), key.value],
            ),
        })
        .await
    }

    async fn insert(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO history({COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
                params![
                    record.id,
                    record.kind.as_str(),
                    record.subtype.map(Subtype::as_str),
                    record.group.as_str(),
                    record.value.encode(),
                    record.search,
                    record.count as i64,
                    record.width.map(|w| w as i64),
                    record.height.map(|h| h as i64),
                    if record.favorite { 1 } else { 0 },
                    record.note,
                    record.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE history SET create_time = ?1 WHERE id = ?2",
                params![at.timestamp_millis(), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            select_one(conn, &format!("SELECT {COLUMNS} FROM history WHERE id = ?1"), [id])
        })
        .await
    }

    async fn list(&self, q: Query) -> anyhow::Result<Vec<HistoryRecord>> {
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {COLUMNS} FROM history WHERE 1 = 1");
            let mut args: Vec<String> = Vec::new();
            if let Some(group) = group_clause(q.filter) {
                args.push(group.to_string());
                sql.push_str(&format!(" AND group_name = ?{}", args.len()));
            }
            if q.favorites_only {
                sql.push_str(" AND favorite = 1");
            }
            if let Some(term) = &q.contains {
                args.push(format!("%{}%", term));
                sql.push_str(&format!(" AND search LIKE ?{}", args.len()));
            }
            sql.push_str(" ORDER BY create_time DESC");
            if let Some(limit) = q.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_record)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn set_favorite(&self, id: &str, fav: bool) -> anyhow::Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE history SET favorite = ?1 WHERE id = ?2",
                params![if fav { 1 } else { 0 }, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_note(&self, id: &str, note: Option<&str>) -> anyhow::Result<()> {
        let id = id.to_string();
        let note = note.map(str::to_string);
        self.with_conn(move |conn| {
            conn.execute("UPDATE history SET note = ?1 WHERE id = ?2", params![note, id])?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = select_one(
                &tx,
                &format!("SELECT {COLUMNS} FROM history WHERE id = ?1"),
                [&id],
            )?;
            tx.execute("DELETE FROM history WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM history", [])?;
            Ok(())
        })
        .await
    }

    async fn prune(
        &self,
        max_items: usize,
        keep_favorites: bool,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        self.with_conn(move |conn| {
            let victims = if keep_favorites {
                "SELECT rowid FROM history WHERE favorite = 0
                 ORDER BY create_time DESC
                 LIMIT -1 OFFSET ?1"
            } else {
                "SELECT rowid FROM history
                 ORDER BY create_time DESC
                 LIMIT -1 OFFSET ?1"
            };
            let tx = conn.transaction()?;
            let removed = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {COLUMNS} FROM history WHERE rowid IN ({victims})"
                ))?;
                let rows = stmt.query_map(params![max_items as i64], row_to_record)?;
                let removed = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                removed
            };
            tx.execute(
                &format!("DELETE FROM history WHERE rowid IN ({victims})"),
                params![max_items as i64],
            )?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}
