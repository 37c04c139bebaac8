use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode};

use crate::error::{Error, Result};

/// One link found in a top-level comment, as produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub author: String,
    pub comment_url: String,
    pub extracted_link: String,
}

/// A persisted row read back from the `links` table.
#[derive(Debug, Clone)]
pub struct StoredLink {
    pub author: String,
    pub comment_url: String,
    pub extracted_link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column subset written to the CSV export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub author: String,
    pub comment_url: String,
    pub extracted_link: String,
}

pub fn initialize(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS links (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            author         TEXT NOT NULL,
            comment_url    TEXT NOT NULL,
            extracted_link TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            UNIQUE(comment_url, extracted_link)
        );
        CREATE INDEX IF NOT EXISTS idx_links_updated ON links(updated_at);
        CREATE INDEX IF NOT EXISTS idx_links_author ON links(author);
        ",
    )?;
    Ok(())
}

// ── Writes ──

pub fn upsert_many(conn: &Connection, rows: &[LinkRow]) -> Result<usize> {
    upsert_many_at(conn, rows, Utc::now())
}

/// Insert new pairs, refresh `updated_at` on pairs already stored.
/// Returns the number of rows that did not exist before.
pub fn upsert_many_at(conn: &Connection, rows: &[LinkRow], now: DateTime<Utc>) -> Result<usize> {
    let ts = format_ts(now);
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut insert = tx.prepare(
            "INSERT INTO links (author, comment_url, extracted_link, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )?;
        let mut touch = tx.prepare(
            "UPDATE links SET updated_at = ?3 WHERE comment_url = ?1 AND extracted_link = ?2",
        )?;
        for r in rows {
            if r.extracted_link.is_empty() {
                // dropping tx rolls back the whole batch
                return Err(Error::MalformedRecord {
                    comment_url: r.comment_url.clone(),
                });
            }
            match insert.execute(params![r.author, r.comment_url, r.extracted_link, ts]) {
                Ok(_) => count += 1,
                Err(e) if is_unique_violation(&e) => {
                    touch.execute(params![r.comment_url, r.extracted_link, ts])?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    tx.commit()?;
    Ok(count)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ── Reads ──

pub fn count_total(conn: &Connection) -> Result<usize> {
    Ok(conn.query_row("SELECT COUNT(*) FROM links", [], |r| r.get(0))?)
}

pub fn count_distinct_authors(conn: &Connection) -> Result<usize> {
    Ok(conn.query_row("SELECT COUNT(DISTINCT author) FROM links", [], |r| r.get(0))?)
}

/// One page of rows, most recently seen first, plus the total number of
/// rows matching `search` (ignoring `limit`/`offset`).
pub fn list_page(
    conn: &Connection,
    search: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<(Vec<StoredLink>, usize)> {
    // SQLite reads a negative OFFSET as 0, so clamp instead of wrapping
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", escape_like(s)));

    let (total, rows) = match &pattern {
        Some(p) => {
            let total: usize = conn.query_row(
                "SELECT COUNT(*) FROM links
                 WHERE author LIKE ?1 ESCAPE '\\' OR extracted_link LIKE ?1 ESCAPE '\\'",
                [p],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT author, comment_url, extracted_link, created_at, updated_at
                 FROM links
                 WHERE author LIKE ?1 ESCAPE '\\' OR extracted_link LIKE ?1 ESCAPE '\\'
                 ORDER BY updated_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![p, limit, offset], stored_link)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            (total, rows)
        }
        None => {
            let total = count_total(conn)?;
            let mut stmt = conn.prepare(
                "SELECT author, comment_url, extracted_link, created_at, updated_at
                 FROM links
                 ORDER BY updated_at DESC, id DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], stored_link)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            (total, rows)
        }
    };
    Ok((rows, total))
}

pub fn export_all(conn: &Connection) -> Result<Vec<ExportRow>> {
    let mut stmt =
        conn.prepare("SELECT author, comment_url, extracted_link FROM links ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ExportRow {
                author: row.get(0)?,
                comment_url: row.get(1)?,
                extracted_link: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub authors: usize,
    pub newest: Option<DateTime<Utc>>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let newest: Option<String> =
        conn.query_row("SELECT MAX(updated_at) FROM links", [], |r| r.get(0))?;
    Ok(Stats {
        total: count_total(conn)?,
        authors: count_distinct_authors(conn)?,
        newest: newest.as_deref().and_then(|s| parse_ts(s).ok()),
    })
}

// ── Helpers ──

/// Escape `LIKE` metacharacters so user input matches literally.
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn stored_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredLink> {
    let ts = |idx: usize| -> rusqlite::Result<DateTime<Utc>> {
        let raw: String = row.get(idx)?;
        parse_ts(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    Ok(StoredLink {
        author: row.get(0)?,
        comment_url: row.get(1)?,
        extracted_link: row.get(2)?,
        created_at: ts(3)?,
        updated_at: ts(4)?,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rusqlite::OptionalExtension;

    use super::*;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn link(author: &str, comment: &str, url: &str) -> LinkRow {
        LinkRow {
            author: author.into(),
            comment_url: comment.into(),
            extracted_link: url.into(),
        }
    }

    fn find_link(conn: &Connection, comment_url: &str, extracted_link: &str) -> Option<StoredLink> {
        conn.query_row(
            "SELECT author, comment_url, extracted_link, created_at, updated_at
             FROM links WHERE comment_url = ?1 AND extracted_link = ?2",
            [comment_url, extracted_link],
            stored_link,
        )
        .optional()
        .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn seed(conn: &Connection, n: usize) {
        let rows: Vec<LinkRow> = (0..n)
            .map(|i| link("pg", "https://news.ycombinator.com/item?id=1", &format!("https://e.com/{i}")))
            .collect();
        upsert_many_at(conn, &rows, t0()).unwrap();
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = mem();
        init_schema(&conn).unwrap();
        assert_eq!(count_total(&conn).unwrap(), 0);
    }

    #[test]
    fn initialize_creates_file_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/links.db");
        let conn = initialize(&path).unwrap();
        assert!(path.exists());
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        drop(conn);
        // reopening an existing store is fine
        initialize(&path).unwrap();
    }

    #[test]
    fn second_sighting_updates_instead_of_inserting() {
        let conn = mem();
        let rows = vec![
            link("alice", "c1", "https://a.com"),
            link("alice", "c1", "https://b.com"),
        ];
        assert_eq!(upsert_many_at(&conn, &rows, t0()).unwrap(), 2);

        let later = t0() + Duration::hours(1);
        assert_eq!(upsert_many_at(&conn, &rows, later).unwrap(), 0);
        assert_eq!(count_total(&conn).unwrap(), 2);

        let row = find_link(&conn, "c1", "https://a.com").unwrap();
        assert_eq!(row.created_at, t0());
        assert_eq!(row.updated_at, later);
        assert!(row.updated_at >= row.created_at);
    }

    #[test]
    fn same_link_in_different_comments_is_distinct() {
        let conn = mem();
        let rows = vec![
            link("alice", "c1", "https://a.com"),
            link("bob", "c2", "https://a.com"),
        ];
        assert_eq!(upsert_many(&conn, &rows).unwrap(), 2);
        assert_eq!(count_distinct_authors(&conn).unwrap(), 2);
    }

    #[test]
    fn duplicate_within_one_batch_counts_once() {
        let conn = mem();
        let rows = vec![link("a", "c1", "https://a.com"), link("a", "c1", "https://a.com")];
        assert_eq!(upsert_many(&conn, &rows).unwrap(), 1);
        assert_eq!(count_total(&conn).unwrap(), 1);
    }

    #[test]
    fn concurrent_writers_converge_on_one_row_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.db");
        initialize(&path).unwrap();
        let rows: Vec<LinkRow> = (0..500)
            .map(|i| link("pg", &format!("c{}", i % 7), &format!("https://e.com/{i}")))
            .collect();

        let writers = 4;
        let barrier = std::sync::Barrier::new(writers);
        let mut results: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..writers)
                .map(|_| {
                    s.spawn(|| {
                        let conn = initialize(&path).unwrap();
                        barrier.wait();
                        upsert_many(&conn, &rows).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        results.sort_unstable();

        assert_eq!(results, [0, 0, 0, 500]);
        let conn = initialize(&path).unwrap();
        assert_eq!(count_total(&conn).unwrap(), 500);
    }

    #[test]
    fn malformed_record_rolls_back_batch() {
        let conn = mem();
        let rows = vec![link("a", "c1", "https://a.com"), link("a", "c1", "")];
        let err = upsert_many(&conn, &rows).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { .. }));
        assert_eq!(count_total(&conn).unwrap(), 0);
    }

    #[test]
    fn list_orders_by_most_recently_updated() {
        let conn = mem();
        upsert_many_at(&conn, &[link("a", "c1", "https://old.com")], t0()).unwrap();
        upsert_many_at(&conn, &[link("b", "c2", "https://new.com")], t0() + Duration::minutes(5))
            .unwrap();
        // re-seeing the old link moves it to the front
        upsert_many_at(&conn, &[link("a", "c1", "https://old.com")], t0() + Duration::minutes(9))
            .unwrap();

        let (rows, total) = list_page(&conn, None, 10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0].extracted_link, "https://old.com");
        assert_eq!(rows[1].extracted_link, "https://new.com");
    }

    #[test]
    fn search_matches_author_or_link() {
        let conn = mem();
        let rows = vec![
            link("rustacean", "c1", "https://a.com"),
            link("gopher", "c2", "https://rust-lang.org"),
            link("pythonista", "c3", "https://python.org"),
        ];
        upsert_many(&conn, &rows).unwrap();
        let (found, total) = list_page(&conn, Some("RUST"), 10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.author != "pythonista"));
    }

    #[test]
    fn search_wildcards_are_literal() {
        let conn = mem();
        let rows = vec![
            link("100%", "c1", "https://a.com"),
            link("bob", "c2", "https://b.com/x_y"),
            link("carol", "c3", "https://c.com/xzy"),
        ];
        upsert_many(&conn, &rows).unwrap();

        let (found, total) = list_page(&conn, Some("%"), 10, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].author, "100%");

        let (found, total) = list_page(&conn, Some("x_y"), 10, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].author, "bob");
    }

    #[test]
    fn blank_search_is_no_filter() {
        let conn = mem();
        seed(&conn, 3);
        let (_, total) = list_page(&conn, Some("   "), 10, 0).unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn last_page_holds_remainder() {
        let conn = mem();
        seed(&conn, 23);
        let per_page = 10;
        let last = 23usize.div_ceil(per_page);
        let (rows, total) = list_page(&conn, None, per_page, (last - 1) * per_page).unwrap();
        assert_eq!(total, 23);
        assert_eq!(rows.len(), 3);

        let (rows, total) = list_page(&conn, None, per_page, last * per_page).unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 23);
    }

    #[test]
    fn offset_past_i64_range_is_empty() {
        let conn = mem();
        seed(&conn, 3);
        for offset in [usize::MAX, i64::MAX as usize + 1] {
            let (rows, total) = list_page(&conn, None, 50, offset).unwrap();
            assert!(rows.is_empty());
            assert_eq!(total, 3);
        }
        let (rows, total) = list_page(&conn, Some("pg"), usize::MAX, usize::MAX).unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 3);
    }

    #[test]
    fn full_last_page_when_evenly_divisible() {
        let conn = mem();
        seed(&conn, 20);
        let (rows, _) = list_page(&conn, None, 10, 10).unwrap();
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn export_keeps_insertion_order() {
        let conn = mem();
        upsert_many_at(&conn, &[link("z", "c1", "https://first.com")], t0()).unwrap();
        upsert_many_at(&conn, &[link("a", "c2", "https://second.com")], t0()).unwrap();
        // an update must not reorder the export
        upsert_many_at(&conn, &[link("z", "c1", "https://first.com")], t0() + Duration::hours(2))
            .unwrap();
        let rows = export_all(&conn).unwrap();
        let links: Vec<&str> = rows.iter().map(|r| r.extracted_link.as_str()).collect();
        assert_eq!(links, ["https://first.com", "https://second.com"]);
    }

    #[test]
    fn stats_report_newest() {
        let conn = mem();
        assert!(get_stats(&conn).unwrap().newest.is_none());
        seed(&conn, 2);
        let s = get_stats(&conn).unwrap();
        assert_eq!(s.total, 2);
        assert_eq!(s.authors, 1);
        assert_eq!(s.newest, Some(t0()));
    }

    #[test]
    fn escape_like_escapes_backslash_first() {
        assert_eq!(escape_like(r"a\%_"), r"a\\\%\_");
    }
}
