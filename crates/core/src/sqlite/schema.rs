//! Schema migrations for the SQLite backend.
//!
//! Steps are applied in order and recorded by name in `schema_migrations`.
//! Each step is idempotent on its own: tables and indexes use `IF NOT EXISTS`
//! and column additions check `PRAGMA table_info` first, so a database that
//! predates the bookkeeping table still migrates cleanly.

use rusqlite::{params, Connection, Transaction};
use tracing::{debug, info};

use crate::model::{ArtifactKind, Stage};
use crate::repository::sql::stage_predicate;
use crate::repository::{now, Result};

use super::timestamp;

struct Migration {
    name: &'static str,
    apply: fn(&Transaction) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_create_podcasts_and_episodes",
        apply: create_podcasts_and_episodes,
    },
    Migration {
        name: "002_add_failure_columns",
        apply: add_failure_columns,
    },
    Migration {
        name: "003_add_slugs_and_html_description",
        apply: add_slugs_and_html_description,
    },
    Migration {
        name: "004_create_transcript_links",
        apply: create_transcript_links,
    },
    Migration {
        name: "005_create_stage_indexes",
        apply: create_stage_indexes,
    },
    Migration {
        name: "006_normalize_empty_paths",
        apply: normalize_empty_paths,
    },
];

/// Names of every migration, in application order.
pub fn migration_names() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|m| m.name).collect()
}

/// Bring the schema up to date. Returns the names of newly applied steps.
pub(crate) fn migrate(conn: &mut Connection) -> Result<Vec<&'static str>> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        "#,
    )?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let done: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE name = ?)",
            params![migration.name],
            |row| row.get(0),
        )?;
        if done {
            debug!(migration = migration.name, "Migration already applied");
            continue;
        }

        let tx = conn.transaction()?;
        (migration.apply)(&tx)?;
        tx.execute(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?, ?)",
            params![migration.name, timestamp(now())],
        )?;
        tx.commit()?;

        info!(migration = migration.name, "Applied schema migration");
        applied.push(migration.name);
    }
    Ok(applied)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> rusqlite::Result<()> {
    if !has_column(conn, table, column)? {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
            [],
        )?;
    }
    Ok(())
}

fn create_podcasts_and_episodes(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS podcasts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT,
            image_url TEXT,
            language TEXT,
            category TEXT,
            subcategory TEXT,
            last_processed TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_podcasts_created_at ON podcasts(created_at DESC);

        CREATE TABLE IF NOT EXISTS episodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            podcast_id INTEGER NOT NULL REFERENCES podcasts(id) ON DELETE CASCADE,
            external_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            pub_date TEXT,
            audio_url TEXT,
            duration_seconds INTEGER,
            image_url TEXT,
            audio_path TEXT,
            downsampled_audio_path TEXT,
            raw_transcript_path TEXT,
            clean_transcript_path TEXT,
            summary_path TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(podcast_id, external_id)
        );

        CREATE INDEX IF NOT EXISTS idx_episodes_podcast ON episodes(podcast_id);
        CREATE INDEX IF NOT EXISTS idx_episodes_pub_date ON episodes(pub_date DESC);
        CREATE INDEX IF NOT EXISTS idx_episodes_updated_at ON episodes(updated_at DESC);
        "#,
    )
}

fn add_failure_columns(tx: &Transaction) -> rusqlite::Result<()> {
    add_column_if_missing(tx, "episodes", "failed_at_stage", "TEXT")?;
    add_column_if_missing(tx, "episodes", "failure_reason", "TEXT")?;
    add_column_if_missing(tx, "episodes", "failure_type", "TEXT")?;
    add_column_if_missing(tx, "episodes", "failed_at", "TEXT")?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_episodes_failed_at \
         ON episodes(failed_at DESC) WHERE failed_at IS NOT NULL;",
    )
}

fn add_slugs_and_html_description(tx: &Transaction) -> rusqlite::Result<()> {
    add_column_if_missing(tx, "podcasts", "slug", "TEXT")?;
    add_column_if_missing(tx, "episodes", "slug", "TEXT")?;
    add_column_if_missing(tx, "episodes", "description_html", "TEXT")?;
    tx.execute_batch(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_podcasts_slug ON podcasts(slug);
        CREATE INDEX IF NOT EXISTS idx_episodes_slug ON episodes(podcast_id, slug);
        "#,
    )
}

fn create_transcript_links(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS transcript_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            episode_id INTEGER NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            language TEXT,
            downloaded_path TEXT,
            UNIQUE(episode_id, url)
        );
        "#,
    )
}

/// One partial index per non-terminal stage, on exactly the predicate that
/// listing and counting queries use.
fn create_stage_indexes(tx: &Transaction) -> rusqlite::Result<()> {
    for stage in Stage::ALL.iter().filter(|stage| !stage.is_terminal()) {
        tx.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_episodes_stage_{} ON episodes(pub_date DESC) WHERE {}",
                stage.as_str(),
                stage_predicate(*stage, "")
            ),
            [],
        )?;
    }
    Ok(())
}

/// Older releases could leave `''` where a path or failure was absent.
/// Store NULL instead and rebuild the stage indexes on the current predicates.
fn normalize_empty_paths(tx: &Transaction) -> rusqlite::Result<()> {
    for kind in ArtifactKind::ALL {
        let column = kind.field_name();
        let cleared = tx.execute(
            &format!("UPDATE episodes SET {c} = NULL WHERE {c} = ''", c = column),
            [],
        )?;
        if cleared > 0 {
            info!(column, rows = cleared, "Replaced empty artifact paths with NULL");
        }
    }
    tx.execute(
        "UPDATE transcript_links SET downloaded_path = NULL WHERE downloaded_path = ''",
        [],
    )?;
    tx.execute(
        "UPDATE episodes SET failed_at = NULL, failed_at_stage = NULL, \
         failure_reason = NULL, failure_type = NULL WHERE failed_at = ''",
        [],
    )?;
    for stage in Stage::ALL.iter().filter(|stage| !stage.is_terminal()) {
        tx.execute(
            &format!("DROP INDEX IF EXISTS idx_episodes_stage_{}", stage.as_str()),
            [],
        )?;
    }
    create_stage_indexes(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_migrate_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        let applied = migrate(&mut conn).unwrap();
        assert_eq!(applied, migration_names());

        assert!(has_column(&conn, "episodes", "failed_at").unwrap());
        assert!(has_column(&conn, "podcasts", "slug").unwrap());
        let indexes = index_names(&conn);
        for stage in ["discovered", "downloaded", "downsampled", "transcribed", "cleaned"] {
            assert!(indexes.contains(&format!("idx_episodes_stage_{}", stage)));
        }
        assert!(!indexes.contains(&"idx_episodes_stage_summarized".to_string()));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert!(migrate(&mut conn).unwrap().is_empty());
    }

    #[test]
    fn test_migrate_database_without_bookkeeping() {
        let mut conn = Connection::open_in_memory().unwrap();
        // Tables created by hand before migrations were tracked, with some
        // later columns already present.
        conn.execute_batch(
            r#"
            CREATE TABLE podcasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT,
                image_url TEXT,
                language TEXT,
                category TEXT,
                subcategory TEXT,
                last_processed TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                slug TEXT
            );
            CREATE TABLE episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                podcast_id INTEGER NOT NULL,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                pub_date TEXT,
                audio_url TEXT,
                duration_seconds INTEGER,
                image_url TEXT,
                audio_path TEXT,
                downsampled_audio_path TEXT,
                raw_transcript_path TEXT,
                clean_transcript_path TEXT,
                summary_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                failed_at TEXT,
                UNIQUE(podcast_id, external_id)
            );
            "#,
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        assert!(has_column(&conn, "episodes", "failure_reason").unwrap());
        assert!(has_column(&conn, "episodes", "description_html").unwrap());
    }

    #[test]
    fn test_legacy_empty_paths_become_null() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO podcasts (url, title, created_at, updated_at)
                VALUES ('https://ex.com/feed.xml', 'Test', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z');
            INSERT INTO episodes (podcast_id, external_id, title, audio_path, summary_path, failed_at, created_at, updated_at)
                VALUES (1, 'ext-1', 'One', '', '/s/1.md', '', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z');
            DELETE FROM schema_migrations WHERE name = '006_normalize_empty_paths';
            "#,
        )
        .unwrap();

        let applied = migrate(&mut conn).unwrap();
        assert_eq!(applied, vec!["006_normalize_empty_paths"]);

        let (audio, summary, failed_at): (Option<String>, Option<String>, Option<String>) = conn
            .query_row(
                "SELECT audio_path, summary_path, failed_at FROM episodes",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(audio, None);
        assert_eq!(summary.as_deref(), Some("/s/1.md"));
        assert_eq!(failed_at, None);

        let indexes = index_names(&conn);
        assert!(indexes.contains(&"idx_episodes_stage_discovered".to_string()));
    }
}
