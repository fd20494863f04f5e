//! Schema migrations for the PostgreSQL backend.
//!
//! Same bookkeeping as the SQLite backend: an ordered list of named steps,
//! each idempotent, recorded in `schema_migrations` once applied. Column
//! additions consult `information_schema.columns` first.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Text;
use tracing::{debug, info};

use super::rows::FoundRow;
use super::statement::statement;
use crate::model::{ArtifactKind, Stage};
use crate::repository::sql::stage_predicate;
use crate::repository::{now, RepositoryError, Result};

struct Migration {
    name: &'static str,
    apply: fn(&mut PgConnection) -> Result<()>,
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
        name: "006_create_users_and_followers",
        apply: create_users_and_followers,
    },
    Migration {
        name: "007_normalize_empty_paths",
        apply: normalize_empty_paths,
    },
];

pub fn migration_names() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|m| m.name).collect()
}

pub(crate) fn migrate(conn: &mut PgConnection) -> Result<Vec<&'static str>> {
    conn.batch_execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL
        );
        "#,
    )?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let done = statement(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE name = {}) AS found",
            [migration.name],
        )
        .into_query()
        .get_result::<FoundRow>(conn)?
        .found;
        if done {
            debug!(migration = migration.name, "Migration already applied");
            continue;
        }

        conn.transaction::<_, RepositoryError, _>(|conn| {
            (migration.apply)(conn)?;
            diesel::sql_query("INSERT INTO schema_migrations (name, applied_at) VALUES ($1, $2)")
                .bind::<Text, _>(migration.name)
                .bind::<diesel::sql_types::Timestamptz, _>(now())
                .execute(conn)?;
            Ok(())
        })?;

        info!(migration = migration.name, "Applied schema migration");
        applied.push(migration.name);
    }
    Ok(applied)
}

fn has_column(conn: &mut PgConnection, table: &str, column: &str) -> Result<bool> {
    Ok(statement(
        "SELECT EXISTS(SELECT 1 FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = {} AND column_name = {}) AS found",
        [table, column],
    )
    .into_query()
    .get_result::<FoundRow>(conn)?
    .found)
}

fn add_column_if_missing(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if !has_column(conn, table, column)? {
        conn.batch_execute(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, column, definition
        ))?;
    }
    Ok(())
}

fn create_podcasts_and_episodes(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        r#"
        CREATE TABLE IF NOT EXISTS podcasts (
            id BIGSERIAL PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT,
            image_url TEXT,
            language TEXT,
            category TEXT,
            subcategory TEXT,
            last_processed TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_podcasts_created_at ON podcasts(created_at DESC);

        CREATE TABLE IF NOT EXISTS episodes (
            id BIGSERIAL PRIMARY KEY,
            podcast_id BIGINT NOT NULL REFERENCES podcasts(id) ON DELETE CASCADE,
            external_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            pub_date TIMESTAMPTZ,
            audio_url TEXT,
            duration_seconds BIGINT,
            image_url TEXT,
            audio_path TEXT,
            downsampled_audio_path TEXT,
            raw_transcript_path TEXT,
            clean_transcript_path TEXT,
            summary_path TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (podcast_id, external_id)
        );

        CREATE INDEX IF NOT EXISTS idx_episodes_podcast ON episodes(podcast_id);
        CREATE INDEX IF NOT EXISTS idx_episodes_pub_date ON episodes(pub_date DESC);
        CREATE INDEX IF NOT EXISTS idx_episodes_updated_at ON episodes(updated_at DESC);
        "#,
    )?;
    Ok(())
}

fn add_failure_columns(conn: &mut PgConnection) -> Result<()> {
    add_column_if_missing(conn, "episodes", "failed_at_stage", "TEXT")?;
    add_column_if_missing(conn, "episodes", "failure_reason", "TEXT")?;
    add_column_if_missing(conn, "episodes", "failure_type", "TEXT")?;
    add_column_if_missing(conn, "episodes", "failed_at", "TIMESTAMPTZ")?;
    conn.batch_execute(
        "CREATE INDEX IF NOT EXISTS idx_episodes_failed_at \
         ON episodes(failed_at DESC) WHERE failed_at IS NOT NULL;",
    )?;
    Ok(())
}

fn add_slugs_and_html_description(conn: &mut PgConnection) -> Result<()> {
    add_column_if_missing(conn, "podcasts", "slug", "TEXT")?;
    add_column_if_missing(conn, "episodes", "slug", "TEXT")?;
    add_column_if_missing(conn, "episodes", "description_html", "TEXT")?;
    conn.batch_execute(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_podcasts_slug ON podcasts(slug);
        CREATE INDEX IF NOT EXISTS idx_episodes_slug ON episodes(podcast_id, slug);
        "#,
    )?;
    Ok(())
}

fn create_transcript_links(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        r#"
        CREATE TABLE IF NOT EXISTS transcript_links (
            id BIGSERIAL PRIMARY KEY,
            episode_id BIGINT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            language TEXT,
            downloaded_path TEXT,
            UNIQUE (episode_id, url)
        );
        "#,
    )?;
    Ok(())
}

fn create_stage_indexes(conn: &mut PgConnection) -> Result<()> {
    for stage in Stage::ALL.iter().filter(|stage| !stage.is_terminal()) {
        conn.batch_execute(&format!(
            "CREATE INDEX IF NOT EXISTS idx_episodes_stage_{} ON episodes(pub_date DESC) WHERE {}",
            stage.as_str(),
            stage_predicate(*stage, "")
        ))?;
    }
    Ok(())
}

fn create_users_and_followers(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT,
            created_at TIMESTAMPTZ NOT NULL
        );

        CREATE TABLE IF NOT EXISTS podcast_followers (
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            podcast_id BIGINT NOT NULL REFERENCES podcasts(id) ON DELETE CASCADE,
            followed_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, podcast_id)
        );

        CREATE INDEX IF NOT EXISTS idx_podcast_followers_podcast ON podcast_followers(podcast_id);
        "#,
    )?;
    Ok(())
}

/// Replace `''` left by older releases with NULL and rebuild the stage
/// indexes on the current predicates.
fn normalize_empty_paths(conn: &mut PgConnection) -> Result<()> {
    for kind in ArtifactKind::ALL {
        let column = kind.field_name();
        let cleared = diesel::sql_query(format!(
            "UPDATE episodes SET {c} = NULL WHERE {c} = ''",
            c = column
        ))
        .execute(conn)?;
        if cleared > 0 {
            info!(column, rows = cleared, "Replaced empty artifact paths with NULL");
        }
    }
    conn.batch_execute(
        "UPDATE transcript_links SET downloaded_path = NULL WHERE downloaded_path = '';",
    )?;
    for stage in Stage::ALL.iter().filter(|stage| !stage.is_terminal()) {
        conn.batch_execute(&format!(
            "DROP INDEX IF EXISTS idx_episodes_stage_{};",
            stage.as_str()
        ))?;
    }
    create_stage_indexes(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_names_are_ordered_and_unique() {
        let names = migration_names();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
        assert_eq!(names.last(), Some(&"007_normalize_empty_paths"));
    }
}
