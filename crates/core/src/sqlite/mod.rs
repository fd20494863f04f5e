//! SQLite storage backend.
//!
//! One database file, opened with a fresh connection for every logical
//! operation. WAL journaling lets readers proceed while a writer holds the
//! lock; a busy timeout absorbs short write contention between processes.

mod rows;
mod schema;

pub use schema::migration_names;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use tracing::{debug, info};

use crate::metrics::{self, OperationTimer};
use crate::model::{Episode, EpisodeUpdate, FailureKind, Podcast, TranscriptLink};
use crate::repository::sql::{
    self, Dialect, EPISODE_COLUMNS, EPISODE_CONTENT_COLUMNS, PODCAST_COLUMNS,
    PODCAST_CONTENT_COLUMNS, TRANSCRIPT_LINK_COLUMNS,
};
use crate::repository::{
    normalized, normalized_podcast, now, require_podcast_id, validate_episode, validate_podcast,
    EpisodePage, EpisodeQuery, EpisodeRepository, EpisodeWithPodcast, PodcastRepository,
    Repository, RepositoryError, Result, StateCounts,
};
use rows::{episode_from_row, link_from_row, podcast_from_row};

const BACKEND: &str = "sqlite";

/// Default wait for a competing writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of ids bound into one `IN (...)` list.
const IN_CHUNK: usize = 500;

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RepositoryError::Constraint(e.to_string())
            }
            _ => RepositoryError::Database(e.to_string()),
        }
    }
}

/// Fixed-width RFC 3339 text, so lexical order is chronological order.
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

static UPSERT_PODCAST_SQL: Lazy<String> = Lazy::new(|| {
    let columns = &PODCAST_COLUMNS[1..];
    format!(
        "INSERT INTO podcasts ({}) VALUES ({}) \
         ON CONFLICT(url) DO UPDATE SET {}, updated_at = excluded.updated_at \
         WHERE {}",
        columns.join(", "),
        placeholders(columns.len()),
        sql::excluded_assignments(&PODCAST_CONTENT_COLUMNS),
        sql::content_differs(Dialect::Sqlite, "podcasts", &PODCAST_CONTENT_COLUMNS),
    )
});

static UPSERT_EPISODE_SQL: Lazy<String> = Lazy::new(|| {
    let columns = &EPISODE_COLUMNS[1..];
    format!(
        "INSERT INTO episodes ({}) VALUES ({}) \
         ON CONFLICT(podcast_id, external_id) DO UPDATE SET {}, updated_at = excluded.updated_at \
         WHERE {}",
        columns.join(", "),
        placeholders(columns.len()),
        sql::excluded_assignments(&EPISODE_CONTENT_COLUMNS),
        sql::content_differs(Dialect::Sqlite, "episodes", &EPISODE_CONTENT_COLUMNS),
    )
});

static SELECT_JOINED_SQL: Lazy<String> = Lazy::new(|| {
    format!(
        "SELECT {}, {} FROM episodes e JOIN podcasts p ON p.id = e.podcast_id",
        sql::qualified("p", &PODCAST_COLUMNS),
        sql::qualified("e", &EPISODE_COLUMNS),
    )
});

const EPISODE_ORDER: &str = "ORDER BY (pub_date IS NULL) ASC, pub_date DESC, id DESC";

/// SQLite-backed repository.
pub struct SqliteRepository {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteRepository {
    /// Open (creating if needed) the database at `path` and migrate its schema.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(path: impl Into<PathBuf>, busy_timeout: Duration) -> Result<Self> {
        let repo = Self {
            path: path.into(),
            busy_timeout,
        };
        if let Some(parent) = repo.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = repo.open()?;
        let applied = schema::migrate(&mut conn)?;
        info!(
            path = %repo.path.display(),
            applied = applied.len(),
            "SQLite repository ready"
        );
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        // journal_mode answers with the resulting mode, so it needs the
        // checking variant.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn select_podcasts(
        conn: &Connection,
        tail: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<Podcast>> {
        let sql = format!("SELECT {} FROM podcasts {}", PODCAST_COLUMNS.join(", "), tail);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| podcast_from_row(row, 0))?;
        let mut podcasts = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Self::attach_episodes(conn, &mut podcasts)?;
        Ok(podcasts)
    }

    fn select_episodes(
        conn: &Connection,
        tail: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<Episode>> {
        let sql = format!("SELECT {} FROM episodes {}", EPISODE_COLUMNS.join(", "), tail);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| episode_from_row(row, 0))?;
        let mut episodes = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Self::attach_links(conn, episodes.iter_mut())?;
        Ok(episodes)
    }

    fn select_joined(
        conn: &Connection,
        tail: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<EpisodeWithPodcast>> {
        let sql = format!("{} {}", SELECT_JOINED_SQL.as_str(), tail);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(EpisodeWithPodcast {
                podcast: podcast_from_row(row, 0)?,
                episode: episode_from_row(row, PODCAST_COLUMNS.len())?,
            })
        })?;
        let mut items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Self::attach_links(conn, items.iter_mut().map(|item| &mut item.episode))?;
        Ok(items)
    }

    /// Fill `episodes` of each podcast, newest publish date first.
    fn attach_episodes(conn: &Connection, podcasts: &mut [Podcast]) -> Result<()> {
        let ids: Vec<i64> = podcasts.iter().filter_map(|p| p.id).collect();
        let mut by_podcast: HashMap<i64, Vec<Episode>> = HashMap::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let tail = format!(
                "WHERE podcast_id IN ({}) {}",
                placeholders(chunk.len()),
                EPISODE_ORDER
            );
            let params: Vec<&dyn ToSql> = chunk.iter().map(|id| id as &dyn ToSql).collect();
            for episode in Self::select_episodes(conn, &tail, &params)? {
                if let Some(podcast_id) = episode.podcast_id {
                    by_podcast.entry(podcast_id).or_default().push(episode);
                }
            }
        }
        for podcast in podcasts.iter_mut() {
            if let Some(id) = podcast.id {
                podcast.episodes = by_podcast.remove(&id).unwrap_or_default();
            }
        }
        Ok(())
    }

    /// Fill `transcript_links` of each episode, in insertion order.
    fn attach_links<'a>(
        conn: &Connection,
        episodes: impl Iterator<Item = &'a mut Episode>,
    ) -> Result<()> {
        let mut episodes: Vec<&mut Episode> = episodes.collect();
        let ids: Vec<i64> = episodes.iter().filter_map(|e| e.id).collect();
        let mut by_episode: HashMap<i64, Vec<TranscriptLink>> = HashMap::new();
        for chunk in ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT {} FROM transcript_links WHERE episode_id IN ({}) ORDER BY id",
                TRANSCRIPT_LINK_COLUMNS.join(", "),
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), link_from_row)?;
            for link in rows {
                let link = link?;
                if let Some(episode_id) = link.episode_id {
                    by_episode.entry(episode_id).or_default().push(link);
                }
            }
        }
        for episode in episodes.iter_mut() {
            if let Some(id) = episode.id {
                episode.transcript_links = by_episode.remove(&id).unwrap_or_default();
            }
        }
        Ok(())
    }

    /// Upsert podcast metadata. Returns the id and whether a row was written.
    fn upsert_podcast(conn: &Connection, podcast: &Podcast, now: DateTime<Utc>) -> Result<(i64, bool)> {
        let podcast = normalized_podcast(podcast);
        let stamp = timestamp(now);
        let changed = conn.execute(
            UPSERT_PODCAST_SQL.as_str(),
            params![
                podcast.url,
                podcast.slug,
                podcast.title,
                podcast.description,
                podcast.image_url,
                podcast.language,
                podcast.category,
                podcast.subcategory,
                podcast.last_processed.map(timestamp),
                stamp,
                stamp,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM podcasts WHERE url = ?",
            params![podcast.url],
            |row| row.get(0),
        )?;
        metrics::record_write(BACKEND, "podcast", changed > 0);
        Ok((id, changed > 0))
    }

    /// Upsert one episode and its transcript links.
    fn upsert_episode(
        conn: &Connection,
        podcast_id: i64,
        episode: &Episode,
        now: DateTime<Utc>,
    ) -> Result<(i64, bool)> {
        let episode = normalized(episode);
        let failure = episode.failure.as_ref();
        let stamp = timestamp(now);
        let changed = conn.execute(
            UPSERT_EPISODE_SQL.as_str(),
            params![
                podcast_id,
                episode.external_id,
                episode.title,
                episode.slug,
                episode.description,
                episode.description_html,
                episode.pub_date.map(timestamp),
                episode.audio_url,
                episode.duration_seconds,
                episode.image_url,
                episode.audio_path,
                episode.downsampled_audio_path,
                episode.raw_transcript_path,
                episode.clean_transcript_path,
                episode.summary_path,
                failure.map(|f| f.stage.as_str()),
                failure.map(|f| f.reason.as_str()),
                failure.map(|f| f.kind.as_str()),
                failure.map(|f| timestamp(f.failed_at)),
                stamp,
                stamp,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM episodes WHERE podcast_id = ? AND external_id = ?",
            params![podcast_id, episode.external_id],
            |row| row.get(0),
        )?;
        metrics::record_write(BACKEND, "episode", changed > 0);

        for link in &episode.transcript_links {
            conn.execute(
                "INSERT INTO transcript_links (episode_id, url, mime_type, language, downloaded_path) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(episode_id, url) DO UPDATE SET \
                 mime_type = excluded.mime_type, \
                 language = excluded.language, \
                 downloaded_path = COALESCE(excluded.downloaded_path, transcript_links.downloaded_path)",
                params![id, link.url, link.mime_type, link.language, link.downloaded_path],
            )?;
        }
        Ok((id, changed > 0))
    }

    fn podcast_exists(conn: &Connection, podcast_id: i64) -> Result<bool> {
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM podcasts WHERE id = ?)",
            params![podcast_id],
            |row| row.get(0),
        )?)
    }

    /// Delete stored episodes of a podcast whose external id is not in `keep`.
    fn prune_episodes(conn: &Connection, podcast_id: i64, keep: &HashSet<&str>) -> Result<usize> {
        let mut stmt =
            conn.prepare("SELECT id, external_id FROM episodes WHERE podcast_id = ?")?;
        let stored = stmt
            .query_map(params![podcast_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut removed = 0;
        for (id, external_id) in stored {
            if !keep.contains(external_id.as_str()) {
                removed += conn.execute("DELETE FROM episodes WHERE id = ?", params![id])?;
            }
        }
        Ok(removed)
    }

    fn build_where_clause(query: &EpisodeQuery) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(podcast_id) = query.podcast_id {
            conditions.push("e.podcast_id = ?".to_string());
            params.push(Box::new(podcast_id));
        }

        if let Some(state) = query.state {
            conditions.push(sql::stage_predicate(state, "e"));
        }

        if let Some(after) = query.published_after {
            conditions.push("e.pub_date >= ?".to_string());
            params.push(Box::new(timestamp(after)));
        }

        if let Some(before) = query.published_before {
            conditions.push("e.pub_date < ?".to_string());
            params.push(Box::new(timestamp(before)));
        }

        if let Some(ref search) = query.search {
            let matches: Vec<String> = ["e.title", "e.description", "p.title"]
                .iter()
                .map(|column| sql::like_match(Dialect::Sqlite, column, "?"))
                .collect();
            conditions.push(format!("({})", matches.join(" OR ")));
            let pattern = sql::like_pattern(search);
            params.push(Box::new(pattern.clone()));
            params.push(Box::new(pattern.clone()));
            params.push(Box::new(pattern));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl PodcastRepository for SqliteRepository {
    fn get_all(&self) -> Result<Vec<Podcast>> {
        let _timer = OperationTimer::start(BACKEND, "get_all");
        let conn = self.open()?;
        Self::select_podcasts(&conn, "ORDER BY id", &[])
    }

    fn get_by_id(&self, id: i64) -> Result<Option<Podcast>> {
        let conn = self.open()?;
        Ok(Self::select_podcasts(&conn, "WHERE id = ?", &[&id])?.pop())
    }

    fn get_by_url(&self, url: &str) -> Result<Option<Podcast>> {
        let conn = self.open()?;
        Ok(Self::select_podcasts(&conn, "WHERE url = ?", &[&url])?.pop())
    }

    fn get_by_index(&self, index: usize) -> Result<Option<Podcast>> {
        if index == 0 {
            return Ok(None);
        }
        let offset = (index - 1) as i64;
        let conn = self.open()?;
        Ok(Self::select_podcasts(
            &conn,
            "ORDER BY created_at DESC, id DESC LIMIT 1 OFFSET ?",
            &[&offset],
        )?
        .pop())
    }

    fn get_by_slug(&self, slug: &str) -> Result<Option<Podcast>> {
        let conn = self.open()?;
        Ok(Self::select_podcasts(&conn, "WHERE slug = ?", &[&slug])?.pop())
    }

    fn exists(&self, url: &str) -> Result<bool> {
        let conn = self.open()?;
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM podcasts WHERE url = ?)",
            params![url],
            |row| row.get(0),
        )?)
    }

    fn save(&self, podcast: &Podcast) -> Result<i64> {
        validate_podcast(podcast)?;
        let _timer = OperationTimer::start(BACKEND, "save");
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let stamp = now();

        let (podcast_id, _) = Self::upsert_podcast(&tx, podcast, stamp)?;
        let keep: HashSet<&str> = podcast
            .episodes
            .iter()
            .map(|e| e.external_id.as_str())
            .collect();
        let removed = Self::prune_episodes(&tx, podcast_id, &keep)?;
        for episode in &podcast.episodes {
            Self::upsert_episode(&tx, podcast_id, episode, stamp)?;
        }
        tx.commit()?;

        debug!(
            url = %podcast.url,
            podcast_id,
            episodes = podcast.episodes.len(),
            removed,
            "Podcast saved"
        );
        Ok(podcast_id)
    }

    fn save_metadata(&self, podcast: &Podcast) -> Result<i64> {
        validate_podcast(&podcast.metadata())?;
        let conn = self.open()?;
        let (id, _) = Self::upsert_podcast(&conn, podcast, now())?;
        Ok(id)
    }

    fn delete(&self, url: &str) -> Result<bool> {
        let conn = self.open()?;
        let deleted = conn.execute("DELETE FROM podcasts WHERE url = ?", params![url])?;
        if deleted > 0 {
            debug!(url, "Podcast deleted");
        }
        Ok(deleted > 0)
    }

    fn update_episode_fields(
        &self,
        podcast_url: &str,
        external_id: &str,
        update: &EpisodeUpdate,
    ) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }
        let _timer = OperationTimer::start(BACKEND, "update_episode_fields");
        let mut conn = self.open()?;
        let tx = conn.transaction()?;

        let podcast_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM podcasts WHERE url = ?",
                params![podcast_url],
                |row| row.get(0),
            )
            .optional()?;
        let Some(podcast_id) = podcast_id else {
            return Ok(false);
        };
        let Some(mut episode) = Self::select_episodes(
            &tx,
            "WHERE podcast_id = ? AND external_id = ?",
            &[&podcast_id, &external_id],
        )?
        .pop() else {
            return Ok(false);
        };

        if !update.apply(&mut episode) {
            metrics::record_write(BACKEND, "episode", false);
            return Ok(false);
        }
        // Links are already stored; only the episode row changes.
        episode.transcript_links.clear();
        let (_, written) = Self::upsert_episode(&tx, podcast_id, &episode, now())?;
        tx.commit()?;
        Ok(written)
    }
}

impl EpisodeRepository for SqliteRepository {
    fn get_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let conn = self.open()?;
        Self::select_episodes(
            &conn,
            &format!("WHERE podcast_id = ? {}", EPISODE_ORDER),
            &[&podcast_id],
        )
    }

    fn get_episode(&self, episode_id: i64) -> Result<Option<EpisodeWithPodcast>> {
        let conn = self.open()?;
        Ok(Self::select_joined(&conn, "WHERE e.id = ?", &[&episode_id])?.pop())
    }

    fn get_episode_by_external_id(
        &self,
        podcast_id: i64,
        external_id: &str,
    ) -> Result<Option<Episode>> {
        let conn = self.open()?;
        Ok(Self::select_episodes(
            &conn,
            "WHERE podcast_id = ? AND external_id = ?",
            &[&podcast_id, &external_id],
        )?
        .pop())
    }

    fn get_episode_by_slugs(
        &self,
        podcast_slug: &str,
        episode_slug: &str,
    ) -> Result<Option<EpisodeWithPodcast>> {
        let conn = self.open()?;
        Ok(Self::select_joined(
            &conn,
            "WHERE p.slug = ? AND e.slug = ? ORDER BY e.id LIMIT 1",
            &[&podcast_slug, &episode_slug],
        )?
        .pop())
    }

    fn list_episodes(&self, query: &EpisodeQuery) -> Result<EpisodePage> {
        let _timer = OperationTimer::start(BACKEND, "list_episodes");
        let conn = self.open()?;
        let (where_clause, params) = Self::build_where_clause(query);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM episodes e JOIN podcasts p ON p.id = e.podcast_id {}",
                where_clause
            ),
            param_refs.as_slice(),
            |row| row.get(0),
        )?;

        let limit = query.effective_limit();
        let offset = query.effective_offset();
        let mut all_params = param_refs;
        all_params.push(&limit);
        all_params.push(&offset);
        let tail = format!(
            "{} ORDER BY {} LIMIT ? OFFSET ?",
            where_clause,
            sql::order_by(Dialect::Sqlite, query, "e")
        );
        let items = Self::select_joined(&conn, &tail, &all_params)?;

        Ok(EpisodePage {
            items,
            total,
            limit,
            offset,
        })
    }

    fn count_by_state(&self, podcast_id: Option<i64>) -> Result<StateCounts> {
        let conn = self.open()?;
        let mut sql = format!("SELECT {} FROM episodes e", sql::state_count_columns("e"));
        let mut params: Vec<&dyn ToSql> = Vec::new();
        if let Some(ref id) = podcast_id {
            sql.push_str(" WHERE e.podcast_id = ?");
            params.push(id);
        }
        Ok(conn.query_row(&sql, params.as_slice(), |row| {
            Ok(StateCounts {
                discovered: row.get(0)?,
                downloaded: row.get(1)?,
                downsampled: row.get(2)?,
                transcribed: row.get(3)?,
                cleaned: row.get(4)?,
                summarized: row.get(5)?,
                failed: row.get(6)?,
            })
        })?)
    }

    fn save_episode(&self, episode: &Episode) -> Result<i64> {
        let ids = self.save_episodes(std::slice::from_ref(episode))?;
        Ok(ids[0])
    }

    fn save_episodes(&self, episodes: &[Episode]) -> Result<Vec<i64>> {
        for episode in episodes {
            require_podcast_id(episode)?;
            validate_episode(episode)?;
        }
        if episodes.is_empty() {
            return Ok(Vec::new());
        }
        let _timer = OperationTimer::start(BACKEND, "save_episodes");
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let stamp = now();

        let mut known: HashSet<i64> = HashSet::new();
        let mut ids = Vec::with_capacity(episodes.len());
        for episode in episodes {
            let podcast_id = require_podcast_id(episode)?;
            if !known.contains(&podcast_id) {
                if !Self::podcast_exists(&tx, podcast_id)? {
                    return Err(RepositoryError::PodcastNotFound(format!("id {}", podcast_id)));
                }
                known.insert(podcast_id);
            }
            let (id, _) = Self::upsert_episode(&tx, podcast_id, episode, stamp)?;
            ids.push(id);
        }
        tx.commit()?;
        debug!(count = ids.len(), "Episodes saved");
        Ok(ids)
    }

    fn mark_failed(
        &self,
        episode_id: i64,
        stage: &str,
        reason: &str,
        kind: FailureKind,
    ) -> Result<bool> {
        let conn = self.open()?;
        let stamp = timestamp(now());
        let updated = conn.execute(
            "UPDATE episodes SET failed_at_stage = ?, failure_reason = ?, failure_type = ?, \
             failed_at = ?, updated_at = ? WHERE id = ?",
            params![stage, reason, kind.as_str(), stamp, stamp, episode_id],
        )?;
        if updated > 0 {
            debug!(episode_id, stage, %kind, "Episode marked failed");
        }
        Ok(updated > 0)
    }

    fn clear_failure(&self, episode_id: i64) -> Result<bool> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE episodes SET failed_at_stage = NULL, failure_reason = NULL, \
             failure_type = NULL, failed_at = NULL, updated_at = ? \
             WHERE id = ? AND failed_at IS NOT NULL",
            params![timestamp(now()), episode_id],
        )?;
        Ok(updated > 0)
    }

    fn get_failed_episodes(&self, limit: Option<i64>) -> Result<Vec<EpisodeWithPodcast>> {
        let conn = self.open()?;
        // A negative LIMIT means no limit in SQLite.
        let limit = limit.map(|l| l.max(0)).unwrap_or(-1);
        Self::select_joined(
            &conn,
            "WHERE e.failed_at IS NOT NULL ORDER BY e.failed_at DESC, e.id DESC LIMIT ?",
            &[&limit],
        )
    }

    fn add_transcript_links(&self, episode_id: i64, links: &[TranscriptLink]) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM episodes WHERE id = ?)",
            params![episode_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }
        let mut added = 0;
        for link in links {
            added += tx.execute(
                "INSERT INTO transcript_links (episode_id, url, mime_type, language, downloaded_path) \
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT(episode_id, url) DO NOTHING",
                params![episode_id, link.url, link.mime_type, link.language, link.downloaded_path],
            )?;
        }
        tx.commit()?;
        Ok(added)
    }

    fn get_transcript_links(&self, episode_id: i64) -> Result<Vec<TranscriptLink>> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {} FROM transcript_links WHERE episode_id = ? ORDER BY id",
            TRANSCRIPT_LINK_COLUMNS.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let links = stmt
            .query_map(params![episode_id], link_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn mark_transcript_downloaded(&self, link_id: i64, path: &str) -> Result<bool> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE transcript_links SET downloaded_path = ? WHERE id = ?",
            params![path, link_id],
        )?;
        Ok(updated > 0)
    }
}

impl Repository for SqliteRepository {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn save_all(&self, podcasts: &[Podcast]) -> Result<Vec<i64>> {
        for podcast in podcasts {
            validate_podcast(podcast)?;
        }
        let _timer = OperationTimer::start(BACKEND, "save_all");
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let stamp = now();

        let mut ids = Vec::with_capacity(podcasts.len());
        for podcast in podcasts {
            let (podcast_id, _) = Self::upsert_podcast(&tx, podcast, stamp)?;
            for episode in &podcast.episodes {
                Self::upsert_episode(&tx, podcast_id, episode, stamp)?;
            }
            ids.push(podcast_id);
        }
        tx.commit()?;
        debug!(podcasts = ids.len(), "Batch committed");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactKind, Stage};
    use tempfile::TempDir;

    fn create_test_repo() -> (SqliteRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repo = SqliteRepository::new(temp_dir.path().join("podcasts.db")).unwrap();
        (repo, temp_dir)
    }

    #[test]
    fn test_new_creates_database_and_reopens() {
        let (repo, temp) = create_test_repo();
        assert!(repo.path().exists());
        drop(repo);
        let reopened = SqliteRepository::new(temp.path().join("podcasts.db")).unwrap();
        assert!(reopened.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_empty_paths_are_stored_as_null() {
        let (repo, _temp) = create_test_repo();
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        let mut episode = Episode::new("ext-1", "One");
        episode.audio_path = Some(String::new());
        podcast.episodes.push(episode);
        repo.save(&podcast).unwrap();

        let conn = repo.open().unwrap();
        let nulls: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM episodes WHERE audio_path IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 1);
        assert_eq!(repo.count_by_state(None).unwrap().discovered, 1);
    }

    #[test]
    fn test_empty_string_paths_count_as_absent() {
        let (repo, _temp) = create_test_repo();
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        podcast.episodes.push(Episode::new("ext-1", "One"));
        let mut cleaned = Episode::new("ext-2", "Two");
        cleaned.clean_transcript_path = Some("/clean/2.txt".to_string());
        podcast.episodes.push(cleaned);
        repo.save(&podcast).unwrap();

        // Rows written by older releases may carry '' instead of NULL.
        let conn = repo.open().unwrap();
        conn.execute(
            "UPDATE episodes SET audio_path = '', summary_path = '' WHERE external_id = 'ext-1'",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE episodes SET summary_path = '' WHERE external_id = 'ext-2'",
            [],
        )
        .unwrap();
        drop(conn);

        let stored = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        assert_eq!(stored.episode("ext-1").unwrap().state(), Stage::Discovered);
        assert_eq!(stored.episode("ext-2").unwrap().state(), Stage::Cleaned);

        let counts = repo.count_by_state(None).unwrap();
        assert_eq!(counts.discovered, 1);
        assert_eq!(counts.cleaned, 1);
        assert_eq!(counts.downloaded, 0);
        assert_eq!(counts.summarized, 0);

        let discovered = repo
            .get_episodes_by_state(Stage::Discovered, None)
            .unwrap();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].episode.external_id, "ext-1");
        let cleaned = repo.get_episodes_by_state(Stage::Cleaned, None).unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].episode.external_id, "ext-2");
    }

    #[test]
    fn test_duplicate_slug_is_constraint_error() {
        let (repo, _temp) = create_test_repo();
        repo.save(&Podcast::new("https://ex.com/a.xml", "Same Name"))
            .unwrap();
        let err = repo
            .save(&Podcast::new("https://ex.com/b.xml", "Same Name"))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
    }

    #[test]
    fn test_timestamps_are_fixed_width_text() {
        let (repo, _temp) = create_test_repo();
        repo.save(&Podcast::new("https://ex.com/feed.xml", "Test"))
            .unwrap();
        let conn = repo.open().unwrap();
        let created: String = conn
            .query_row("SELECT created_at FROM podcasts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(created.len(), "2024-01-01T00:00:00.000000Z".len());
        assert!(created.ends_with('Z'));
    }

    #[test]
    fn test_wal_mode_enabled() {
        let (repo, _temp) = create_test_repo();
        let conn = repo.open().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_delete_cascades_to_links() {
        let (repo, _temp) = create_test_repo();
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        let mut episode = Episode::new("ext-1", "One");
        episode
            .transcript_links
            .push(TranscriptLink::new("https://ex.com/1.vtt", "text/vtt"));
        podcast.episodes.push(episode);
        repo.save(&podcast).unwrap();

        assert!(repo.delete("https://ex.com/feed.xml").unwrap());
        let conn = repo.open().unwrap();
        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM transcript_links", [], |row| row.get(0))
            .unwrap();
        assert_eq!(links, 0);
    }

    #[test]
    fn test_update_keeps_links() {
        let (repo, _temp) = create_test_repo();
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        let mut episode = Episode::new("ext-1", "One");
        episode
            .transcript_links
            .push(TranscriptLink::new("https://ex.com/1.vtt", "text/vtt"));
        podcast.episodes.push(episode);
        repo.save(&podcast).unwrap();

        let update = EpisodeUpdate::artifact(ArtifactKind::Audio, "/audio/1.mp3");
        assert!(repo
            .update_episode_fields("https://ex.com/feed.xml", "ext-1", &update)
            .unwrap());
        let stored = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        assert_eq!(stored.episodes[0].state(), Stage::Downloaded);
        assert_eq!(stored.episodes[0].transcript_links.len(), 1);
    }
}
