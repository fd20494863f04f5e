//! PostgreSQL storage backend.
//!
//! Connections come from a bounded r2d2 pool and are held only for the
//! duration of one call. Every multi-statement write runs in a single
//! transaction. Besides the shared podcast/episode schema this backend keeps
//! users and the podcasts they follow, so one processed podcast can be shared
//! by many followers.

mod followers;
mod rows;
mod schema;
mod statement;

pub use schema::migration_names;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use diesel::result::DatabaseErrorKind;
use once_cell::sync::Lazy;
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
use rows::{CountRow, EpisodeRow, FoundRow, IdRow, LinkRow, PodcastRow, StateCountsRow};
use statement::{statement, Bind, Statement};

const BACKEND: &str = "postgres";

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

impl From<diesel::result::Error> for RepositoryError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(
                kind @ (DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation),
                info,
            ) => RepositoryError::Constraint(format!("{:?}: {}", kind, info.message())),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

impl From<PoolError> for RepositoryError {
    fn from(e: PoolError) -> Self {
        RepositoryError::Database(format!("connection pool: {}", e))
    }
}

/// Pool sizing for [`PostgresRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: u32,
    /// How long to wait for a free connection before failing.
    pub connection_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

static UPSERT_PODCAST_SQL: Lazy<String> = Lazy::new(|| {
    let columns = &PODCAST_COLUMNS[1..];
    format!(
        "INSERT INTO podcasts ({}) VALUES ({}) \
         ON CONFLICT (url) DO UPDATE SET {}, updated_at = excluded.updated_at \
         WHERE {}",
        columns.join(", "),
        numbered(columns.len()),
        sql::excluded_assignments(&PODCAST_CONTENT_COLUMNS),
        sql::content_differs(Dialect::Postgres, "podcasts", &PODCAST_CONTENT_COLUMNS),
    )
});

static UPSERT_EPISODE_SQL: Lazy<String> = Lazy::new(|| {
    let columns = &EPISODE_COLUMNS[1..];
    format!(
        "INSERT INTO episodes ({}) VALUES ({}) \
         ON CONFLICT (podcast_id, external_id) DO UPDATE SET {}, updated_at = excluded.updated_at \
         WHERE {}",
        columns.join(", "),
        numbered(columns.len()),
        sql::excluded_assignments(&EPISODE_CONTENT_COLUMNS),
        sql::content_differs(Dialect::Postgres, "episodes", &EPISODE_CONTENT_COLUMNS),
    )
});

const EPISODE_ORDER: &str = "ORDER BY pub_date DESC NULLS LAST, id DESC";

/// `$1, $2, ..., $n`
fn numbered(n: usize) -> String {
    (1..=n)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// PostgreSQL-backed repository.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Build a pool for `database_url` and migrate the schema.
    pub fn new(database_url: &str, settings: PoolSettings) -> Result<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(settings.max_size)
            .connection_timeout(settings.connection_timeout)
            .build(manager)?;
        info!(max_size = settings.max_size, "PostgreSQL pool created");
        Self::from_pool(pool)
    }

    /// Use an existing pool. The schema is migrated before returning.
    pub fn from_pool(pool: PgPool) -> Result<Self> {
        let repo = Self { pool };
        let applied = repo.with_conn(schema::migrate)?;
        info!(applied = applied.len(), "PostgreSQL repository ready");
        Ok(repo)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `f` on a pooled connection, returned to the pool afterwards.
    fn with_conn<T>(&self, f: impl FnOnce(&mut PgConnection) -> Result<T>) -> Result<T> {
        let mut conn = self.pool.get()?;
        f(&mut conn)
    }

    fn in_transaction<T>(&self, f: impl FnOnce(&mut PgConnection) -> Result<T>) -> Result<T> {
        self.with_conn(|conn| conn.transaction::<T, RepositoryError, _>(f))
    }

    fn load_podcasts(conn: &mut PgConnection, tail: Statement) -> Result<Vec<Podcast>> {
        let mut stmt = Statement::new(format!(
            "SELECT {} FROM podcasts",
            PODCAST_COLUMNS.join(", ")
        ));
        stmt.append(tail);
        let mut podcasts: Vec<Podcast> = stmt
            .into_query()
            .load::<PodcastRow>(conn)?
            .into_iter()
            .map(Podcast::from)
            .collect();
        Self::attach_episodes(conn, &mut podcasts)?;
        Ok(podcasts)
    }

    /// Podcast metadata keyed by id, without episodes.
    fn podcast_metadata(conn: &mut PgConnection, ids: Vec<i64>) -> Result<HashMap<i64, Podcast>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = statement(
            &format!(
                "SELECT {} FROM podcasts WHERE id = ANY({{}})",
                PODCAST_COLUMNS.join(", ")
            ),
            [ids],
        )
        .into_query()
        .load::<PodcastRow>(conn)?;
        Ok(rows
            .into_iter()
            .map(Podcast::from)
            .filter_map(|p| p.id.map(|id| (id, p)))
            .collect())
    }

    fn load_episodes(conn: &mut PgConnection, stmt: Statement) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = stmt
            .into_query()
            .load::<EpisodeRow>(conn)?
            .into_iter()
            .map(Episode::from)
            .collect();
        Self::attach_links(conn, episodes.iter_mut())?;
        Ok(episodes)
    }

    fn select_episodes(tail: &str) -> Statement {
        Statement::new(format!(
            "SELECT {} FROM episodes {}",
            EPISODE_COLUMNS.join(", "),
            tail
        ))
    }

    /// Load episodes and pair each with its podcast's metadata.
    fn load_joined(conn: &mut PgConnection, stmt: Statement) -> Result<Vec<EpisodeWithPodcast>> {
        let episodes = Self::load_episodes(conn, stmt)?;
        let ids: HashSet<i64> = episodes.iter().filter_map(|e| e.podcast_id).collect();
        let podcasts = Self::podcast_metadata(conn, ids.into_iter().collect())?;
        Ok(episodes
            .into_iter()
            .filter_map(|episode| {
                let podcast = podcasts.get(&episode.podcast_id?)?.clone();
                Some(EpisodeWithPodcast { podcast, episode })
            })
            .collect())
    }

    fn attach_episodes(conn: &mut PgConnection, podcasts: &mut [Podcast]) -> Result<()> {
        let ids: Vec<i64> = podcasts.iter().filter_map(|p| p.id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let mut stmt = Self::select_episodes("WHERE podcast_id = ANY(");
        let placeholder = stmt.param(ids);
        stmt.push(&format!("{}) {}", placeholder, EPISODE_ORDER));

        let mut by_podcast: HashMap<i64, Vec<Episode>> = HashMap::new();
        for episode in Self::load_episodes(conn, stmt)? {
            if let Some(podcast_id) = episode.podcast_id {
                by_podcast.entry(podcast_id).or_default().push(episode);
            }
        }
        for podcast in podcasts.iter_mut() {
            if let Some(id) = podcast.id {
                podcast.episodes = by_podcast.remove(&id).unwrap_or_default();
            }
        }
        Ok(())
    }

    fn attach_links<'a>(
        conn: &mut PgConnection,
        episodes: impl Iterator<Item = &'a mut Episode>,
    ) -> Result<()> {
        let mut episodes: Vec<&mut Episode> = episodes.collect();
        let ids: Vec<i64> = episodes.iter().filter_map(|e| e.id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let rows = statement(
            &format!(
                "SELECT {} FROM transcript_links WHERE episode_id = ANY({{}}) ORDER BY id",
                TRANSCRIPT_LINK_COLUMNS.join(", ")
            ),
            [ids],
        )
        .into_query()
        .load::<LinkRow>(conn)?;

        let mut by_episode: HashMap<i64, Vec<TranscriptLink>> = HashMap::new();
        for link in rows.into_iter().map(TranscriptLink::from) {
            if let Some(episode_id) = link.episode_id {
                by_episode.entry(episode_id).or_default().push(link);
            }
        }
        for episode in episodes.iter_mut() {
            if let Some(id) = episode.id {
                episode.transcript_links = by_episode.remove(&id).unwrap_or_default();
            }
        }
        Ok(())
    }

    fn upsert_podcast(
        conn: &mut PgConnection,
        podcast: &Podcast,
        now: DateTime<Utc>,
    ) -> Result<(i64, bool)> {
        let podcast = normalized_podcast(podcast);
        let values: Vec<Bind> = vec![
            podcast.url.clone().into(),
            podcast.slug.clone().into(),
            podcast.title.clone().into(),
            podcast.description.clone().into(),
            podcast.image_url.clone().into(),
            podcast.language.clone().into(),
            podcast.category.clone().into(),
            podcast.subcategory.clone().into(),
            podcast.last_processed.into(),
            now.into(),
            now.into(),
        ];
        let changed = Statement::with_binds(UPSERT_PODCAST_SQL.as_str(), values)
            .into_query()
            .execute(conn)?;
        let id = statement("SELECT id FROM podcasts WHERE url = {}", [podcast.url.as_str()])
            .into_query()
            .get_result::<IdRow>(conn)?
            .id;
        metrics::record_write(BACKEND, "podcast", changed > 0);
        Ok((id, changed > 0))
    }

    fn upsert_episode(
        conn: &mut PgConnection,
        podcast_id: i64,
        episode: &Episode,
        now: DateTime<Utc>,
    ) -> Result<(i64, bool)> {
        let episode = normalized(episode);
        let failure = episode.failure.as_ref();
        let values: Vec<Bind> = vec![
            podcast_id.into(),
            episode.external_id.clone().into(),
            episode.title.clone().into(),
            episode.slug.clone().into(),
            episode.description.clone().into(),
            episode.description_html.clone().into(),
            episode.pub_date.into(),
            episode.audio_url.clone().into(),
            episode.duration_seconds.into(),
            episode.image_url.clone().into(),
            episode.audio_path.clone().into(),
            episode.downsampled_audio_path.clone().into(),
            episode.raw_transcript_path.clone().into(),
            episode.clean_transcript_path.clone().into(),
            episode.summary_path.clone().into(),
            failure.map(|f| f.stage.as_str()).into(),
            failure.map(|f| f.reason.as_str()).into(),
            failure.map(|f| f.kind.as_str()).into(),
            failure.map(|f| f.failed_at).into(),
            now.into(),
            now.into(),
        ];
        let changed = Statement::with_binds(UPSERT_EPISODE_SQL.as_str(), values)
            .into_query()
            .execute(conn)?;
        let id = statement(
            "SELECT id FROM episodes WHERE podcast_id = {} AND external_id = {}",
            [Bind::from(podcast_id), Bind::from(episode.external_id.as_str())],
        )
        .into_query()
        .get_result::<IdRow>(conn)?
        .id;
        metrics::record_write(BACKEND, "episode", changed > 0);

        for link in &episode.transcript_links {
            statement(
                "INSERT INTO transcript_links (episode_id, url, mime_type, language, downloaded_path) \
                 VALUES ({}, {}, {}, {}, {}) \
                 ON CONFLICT (episode_id, url) DO UPDATE SET \
                 mime_type = excluded.mime_type, \
                 language = excluded.language, \
                 downloaded_path = COALESCE(excluded.downloaded_path, transcript_links.downloaded_path)",
                [
                    Bind::from(id),
                    Bind::from(link.url.as_str()),
                    Bind::from(link.mime_type.as_str()),
                    Bind::from(link.language.clone()),
                    Bind::from(link.downloaded_path.clone()),
                ],
            )
            .into_query()
            .execute(conn)?;
        }
        Ok((id, changed > 0))
    }

    fn found(conn: &mut PgConnection, stmt: Statement) -> Result<bool> {
        Ok(stmt.into_query().get_result::<FoundRow>(conn)?.found)
    }

    fn build_where_clause(query: &EpisodeQuery, stmt: &mut Statement) {
        let mut conditions: Vec<String> = Vec::new();

        if let Some(podcast_id) = query.podcast_id {
            conditions.push(format!("e.podcast_id = {}", stmt.param(podcast_id)));
        }

        if let Some(state) = query.state {
            conditions.push(sql::stage_predicate(state, "e"));
        }

        if let Some(after) = query.published_after {
            conditions.push(format!("e.pub_date >= {}", stmt.param(after)));
        }

        if let Some(before) = query.published_before {
            conditions.push(format!("e.pub_date < {}", stmt.param(before)));
        }

        if let Some(ref search) = query.search {
            let pattern = stmt.param(sql::like_pattern(search));
            let matches: Vec<String> = ["e.title", "e.description", "p.title"]
                .iter()
                .map(|column| sql::like_match(Dialect::Postgres, column, &pattern))
                .collect();
            conditions.push(format!("({})", matches.join(" OR ")));
        }

        if !conditions.is_empty() {
            stmt.push(&format!("WHERE {}", conditions.join(" AND ")));
        }
    }
}

impl PodcastRepository for PostgresRepository {
    fn get_all(&self) -> Result<Vec<Podcast>> {
        let _timer = OperationTimer::start(BACKEND, "get_all");
        self.with_conn(|conn| Self::load_podcasts(conn, Statement::new("ORDER BY id")))
    }

    fn get_by_id(&self, id: i64) -> Result<Option<Podcast>> {
        self.with_conn(|conn| {
            Ok(Self::load_podcasts(conn, statement("WHERE id = {}", [id]))?.pop())
        })
    }

    fn get_by_url(&self, url: &str) -> Result<Option<Podcast>> {
        self.with_conn(|conn| {
            Ok(Self::load_podcasts(conn, statement("WHERE url = {}", [url]))?.pop())
        })
    }

    fn get_by_index(&self, index: usize) -> Result<Option<Podcast>> {
        if index == 0 {
            return Ok(None);
        }
        let offset = (index - 1) as i64;
        self.with_conn(|conn| {
            let tail = statement("ORDER BY created_at DESC, id DESC LIMIT 1 OFFSET {}", [offset]);
            Ok(Self::load_podcasts(conn, tail)?.pop())
        })
    }

    fn get_by_slug(&self, slug: &str) -> Result<Option<Podcast>> {
        self.with_conn(|conn| {
            Ok(Self::load_podcasts(conn, statement("WHERE slug = {}", [slug]))?.pop())
        })
    }

    fn exists(&self, url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Self::found(
                conn,
                statement(
                    "SELECT EXISTS(SELECT 1 FROM podcasts WHERE url = {}) AS found",
                    [url],
                ),
            )
        })
    }

    fn save(&self, podcast: &Podcast) -> Result<i64> {
        validate_podcast(podcast)?;
        let _timer = OperationTimer::start(BACKEND, "save");
        let stamp = now();
        let (podcast_id, removed) = self.in_transaction(|conn| {
            let (podcast_id, _) = Self::upsert_podcast(conn, podcast, stamp)?;
            let keep: Vec<String> = podcast
                .episodes
                .iter()
                .map(|e| e.external_id.clone())
                .collect();
            let removed = Statement::with_binds(
                "DELETE FROM episodes WHERE podcast_id = $1 AND NOT (external_id = ANY($2))",
                vec![Bind::from(podcast_id), Bind::TextArray(keep)],
            )
            .into_query()
            .execute(conn)?;
            for episode in &podcast.episodes {
                Self::upsert_episode(conn, podcast_id, episode, stamp)?;
            }
            Ok((podcast_id, removed))
        })?;
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
        let stamp = now();
        self.in_transaction(|conn| Ok(Self::upsert_podcast(conn, podcast, stamp)?.0))
    }

    fn delete(&self, url: &str) -> Result<bool> {
        let deleted = self.with_conn(|conn| {
            Ok(statement("DELETE FROM podcasts WHERE url = {}", [url])
                .into_query()
                .execute(conn)?)
        })?;
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
        self.in_transaction(|conn| {
            let podcast_id = statement("SELECT id FROM podcasts WHERE url = {}", [podcast_url])
                .into_query()
                .get_result::<IdRow>(conn)
                .optional()?
                .map(|row| row.id);
            let Some(podcast_id) = podcast_id else {
                return Ok(false);
            };

            let mut stmt = Self::select_episodes("WHERE");
            stmt.push_with(
                "podcast_id = {} AND external_id = {} FOR UPDATE",
                [Bind::from(podcast_id), Bind::from(external_id)],
            );
            let Some(mut episode) = Self::load_episodes(conn, stmt)?.pop() else {
                return Ok(false);
            };

            if !update.apply(&mut episode) {
                metrics::record_write(BACKEND, "episode", false);
                return Ok(false);
            }
            episode.transcript_links.clear();
            let (_, written) = Self::upsert_episode(conn, podcast_id, &episode, now())?;
            Ok(written)
        })
    }
}

impl EpisodeRepository for PostgresRepository {
    fn get_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        self.with_conn(|conn| {
            let mut stmt = Self::select_episodes("WHERE");
            stmt.push_with("podcast_id = {}", [podcast_id]);
            stmt.push(EPISODE_ORDER);
            Self::load_episodes(conn, stmt)
        })
    }

    fn get_episode(&self, episode_id: i64) -> Result<Option<EpisodeWithPodcast>> {
        self.with_conn(|conn| {
            let mut stmt = Self::select_episodes("WHERE");
            stmt.push_with("id = {}", [episode_id]);
            Ok(Self::load_joined(conn, stmt)?.pop())
        })
    }

    fn get_episode_by_external_id(
        &self,
        podcast_id: i64,
        external_id: &str,
    ) -> Result<Option<Episode>> {
        self.with_conn(|conn| {
            let mut stmt = Self::select_episodes("WHERE");
            stmt.push_with(
                "podcast_id = {} AND external_id = {}",
                [Bind::from(podcast_id), Bind::from(external_id)],
            );
            Ok(Self::load_episodes(conn, stmt)?.pop())
        })
    }

    fn get_episode_by_slugs(
        &self,
        podcast_slug: &str,
        episode_slug: &str,
    ) -> Result<Option<EpisodeWithPodcast>> {
        self.with_conn(|conn| {
            let stmt = statement(
                &format!(
                    "SELECT {} FROM episodes e JOIN podcasts p ON p.id = e.podcast_id \
                     WHERE p.slug = {{}} AND e.slug = {{}} ORDER BY e.id LIMIT 1",
                    sql::qualified("e", &EPISODE_COLUMNS)
                ),
                [podcast_slug, episode_slug],
            );
            Ok(Self::load_joined(conn, stmt)?.pop())
        })
    }

    fn list_episodes(&self, query: &EpisodeQuery) -> Result<EpisodePage> {
        let _timer = OperationTimer::start(BACKEND, "list_episodes");
        let limit = query.effective_limit();
        let offset = query.effective_offset();

        self.with_conn(|conn| {
            let mut count =
                Statement::new("SELECT COUNT(*) AS count FROM episodes e JOIN podcasts p ON p.id = e.podcast_id");
            Self::build_where_clause(query, &mut count);
            let total = count.into_query().get_result::<CountRow>(conn)?.count;

            let mut page = Statement::new(format!(
                "SELECT {} FROM episodes e JOIN podcasts p ON p.id = e.podcast_id",
                sql::qualified("e", &EPISODE_COLUMNS)
            ));
            Self::build_where_clause(query, &mut page);
            page.push(&format!(
                "ORDER BY {}",
                sql::order_by(Dialect::Postgres, query, "e")
            ));
            page.push_with("LIMIT {} OFFSET {}", [limit, offset]);
            let items = Self::load_joined(conn, page)?;

            Ok(EpisodePage {
                items,
                total,
                limit,
                offset,
            })
        })
    }

    fn count_by_state(&self, podcast_id: Option<i64>) -> Result<StateCounts> {
        self.with_conn(|conn| {
            let mut stmt = Statement::new(format!(
                "SELECT {} FROM episodes e",
                sql::state_count_columns("e")
            ));
            if let Some(id) = podcast_id {
                stmt.push_with("WHERE e.podcast_id = {}", [id]);
            }
            Ok(stmt.into_query().get_result::<StateCountsRow>(conn)?.into())
        })
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
        let stamp = now();
        let ids = self.in_transaction(|conn| {
            let mut known: HashSet<i64> = HashSet::new();
            let mut ids = Vec::with_capacity(episodes.len());
            for episode in episodes {
                let podcast_id = require_podcast_id(episode)?;
                if known.insert(podcast_id) {
                    let exists = Self::found(
                        conn,
                        statement(
                            "SELECT EXISTS(SELECT 1 FROM podcasts WHERE id = {}) AS found",
                            [podcast_id],
                        ),
                    )?;
                    if !exists {
                        return Err(RepositoryError::PodcastNotFound(format!(
                            "id {}",
                            podcast_id
                        )));
                    }
                }
                let (id, _) = Self::upsert_episode(conn, podcast_id, episode, stamp)?;
                ids.push(id);
            }
            Ok(ids)
        })?;
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
        let stamp = now();
        let updated = self.with_conn(|conn| {
            Ok(statement(
                "UPDATE episodes SET failed_at_stage = {}, failure_reason = {}, failure_type = {}, \
                 failed_at = {}, updated_at = {} WHERE id = {}",
                [
                    Bind::from(stage),
                    Bind::from(reason),
                    Bind::from(kind.as_str()),
                    Bind::from(stamp),
                    Bind::from(stamp),
                    Bind::from(episode_id),
                ],
            )
            .into_query()
            .execute(conn)?)
        })?;
        if updated > 0 {
            debug!(episode_id, stage, %kind, "Episode marked failed");
        }
        Ok(updated > 0)
    }

    fn clear_failure(&self, episode_id: i64) -> Result<bool> {
        let stamp = now();
        let updated = self.with_conn(|conn| {
            Ok(statement(
                "UPDATE episodes SET failed_at_stage = NULL, failure_reason = NULL, \
                 failure_type = NULL, failed_at = NULL, updated_at = {} \
                 WHERE id = {} AND failed_at IS NOT NULL",
                [Bind::from(stamp), Bind::from(episode_id)],
            )
            .into_query()
            .execute(conn)?)
        })?;
        Ok(updated > 0)
    }

    fn get_failed_episodes(&self, limit: Option<i64>) -> Result<Vec<EpisodeWithPodcast>> {
        self.with_conn(|conn| {
            let mut stmt =
                Self::select_episodes("WHERE failed_at IS NOT NULL ORDER BY failed_at DESC, id DESC");
            if let Some(limit) = limit {
                stmt.push_with("LIMIT {}", [limit.max(0)]);
            }
            Self::load_joined(conn, stmt)
        })
    }

    fn add_transcript_links(&self, episode_id: i64, links: &[TranscriptLink]) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }
        self.in_transaction(|conn| {
            let exists = Self::found(
                conn,
                statement(
                    "SELECT EXISTS(SELECT 1 FROM episodes WHERE id = {}) AS found",
                    [episode_id],
                ),
            )?;
            if !exists {
                return Ok(0);
            }
            let mut added = 0;
            for link in links {
                added += statement(
                    "INSERT INTO transcript_links (episode_id, url, mime_type, language, downloaded_path) \
                     VALUES ({}, {}, {}, {}, {}) ON CONFLICT (episode_id, url) DO NOTHING",
                    [
                        Bind::from(episode_id),
                        Bind::from(link.url.as_str()),
                        Bind::from(link.mime_type.as_str()),
                        Bind::from(link.language.clone()),
                        Bind::from(link.downloaded_path.clone()),
                    ],
                )
                .into_query()
                .execute(conn)?;
            }
            Ok(added)
        })
    }

    fn get_transcript_links(&self, episode_id: i64) -> Result<Vec<TranscriptLink>> {
        self.with_conn(|conn| {
            let rows = statement(
                &format!(
                    "SELECT {} FROM transcript_links WHERE episode_id = {{}} ORDER BY id",
                    TRANSCRIPT_LINK_COLUMNS.join(", ")
                ),
                [episode_id],
            )
            .into_query()
            .load::<LinkRow>(conn)?;
            Ok(rows.into_iter().map(TranscriptLink::from).collect())
        })
    }

    fn mark_transcript_downloaded(&self, link_id: i64, path: &str) -> Result<bool> {
        let updated = self.with_conn(|conn| {
            Ok(statement(
                "UPDATE transcript_links SET downloaded_path = {} WHERE id = {}",
                [Bind::from(path), Bind::from(link_id)],
            )
            .into_query()
            .execute(conn)?)
        })?;
        Ok(updated > 0)
    }
}

impl Repository for PostgresRepository {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn save_all(&self, podcasts: &[Podcast]) -> Result<Vec<i64>> {
        for podcast in podcasts {
            validate_podcast(podcast)?;
        }
        let _timer = OperationTimer::start(BACKEND, "save_all");
        let stamp = now();
        let ids = self.in_transaction(|conn| {
            let mut ids = Vec::with_capacity(podcasts.len());
            for podcast in podcasts {
                let (podcast_id, _) = Self::upsert_podcast(conn, podcast, stamp)?;
                for episode in &podcast.episodes {
                    Self::upsert_episode(conn, podcast_id, episode, stamp)?;
                }
                ids.push(podcast_id);
            }
            Ok(ids)
        })?;
        debug!(podcasts = ids.len(), "Batch committed");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(numbered(3), "$1, $2, $3");
    }

    #[test]
    fn test_upsert_sql_shape() {
        assert!(UPSERT_EPISODE_SQL.contains("ON CONFLICT (podcast_id, external_id)"));
        assert!(UPSERT_EPISODE_SQL.contains("$21)"));
        assert!(UPSERT_EPISODE_SQL.contains("episodes.summary_path IS DISTINCT FROM excluded.summary_path"));
        assert!(!UPSERT_PODCAST_SQL.contains("excluded.created_at"));
    }

    #[test]
    fn test_where_clause_numbers_parameters() {
        let query = EpisodeQuery::new()
            .with_podcast_id(3)
            .with_state(Stage::Transcribed)
            .with_search("rust");
        let mut stmt = Statement::new("SELECT 1 FROM episodes e JOIN podcasts p ON p.id = e.podcast_id");
        PostgresRepository::build_where_clause(&query, &mut stmt);
        let text = stmt.text();
        assert!(text.contains("e.podcast_id = $1"));
        assert!(text.contains("e.raw_transcript_path <> ''"));
        assert!(text.contains("COLLATE \"C\" LIKE $2"));
        assert!(!text.contains("ILIKE"));
        assert_eq!(text.matches("LIKE $2").count(), 3);
    }

    #[test]
    fn test_constraint_errors_are_classified() {
        let err: RepositoryError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, RepositoryError::Database(_)));
    }
}
