//! Repository interface shared by every storage backend.
//!
//! Every backend honours the same contract:
//! - lookups return `None` / empty collections when nothing matches;
//! - writes compare incoming values with the stored row and only write (and
//!   bump `updated_at`) when a field actually differs;
//! - episodes handed to a write without a podcast id are rejected before any I/O.

mod error;
mod query;
pub(crate) mod sql;

pub use error::{RepositoryError, Result};
pub use query::{
    EpisodePage, EpisodeQuery, EpisodeSort, EpisodeWithPodcast, SortOrder, StateCounts,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

use chrono::{DateTime, SubsecRound, Utc};

use crate::model::{Episode, EpisodeUpdate, FailureKind, Podcast, Stage, TranscriptLink};

/// Podcast-level operations.
pub trait PodcastRepository: Send + Sync {
    /// All podcasts with their episodes, in creation order.
    fn get_all(&self) -> Result<Vec<Podcast>>;

    fn get_by_id(&self, id: i64) -> Result<Option<Podcast>>;

    fn get_by_url(&self, url: &str) -> Result<Option<Podcast>>;

    /// 1-based position in the list ordered by creation time, newest first.
    fn get_by_index(&self, index: usize) -> Result<Option<Podcast>>;

    fn get_by_slug(&self, slug: &str) -> Result<Option<Podcast>>;

    fn exists(&self, url: &str) -> Result<bool>;

    /// Upsert the podcast and make its stored episode set equal to
    /// `podcast.episodes`: missing episodes are deleted, the rest upserted.
    /// Returns the podcast id.
    fn save(&self, podcast: &Podcast) -> Result<i64>;

    /// Upsert podcast metadata only; stored episodes are left alone.
    fn save_metadata(&self, podcast: &Podcast) -> Result<i64>;

    /// Delete a podcast and, by cascade, its episodes and transcript links.
    /// Returns whether a podcast was deleted.
    fn delete(&self, url: &str) -> Result<bool>;

    /// Patch fields of one episode addressed by `(podcast_url, external_id)`.
    /// Returns whether anything was written.
    fn update_episode_fields(
        &self,
        podcast_url: &str,
        external_id: &str,
        update: &EpisodeUpdate,
    ) -> Result<bool>;
}

/// Episode-level operations.
pub trait EpisodeRepository: Send + Sync {
    /// Episodes of one podcast, newest publish date first.
    fn get_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>>;

    /// Episode by internal id, with its owning podcast.
    fn get_episode(&self, episode_id: i64) -> Result<Option<EpisodeWithPodcast>>;

    fn get_episode_by_external_id(
        &self,
        podcast_id: i64,
        external_id: &str,
    ) -> Result<Option<Episode>>;

    fn get_episode_by_slugs(
        &self,
        podcast_slug: &str,
        episode_slug: &str,
    ) -> Result<Option<EpisodeWithPodcast>>;

    /// Filtered, sorted, paginated listing across all podcasts.
    fn list_episodes(&self, query: &EpisodeQuery) -> Result<EpisodePage>;

    /// Episode count per derived stage, optionally for one podcast.
    fn count_by_state(&self, podcast_id: Option<i64>) -> Result<StateCounts>;

    /// Upsert one episode by `(podcast_id, external_id)`. Siblings are untouched.
    fn save_episode(&self, episode: &Episode) -> Result<i64>;

    /// Upsert several episodes in one write.
    fn save_episodes(&self, episodes: &[Episode]) -> Result<Vec<i64>>;

    /// Record that a processing step gave up on an episode.
    /// Returns `false` if the episode does not exist.
    fn mark_failed(
        &self,
        episode_id: i64,
        stage: &str,
        reason: &str,
        kind: FailureKind,
    ) -> Result<bool>;

    /// Reset all failure fields. Returns whether the episode was failed.
    fn clear_failure(&self, episode_id: i64) -> Result<bool>;

    /// Failed episodes, most recent failure first.
    fn get_failed_episodes(&self, limit: Option<i64>) -> Result<Vec<EpisodeWithPodcast>>;

    /// Attach transcript links; links already known by URL are left as is.
    /// Returns how many links were new.
    fn add_transcript_links(&self, episode_id: i64, links: &[TranscriptLink]) -> Result<usize>;

    fn get_transcript_links(&self, episode_id: i64) -> Result<Vec<TranscriptLink>>;

    /// Record the local path of a fetched transcript.
    fn mark_transcript_downloaded(&self, link_id: i64, path: &str) -> Result<bool>;

    /// Episodes at the given stage across all podcasts, newest first.
    ///
    /// `None` returns every match. Results larger than [`MAX_PAGE_SIZE`] are
    /// fetched one `list_episodes` page at a time, so a write landing between
    /// pages can shift an episode across the boundary.
    fn get_episodes_by_state(
        &self,
        state: Stage,
        limit: Option<i64>,
    ) -> Result<Vec<EpisodeWithPodcast>> {
        let wanted = limit.map(|l| l.max(0));
        let mut items: Vec<EpisodeWithPodcast> = Vec::new();
        loop {
            let fetched = items.len() as i64;
            let page_size = match wanted {
                Some(wanted) => (wanted - fetched).min(MAX_PAGE_SIZE),
                None => MAX_PAGE_SIZE,
            };
            if page_size <= 0 {
                break;
            }
            let query = EpisodeQuery::new()
                .with_state(state)
                .with_limit(page_size)
                .with_offset(fetched);
            let page = self.list_episodes(&query)?;
            let received = page.items.len() as i64;
            items.extend(page.items);
            if received < page_size || items.len() as i64 >= page.total {
                break;
            }
        }
        Ok(items)
    }

    /// Most recently updated episodes across all podcasts.
    fn get_recent_activity(&self, limit: i64) -> Result<Vec<EpisodeWithPodcast>> {
        let query = EpisodeQuery::new()
            .with_sort(EpisodeSort::UpdatedAt, SortOrder::Desc)
            .with_limit(limit);
        Ok(self.list_episodes(&query)?.items)
    }

    /// Owning podcast of an episode (metadata only).
    fn get_podcast_for_episode(&self, episode_id: i64) -> Result<Option<Podcast>> {
        Ok(self.get_episode(episode_id)?.map(|found| found.podcast))
    }
}

/// A complete storage backend.
pub trait Repository: PodcastRepository + EpisodeRepository {
    /// Short backend name used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Persist several podcast aggregates atomically: either every podcast
    /// and episode is written or none is. Episodes are upserted, never
    /// deleted. Returns the podcast ids in input order.
    fn save_all(&self, podcasts: &[Podcast]) -> Result<Vec<i64>>;
}

/// Current time at the precision every backend can store.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Reject episodes without a podcast id before touching storage.
pub(crate) fn require_podcast_id(episode: &Episode) -> Result<i64> {
    episode
        .podcast_id
        .ok_or_else(|| RepositoryError::MissingPodcastId {
            external_id: episode.external_id.clone(),
        })
}

pub(crate) fn validate_podcast(podcast: &Podcast) -> Result<()> {
    if podcast.url.trim().is_empty() {
        return Err(RepositoryError::Constraint(
            "podcast url must not be empty".to_string(),
        ));
    }
    for episode in &podcast.episodes {
        validate_episode(episode)?;
    }
    Ok(())
}

pub(crate) fn validate_episode(episode: &Episode) -> Result<()> {
    if episode.external_id.trim().is_empty() {
        return Err(RepositoryError::Constraint(format!(
            "episode '{}' has an empty external id",
            episode.title
        )));
    }
    Ok(())
}

/// Podcast metadata as it will be stored, without episodes.
pub(crate) fn normalized_podcast(podcast: &Podcast) -> Podcast {
    let mut podcast = podcast.metadata();
    podcast.last_processed = podcast.last_processed.map(|d| d.trunc_subsecs(6));
    podcast
}

/// Copy of an episode as it will be stored: empty artifact paths become null.
pub(crate) fn normalized(episode: &Episode) -> Episode {
    let mut episode = episode.clone();
    for slot in [
        &mut episode.audio_path,
        &mut episode.downsampled_audio_path,
        &mut episode.raw_transcript_path,
        &mut episode.clean_transcript_path,
        &mut episode.summary_path,
    ] {
        if slot.as_deref().is_some_and(str::is_empty) {
            *slot = None;
        }
    }
    if let Some(failure) = episode.failure.as_mut() {
        failure.failed_at = failure.failed_at.trunc_subsecs(6);
    }
    episode.pub_date = episode.pub_date.map(|d| d.trunc_subsecs(6));
    episode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_podcast_id() {
        let mut episode = Episode::new("ext-1", "One");
        let err = require_podcast_id(&episode).unwrap_err();
        assert!(matches!(err, RepositoryError::MissingPodcastId { .. }));
        episode.podcast_id = Some(4);
        assert_eq!(require_podcast_id(&episode).unwrap(), 4);
    }

    #[test]
    fn test_validate_podcast() {
        assert!(validate_podcast(&Podcast::new("", "No URL")).is_err());
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        assert!(validate_podcast(&podcast).is_ok());
        podcast.episodes.push(Episode::new(" ", "Blank"));
        assert!(matches!(
            validate_podcast(&podcast),
            Err(RepositoryError::Constraint(_))
        ));
    }

    #[test]
    fn test_normalized_nulls_empty_paths() {
        let mut episode = Episode::new("ext", "Title");
        episode.audio_path = Some(String::new());
        episode.summary_path = Some("/s.md".to_string());
        let stored = normalized(&episode);
        assert_eq!(stored.audio_path, None);
        assert_eq!(stored.summary_path.as_deref(), Some("/s.md"));
    }

    #[test]
    fn test_now_has_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1000, 0);
    }
}
