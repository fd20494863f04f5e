//! JSON file-backed repository.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::document::{Document, NextIds};
use crate::metrics::{self, OperationTimer};
use crate::model::{Episode, EpisodeUpdate, Failure, FailureKind, Podcast, TranscriptLink};
use crate::repository::{
    now, require_podcast_id, validate_episode, validate_podcast, EpisodePage, EpisodeQuery,
    EpisodeRepository, EpisodeWithPodcast, PodcastRepository, Repository, RepositoryError,
    Result, StateCounts,
};

const BACKEND: &str = "file";

/// Repository whose whole database is one JSON array of podcasts.
///
/// Every call re-reads the file; writes go to a temporary file in the same
/// directory which is then renamed over the target, so readers never see a
/// half-written store. Writers inside one process are serialized; writers in
/// different processes race and the last rename wins.
///
/// The next id per entity lives in a small `<path>.ids` file next to the
/// store, written before the store itself. Ids freed by deletes are never
/// handed out again.
pub struct JsonFileRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

enum Loaded {
    Missing,
    Corrupt(String),
    Ready(Vec<Podcast>),
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the id counters.
    pub fn ids_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".ids");
        PathBuf::from(path)
    }

    /// Persisted counters. Missing or unreadable counters fall back to the
    /// ids present in the store.
    fn read_next_ids(&self) -> Option<NextIds> {
        let path = self.ids_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Id counters unreadable, reseeding");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(ids) => Some(ids),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Id counters corrupt, reseeding");
                None
            }
        }
    }

    fn read_file(&self) -> Loaded {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Loaded::Missing,
            Err(e) => return Loaded::Corrupt(e.to_string()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Loaded::Missing;
        }
        match serde_json::from_slice::<Vec<Podcast>>(&bytes) {
            Ok(podcasts) => Loaded::Ready(podcasts),
            Err(e) => Loaded::Corrupt(e.to_string()),
        }
    }

    /// Current contents; a missing or unreadable store reads as empty.
    fn load(&self) -> Document {
        let podcasts = match self.read_file() {
            Loaded::Ready(podcasts) => podcasts,
            Loaded::Missing => Vec::new(),
            Loaded::Corrupt(reason) => {
                warn!(path = %self.path.display(), %reason, "Store unreadable, treating as empty");
                metrics::STORE_RECOVERIES.with_label_values(&[BACKEND]).inc();
                Vec::new()
            }
        };
        Document::new(podcasts, self.read_next_ids())
    }

    /// Write the counters, then the document, each through a temp file +
    /// rename. A crash between the two only skips ids.
    fn store(&self, doc: &Document) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        replace_file(&dir, &self.ids_path(), &serde_json::to_vec(&doc.next_ids)?)?;
        replace_file(&dir, &self.path, &serde_json::to_vec_pretty(&doc.podcasts)?)?;

        debug!(path = %self.path.display(), podcasts = doc.podcasts.len(), "Store written");
        Ok(())
    }

    /// Read-modify-write cycle. `f` returns its result and whether the
    /// document changed; unchanged documents are not rewritten.
    fn mutate<T>(&self, f: impl FnOnce(&mut Document) -> Result<(T, bool)>) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Loaded::Corrupt(reason) = self.read_file() {
            self.preserve_corrupt(&reason);
        }
        let mut doc = self.load();
        let (value, dirty) = f(&mut doc)?;
        if dirty {
            self.store(&doc)?;
        }
        Ok(value)
    }

    /// Keep a copy of an unreadable store before it gets overwritten.
    fn preserve_corrupt(&self, reason: &str) {
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".corrupt-{}", now().format("%Y%m%dT%H%M%S")));
        match fs::copy(&self.path, &backup) {
            Ok(_) => warn!(
                path = %self.path.display(),
                backup = ?backup,
                %reason,
                "Unreadable store copied aside before overwrite"
            ),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to back up unreadable store"),
        }
    }

    fn save_into(doc: &mut Document, podcast: &Podcast, prune: bool) -> Result<(i64, bool)> {
        let stamp = now();
        let (index, upserted) = doc.upsert_podcast(podcast, stamp)?;
        metrics::record_write(BACKEND, "podcast", upserted.written);
        let mut dirty = upserted.written;

        if prune {
            let keep: Vec<&str> = podcast
                .episodes
                .iter()
                .map(|e| e.external_id.as_str())
                .collect();
            let removed = doc.retain_episodes(index, &keep);
            if removed > 0 {
                debug!(url = %podcast.url, removed, "Pruned episodes missing from save");
                dirty = true;
            }
        }

        for episode in &podcast.episodes {
            let before = doc.podcasts[index].episode(&episode.external_id).cloned();
            let result = doc.upsert_episode(index, episode, stamp);
            metrics::record_write(BACKEND, "episode", result.written);
            let after = doc.podcasts[index].episode(&episode.external_id);
            dirty |= result.written || before.as_ref() != after;
        }
        Ok((upserted.id, dirty))
    }
}

fn replace_file(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| RepositoryError::Io(e.error))?;
    Ok(())
}

fn joined(podcast: &Podcast, episode: &Episode) -> EpisodeWithPodcast {
    EpisodeWithPodcast {
        podcast: podcast.metadata(),
        episode: episode.clone(),
    }
}

impl PodcastRepository for JsonFileRepository {
    fn get_all(&self) -> Result<Vec<Podcast>> {
        let _timer = OperationTimer::start(BACKEND, "get_all");
        Ok(self.load().podcasts)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<Podcast>> {
        let doc = self.load();
        Ok(doc.podcasts.into_iter().find(|p| p.id == Some(id)))
    }

    fn get_by_url(&self, url: &str) -> Result<Option<Podcast>> {
        let doc = self.load();
        Ok(doc.podcasts.into_iter().find(|p| p.url == url))
    }

    fn get_by_index(&self, index: usize) -> Result<Option<Podcast>> {
        if index == 0 {
            return Ok(None);
        }
        let mut podcasts = self.load().podcasts;
        podcasts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(podcasts.into_iter().nth(index - 1))
    }

    fn get_by_slug(&self, slug: &str) -> Result<Option<Podcast>> {
        let doc = self.load();
        Ok(doc
            .podcasts
            .into_iter()
            .find(|p| p.slug.as_deref() == Some(slug)))
    }

    fn exists(&self, url: &str) -> Result<bool> {
        Ok(self.load().podcast_index_by_url(url).is_some())
    }

    fn save(&self, podcast: &Podcast) -> Result<i64> {
        validate_podcast(podcast)?;
        let _timer = OperationTimer::start(BACKEND, "save");
        self.mutate(|doc| Self::save_into(doc, podcast, true))
    }

    fn save_metadata(&self, podcast: &Podcast) -> Result<i64> {
        validate_podcast(&podcast.metadata())?;
        let _timer = OperationTimer::start(BACKEND, "save_metadata");
        self.mutate(|doc| {
            let (_, upserted) = doc.upsert_podcast(podcast, now())?;
            metrics::record_write(BACKEND, "podcast", upserted.written);
            Ok((upserted.id, upserted.written))
        })
    }

    fn delete(&self, url: &str) -> Result<bool> {
        self.mutate(|doc| match doc.podcast_index_by_url(url) {
            Some(index) => {
                let removed = doc.podcasts.remove(index);
                debug!(url, episodes = removed.episodes.len(), "Podcast deleted");
                Ok((true, true))
            }
            None => Ok((false, false)),
        })
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
        self.mutate(|doc| {
            let Some(index) = doc.podcast_index_by_url(podcast_url) else {
                return Ok((false, false));
            };
            let Some(mut episode) = doc.podcasts[index].episode(external_id).cloned() else {
                return Ok((false, false));
            };
            if !update.apply(&mut episode) {
                metrics::record_write(BACKEND, "episode", false);
                return Ok((false, false));
            }
            let result = doc.upsert_episode(index, &episode, now());
            metrics::record_write(BACKEND, "episode", result.written);
            Ok((result.written, result.written))
        })
    }
}

impl EpisodeRepository for JsonFileRepository {
    fn get_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let doc = self.load();
        Ok(doc
            .podcasts
            .into_iter()
            .find(|p| p.id == Some(podcast_id))
            .map(|p| p.episodes)
            .unwrap_or_default())
    }

    fn get_episode(&self, episode_id: i64) -> Result<Option<EpisodeWithPodcast>> {
        let doc = self.load();
        let found = doc
            .episodes()
            .find(|(_, e)| e.id == Some(episode_id))
            .map(|(p, e)| joined(p, e));
        Ok(found)
    }

    fn get_episode_by_external_id(
        &self,
        podcast_id: i64,
        external_id: &str,
    ) -> Result<Option<Episode>> {
        let doc = self.load();
        let found = doc
            .episodes()
            .find(|(p, e)| p.id == Some(podcast_id) && e.external_id == external_id)
            .map(|(_, e)| e.clone());
        Ok(found)
    }

    fn get_episode_by_slugs(
        &self,
        podcast_slug: &str,
        episode_slug: &str,
    ) -> Result<Option<EpisodeWithPodcast>> {
        let doc = self.load();
        // Episode slugs may repeat within a podcast; the oldest row wins.
        let found = doc
            .episodes()
            .filter(|(p, e)| {
                p.slug.as_deref() == Some(podcast_slug) && e.slug.as_deref() == Some(episode_slug)
            })
            .min_by_key(|(_, e)| e.id)
            .map(|(p, e)| joined(p, e));
        Ok(found)
    }

    fn list_episodes(&self, query: &EpisodeQuery) -> Result<EpisodePage> {
        let _timer = OperationTimer::start(BACKEND, "list_episodes");
        let doc = self.load();
        let mut matching: Vec<(&Podcast, &Episode)> =
            doc.episodes().filter(|(p, e)| query.matches(p, e)).collect();
        matching.sort_by(|(_, a), (_, b)| query.compare(a, b));

        let limit = query.effective_limit();
        let offset = query.effective_offset();
        let items = matching
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(p, e)| joined(p, e))
            .collect();
        Ok(EpisodePage {
            items,
            total: matching.len() as i64,
            limit,
            offset,
        })
    }

    fn count_by_state(&self, podcast_id: Option<i64>) -> Result<StateCounts> {
        let doc = self.load();
        Ok(StateCounts::tally(
            doc.episodes()
                .filter(|(p, _)| podcast_id.is_none() || p.id == podcast_id)
                .map(|(_, e)| e),
        ))
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
        self.mutate(|doc| {
            let stamp = now();
            let mut ids = Vec::with_capacity(episodes.len());
            let mut dirty = false;
            for episode in episodes {
                let podcast_id = require_podcast_id(episode)?;
                let index = doc.podcast_index_by_id(podcast_id).ok_or_else(|| {
                    RepositoryError::PodcastNotFound(format!("id {}", podcast_id))
                })?;
                let before = doc.podcasts[index].episode(&episode.external_id).cloned();
                let result = doc.upsert_episode(index, episode, stamp);
                metrics::record_write(BACKEND, "episode", result.written);
                dirty |= before.as_ref() != doc.podcasts[index].episode(&episode.external_id);
                ids.push(result.id);
            }
            Ok((ids, dirty))
        })
    }

    fn mark_failed(
        &self,
        episode_id: i64,
        stage: &str,
        reason: &str,
        kind: FailureKind,
    ) -> Result<bool> {
        self.mutate(|doc| {
            let Some((pi, ei)) = doc.locate_episode(episode_id) else {
                return Ok((false, false));
            };
            let stamp = now();
            let episode = &mut doc.podcasts[pi].episodes[ei];
            episode.failure = Some(Failure {
                stage: stage.to_string(),
                reason: reason.to_string(),
                kind,
                failed_at: stamp,
            });
            episode.updated_at = Some(stamp);
            debug!(episode_id, stage, %kind, "Episode marked failed");
            Ok((true, true))
        })
    }

    fn clear_failure(&self, episode_id: i64) -> Result<bool> {
        self.mutate(|doc| {
            let Some((pi, ei)) = doc.locate_episode(episode_id) else {
                return Ok((false, false));
            };
            let episode = &mut doc.podcasts[pi].episodes[ei];
            if episode.failure.take().is_none() {
                return Ok((false, false));
            }
            episode.updated_at = Some(now());
            Ok((true, true))
        })
    }

    fn get_failed_episodes(&self, limit: Option<i64>) -> Result<Vec<EpisodeWithPodcast>> {
        let doc = self.load();
        let mut failed: Vec<(&Podcast, &Episode)> =
            doc.episodes().filter(|(_, e)| e.is_failed()).collect();
        failed.sort_by(|(_, a), (_, b)| {
            let at = |e: &Episode| e.failure.as_ref().map(|f| f.failed_at);
            at(b).cmp(&at(a)).then(b.id.cmp(&a.id))
        });
        let limit = limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(failed
            .into_iter()
            .take(limit)
            .map(|(p, e)| joined(p, e))
            .collect())
    }

    fn add_transcript_links(&self, episode_id: i64, links: &[TranscriptLink]) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }
        self.mutate(|doc| {
            let added = doc.add_links(episode_id, links).unwrap_or(0);
            Ok((added, added > 0))
        })
    }

    fn get_transcript_links(&self, episode_id: i64) -> Result<Vec<TranscriptLink>> {
        let doc = self.load();
        let links = doc
            .episodes()
            .find(|(_, e)| e.id == Some(episode_id))
            .map(|(_, e)| e.transcript_links.clone())
            .unwrap_or_default();
        Ok(links)
    }

    fn mark_transcript_downloaded(&self, link_id: i64, path: &str) -> Result<bool> {
        self.mutate(|doc| {
            let Some((pi, ei, li)) = doc.locate_link(link_id) else {
                return Ok((false, false));
            };
            let link = &mut doc.podcasts[pi].episodes[ei].transcript_links[li];
            if link.downloaded_path.as_deref() == Some(path) {
                return Ok((true, false));
            }
            link.downloaded_path = Some(path.to_string());
            Ok((true, true))
        })
    }
}

impl Repository for JsonFileRepository {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn save_all(&self, podcasts: &[Podcast]) -> Result<Vec<i64>> {
        for podcast in podcasts {
            validate_podcast(podcast)?;
        }
        let _timer = OperationTimer::start(BACKEND, "save_all");
        self.mutate(|doc| {
            let mut ids = Vec::with_capacity(podcasts.len());
            let mut dirty = false;
            for podcast in podcasts {
                let (id, changed) = Self::save_into(doc, podcast, false)?;
                ids.push(id);
                dirty |= changed;
            }
            Ok((ids, dirty))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;
    use crate::repository::MAX_PAGE_SIZE;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonFileRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("feeds.json"));
        (repo, temp_dir)
    }

    fn test_podcast() -> Podcast {
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        podcast.episodes.push(Episode::new("ext-1", "One"));
        podcast
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (repo, _temp) = create_test_store();
        assert!(repo.get_all().unwrap().is_empty());
        assert!(!repo.exists("https://ex.com/feed.xml").unwrap());
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let (repo, _temp) = create_test_store();
        fs::write(repo.path(), "{ not json").unwrap();
        assert!(repo.get_all().unwrap().is_empty());
        assert_eq!(repo.count_by_state(None).unwrap().total(), 0);
    }

    #[test]
    fn test_corrupt_file_is_backed_up_before_overwrite() {
        let (repo, temp) = create_test_store();
        fs::write(repo.path(), "[[[").unwrap();
        repo.save(&test_podcast()).unwrap();

        let backups = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_save_writes_pretty_json_array() {
        let (repo, _temp) = create_test_store();
        repo.save(&test_podcast()).unwrap();
        let raw = fs::read_to_string(repo.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["episodes"][0]["external_id"], "ext-1");
    }

    #[test]
    fn test_unchanged_save_does_not_rewrite_file() {
        let (repo, _temp) = create_test_store();
        let podcast = test_podcast();
        repo.save(&podcast).unwrap();
        let modified = fs::metadata(repo.path()).unwrap().modified().unwrap();
        let stored = repo.get_by_url(&podcast.url).unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        repo.save(&stored).unwrap();
        assert_eq!(
            fs::metadata(repo.path()).unwrap().modified().unwrap(),
            modified
        );
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (repo, temp) = create_test_store();
        repo.save(&test_podcast()).unwrap();
        repo.mark_failed(1, "download", "404", FailureKind::Fatal)
            .unwrap();
        let mut names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["feeds.json", "feeds.json.ids"]);
    }

    #[test]
    fn test_nested_directory_is_created() {
        let temp = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp.path().join("data/podcasts/feeds.json"));
        repo.save(&test_podcast()).unwrap();
        assert!(repo.path().exists());
    }

    #[test]
    fn test_update_episode_fields_unknown_targets() {
        let (repo, _temp) = create_test_store();
        repo.save(&test_podcast()).unwrap();
        let update = EpisodeUpdate::artifact(crate::model::ArtifactKind::Audio, "/a.mp3");
        assert!(!repo
            .update_episode_fields("https://nope", "ext-1", &update)
            .unwrap());
        assert!(!repo
            .update_episode_fields("https://ex.com/feed.xml", "ext-9", &update)
            .unwrap());
        assert!(repo
            .update_episode_fields("https://ex.com/feed.xml", "ext-1", &update)
            .unwrap());
        let podcast = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        assert_eq!(podcast.episodes[0].state(), Stage::Downloaded);
    }

    #[test]
    fn test_episodes_by_state_pages_past_the_page_cap() {
        let (repo, _temp) = create_test_store();
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Long Runner");
        podcast.episodes = (0..MAX_PAGE_SIZE + 205)
            .map(|n| Episode::new(format!("ext-{}", n), format!("Episode {}", n)))
            .collect();
        repo.save(&podcast).unwrap();

        let all = repo.get_episodes_by_state(Stage::Discovered, None).unwrap();
        assert_eq!(all.len() as i64, MAX_PAGE_SIZE + 205);
        let mut ids: Vec<i64> = all.iter().filter_map(|item| item.episode.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all.len());

        let capped = repo
            .get_episodes_by_state(Stage::Discovered, Some(MAX_PAGE_SIZE + 5))
            .unwrap();
        assert_eq!(capped.len() as i64, MAX_PAGE_SIZE + 5);
        assert!(repo
            .get_episodes_by_state(Stage::Discovered, Some(0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pruned_episode_id_is_not_reused() {
        let (repo, _temp) = create_test_store();
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        podcast.episodes.push(Episode::new("e1", "One"));
        podcast.episodes.push(Episode::new("e2", "Two"));
        let podcast_id = repo.save(&podcast).unwrap();
        let old_id = repo
            .get_episode_by_external_id(podcast_id, "e2")
            .unwrap()
            .and_then(|e| e.id)
            .unwrap();

        podcast.episodes.truncate(1);
        podcast.episodes.push(Episode::new("e3", "Three"));
        repo.save(&podcast).unwrap();
        let new_id = repo
            .get_episode_by_external_id(podcast_id, "e3")
            .unwrap()
            .and_then(|e| e.id)
            .unwrap();

        assert!(new_id > old_id);
        assert!(!repo
            .mark_failed(old_id, "download", "stale worker", FailureKind::Transient)
            .unwrap());
        let e3 = repo.get_episode(new_id).unwrap().unwrap();
        assert!(e3.episode.failure.is_none());
    }

    #[test]
    fn test_deleted_podcast_id_survives_reopen() {
        let (repo, temp) = create_test_store();
        let first = repo.save(&test_podcast()).unwrap();
        assert!(repo.delete("https://ex.com/feed.xml").unwrap());

        let reopened = JsonFileRepository::new(temp.path().join("feeds.json"));
        let second = reopened.save(&test_podcast()).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_store_without_counters_reseeds_from_ids() {
        let (repo, _temp) = create_test_store();
        repo.save(&test_podcast()).unwrap();
        fs::remove_file(repo.ids_path()).unwrap();

        let id = repo
            .save(&Podcast::new("https://ex.com/other.xml", "Other"))
            .unwrap();
        assert_eq!(id, 2);
        assert!(repo.ids_path().exists());
    }
}
