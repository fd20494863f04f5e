//! Write batching over a [`Repository`].
//!
//! A [`Batch`] loads each podcast it touches once, applies field-level
//! mutations to that in-memory copy, and on [`Batch::commit`] writes every
//! touched podcast in a single atomic `save_all`. Reads made through the
//! batch see its own staged changes; other readers see nothing until commit.
//! Dropping a batch without committing discards the staged changes.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::{Episode, EpisodeUpdate, Podcast};
use crate::repository::{PodcastRepository, Repository, RepositoryError, Result};

struct Staged {
    podcast: Podcast,
    dirty: bool,
}

pub struct Batch<'a> {
    repo: &'a dyn Repository,
    staged: BTreeMap<String, Staged>,
    /// Order in which podcasts were first touched; commit writes in this order.
    order: Vec<String>,
    finished: bool,
}

impl<'a> Batch<'a> {
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self {
            repo,
            staged: BTreeMap::new(),
            order: Vec::new(),
            finished: false,
        }
    }

    /// Load a podcast into the batch on first access.
    fn stage(&mut self, url: &str) -> Result<Option<&mut Staged>> {
        if !self.staged.contains_key(url) {
            let Some(podcast) = self.repo.get_by_url(url)? else {
                return Ok(None);
            };
            self.order.push(url.to_string());
            self.staged.insert(
                url.to_string(),
                Staged {
                    podcast,
                    dirty: false,
                },
            );
        }
        Ok(self.staged.get_mut(url))
    }

    /// The podcast as this batch sees it, including staged changes.
    pub fn podcast(&mut self, url: &str) -> Result<Option<&Podcast>> {
        Ok(self.stage(url)?.map(|staged| &staged.podcast))
    }

    /// Stage a new podcast, or replace the metadata of a known one.
    /// Episodes already staged or stored are kept.
    pub fn put_podcast(&mut self, podcast: Podcast) -> Result<()> {
        let url = podcast.url.clone();
        match self.stage(&url)? {
            Some(staged) => {
                let episodes = std::mem::take(&mut staged.podcast.episodes);
                let id = staged.podcast.id;
                let created_at = staged.podcast.created_at;
                staged.podcast = Podcast {
                    id,
                    created_at,
                    episodes,
                    ..podcast.metadata()
                };
                for episode in podcast.episodes {
                    staged.podcast.upsert_episode(episode);
                }
                staged.dirty = true;
            }
            None => {
                self.order.push(url.clone());
                self.staged.insert(
                    url,
                    Staged {
                        podcast,
                        dirty: true,
                    },
                );
            }
        }
        Ok(())
    }

    /// Patch one staged episode. Returns whether anything changed.
    pub fn update_episode(
        &mut self,
        podcast_url: &str,
        external_id: &str,
        update: &EpisodeUpdate,
    ) -> Result<bool> {
        let staged = self
            .stage(podcast_url)?
            .ok_or_else(|| RepositoryError::PodcastNotFound(podcast_url.to_string()))?;
        let Some(episode) = staged.podcast.episode_mut(external_id) else {
            return Ok(false);
        };
        let changed = update.apply(episode);
        if changed {
            staged.podcast.sort_episodes();
            staged.dirty = true;
        }
        Ok(changed)
    }

    /// Insert or replace one episode of a podcast known to the batch.
    pub fn upsert_episode(&mut self, podcast_url: &str, episode: Episode) -> Result<()> {
        let staged = self
            .stage(podcast_url)?
            .ok_or_else(|| RepositoryError::PodcastNotFound(podcast_url.to_string()))?;
        if staged
            .podcast
            .episode(&episode.external_id)
            .is_some_and(|existing| existing.same_content(&episode))
        {
            return Ok(());
        }
        staged.podcast.upsert_episode(episode);
        staged.dirty = true;
        Ok(())
    }

    /// Number of podcasts with staged changes.
    pub fn pending(&self) -> usize {
        self.staged.values().filter(|s| s.dirty).count()
    }

    /// Write every changed podcast in one atomic call.
    /// Returns the ids of the written podcasts in first-touched order.
    pub fn commit(mut self) -> Result<Vec<i64>> {
        self.finished = true;
        let mut staged = std::mem::take(&mut self.staged);
        let podcasts: Vec<Podcast> = self
            .order
            .iter()
            .filter_map(|url| staged.remove(url))
            .filter(|s| s.dirty)
            .map(|s| s.podcast)
            .collect();
        if podcasts.is_empty() {
            debug!("Batch had no changes");
            return Ok(Vec::new());
        }
        let ids = self.repo.save_all(&podcasts)?;
        debug!(
            backend = self.repo.backend_name(),
            podcasts = ids.len(),
            "Batch flushed"
        );
        Ok(ids)
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let pending = self.pending();
            if pending > 0 {
                debug!(pending, "Batch dropped without commit, changes discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::JsonFileRepository;
    use crate::model::{ArtifactKind, Stage};
    use crate::sqlite::SqliteRepository;
    use tempfile::TempDir;

    fn seeded(repo: &dyn Repository) {
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        podcast.episodes.push(Episode::new("ext-1", "One"));
        podcast.episodes.push(Episode::new("ext-2", "Two"));
        repo.save(&podcast).unwrap();
    }

    #[test]
    fn test_commit_writes_all_staged_changes() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SqliteRepository::new(temp_dir.path().join("batch.db")).unwrap();
        seeded(&repo);

        let mut batch = Batch::new(&repo);
        batch
            .update_episode(
                "https://ex.com/feed.xml",
                "ext-1",
                &EpisodeUpdate::artifact(ArtifactKind::Audio, "/a/1.mp3"),
            )
            .unwrap();
        batch
            .update_episode(
                "https://ex.com/feed.xml",
                "ext-2",
                &EpisodeUpdate::artifact(ArtifactKind::Summary, "/s/2.md"),
            )
            .unwrap();
        assert_eq!(batch.pending(), 1);

        // Nothing is visible before commit.
        let stored = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        assert!(stored.episodes.iter().all(|e| e.state() == Stage::Discovered));

        let ids = batch.commit().unwrap();
        assert_eq!(ids.len(), 1);

        let stored = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        assert_eq!(stored.episode("ext-1").unwrap().state(), Stage::Downloaded);
        assert_eq!(stored.episode("ext-2").unwrap().state(), Stage::Summarized);
    }

    #[test]
    fn test_reads_see_staged_changes() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("podcasts.json"));
        seeded(&repo);

        let mut batch = Batch::new(&repo);
        batch
            .update_episode(
                "https://ex.com/feed.xml",
                "ext-1",
                &EpisodeUpdate::new().with_title("Renamed"),
            )
            .unwrap();
        let podcast = batch.podcast("https://ex.com/feed.xml").unwrap().unwrap();
        assert_eq!(podcast.episode("ext-1").unwrap().title, "Renamed");
    }

    #[test]
    fn test_drop_discards_changes() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("podcasts.json"));
        seeded(&repo);

        {
            let mut batch = Batch::new(&repo);
            batch
                .upsert_episode("https://ex.com/feed.xml", Episode::new("ext-3", "Three"))
                .unwrap();
        }

        let stored = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        assert_eq!(stored.episodes.len(), 2);
    }

    #[test]
    fn test_unchanged_batch_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SqliteRepository::new(temp_dir.path().join("batch.db")).unwrap();
        seeded(&repo);
        let before = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();

        let mut batch = Batch::new(&repo);
        let changed = batch
            .update_episode(
                "https://ex.com/feed.xml",
                "ext-1",
                &EpisodeUpdate::new().with_title("One"),
            )
            .unwrap();
        assert!(!changed);
        assert!(batch.commit().unwrap().is_empty());

        let after = repo.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        assert_eq!(before.updated_at, after.updated_at);
    }

    #[test]
    fn test_new_podcast_and_episodes_in_one_commit() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SqliteRepository::new(temp_dir.path().join("batch.db")).unwrap();

        let mut batch = Batch::new(&repo);
        batch
            .put_podcast(Podcast::new("https://ex.com/new.xml", "New"))
            .unwrap();
        batch
            .upsert_episode("https://ex.com/new.xml", Episode::new("n-1", "First"))
            .unwrap();
        batch.commit().unwrap();

        let stored = repo.get_by_url("https://ex.com/new.xml").unwrap().unwrap();
        assert_eq!(stored.episodes.len(), 1);
        assert_eq!(stored.episodes[0].podcast_id, stored.id);
    }

    #[test]
    fn test_update_on_unknown_podcast_fails() {
        let temp_dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("podcasts.json"));

        let mut batch = Batch::new(&repo);
        let err = batch
            .update_episode("https://nope", "x", &EpisodeUpdate::new())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::PodcastNotFound(_)));
    }
}
