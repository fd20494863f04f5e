//! Copy a whole store from one backend into another.

use serde::Serialize;
use tracing::{debug, info};

use crate::model::Podcast;
use crate::repository::{PodcastRepository, Repository, Result};

/// What a [`migrate_repository`] run copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub podcasts: usize,
    pub episodes: usize,
    pub transcript_links: usize,
}

/// Copy every podcast, with its episodes, failure fields and transcript
/// links, from `source` into `target`.
///
/// Each podcast is written with one atomic upsert keyed on feed URL and
/// external id, so running the copy again is a no-op. Ids are assigned by
/// the target; rows already in the target that the source does not know
/// are left alone.
pub fn migrate_repository(
    source: &dyn Repository,
    target: &dyn Repository,
) -> Result<MigrationReport> {
    info!(
        source = source.backend_name(),
        target = target.backend_name(),
        "Copying repository"
    );
    let mut report = MigrationReport::default();
    for podcast in source.get_all()? {
        let copy = detached(podcast);
        target.save_all(std::slice::from_ref(&copy))?;

        let links: usize = copy.episodes.iter().map(|e| e.transcript_links.len()).sum();
        debug!(
            url = %copy.url,
            episodes = copy.episodes.len(),
            links,
            "Podcast copied"
        );
        report.podcasts += 1;
        report.episodes += copy.episodes.len();
        report.transcript_links += links;
    }
    info!(
        podcasts = report.podcasts,
        episodes = report.episodes,
        transcript_links = report.transcript_links,
        "Repository copy finished"
    );
    Ok(report)
}

/// Strip store-assigned ids so the target assigns its own.
fn detached(mut podcast: Podcast) -> Podcast {
    podcast.id = None;
    for episode in &mut podcast.episodes {
        episode.id = None;
        episode.podcast_id = None;
        for link in &mut episode.transcript_links {
            link.id = None;
            link.episode_id = None;
        }
    }
    podcast
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::JsonFileRepository;
    use crate::model::{ArtifactKind, Episode, FailureKind, Stage, TranscriptLink};
    use crate::repository::EpisodeRepository;
    use crate::sqlite::SqliteRepository;
    use tempfile::TempDir;

    fn seeded_file_store(dir: &TempDir) -> JsonFileRepository {
        let repo = JsonFileRepository::new(dir.path().join("podcasts.json"));
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        let mut downloaded = Episode::new("ext-1", "One");
        downloaded.audio_path = Some("/audio/1.mp3".to_string());
        downloaded
            .transcript_links
            .push(TranscriptLink::new("https://ex.com/1.vtt", "text/vtt").with_language("en"));
        podcast.episodes.push(downloaded);
        podcast.episodes.push(Episode::new("ext-2", "Two"));
        let id = repo.save(&podcast).unwrap();

        let episode = repo.get_episode_by_external_id(id, "ext-2").unwrap().unwrap();
        repo.mark_failed(episode.id.unwrap(), "download", "404", FailureKind::Fatal)
            .unwrap();
        repo
    }

    #[test]
    fn test_copies_everything() {
        let temp_dir = TempDir::new().unwrap();
        let source = seeded_file_store(&temp_dir);
        let target = SqliteRepository::new(temp_dir.path().join("target.db")).unwrap();

        let report = migrate_repository(&source, &target).unwrap();
        assert_eq!(
            report,
            MigrationReport {
                podcasts: 1,
                episodes: 2,
                transcript_links: 1,
            }
        );

        let copied = target.get_by_url("https://ex.com/feed.xml").unwrap().unwrap();
        let one = copied.episode("ext-1").unwrap();
        assert_eq!(one.state(), Stage::Downloaded);
        assert_eq!(one.artifact(ArtifactKind::Audio), Some("/audio/1.mp3"));
        assert_eq!(one.transcript_links.len(), 1);
        assert_eq!(one.transcript_links[0].language.as_deref(), Some("en"));

        let two = copied.episode("ext-2").unwrap();
        let failure = two.failure.as_ref().unwrap();
        assert_eq!(failure.stage, "download");
        assert_eq!(failure.kind, FailureKind::Fatal);
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let source = seeded_file_store(&temp_dir);
        let target = SqliteRepository::new(temp_dir.path().join("target.db")).unwrap();

        migrate_repository(&source, &target).unwrap();
        let first = target.get_all().unwrap();
        migrate_repository(&source, &target).unwrap();
        let second = target.get_all().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = JsonFileRepository::new(temp_dir.path().join("missing.json"));
        let target = JsonFileRepository::new(temp_dir.path().join("target.json"));

        let report = migrate_repository(&source, &target).unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(target.get_all().unwrap().is_empty());
    }
}
