//! Behaviour every [`Repository`] must share.
//!
//! Each check expects an empty repository and panics with a descriptive
//! message on the first violation. The integration suite runs all of them
//! against the file, SQLite and (when configured) PostgreSQL backends.

use std::thread;
use std::time::Duration;

use super::fixtures::{
    catalog, dated_episode, day, full_episode, full_podcast, podcast, text_cases,
    transcript_link,
};
use crate::model::{ArtifactKind, Episode, EpisodeUpdate, Failure, FailureKind, Stage};
use crate::repository::{
    EpisodeQuery, EpisodeRepository, EpisodeSort, EpisodeWithPodcast, PodcastRepository,
    Repository, RepositoryError, SortOrder, StateCounts,
};

/// Long enough for two writes to get distinct microsecond timestamps.
const TICK: Duration = Duration::from_millis(20);

fn external_ids(items: &[EpisodeWithPodcast]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.episode.external_id.clone())
        .collect()
}

fn podcast_id(repo: &dyn Repository, url: &str) -> i64 {
    repo.get_by_url(url)
        .unwrap()
        .and_then(|p| p.id)
        .unwrap_or_else(|| panic!("podcast {} not stored", url))
}

fn episode_id(repo: &dyn Repository, podcast_url: &str, external_id: &str) -> i64 {
    let podcast_id = podcast_id(repo, podcast_url);
    repo.get_episode_by_external_id(podcast_id, external_id)
        .unwrap()
        .and_then(|e| e.id)
        .unwrap_or_else(|| panic!("episode {} not stored", external_id))
}

/// Store every podcast of [`catalog`].
pub fn seed_catalog(repo: &dyn Repository) {
    for podcast in catalog() {
        repo.save(&podcast).unwrap();
    }
}

/// Every field survives a save and a load, including null paths and failure.
pub fn round_trip(repo: &dyn Repository) {
    let mut podcast = full_podcast("https://ex.com/full.xml", "Full Show");
    let mut complete = full_episode("full-1", "Everything set");
    complete.failure = Some(Failure {
        stage: "summarize".to_string(),
        reason: "model timeout".to_string(),
        kind: FailureKind::Fatal,
        failed_at: day(11),
    });
    complete
        .transcript_links
        .push(transcript_link("https://ex.com/full-1.vtt"));
    let bare = Episode::new("bare-1", "Nothing set");
    podcast.episodes = vec![complete.clone(), bare.clone()];

    let id = repo.save(&podcast).unwrap();
    let stored = repo.get_by_id(id).unwrap().expect("podcast by id");
    assert_eq!(stored.id, Some(id));
    assert!(stored.same_metadata(&podcast), "podcast metadata changed");
    assert!(stored.created_at.is_some() && stored.updated_at.is_some());
    assert_eq!(stored.episodes.len(), 2);

    let loaded = stored.episode("full-1").expect("full episode");
    assert!(loaded.same_content(&complete), "episode fields changed");
    assert_eq!(loaded.podcast_id, Some(id));
    assert_eq!(loaded.state(), Stage::Summarized);
    assert_eq!(loaded.transcript_links.len(), 1);
    let link = &loaded.transcript_links[0];
    assert_eq!(link.url, "https://ex.com/full-1.vtt");
    assert_eq!(link.mime_type, "text/vtt");
    assert_eq!(link.language.as_deref(), Some("en"));
    assert_eq!(link.downloaded_path, None);
    assert_eq!(link.episode_id, loaded.id);

    let loaded = stored.episode("bare-1").expect("bare episode");
    assert!(loaded.same_content(&bare), "bare episode fields changed");
    assert_eq!(loaded.state(), Stage::Discovered);
    assert!(loaded.failure.is_none());

    // Undated episodes sort after dated ones.
    assert_eq!(stored.episodes[0].external_id, "full-1");

    assert_eq!(repo.get_by_url("https://ex.com/full.xml").unwrap(), Some(stored.clone()));
    assert_eq!(repo.get_by_slug("full-show").unwrap(), Some(stored.clone()));
    assert_eq!(repo.get_all().unwrap(), vec![stored]);
    assert!(repo.exists("https://ex.com/full.xml").unwrap());
    assert!(!repo.exists("https://ex.com/other.xml").unwrap());
    assert_eq!(repo.get_by_id(id + 100).unwrap(), None);
}

/// Saving unchanged values writes nothing; changing one field bumps only
/// that row's `updated_at`.
pub fn idempotent_save(repo: &dyn Repository) {
    let mut show = podcast("https://ex.com/feed.xml", "Idempotent");
    show.episodes = vec![
        dated_episode("ext-1", "One", 1),
        dated_episode("ext-2", "Two", 2),
    ];
    let id = repo.save(&show).unwrap();
    let first = repo.get_by_id(id).unwrap().unwrap();

    thread::sleep(TICK);
    assert_eq!(repo.save(&show).unwrap(), id);
    let second = repo.get_by_id(id).unwrap().unwrap();
    assert_eq!(first, second, "re-saving identical values changed the store");

    thread::sleep(TICK);
    show.episodes[1].title = "Two, revised".to_string();
    repo.save(&show).unwrap();
    let third = repo.get_by_id(id).unwrap().unwrap();

    let before = first.episode("ext-2").unwrap();
    let after = third.episode("ext-2").unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at > before.updated_at, "changed row kept its timestamp");
    assert_eq!(
        third.episode("ext-1").unwrap().updated_at,
        first.episode("ext-1").unwrap().updated_at
    );
    assert_eq!(third.updated_at, first.updated_at);
}

/// A second podcast with the same URL, or a second episode with the same
/// external id, updates the first instead of adding a row.
pub fn uniqueness_collapses(repo: &dyn Repository) {
    let first = repo
        .save_metadata(&podcast("https://ex.com/feed.xml", "First Title"))
        .unwrap();
    let second = repo
        .save_metadata(&podcast("https://ex.com/feed.xml", "Second Title"))
        .unwrap();
    assert_eq!(first, second);
    let all = repo.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "Second Title");

    let mut episode = dated_episode("ext-1", "Original", 1);
    episode.podcast_id = Some(first);
    let a = repo.save_episode(&episode).unwrap();
    episode.title = "Replacement".to_string();
    let b = repo.save_episode(&episode).unwrap();
    assert_eq!(a, b);
    let episodes = repo.get_episodes(first).unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].title, "Replacement");

    let ids = repo.save_episodes(&[episode.clone(), episode]).unwrap();
    assert_eq!(ids, vec![a, a]);
    assert_eq!(repo.get_episodes(first).unwrap().len(), 1);
}

/// A slug already used by another podcast is rejected.
pub fn duplicate_slug_rejected(repo: &dyn Repository) {
    repo.save_metadata(&podcast("https://ex.com/one.xml", "Same Name"))
        .unwrap();
    let err = repo
        .save_metadata(&podcast("https://ex.com/two.xml", "Same Name"))
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Constraint(_)), "got {:?}", err);
    assert!(!repo.exists("https://ex.com/two.xml").unwrap());
}

/// `save` with a trimmed list deletes the missing episodes; `save_episode`
/// never touches siblings.
pub fn destructive_and_incremental_save(repo: &dyn Repository) {
    let mut show = podcast("https://ex.com/feed.xml", "Trimmed");
    show.episodes = vec![
        dated_episode("ext-1", "One", 1),
        dated_episode("ext-2", "Two", 2),
        dated_episode("ext-3", "Three", 3),
    ];
    let id = repo.save(&show).unwrap();
    let kept_id = episode_id(repo, &show.url, "ext-1");
    let dropped_id = episode_id(repo, &show.url, "ext-3");
    repo.add_transcript_links(dropped_id, &[transcript_link("https://ex.com/3.vtt")])
        .unwrap();

    show.episodes.truncate(2);
    repo.save(&show).unwrap();
    let episodes = repo.get_episodes(id).unwrap();
    let ids: Vec<&str> = episodes.iter().map(|e| e.external_id.as_str()).collect();
    assert_eq!(ids, vec!["ext-2", "ext-1"]);
    assert_eq!(episode_id(repo, &show.url, "ext-1"), kept_id);
    assert!(repo.get_episode(dropped_id).unwrap().is_none());
    assert!(repo.get_transcript_links(dropped_id).unwrap().is_empty());

    let before = repo.get_episodes(id).unwrap();
    thread::sleep(TICK);
    let mut extra = dated_episode("ext-4", "Four", 4);
    extra.podcast_id = Some(id);
    repo.save_episode(&extra).unwrap();
    let after = repo.get_episodes(id).unwrap();
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].external_id, "ext-4");
    assert_eq!(&after[1..], &before[..], "siblings changed");
}

/// `save_metadata` leaves stored episodes alone.
pub fn metadata_save_keeps_episodes(repo: &dyn Repository) {
    let mut show = podcast("https://ex.com/feed.xml", "Meta");
    show.episodes = vec![dated_episode("ext-1", "One", 1)];
    let id = repo.save(&show).unwrap();

    let mut renamed = podcast("https://ex.com/feed.xml", "Meta");
    renamed.description = Some("Now with a description".to_string());
    assert_eq!(repo.save_metadata(&renamed).unwrap(), id);

    let stored = repo.get_by_id(id).unwrap().unwrap();
    assert_eq!(stored.description.as_deref(), Some("Now with a description"));
    assert_eq!(stored.episodes.len(), 1);
}

/// Episodes without a podcast id fail before any write.
pub fn missing_podcast_id_rejected(repo: &dyn Repository) {
    let orphan = dated_episode("ext-1", "Orphan", 1);
    let err = repo.save_episode(&orphan).unwrap_err();
    assert!(matches!(err, RepositoryError::MissingPodcastId { .. }), "got {:?}", err);

    let id = repo
        .save_metadata(&podcast("https://ex.com/feed.xml", "Parent"))
        .unwrap();
    let mut adopted = dated_episode("ext-2", "Adopted", 2);
    adopted.podcast_id = Some(id);
    let err = repo.save_episodes(&[adopted, orphan]).unwrap_err();
    assert!(matches!(err, RepositoryError::MissingPodcastId { .. }));
    assert!(repo.get_episodes(id).unwrap().is_empty(), "partial write");

    let mut stray = dated_episode("ext-3", "Stray", 3);
    stray.podcast_id = Some(id + 100);
    let err = repo.save_episode(&stray).unwrap_err();
    assert!(matches!(err, RepositoryError::PodcastNotFound(_)), "got {:?}", err);
}

/// mark_failed, list, clear, and failure being independent of stage.
pub fn failure_lifecycle(repo: &dyn Repository) {
    seed_catalog(repo);
    let a1 = episode_id(repo, "https://tech.ex.com/feed.xml", "a1");
    let b1 = episode_id(repo, "https://cooking.ex.com/rss", "b1");

    assert!(repo
        .mark_failed(a1, "downsample", "ffmpeg exited with 1", FailureKind::Transient)
        .unwrap());
    thread::sleep(TICK);
    assert!(repo
        .mark_failed(b1, "download", "HTTP 404", FailureKind::Fatal)
        .unwrap());
    assert!(!repo.mark_failed(a1 + b1 + 100, "download", "x", FailureKind::Fatal).unwrap());

    let found = repo.get_episode(a1).unwrap().unwrap();
    let failure = found.episode.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.stage, "downsample");
    assert_eq!(failure.reason, "ffmpeg exited with 1");
    assert_eq!(failure.kind, FailureKind::Transient);
    assert_eq!(found.episode.state(), Stage::Downloaded, "failure changed the stage");

    let failed = repo.get_failed_episodes(None).unwrap();
    assert_eq!(external_ids(&failed), vec!["b1", "a1"]);
    assert_eq!(failed[0].podcast.title, "Cooking Hour");
    assert_eq!(external_ids(&repo.get_failed_episodes(Some(1)).unwrap()), vec!["b1"]);
    assert_eq!(repo.count_by_state(None).unwrap().failed, 2);

    assert!(repo.clear_failure(a1).unwrap());
    assert!(!repo.clear_failure(a1).unwrap());
    let cleared = repo.get_episode(a1).unwrap().unwrap().episode;
    assert!(cleared.failure.is_none());
    assert_eq!(external_ids(&repo.get_failed_episodes(None).unwrap()), vec!["b1"]);
    assert_eq!(repo.count_by_state(None).unwrap().failed, 1);
}

/// The walk-through of a single episode moving through the pipeline,
/// including the tolerated gap.
pub fn example_feed_scenario(repo: &dyn Repository) {
    let url = "https://ex.com/feed.xml";
    let id = repo.save_metadata(&podcast(url, "Test")).unwrap();

    let mut episode = Episode::new("ext-1", "First episode");
    episode.podcast_id = Some(id);
    episode.audio_url = Some("https://ex.com/ext-1.mp3".to_string());
    let episode_id = repo.save_episode(&episode).unwrap();
    let state = |repo: &dyn Repository| repo.get_episode(episode_id).unwrap().unwrap().episode.state();
    assert_eq!(state(repo), Stage::Discovered);

    assert!(repo
        .update_episode_fields(
            url,
            "ext-1",
            &EpisodeUpdate::artifact(ArtifactKind::Audio, "/data/audio/ext-1.mp3"),
        )
        .unwrap());
    assert_eq!(state(repo), Stage::Downloaded);

    assert!(repo
        .update_episode_fields(
            url,
            "ext-1",
            &EpisodeUpdate::artifact(ArtifactKind::CleanTranscript, "/data/ext-1.md"),
        )
        .unwrap());
    let stored = repo.get_episode(episode_id).unwrap().unwrap().episode;
    assert_eq!(stored.state(), Stage::Cleaned);
    assert_eq!(stored.downsampled_audio_path, None);
    assert_eq!(stored.raw_transcript_path, None);

    let cleaned = repo.get_episodes_by_state(Stage::Cleaned, None).unwrap();
    assert_eq!(external_ids(&cleaned), vec!["ext-1"]);
    assert!(repo
        .get_episodes_by_state(Stage::Downloaded, None)
        .unwrap()
        .is_empty());
}

/// Targeted patches: unknown targets, no-op patches, clearing a path.
pub fn field_updates(repo: &dyn Repository) {
    let url = "https://ex.com/feed.xml";
    let mut show = podcast(url, "Patched");
    show.episodes = vec![dated_episode("ext-1", "One", 1)];
    repo.save(&show).unwrap();
    let audio = EpisodeUpdate::artifact(ArtifactKind::Audio, "/data/audio/1.mp3");

    assert!(!repo
        .update_episode_fields("https://ex.com/missing.xml", "ext-1", &audio)
        .unwrap());
    assert!(!repo.update_episode_fields(url, "missing", &audio).unwrap());
    assert!(!repo
        .update_episode_fields(url, "ext-1", &EpisodeUpdate::new())
        .unwrap());

    assert!(repo.update_episode_fields(url, "ext-1", &audio).unwrap());
    let id = episode_id(repo, url, "ext-1");
    let stamp = repo.get_episode(id).unwrap().unwrap().episode.updated_at;
    thread::sleep(TICK);
    assert!(!repo.update_episode_fields(url, "ext-1", &audio).unwrap());
    assert_eq!(repo.get_episode(id).unwrap().unwrap().episode.updated_at, stamp);

    let clear = EpisodeUpdate::new().with_artifact(ArtifactKind::Audio, None);
    assert!(repo.update_episode_fields(url, "ext-1", &clear).unwrap());
    let stored = repo.get_episode(id).unwrap().unwrap().episode;
    assert_eq!(stored.state(), Stage::Discovered);
    assert_eq!(stored.title, "One");
}

/// Empty artifact paths count as absent and are stored as null.
pub fn empty_paths_are_absent(repo: &dyn Repository) {
    let mut show = podcast("https://ex.com/feed.xml", "Empty");
    let mut episode = dated_episode("ext-1", "One", 1);
    episode.audio_path = Some(String::new());
    episode.summary_path = Some(String::new());
    show.episodes = vec![episode];
    let id = repo.save(&show).unwrap();

    let stored = &repo.get_episodes(id).unwrap()[0];
    assert_eq!(stored.state(), Stage::Discovered);
    assert_eq!(stored.audio_path, None);
    assert_eq!(stored.summary_path, None);
}

/// Index, slug and internal-id lookups, and cascading delete.
pub fn lookups_and_delete(repo: &dyn Repository) {
    seed_catalog(repo);
    repo.save_metadata(&podcast("https://late.ex.com/feed", "Late Show"))
        .unwrap();

    let title = |index| repo.get_by_index(index).unwrap().map(|p| p.title);
    assert_eq!(title(1).as_deref(), Some("Late Show"));
    assert_eq!(title(2).as_deref(), Some("Cooking Hour"));
    assert_eq!(title(3).as_deref(), Some("Tech Talk"));
    assert_eq!(title(0), None);
    assert_eq!(title(4), None);

    let tech_url = "https://tech.ex.com/feed.xml";
    let a1 = episode_id(repo, tech_url, "a1");
    let found = repo.get_episode(a1).unwrap().expect("episode by id");
    assert_eq!(found.podcast.url, tech_url);
    assert!(found.podcast.episodes.is_empty());
    assert_eq!(found.episode.external_id, "a1");

    let by_slugs = repo
        .get_episode_by_slugs("tech-talk", "rust-ownership")
        .unwrap()
        .expect("episode by slugs");
    assert_eq!(by_slugs.episode.id, Some(a1));
    assert!(repo
        .get_episode_by_slugs("cooking-hour", "rust-ownership")
        .unwrap()
        .is_none());

    let owner = repo.get_podcast_for_episode(a1).unwrap().expect("owner");
    assert_eq!(owner.title, "Tech Talk");
    assert!(repo.get_podcast_for_episode(a1 + 100).unwrap().is_none());
    assert!(repo.get_episode(a1 + 100).unwrap().is_none());
    assert!(repo.get_episodes(-1).unwrap().is_empty());

    repo.add_transcript_links(a1, &[transcript_link("https://tech.ex.com/a1.vtt")])
        .unwrap();
    assert!(repo.delete(tech_url).unwrap());
    assert!(!repo.delete(tech_url).unwrap());
    assert!(!repo.exists(tech_url).unwrap());
    assert!(repo.get_episode(a1).unwrap().is_none());
    assert!(repo.get_transcript_links(a1).unwrap().is_empty());
    assert_eq!(repo.get_all().unwrap().len(), 2);
}

/// Transcript links: insert-if-new, download marking, survival across saves.
pub fn transcript_links(repo: &dyn Repository) {
    let url = "https://ex.com/feed.xml";
    let mut show = podcast(url, "Linked");
    show.episodes = vec![dated_episode("ext-1", "One", 1)];
    repo.save(&show).unwrap();
    let id = episode_id(repo, url, "ext-1");

    let vtt = transcript_link("https://ex.com/1.vtt");
    let srt = transcript_link("https://ex.com/1.srt");
    let json = transcript_link("https://ex.com/1.json");
    assert_eq!(repo.add_transcript_links(id, &[vtt.clone(), srt]).unwrap(), 2);
    assert_eq!(repo.add_transcript_links(id, &[vtt, json]).unwrap(), 1);
    assert_eq!(repo.add_transcript_links(id + 100, &[transcript_link("https://x")]).unwrap(), 0);

    let links = repo.get_transcript_links(id).unwrap();
    assert_eq!(links.len(), 3);
    assert!(links.iter().all(|l| !l.is_downloaded()));
    let first = links[0].id.expect("link id");
    assert_eq!(links[0].url, "https://ex.com/1.vtt");

    assert!(repo.mark_transcript_downloaded(first, "/data/t/1.vtt").unwrap());
    assert!(!repo.mark_transcript_downloaded(first + 100, "/nowhere").unwrap());

    // Re-saving the podcast without links keeps the stored ones.
    repo.save(&show).unwrap();
    let links = repo.get_transcript_links(id).unwrap();
    assert_eq!(links.len(), 3);
    assert_eq!(links[0].downloaded_path.as_deref(), Some("/data/t/1.vtt"));
    let listed = repo.get_episode(id).unwrap().unwrap().episode;
    assert_eq!(listed.transcript_links, links);
}

/// Filters, sort keys, pagination and totals of `list_episodes`.
pub fn listing(repo: &dyn Repository) {
    seed_catalog(repo);
    let tech = podcast_id(repo, "https://tech.ex.com/feed.xml");
    let list = |query: EpisodeQuery| {
        let page = repo.list_episodes(&query).unwrap();
        (external_ids(&page.items), page.total)
    };

    assert_eq!(
        list(EpisodeQuery::new()),
        (strings(&["b2", "a2", "b1", "a1", "a3"]), 5)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_sort(EpisodeSort::PubDate, SortOrder::Asc)),
        (strings(&["a1", "b1", "a2", "b2", "a3"]), 5)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Asc)),
        (strings(&["a2", "a3", "b1", "a1", "b2"]), 5)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Desc)),
        (strings(&["b2", "a1", "b1", "a3", "a2"]), 5)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_search("RUST")),
        (strings(&["b1", "a1"]), 2)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_search("cooking")),
        (strings(&["b2", "b1"]), 2)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_search("100%")),
        (Vec::new(), 0)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_podcast_id(tech)),
        (strings(&["a2", "a1", "a3"]), 3)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_state(Stage::Discovered)),
        (strings(&["b2", "b1", "a3"]), 3)
    );
    assert_eq!(
        list(
            EpisodeQuery::new()
                .with_podcast_id(tech)
                .with_state(Stage::Discovered)
        ),
        (strings(&["a3"]), 1)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_published_range(Some(day(2)), Some(day(4)))),
        (strings(&["a2", "b1"]), 2)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_limit(2).with_offset(1)),
        (strings(&["a2", "b1"]), 5)
    );
    assert_eq!(
        list(EpisodeQuery::new().with_limit(2).with_offset(10)),
        (Vec::new(), 5)
    );

    let page = repo.list_episodes(&EpisodeQuery::new().with_limit(1)).unwrap();
    assert_eq!(page.limit, 1);
    assert_eq!(page.offset, 0);
    assert_eq!(page.items[0].podcast.title, "Cooking Hour");
}

/// Per-stage counts, globally and for one podcast.
pub fn state_counts(repo: &dyn Repository) {
    assert_eq!(repo.count_by_state(None).unwrap(), StateCounts::default());
    seed_catalog(repo);
    let tech = podcast_id(repo, "https://tech.ex.com/feed.xml");

    let all = repo.count_by_state(None).unwrap();
    assert_eq!(
        all,
        StateCounts {
            discovered: 3,
            downloaded: 1,
            summarized: 1,
            ..StateCounts::default()
        }
    );
    assert_eq!(all.total(), 5);

    let per_podcast = repo.count_by_state(Some(tech)).unwrap();
    assert_eq!(per_podcast.discovered, 1);
    assert_eq!(per_podcast.downloaded, 1);
    assert_eq!(per_podcast.summarized, 1);
    assert_eq!(repo.count_by_state(Some(tech + 100)).unwrap(), StateCounts::default());
}

/// The most recently touched episode comes first.
pub fn recent_activity(repo: &dyn Repository) {
    seed_catalog(repo);
    thread::sleep(TICK);
    repo.update_episode_fields(
        "https://tech.ex.com/feed.xml",
        "a3",
        &EpisodeUpdate::artifact(ArtifactKind::Audio, "/data/audio/a3.mp3"),
    )
    .unwrap();

    let recent = repo.get_recent_activity(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].episode.external_id, "a3");
    assert_eq!(recent[0].episode.state(), Stage::Downloaded);
}

/// `save_all` writes every podcast or none.
pub fn save_all_is_atomic(repo: &dyn Repository) {
    repo.save_metadata(&podcast("https://ex.com/taken.xml", "Taken"))
        .unwrap();

    let mut fresh = podcast("https://ex.com/fresh.xml", "Fresh");
    fresh.episodes = vec![dated_episode("f-1", "Fresh one", 1)];
    let mut clash = podcast("https://ex.com/clash.xml", "Clash");
    clash.slug = Some("taken".to_string());

    let err = repo.save_all(&[fresh.clone(), clash]).unwrap_err();
    assert!(matches!(err, RepositoryError::Constraint(_)), "got {:?}", err);
    assert!(!repo.exists("https://ex.com/fresh.xml").unwrap(), "partial batch written");

    let other = podcast("https://ex.com/other.xml", "Other");
    let ids = repo.save_all(&[fresh, other]).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], podcast_id(repo, "https://ex.com/fresh.xml"));
    assert_eq!(ids[1], podcast_id(repo, "https://ex.com/other.xml"));
    assert_eq!(repo.get_episodes(ids[0]).unwrap().len(), 1);
}

/// Ids freed by deletes are never handed to new rows, so a worker holding a
/// stale id cannot touch someone else's episode.
pub fn ids_never_reused(repo: &dyn Repository) {
    let url = "https://ex.com/feed.xml";
    let mut show = podcast(url, "Stable Ids");
    show.episodes = vec![dated_episode("e1", "One", 1), dated_episode("e2", "Two", 2)];
    let first_podcast = repo.save(&show).unwrap();
    let e1 = episode_id(repo, url, "e1");
    let e2 = episode_id(repo, url, "e2");
    repo.add_transcript_links(e2, &[transcript_link("https://ex.com/2.vtt")])
        .unwrap();
    let old_link = repo.get_transcript_links(e2).unwrap()[0]
        .id
        .expect("link id");

    show.episodes = vec![dated_episode("e1", "One", 1), dated_episode("e3", "Three", 3)];
    repo.save(&show).unwrap();
    let e3 = episode_id(repo, url, "e3");
    assert!(e3 > e2, "pruned episode id {} handed out again as {}", e2, e3);
    assert_eq!(episode_id(repo, url, "e1"), e1);
    assert!(repo.get_episode(e2).unwrap().is_none());
    assert!(!repo
        .mark_failed(e2, "download", "stale worker", FailureKind::Transient)
        .unwrap());
    assert!(repo.get_episode(e3).unwrap().unwrap().episode.failure.is_none());

    repo.add_transcript_links(e3, &[transcript_link("https://ex.com/3.vtt")])
        .unwrap();
    let new_link = repo.get_transcript_links(e3).unwrap()[0]
        .id
        .expect("link id");
    assert!(new_link > old_link, "link id reused");
    assert!(!repo.mark_transcript_downloaded(old_link, "/stale").unwrap());

    assert!(repo.delete(url).unwrap());
    let second_podcast = repo.save(&show).unwrap();
    assert!(second_podcast > first_podcast, "podcast id reused");
    assert!(repo.get_by_id(first_podcast).unwrap().is_none());
    assert!(episode_id(repo, url, "e1") > e3);
}

/// Title sort and search fold ASCII letters only and compare bytewise;
/// LIKE wildcards in search text match literally; the published range
/// includes its start and excludes its end.
pub fn text_ordering_and_matching(repo: &dyn Repository) {
    repo.save(&text_cases()).unwrap();
    let list = |query: EpisodeQuery| external_ids(&repo.list_episodes(&query).unwrap().items);

    assert_eq!(
        list(EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Asc)),
        strings(&["t7", "t6", "t1", "t2", "t9", "t8", "t5", "t3", "t4"])
    );
    assert_eq!(
        list(EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Desc)),
        strings(&["t4", "t3", "t5", "t8", "t9", "t2", "t1", "t6", "t7"])
    );

    assert_eq!(list(EpisodeQuery::new().with_search("BANANA")), strings(&["t2"]));
    assert_eq!(list(EpisodeQuery::new().with_search("ÉMILE")), strings(&["t3"]));
    assert!(list(EpisodeQuery::new().with_search("émile")).is_empty());
    assert_eq!(list(EpisodeQuery::new().with_search("100%")), strings(&["t6"]));
    assert_eq!(list(EpisodeQuery::new().with_search("e_c")), strings(&["t8"]));

    assert_eq!(
        list(EpisodeQuery::new().with_published_range(Some(day(2)), Some(day(4)))),
        strings(&["t3", "t2"])
    );
    assert_eq!(
        list(EpisodeQuery::new().with_published_range(Some(day(9)), None)),
        strings(&["t9"])
    );
    assert_eq!(
        list(EpisodeQuery::new().with_published_range(None, Some(day(2)))),
        strings(&["t1"])
    );
}

/// Results of a fixed set of queries over [`catalog`] and [`text_cases`],
/// with store-assigned ids replaced by URLs and external ids so backends can
/// be compared.
pub fn listing_signature(repo: &dyn Repository) -> Vec<String> {
    seed_catalog(repo);
    repo.save(&text_cases()).unwrap();
    let tech = podcast_id(repo, "https://tech.ex.com/feed.xml");
    let queries = [
        EpisodeQuery::new(),
        EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Asc),
        EpisodeQuery::new().with_sort(EpisodeSort::Title, SortOrder::Desc),
        EpisodeQuery::new().with_sort(EpisodeSort::PubDate, SortOrder::Asc),
        EpisodeQuery::new().with_search("rust"),
        EpisodeQuery::new().with_search("ÉMILE"),
        EpisodeQuery::new().with_search("100%"),
        EpisodeQuery::new().with_search("e_c"),
        EpisodeQuery::new().with_published_range(Some(day(2)), Some(day(4))),
        EpisodeQuery::new().with_podcast_id(tech),
        EpisodeQuery::new().with_limit(2).with_offset(2),
    ];
    let mut lines = Vec::new();
    for query in &queries {
        let page = repo.list_episodes(query).unwrap();
        let items: Vec<String> = page
            .items
            .iter()
            .map(|item| format!("{}#{}", item.podcast.url, item.episode.external_id))
            .collect();
        lines.push(format!("{} | {}", page.total, items.join(", ")));
    }
    for stage in Stage::ALL {
        let ids = external_ids(&repo.get_episodes_by_state(stage, None).unwrap());
        lines.push(format!("{}: {}", stage, ids.join(", ")));
    }
    lines.push(format!("{:?}", repo.count_by_state(None).unwrap()));
    lines
}

fn strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
