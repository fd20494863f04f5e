//! In-memory form of the JSON store and the upsert rules applied to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Episode, Podcast, TranscriptLink};
use crate::repository::{normalized, normalized_podcast, RepositoryError, Result};

/// Next id to hand out per entity. Only ever grows, so an id freed by a
/// delete is never given to another row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NextIds {
    pub podcast: i64,
    pub episode: i64,
    pub link: i64,
}

impl Default for NextIds {
    fn default() -> Self {
        Self {
            podcast: 1,
            episode: 1,
            link: 1,
        }
    }
}

impl NextIds {
    /// One past the highest id in use for each entity.
    fn seeded_from(podcasts: &[Podcast]) -> Self {
        let episodes = || podcasts.iter().flat_map(|p| p.episodes.iter());
        Self {
            podcast: podcasts.iter().filter_map(|p| p.id).max().unwrap_or(0) + 1,
            episode: episodes().filter_map(|e| e.id).max().unwrap_or(0) + 1,
            link: episodes()
                .flat_map(|e| e.transcript_links.iter())
                .filter_map(|l| l.id)
                .max()
                .unwrap_or(0)
                + 1,
        }
    }

    /// Field-wise maximum.
    fn max(self, other: NextIds) -> Self {
        Self {
            podcast: self.podcast.max(other.podcast),
            episode: self.episode.max(other.episode),
            link: self.link.max(other.link),
        }
    }

    fn take(counter: &mut i64) -> i64 {
        let id = *counter;
        *counter += 1;
        id
    }
}

/// The whole database: every podcast with nested episodes and links.
#[derive(Debug, Default)]
pub(crate) struct Document {
    pub podcasts: Vec<Podcast>,
    pub next_ids: NextIds,
}

/// Outcome of an upsert against the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Upserted {
    pub id: i64,
    pub written: bool,
}

impl Document {
    /// Build a document from stored podcasts and the persisted counters, if
    /// any. Counters never drop below one past the highest id present.
    pub fn new(mut podcasts: Vec<Podcast>, saved: Option<NextIds>) -> Self {
        podcasts.sort_by_key(|p| p.id);
        let seeded = NextIds::seeded_from(&podcasts);
        let next_ids = saved.map_or(seeded, |saved| saved.max(seeded));
        Self { podcasts, next_ids }
    }

    /// Every `(podcast, episode)` pair.
    pub fn episodes(&self) -> impl Iterator<Item = (&Podcast, &Episode)> {
        self.podcasts
            .iter()
            .flat_map(|p| p.episodes.iter().map(move |e| (p, e)))
    }

    pub fn podcast_index_by_url(&self, url: &str) -> Option<usize> {
        self.podcasts.iter().position(|p| p.url == url)
    }

    pub fn podcast_index_by_id(&self, id: i64) -> Option<usize> {
        self.podcasts.iter().position(|p| p.id == Some(id))
    }

    /// `(podcast index, episode index)` of an episode by internal id.
    pub fn locate_episode(&self, episode_id: i64) -> Option<(usize, usize)> {
        self.podcasts.iter().enumerate().find_map(|(pi, p)| {
            p.episodes
                .iter()
                .position(|e| e.id == Some(episode_id))
                .map(|ei| (pi, ei))
        })
    }

    pub fn locate_link(&self, link_id: i64) -> Option<(usize, usize, usize)> {
        for (pi, podcast) in self.podcasts.iter().enumerate() {
            for (ei, episode) in podcast.episodes.iter().enumerate() {
                if let Some(li) = episode
                    .transcript_links
                    .iter()
                    .position(|l| l.id == Some(link_id))
                {
                    return Some((pi, ei, li));
                }
            }
        }
        None
    }

    /// Insert or update podcast metadata keyed by URL. Episodes are untouched.
    pub fn upsert_podcast(
        &mut self,
        incoming: &Podcast,
        now: DateTime<Utc>,
    ) -> Result<(usize, Upserted)> {
        let incoming = normalized_podcast(incoming);
        if let Some(slug) = incoming.slug.as_deref() {
            let taken = self
                .podcasts
                .iter()
                .any(|p| p.url != incoming.url && p.slug.as_deref() == Some(slug));
            if taken {
                return Err(RepositoryError::Constraint(format!(
                    "podcast slug '{}' is already in use",
                    slug
                )));
            }
        }

        match self.podcast_index_by_url(&incoming.url) {
            Some(index) => {
                let existing = &mut self.podcasts[index];
                let id = existing.id.unwrap_or_default();
                if existing.same_metadata(&incoming) {
                    return Ok((index, Upserted { id, written: false }));
                }
                let episodes = std::mem::take(&mut existing.episodes);
                *existing = Podcast {
                    id: existing.id,
                    created_at: existing.created_at,
                    updated_at: Some(now),
                    episodes,
                    ..incoming
                };
                Ok((index, Upserted { id, written: true }))
            }
            None => {
                let id = NextIds::take(&mut self.next_ids.podcast);
                self.podcasts.push(Podcast {
                    id: Some(id),
                    created_at: Some(now),
                    updated_at: Some(now),
                    ..incoming
                });
                Ok((self.podcasts.len() - 1, Upserted { id, written: true }))
            }
        }
    }

    /// Insert or update one episode of the podcast at `podcast_index`,
    /// keyed by external id, then merge its transcript links.
    pub fn upsert_episode(
        &mut self,
        podcast_index: usize,
        incoming: &Episode,
        now: DateTime<Utc>,
    ) -> Upserted {
        let incoming = normalized(incoming);
        let next_ids = &mut self.next_ids;
        let podcast = &mut self.podcasts[podcast_index];
        let podcast_id = podcast.id;
        let existing = podcast
            .episodes
            .iter()
            .position(|e| e.external_id == incoming.external_id);

        let (index, written) = match existing {
            Some(index) => {
                let current = &mut podcast.episodes[index];
                if current.same_content(&incoming) {
                    (index, false)
                } else {
                    let links = std::mem::take(&mut current.transcript_links);
                    *current = Episode {
                        id: current.id,
                        podcast_id,
                        created_at: current.created_at,
                        updated_at: Some(now),
                        transcript_links: links,
                        ..incoming.clone()
                    };
                    (index, true)
                }
            }
            None => {
                podcast.episodes.push(Episode {
                    id: Some(NextIds::take(&mut next_ids.episode)),
                    podcast_id,
                    created_at: Some(now),
                    updated_at: Some(now),
                    transcript_links: Vec::new(),
                    ..incoming.clone()
                });
                (podcast.episodes.len() - 1, true)
            }
        };

        let episode = &mut podcast.episodes[index];
        let id = episode.id.unwrap_or_default();
        for link in &incoming.transcript_links {
            merge_link(episode, link, &mut next_ids.link, true);
        }
        podcast.sort_episodes();
        Upserted { id, written }
    }

    /// Remove episodes of a podcast whose external id is not in `keep`.
    pub fn retain_episodes(&mut self, podcast_index: usize, keep: &[&str]) -> usize {
        let episodes = &mut self.podcasts[podcast_index].episodes;
        let before = episodes.len();
        episodes.retain(|e| keep.contains(&e.external_id.as_str()));
        before - episodes.len()
    }

    /// Add links not yet known by URL. Returns how many were new.
    pub fn add_links(&mut self, episode_id: i64, links: &[TranscriptLink]) -> Option<usize> {
        let (pi, ei) = self.locate_episode(episode_id)?;
        let episode = &mut self.podcasts[pi].episodes[ei];
        let mut added = 0;
        for link in links {
            if merge_link(episode, link, &mut self.next_ids.link, false) {
                added += 1;
            }
        }
        Some(added)
    }
}

/// Merge one link into an episode. Returns whether it was new.
///
/// With `update_existing`, a known link takes the incoming mime type and
/// language, and the incoming downloaded path when one is given.
fn merge_link(
    episode: &mut Episode,
    link: &TranscriptLink,
    next_id: &mut i64,
    update_existing: bool,
) -> bool {
    let episode_id = episode.id;
    match episode
        .transcript_links
        .iter_mut()
        .find(|l| l.url == link.url)
    {
        Some(existing) => {
            if update_existing {
                existing.mime_type = link.mime_type.clone();
                existing.language = link.language.clone();
                if link.downloaded_path.is_some() {
                    existing.downloaded_path = link.downloaded_path.clone();
                }
            }
            false
        }
        None => {
            episode.transcript_links.push(TranscriptLink {
                id: Some(NextIds::take(next_id)),
                episode_id,
                ..link.clone()
            });
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::now;

    fn document_with_podcast() -> (Document, usize) {
        let mut doc = Document::default();
        let podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        let (index, _) = doc.upsert_podcast(&podcast, now()).unwrap();
        (doc, index)
    }

    #[test]
    fn test_upsert_podcast_assigns_ids() {
        let (mut doc, _) = document_with_podcast();
        let other = Podcast::new("https://ex.com/other.xml", "Other");
        let (_, upserted) = doc.upsert_podcast(&other, now()).unwrap();
        assert_eq!(upserted.id, 2);
        assert!(upserted.written);
    }

    #[test]
    fn test_upsert_podcast_unchanged() {
        let (mut doc, _) = document_with_podcast();
        let stamp = doc.podcasts[0].updated_at;
        let podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        let (_, upserted) = doc.upsert_podcast(&podcast, now()).unwrap();
        assert!(!upserted.written);
        assert_eq!(doc.podcasts[0].updated_at, stamp);
    }

    #[test]
    fn test_duplicate_slug_rejected() {
        let (mut doc, _) = document_with_podcast();
        let clash = Podcast::new("https://ex.com/other.xml", "Test");
        let err = doc.upsert_podcast(&clash, now()).unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
    }

    #[test]
    fn test_upsert_episode_and_links() {
        let (mut doc, index) = document_with_podcast();
        let mut episode = Episode::new("ext-1", "One");
        episode
            .transcript_links
            .push(TranscriptLink::new("https://ex.com/1.vtt", "text/vtt"));

        let first = doc.upsert_episode(index, &episode, now());
        assert!(first.written);
        let second = doc.upsert_episode(index, &episode, now());
        assert_eq!(second, Upserted { id: first.id, written: false });

        let stored = &doc.podcasts[index].episodes[0];
        assert_eq!(stored.podcast_id, doc.podcasts[index].id);
        assert_eq!(stored.transcript_links.len(), 1);
        assert_eq!(stored.transcript_links[0].episode_id, Some(first.id));

        let added = doc
            .add_links(
                first.id,
                &[
                    TranscriptLink::new("https://ex.com/1.vtt", "text/vtt"),
                    TranscriptLink::new("https://ex.com/1.srt", "application/x-subrip"),
                ],
            )
            .unwrap();
        assert_eq!(added, 1);
        assert!(doc.locate_link(2).is_some());
    }

    #[test]
    fn test_retain_episodes() {
        let (mut doc, index) = document_with_podcast();
        for ext in ["a", "b", "c"] {
            doc.upsert_episode(index, &Episode::new(ext, ext), now());
        }
        assert_eq!(doc.retain_episodes(index, &["b"]), 2);
        assert_eq!(doc.podcasts[index].episodes.len(), 1);
    }

    #[test]
    fn test_deleted_ids_are_not_reused() {
        let (mut doc, index) = document_with_podcast();
        for ext in ["a", "b"] {
            doc.upsert_episode(index, &Episode::new(ext, ext), now());
        }
        let dropped = doc.podcasts[index].episode("b").unwrap().id;
        assert_eq!(dropped, Some(2));
        doc.retain_episodes(index, &["a"]);

        let added = doc.upsert_episode(index, &Episode::new("c", "c"), now());
        assert_eq!(added.id, 3);
        assert!(doc.locate_episode(2).is_none());

        doc.podcasts.clear();
        let (_, upserted) = doc
            .upsert_podcast(&Podcast::new("https://ex.com/new.xml", "New"), now())
            .unwrap();
        assert_eq!(upserted.id, 2);
    }

    #[test]
    fn test_saved_counters_only_raise_seeded_ones() {
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        podcast.id = Some(5);
        let mut episode = Episode::new("ext-1", "One");
        episode.id = Some(9);
        podcast.episodes.push(episode);

        let fresh = Document::new(vec![podcast.clone()], None);
        assert_eq!(
            fresh.next_ids,
            NextIds {
                podcast: 6,
                episode: 10,
                link: 1
            }
        );

        let saved = NextIds {
            podcast: 3,
            episode: 40,
            link: 7,
        };
        let doc = Document::new(vec![podcast], Some(saved));
        assert_eq!(
            doc.next_ids,
            NextIds {
                podcast: 6,
                episode: 40,
                link: 7
            }
        );
    }
}
