//! Podcast aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{episode_order, slugify, Episode, Stage};

/// A podcast feed and its episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    #[serde(default)]
    pub id: Option<i64>,
    /// Feed URL; globally unique.
    pub url: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub last_processed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Ordered by publish date, newest first.
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl Podcast {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: None,
            url: url.into(),
            slug: slugify(&title),
            title,
            description: None,
            image_url: None,
            language: None,
            category: None,
            subcategory: None,
            last_processed: None,
            created_at: None,
            updated_at: None,
            episodes: Vec::new(),
        }
    }

    /// Copy of the podcast without its episodes.
    pub fn metadata(&self) -> Podcast {
        Podcast {
            episodes: Vec::new(),
            ..self.clone()
        }
    }

    /// Compare the stored metadata of two podcasts, ignoring ids,
    /// timestamps and episodes.
    pub fn same_metadata(&self, other: &Podcast) -> bool {
        self.url == other.url
            && self.slug == other.slug
            && self.title == other.title
            && self.description == other.description
            && self.image_url == other.image_url
            && self.language == other.language
            && self.category == other.category
            && self.subcategory == other.subcategory
            && self.last_processed == other.last_processed
    }

    pub fn episode(&self, external_id: &str) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.external_id == external_id)
    }

    pub fn episode_mut(&mut self, external_id: &str) -> Option<&mut Episode> {
        self.episodes
            .iter_mut()
            .find(|e| e.external_id == external_id)
    }

    /// Insert an episode or replace the one with the same external id.
    pub fn upsert_episode(&mut self, episode: Episode) {
        match self.episode_mut(&episode.external_id) {
            Some(existing) => {
                let id = existing.id;
                let created_at = existing.created_at;
                *existing = Episode {
                    id: episode.id.or(id),
                    created_at: episode.created_at.or(created_at),
                    ..episode
                };
            }
            None => self.episodes.push(episode),
        }
        self.sort_episodes();
    }

    pub fn sort_episodes(&mut self) {
        self.episodes.sort_by(episode_order);
    }

    /// Episodes currently at the given stage.
    pub fn episodes_in_state(&self, state: Stage) -> impl Iterator<Item = &Episode> {
        self.episodes.iter().filter(move |e| e.state() == state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_generates_slug() {
        let podcast = Podcast::new("https://ex.com/feed.xml", "The Test Show");
        assert_eq!(podcast.slug.as_deref(), Some("the-test-show"));
        assert!(podcast.episodes.is_empty());
    }

    #[test]
    fn test_upsert_episode_replaces_by_external_id() {
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        let mut first = Episode::new("ext-1", "One");
        first.id = Some(7);
        podcast.upsert_episode(first);

        let mut replacement = Episode::new("ext-1", "One (remastered)");
        replacement.audio_path = Some("/a.mp3".to_string());
        podcast.upsert_episode(replacement);

        assert_eq!(podcast.episodes.len(), 1);
        let episode = podcast.episode("ext-1").unwrap();
        assert_eq!(episode.id, Some(7));
        assert_eq!(episode.title, "One (remastered)");
        assert_eq!(podcast.episodes_in_state(Stage::Downloaded).count(), 1);
    }

    #[test]
    fn test_upsert_keeps_publish_order() {
        let mut podcast = Podcast::new("https://ex.com/feed.xml", "Test");
        for (ext, month) in [("jan", 1), ("mar", 3), ("feb", 2)] {
            let mut episode = Episode::new(ext, ext);
            episode.pub_date = Some(Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap());
            podcast.upsert_episode(episode);
        }
        let order: Vec<_> = podcast
            .episodes
            .iter()
            .map(|e| e.external_id.as_str())
            .collect();
        assert_eq!(order, vec!["mar", "feb", "jan"]);
    }

    #[test]
    fn test_same_metadata() {
        let a = Podcast::new("https://ex.com/feed.xml", "Test");
        let mut b = a.clone();
        b.id = Some(3);
        b.episodes.push(Episode::new("x", "X"));
        assert!(a.same_metadata(&b));
        b.language = Some("en".to_string());
        assert!(!a.same_metadata(&b));
        assert!(b.metadata().episodes.is_empty());
    }
}
